//! End-to-end run: deposit → sync → withdraw against a deployed mixer contract.
//!
//! Runs the full mixer lifecycle with a real Groth16 proof:
//!   1. Generates a fresh identity and deposits one denomination against its commitment
//!   2. Rebuilds the commitment tree from LeafAdded events and checks it against the contract
//!   3. Proves the withdrawal (SP1), verifies it locally, and submits it
//!   4. Verifies on-chain state (nullifier spent, recipient paid)
//!
//! Usage:
//!   SP1_PROVER=network cargo run --release -p mixer-script --bin e2e
//!
//! Required env vars (from .env):
//!   RPC_URL              RPC endpoint
//!   PRIVATE_KEY          Funded wallet private key (depositor and relayer)
//!   POOL_ADDRESS         Deployed mixer address
//!   CIRCUIT_MANIFEST     manifest.json written by `mixer vkey`
//!   NETWORK_PRIVATE_KEY  Succinct Prover Network API key
//!
//! Optional env vars:
//!   TREE_LEVELS          Merkle tree depth (default: 20)
//!   DEPLOY_BLOCK         First block to scan for LeafAdded (default: 0)
//!   TOKEN_ADDRESS        ERC20 held by the pool; deposits approve it first (default: native)
//!   FEE_WEI              Relayer fee, in the pool's asset (default: 0)
//!   RECIPIENT            Withdrawal recipient. If not set, a random address is used.
//!   PROOF_TIMEOUT_SECS   Give up on proving after this long

use std::sync::Arc;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use anyhow::{bail, ensure, Context, Result};
use mixer_lib::{derive_nullifier_hash, Identity, Signal};
use mixer_script::{
    ArtifactManifest, CancelHandle, EvmLedger, Ledger, MixerConfig, ProofService, ProverKind,
    Sp1Backend, TreeReplica, Withdrawal, WithdrawalFlow,
};
use rand::Rng;

#[tokio::main]
async fn main() -> Result<()> {
    sp1_sdk::utils::setup_logger();
    let config = MixerConfig::from_env()?;

    println!("\n=== Mixer E2E Test ===\n");

    if config.prover == ProverKind::Mock {
        bail!("the on-chain verifier needs real proofs; unset MIXER_PROVER=mock");
    }
    let rpc_url = config.rpc_url()?;
    let private_key = config.private_key()?;
    let pool_addr = Address::from(config.pool_address()?);
    let manifest = config.circuit_manifest()?;

    let recipient: Address = match std::env::var("RECIPIENT") {
        Ok(s) => s.parse().context("invalid RECIPIENT")?,
        Err(_) => Address::from(rand::thread_rng().gen::<[u8; 20]>()),
    };
    let signer: PrivateKeySigner = private_key.parse().context("invalid PRIVATE_KEY")?;
    let relayer = signer.address();

    println!("RPC:              {rpc_url}");
    println!("Pool:             {pool_addr}");
    println!("Tree:             {} levels", config.tree_levels);
    println!("Recipient:        {recipient}");
    println!("Relayer:          {relayer}");
    println!("Fee:              {} wei\n", config.fee_wei);

    // -----------------------------------------------------------------------
    // [1] Artifacts and ledger
    // -----------------------------------------------------------------------
    let artifacts = ArtifactManifest::load(manifest)?;
    ensure!(
        artifacts.schema.tree_depth == config.tree_levels,
        "circuit {} expects depth {}, TREE_LEVELS={}",
        artifacts.circuit(),
        artifacts.schema.tree_depth,
        config.tree_levels
    );
    println!("[1] Circuit: {}", artifacts.circuit());

    let backend = Arc::new(Sp1Backend::from_env());
    let ledger = Arc::new(
        EvmLedger::new(rpc_url, private_key, pool_addr, Arc::clone(&backend))?
            .with_asset(config.asset()),
    );
    let denomination = ledger.denomination().await?;
    println!("    Denomination: {denomination} ({})", ledger.asset());

    // -----------------------------------------------------------------------
    // [2] Identity and deposit
    // -----------------------------------------------------------------------
    let identity = Identity::generate(&mut rand::rngs::OsRng)?;
    let commitment = identity.commitment();
    println!("[2] Commitment: 0x{}", hex::encode(commitment.0));

    println!("    Depositing {denomination}...");
    let tx = ledger.deposit(&commitment, denomination).await?;
    println!("    Deposit tx: 0x{}", hex::encode(tx));

    // -----------------------------------------------------------------------
    // [3] Rebuild the tree from events
    // -----------------------------------------------------------------------
    println!("[3] Building local Merkle tree from LeafAdded events...");
    let replica = Arc::new(TreeReplica::new(config.tree_levels)?);
    let events = ledger.leaf_events(config.deploy_block).await?;
    println!("    Leaf events: {}", events.len());
    replica.apply_all(events)?;

    let index = replica.index_of(&commitment)?;
    println!("    Our leaf: {index}");

    let mut service = ProofService::new(Arc::clone(&backend));
    if let Some(timeout) = config.proof_timeout {
        service = service.with_timeout(timeout);
    }
    let flow = WithdrawalFlow::from_artifacts(
        Arc::clone(&ledger),
        Arc::clone(&replica),
        service,
        &artifacts,
    )?;
    flow.sync().await?;
    println!("    Root verified: 0x{}...", hex::encode(&replica.root()[..8]));

    // -----------------------------------------------------------------------
    // [4] Prove
    // -----------------------------------------------------------------------
    let signal = Signal::new(recipient.0 .0, config.fee_wei, relayer.0 .0);
    let mut withdrawal = Withdrawal::new(commitment, signal);

    println!("[4] Generating withdraw Groth16 proof (this may take a few minutes)...");
    let proof = flow
        .prepare(&mut withdrawal, &identity, &CancelHandle::new())
        .await?;
    println!("    Proof verified locally ({} bytes)", proof.bytes.len());

    // -----------------------------------------------------------------------
    // [5] Submit
    // -----------------------------------------------------------------------
    println!("[5] Submitting withdrawal on-chain...");
    let balance_before = ledger.balance(recipient).await?;
    let receipt = flow.submit(&mut withdrawal).await?;
    match receipt.tx_hash {
        Some(tx) => println!("    Withdraw tx: 0x{}", hex::encode(tx)),
        None => println!("    Withdrawal found on-chain after a lost response"),
    }

    // -----------------------------------------------------------------------
    // [6] Final state
    // -----------------------------------------------------------------------
    println!("\n[6] Verifying final state...");
    let nullifier_hash =
        derive_nullifier_hash(&identity.identity_nullifier, &ledger.external_nullifier());
    ensure!(nullifier_hash == receipt.nullifier_hash, "receipt nullifier hash differs");
    ensure!(ledger.is_spent(&nullifier_hash).await?, "nullifier not marked spent");
    println!("    Nullifier spent: OK");

    let balance_after = ledger.balance(recipient).await?;
    let received = balance_after - balance_before;
    let expected = denomination - alloy::primitives::U256::from(config.fee_wei);
    ensure!(
        received == expected,
        "recipient received {received}, expected {expected}"
    );
    println!("    Recipient received: {received}");

    println!("\n=== E2E Test Passed! ===\n");
    Ok(())
}

//! Mixer proving CLI.
//!
//! Subcommands:
//!   identity    - Generate a new identity and print its commitment
//!   commitment  - Print the commitment of an existing identity
//!   prove       - Generate a withdrawal proof from a leaves snapshot
//!   verify      - Verify a proof envelope against its public signals
//!   vkey        - Run SP1 setup for the withdraw program and write the artifact manifest
//!
//! Environment (see `config`): CIRCUIT_MANIFEST, MIXER_PROVER, PROOF_TIMEOUT_SECS, SP1_PROVER.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use mixer_lib::{
    CommitmentTree, ExternalNullifier, Identity, Signal, WitnessBuilder, WITHDRAW_V1,
};
use mixer_script::config::{decode_hex, parse_address};
use mixer_script::{
    ArtifactManifest, MixerConfig, MockBackend, Proof, ProofService, ProverKind, ProvingBackend,
    ProvingKey, Sp1Backend, VerifyingKey,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "mixer")]
#[command(about = "Withdrawal proofs for the anonymous mixer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity
    Identity {
        /// Path to write the identity JSON (keep it secret)
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the deposit commitment of an identity
    Commitment {
        #[arg(long)]
        identity: PathBuf,
    },
    /// Generate a withdrawal proof
    Prove {
        /// Path to the identity JSON
        #[arg(long)]
        identity: PathBuf,
        /// Path to a JSON array of hex leaves, in insertion order
        #[arg(long)]
        leaves: PathBuf,
        /// Mixer contract address (the external nullifier)
        #[arg(long)]
        pool: String,
        #[arg(long)]
        recipient: String,
        /// Relayer fee in wei
        #[arg(long, default_value = "0")]
        fee: u128,
        #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
        relayer: String,
        /// Path to write proof output JSON
        #[arg(long)]
        output: PathBuf,
        /// Just execute without generating a real proof (fast, for testing)
        #[arg(long, default_value = "false")]
        execute_only: bool,
    },
    /// Verify a proof produced by `prove`
    Verify {
        #[arg(long)]
        proof: PathBuf,
    },
    /// Run SP1 setup and write the artifact manifest
    Vkey {
        /// Path to the withdraw program ELF
        #[arg(long)]
        program: PathBuf,
        /// Directory to write the keys and manifest.json into
        #[arg(long)]
        out_dir: PathBuf,
    },
}

#[derive(Serialize)]
struct ProofOutput {
    /// Circuit the proof was generated under
    circuit: String,
    /// Hex-encoded proof envelope (for `verify`)
    envelope: String,
    /// Hex-encoded proof bytes for on-chain verification
    proof: String,
    /// Hex-encoded public signals (root, nullifier hash, signal hash, external nullifier)
    public_values: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    sp1_sdk::utils::setup_logger();
    let cli = Cli::parse();
    let config = MixerConfig::from_env()?;

    match cli.command {
        Commands::Identity { output } => {
            let identity = Identity::generate(&mut rand::rngs::OsRng)?;
            fs::write(&output, serde_json::to_string_pretty(&identity)?)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Identity written to {}", output.display());
            println!("Commitment: 0x{}", hex::encode(identity.commitment().0));
        }
        Commands::Commitment { identity } => {
            let identity = read_identity(&identity)?;
            println!("0x{}", hex::encode(identity.commitment().0));
        }
        Commands::Prove {
            identity,
            leaves,
            pool,
            recipient,
            fee,
            relayer,
            output,
            execute_only,
        } => {
            let request = ProveRequest {
                identity: read_identity(&identity)?,
                leaves: read_leaves(&leaves)?,
                pool: parse_address(&pool).context("--pool")?,
                signal: Signal::new(
                    parse_address(&recipient).context("--recipient")?,
                    fee,
                    parse_address(&relayer).context("--relayer")?,
                ),
                tree_levels: config.tree_levels,
            };
            match config.prover {
                ProverKind::Mock => {
                    ensure!(!execute_only, "--execute-only needs the SP1 prover");
                    let backend = MockBackend::new();
                    let (pk, vk) = backend.setup(WITHDRAW_V1.version);
                    prove(&config, Arc::new(backend), pk, vk, request, &output).await?;
                }
                ProverKind::Sp1 => {
                    let artifacts = ArtifactManifest::load(config.circuit_manifest()?)?;
                    let backend = Sp1Backend::from_env();
                    if execute_only {
                        let witness = request.witness(&artifacts.proving_key)?;
                        let (public_values, cycles) =
                            backend.execute(&artifacts.program, &witness)?;
                        println!("[withdraw] Execution successful. Cycles: {cycles}");
                        println!("[withdraw] Public values: 0x{}", hex::encode(public_values));
                        return Ok(());
                    }
                    prove(
                        &config,
                        Arc::new(backend),
                        artifacts.proving_key,
                        artifacts.verifying_key,
                        request,
                        &output,
                    )
                    .await?;
                }
            }
        }
        Commands::Verify { proof } => {
            let output: serde_json::Value = serde_json::from_str(
                &fs::read_to_string(&proof).with_context(|| format!("reading {}", proof.display()))?,
            )?;
            let envelope = output["envelope"]
                .as_str()
                .context("proof file has no envelope")?;
            let envelope = hex::decode(envelope.trim_start_matches("0x"))?;
            let proof = Proof::decode(&envelope)?;

            let valid = match config.prover {
                ProverKind::Mock => {
                    let backend = MockBackend::new();
                    let (_, vk) = backend.setup(proof.circuit.version);
                    ProofService::new(Arc::new(backend)).verify(&vk, &proof, &proof.public_signals)?
                }
                ProverKind::Sp1 => {
                    let artifacts = ArtifactManifest::load(config.circuit_manifest()?)?;
                    ProofService::new(Arc::new(Sp1Backend::from_env())).verify(
                        &artifacts.verifying_key,
                        &proof,
                        &proof.public_signals,
                    )?
                }
            };
            println!("[withdraw] Circuit: {}", proof.circuit);
            println!("[withdraw] Root: 0x{}", hex::encode(proof.public_signals.root));
            println!(
                "[withdraw] Nullifier hash: 0x{}",
                hex::encode(proof.public_signals.nullifier_hash.0)
            );
            ensure!(valid, "proof does not verify");
            println!("[withdraw] Proof verified");
        }
        Commands::Vkey { program, out_dir } => {
            let elf = fs::read(&program).with_context(|| format!("reading {}", program.display()))?;
            let backend = Sp1Backend::from_env();
            let (pk, vk) = backend.setup(&elf, WITHDRAW_V1.version)?;
            fs::create_dir_all(&out_dir)?;
            let manifest = ArtifactManifest::write(&out_dir, "withdraw", &elf, &pk, &vk)?;
            println!("WITHDRAW_VKEY: 0x{}", backend.vkey_hash(&vk)?);
            println!("CIRCUIT: {}", vk.circuit);
            println!("Manifest written to {}", manifest.display());
        }
    }

    Ok(())
}

struct ProveRequest {
    identity: Identity,
    leaves: Vec<[u8; 32]>,
    pool: [u8; 20],
    signal: Signal,
    tree_levels: usize,
}

impl ProveRequest {
    fn witness(&self, key: &ProvingKey) -> Result<mixer_lib::WitnessInputs> {
        let schema = *mixer_lib::CircuitSchema::by_version(key.circuit.version)
            .context("proving key has an unknown circuit version")?;
        ensure!(
            schema.tree_depth == self.tree_levels,
            "TREE_LEVELS={} but circuit {} expects depth {}",
            self.tree_levels,
            key.circuit,
            schema.tree_depth
        );

        let tree = CommitmentTree::from_leaves(self.tree_levels, &self.leaves)?;
        let commitment = self.identity.commitment();
        let index = tree
            .index_of(&commitment.0)
            .context("identity commitment is not in the leaves snapshot")?;
        println!("[withdraw] Leaf index: {index}, root: 0x{}", hex::encode(tree.root()));

        let witness = WitnessBuilder::new(schema).build(
            &tree,
            index,
            &commitment,
            &self.signal,
            &self.identity,
            &ExternalNullifier::from_address(self.pool),
        )?;
        Ok(witness)
    }
}

async fn prove<B: ProvingBackend>(
    config: &MixerConfig,
    backend: Arc<B>,
    pk: ProvingKey,
    vk: VerifyingKey,
    request: ProveRequest,
    output_path: &Path,
) -> Result<()> {
    let witness = request.witness(&pk)?;
    let public_signals = witness.public_signals();

    let mut service = ProofService::new(backend);
    if let Some(timeout) = config.proof_timeout {
        service = service.with_timeout(timeout);
    }

    println!("[withdraw] Generating proof ({})...", service.backend().name());
    let proof = service.generate(witness, pk).wait().await?;

    ensure!(
        service.verify(&vk, &proof, &public_signals)?,
        "proof failed local verification"
    );
    println!("[withdraw] Proof verified locally");

    let onchain = service.backend().onchain_bytes(&proof.bytes)?;
    println!(
        "[withdraw] Proof size: {} bytes, Public values size: {} bytes",
        onchain.len(),
        public_signals.to_bytes().len()
    );

    let output = ProofOutput {
        circuit: proof.circuit.to_string(),
        envelope: hex::encode(proof.encode()),
        proof: hex::encode(&onchain),
        public_values: hex::encode(public_signals.to_bytes()),
    };
    fs::write(output_path, serde_json::to_string_pretty(&output)?)
        .with_context(|| format!("writing {}", output_path.display()))?;
    println!("[withdraw] Proof written to {}", output_path.display());

    Ok(())
}

fn read_identity(path: &Path) -> Result<Identity> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).context("invalid identity file")
}

fn read_leaves(path: &Path) -> Result<Vec<[u8; 32]>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let leaves: Vec<String> = serde_json::from_str(&raw).context("leaves file must be a JSON array")?;
    leaves.iter().map(|leaf| decode_hex::<32>(leaf)).collect()
}

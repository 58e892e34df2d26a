//! SP1 Withdraw Circuit: anonymous withdrawal from a fixed-denomination mixer.
//!
//! Proves, without revealing which deposit is being spent:
//! - The prover's identity commitment is a leaf under `root`
//! - The identity's key signed keccak256(external_nullifier || signal_hash),
//!   binding recipient, fee and relayer (prevents front-running)
//! - nullifier_hash is derived from the identity nullifier and this pool
//!
//! Public values committed (128 bytes = 4 × 32-byte slots):
//!   [root, nullifierHash, signalHash, externalNullifier]
//! Matches the pool contract:
//!   abi.decode(publicValues, (bytes32, bytes32, bytes32, bytes32))

#![no_main]
sp1_zkvm::entrypoint!(main);

use mixer_lib::{evaluate, WitnessInputs};

pub fn main() {
    // 1. Read the witness from the prover (host)
    let inputs = sp1_zkvm::io::read::<WitnessInputs>();

    // 2. Check every constraint; a panic aborts execution and no proof exists
    let signals = match evaluate(&inputs) {
        Ok(signals) => signals,
        Err(err) => panic!("withdraw constraint failed: {err}"),
    };

    // 3. Commit public values
    sp1_zkvm::io::commit_slice(&signals.to_bytes());
}

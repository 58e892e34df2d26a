//! Proving systems behind one blocking interface.
//!
//! `ProofService` runs these calls on a blocking worker; implementations may take minutes.

mod mock;
mod sp1;

pub use mock::MockBackend;
pub use sp1::Sp1Backend;

use mixer_lib::{CircuitError, WitnessInputs};
use thiserror::Error;

use crate::artifacts::{CircuitId, ProvingKey, VerifyingKey};
use crate::proof::MalformedProof;

/// What a backend produces: its proof bytes and the public values the circuit committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProof {
    pub proof: Vec<u8>,
    pub public_values: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("witness does not satisfy the circuit: {0}")]
    Circuit(#[from] CircuitError),

    #[error("{0}")]
    MalformedProof(#[from] MalformedProof),

    /// Key bytes do not produce the circuit they are tagged with.
    #[error("key is tagged {key} but derives {derived}")]
    CircuitMismatch { key: CircuitId, derived: CircuitId },

    #[error("prover: {0}")]
    Prover(String),
}

pub trait ProvingBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Prove `witness` under `key`.
    fn prove(&self, key: &ProvingKey, witness: &WitnessInputs) -> Result<RawProof, BackendError>;

    /// Check `proof` against `public_values`. `Ok(false)` for a well-formed proof that does
    /// not verify; `Err(MalformedProof)` when the bytes cannot be parsed.
    fn verify(
        &self,
        key: &VerifyingKey,
        proof: &[u8],
        public_values: &[u8],
    ) -> Result<bool, BackendError>;

    /// Encoding the ledger's on-chain verifier expects.
    fn onchain_bytes(&self, proof: &[u8]) -> Result<Vec<u8>, BackendError> {
        Ok(proof.to_vec())
    }
}

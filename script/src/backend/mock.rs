use mixer_lib::{evaluate, hash::keccak256_concat, WitnessInputs, PUBLIC_SIGNALS_LEN};
use tracing::debug;

use super::{BackendError, ProvingBackend, RawProof};
use crate::artifacts::{CircuitId, ProvingKey, VerifyingKey};
use crate::proof::MalformedProof;

const VK_TAG: &[u8] = b"mixer/mock/vk";
const PROOF_TAG: &[u8] = b"mixer/mock/proof";
const PROOF_LEN: usize = 32;

/// Development backend: runs the circuit natively and attests with a keccak tag instead of a
/// SNARK. A proof is `keccak256(tag || vk checksum || public values)`, so it verifies only for
/// the exact public signals and key it was made for.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        MockBackend
    }

    /// Deterministic key pair for a circuit version.
    pub fn setup(&self, version: u32) -> (ProvingKey, VerifyingKey) {
        let vk_bytes = keccak256_concat(&[VK_TAG, &version.to_be_bytes()]).to_vec();
        let vk = VerifyingKey::new(version, vk_bytes);
        let pk = ProvingKey {
            circuit: vk.circuit,
            bytes: vk.bytes.clone(),
        };
        (pk, vk)
    }

    fn attest(checksum: &[u8; 32], public_values: &[u8]) -> [u8; 32] {
        keccak256_concat(&[PROOF_TAG, checksum, public_values])
    }
}

impl ProvingBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn prove(&self, key: &ProvingKey, witness: &WitnessInputs) -> Result<RawProof, BackendError> {
        // mock proving keys are the verifying key bytes
        let derived = CircuitId::for_verifying_key(key.circuit.version, &key.bytes);
        if derived != key.circuit {
            return Err(BackendError::CircuitMismatch {
                key: key.circuit,
                derived,
            });
        }

        let signals = evaluate(witness)?;
        let public_values = signals.to_bytes().to_vec();
        let proof = Self::attest(&key.circuit.checksum, &public_values).to_vec();
        debug!(circuit = %key.circuit, "mock proof generated");
        Ok(RawProof {
            proof,
            public_values,
        })
    }

    fn verify(
        &self,
        key: &VerifyingKey,
        proof: &[u8],
        public_values: &[u8],
    ) -> Result<bool, BackendError> {
        if proof.len() != PROOF_LEN {
            return Err(MalformedProof::Backend(format!(
                "mock proof must be {PROOF_LEN} bytes, got {}",
                proof.len()
            ))
            .into());
        }
        if public_values.len() != PUBLIC_SIGNALS_LEN {
            return Ok(false);
        }
        Ok(Self::attest(&key.circuit.checksum, public_values)[..] == *proof)
    }
}

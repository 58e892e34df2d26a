use std::collections::HashMap;

use mixer_lib::{keccak256, WitnessInputs};
use parking_lot::Mutex;
use sp1_sdk::{
    EnvProver, HashableKey, ProverClient, SP1ProofWithPublicValues, SP1ProvingKey, SP1Stdin,
    SP1VerifyingKey,
};
use tracing::{debug, info};

use super::{BackendError, ProvingBackend, RawProof};
use crate::artifacts::{CircuitId, ProvingKey, VerifyingKey};
use crate::proof::MalformedProof;

/// SP1 zkVM backend. The proving key bytes are the withdraw guest ELF; the verifying key bytes
/// are the JSON-serialized `SP1VerifyingKey`. Proofs are Groth16-wrapped for on-chain
/// verification and stored as JSON so they can also be verified locally.
pub struct Sp1Backend {
    client: EnvProver,
    /// Setup results per ELF hash; setup is slow.
    keys: Mutex<HashMap<[u8; 32], (SP1ProvingKey, SP1VerifyingKey)>>,
}

impl Sp1Backend {
    /// Client selected by `SP1_PROVER` (cpu, cuda, network, mock).
    pub fn from_env() -> Self {
        Sp1Backend {
            client: ProverClient::from_env(),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Run SP1 setup for `elf` and tag the keys with schema `version`.
    pub fn setup(&self, elf: &[u8], version: u32) -> Result<(ProvingKey, VerifyingKey), BackendError> {
        let (pk, vk) = self.client.setup(elf);
        let vk_bytes = serde_json::to_vec(&vk).map_err(|e| BackendError::Prover(e.to_string()))?;
        let verifying_key = VerifyingKey::new(version, vk_bytes);
        info!(circuit = %verifying_key.circuit, vkey = %vk.bytes32(), "SP1 setup complete");

        let proving_key = ProvingKey {
            circuit: verifying_key.circuit,
            bytes: elf.to_vec(),
        };
        self.keys.lock().insert(keccak256(elf), (pk, vk));
        Ok((proving_key, verifying_key))
    }

    /// Hex vkey hash the on-chain verifier is deployed with.
    pub fn vkey_hash(&self, key: &VerifyingKey) -> Result<String, BackendError> {
        Ok(decode_vk(key)?.bytes32())
    }

    /// Execute the guest without proving. Returns the public values and cycle count.
    pub fn execute(&self, elf: &[u8], witness: &WitnessInputs) -> Result<(Vec<u8>, u64), BackendError> {
        let (public_values, report) = self
            .client
            .execute(elf, &stdin_for(witness))
            .run()
            .map_err(|e| BackendError::Prover(e.to_string()))?;
        Ok((public_values.to_vec(), report.total_instruction_count()))
    }

    /// SP1 proving key for `key`, checked against the circuit it is tagged with.
    fn proving_key(&self, key: &ProvingKey) -> Result<SP1ProvingKey, BackendError> {
        let elf_hash = keccak256(&key.bytes);
        let cached = self.keys.lock().get(&elf_hash).cloned();
        let (pk, vk) = match cached {
            Some(keys) => keys,
            None => {
                debug!(circuit = %key.circuit, "setting up SP1 proving key");
                let keys = self.client.setup(&key.bytes);
                self.keys.lock().insert(elf_hash, keys.clone());
                keys
            }
        };

        let vk_bytes = serde_json::to_vec(&vk).map_err(|e| BackendError::Prover(e.to_string()))?;
        let derived = CircuitId::for_verifying_key(key.circuit.version, &vk_bytes);
        if derived != key.circuit {
            return Err(BackendError::CircuitMismatch {
                key: key.circuit,
                derived,
            });
        }
        Ok(pk)
    }
}

fn stdin_for(witness: &WitnessInputs) -> SP1Stdin {
    let mut stdin = SP1Stdin::new();
    stdin.write(witness);
    stdin
}

fn decode_vk(key: &VerifyingKey) -> Result<SP1VerifyingKey, BackendError> {
    serde_json::from_slice(&key.bytes)
        .map_err(|e| BackendError::Prover(format!("invalid SP1 verifying key: {e}")))
}

fn decode_proof(proof: &[u8]) -> Result<SP1ProofWithPublicValues, BackendError> {
    serde_json::from_slice(proof).map_err(|e| MalformedProof::Backend(e.to_string()).into())
}

impl ProvingBackend for Sp1Backend {
    fn name(&self) -> &'static str {
        "sp1"
    }

    fn prove(&self, key: &ProvingKey, witness: &WitnessInputs) -> Result<RawProof, BackendError> {
        let pk = self.proving_key(key)?;
        info!(circuit = %key.circuit, "generating Groth16 proof");
        let proof = self
            .client
            .prove(&pk, &stdin_for(witness))
            .groth16()
            .run()
            .map_err(|e| BackendError::Prover(e.to_string()))?;

        let public_values = proof.public_values.to_vec();
        let bytes = serde_json::to_vec(&proof).map_err(|e| BackendError::Prover(e.to_string()))?;
        debug!(proof_len = bytes.len(), "proof generated");
        Ok(RawProof {
            proof: bytes,
            public_values,
        })
    }

    fn verify(
        &self,
        key: &VerifyingKey,
        proof: &[u8],
        public_values: &[u8],
    ) -> Result<bool, BackendError> {
        let proof = decode_proof(proof)?;
        if proof.public_values.as_slice() != public_values {
            return Ok(false);
        }
        let vk = decode_vk(key)?;
        Ok(self.client.verify(&proof, &vk).is_ok())
    }

    fn onchain_bytes(&self, proof: &[u8]) -> Result<Vec<u8>, BackendError> {
        Ok(decode_proof(proof)?.bytes())
    }
}

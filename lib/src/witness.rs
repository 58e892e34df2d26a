//! Circuit input assembly.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::circuit::{CircuitSchema, WITHDRAW_V1};
use crate::error::{CircuitError, WitnessError};
use crate::identity::{Identity, IdentityCommitment, SigningPublicKey};
use crate::nullifier::{derive_nullifier_hash, ExternalNullifier, NullifierHash};
use crate::signal::{sign_message, signed_message, verify_signature, Signal, Signature};
use crate::tree::{fold_path, CommitmentTree, MerkleProofStep};

/// Serialized public signals: 4 × 32-byte words.
pub const PUBLIC_SIGNALS_LEN: usize = 128;

/// The values a proof attests to, in circuit output order:
///   [root, nullifier_hash, signal_hash, external_nullifier]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignals {
    pub root: [u8; 32],
    pub nullifier_hash: NullifierHash,
    pub signal_hash: [u8; 32],
    pub external_nullifier: ExternalNullifier,
}

impl PublicSignals {
    pub fn to_bytes(&self) -> [u8; PUBLIC_SIGNALS_LEN] {
        let mut out = [0u8; PUBLIC_SIGNALS_LEN];
        out[0..32].copy_from_slice(&self.root);
        out[32..64].copy_from_slice(self.nullifier_hash.as_bytes());
        out[64..96].copy_from_slice(&self.signal_hash);
        out[96..128].copy_from_slice(self.external_nullifier.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CircuitError> {
        if bytes.len() != PUBLIC_SIGNALS_LEN {
            return Err(CircuitError::MalformedPublicSignals {
                expected: PUBLIC_SIGNALS_LEN,
                actual: bytes.len(),
            });
        }
        let word = |i: usize| {
            let mut w = [0u8; 32];
            w.copy_from_slice(&bytes[i * 32..(i + 1) * 32]);
            w
        };
        Ok(PublicSignals {
            root: word(0),
            nullifier_hash: NullifierHash(word(1)),
            signal_hash: word(2),
            external_nullifier: ExternalNullifier(word(3)),
        })
    }
}

/// Everything the withdraw circuit reads: private values first, then public ones.
///
/// Built fresh for every withdrawal and dropped once proving finishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInputs {
    /// Schema version this witness was assembled for.
    pub circuit_version: u32,

    // private
    pub identity_nullifier: [u8; 32],
    pub signing_public_key: SigningPublicKey,
    pub signature: Signature,
    pub merkle_path: Vec<MerkleProofStep>,

    // public
    pub root: [u8; 32],
    pub signal_hash: [u8; 32],
    pub external_nullifier: ExternalNullifier,
    pub nullifier_hash: NullifierHash,
}

impl WitnessInputs {
    /// Root implied by the witness's own commitment and path.
    pub fn extract_root(&self) -> [u8; 32] {
        let commitment =
            IdentityCommitment::from_parts(&self.identity_nullifier, &self.signing_public_key);
        fold_path(commitment.0, &self.merkle_path)
    }

    pub fn public_signals(&self) -> PublicSignals {
        PublicSignals {
            root: self.root,
            nullifier_hash: self.nullifier_hash,
            signal_hash: self.signal_hash,
            external_nullifier: self.external_nullifier,
        }
    }

    /// Direction bits of the path, leaf to root; together they encode the leaf index.
    pub fn path_index_bits(&self) -> Vec<u8> {
        self.merkle_path.iter().map(|s| u8::from(!s.is_left)).collect()
    }
}

/// Free-function form of [`WitnessInputs::extract_root`].
pub fn extract_root(witness: &WitnessInputs) -> [u8; 32] {
    witness.extract_root()
}

/// Assembles witnesses for one circuit schema. Performs no I/O.
#[derive(Debug, Clone, Copy)]
pub struct WitnessBuilder {
    schema: CircuitSchema,
}

impl Default for WitnessBuilder {
    fn default() -> Self {
        Self::new(WITHDRAW_V1)
    }
}

impl WitnessBuilder {
    pub fn new(schema: CircuitSchema) -> Self {
        WitnessBuilder { schema }
    }

    pub fn schema(&self) -> CircuitSchema {
        self.schema
    }

    /// Assemble the witness for withdrawing the deposit at `leaf_index`.
    pub fn build(
        &self,
        tree: &CommitmentTree,
        leaf_index: u64,
        commitment: &IdentityCommitment,
        signal: &Signal,
        identity: &Identity,
        external_nullifier: &ExternalNullifier,
    ) -> Result<WitnessInputs, WitnessError> {
        if tree.depth() != self.schema.tree_depth {
            return Err(WitnessError::DepthMismatch {
                version: self.schema.version,
                tree: tree.depth(),
                circuit: self.schema.tree_depth,
            });
        }
        if identity.commitment() != *commitment {
            return Err(WitnessError::CommitmentMismatch);
        }

        // 1. signal
        let signal_hash = signal.hash();

        // 2. sign and check locally before anything is proven
        let message = signed_message(external_nullifier, &signal_hash);
        let signature = sign_message(&message, &identity.signing_private_key)?;
        if !verify_signature(&message, &signature, &identity.signing_public_key) {
            return Err(WitnessError::SignatureMismatch);
        }

        // 3. membership path against the replica's current root
        let path = tree.path_to(leaf_index)?;
        let tree_root = tree.root();
        let computed = path.fold(commitment.0);
        if computed != tree_root {
            return Err(WitnessError::StaleTree {
                tree_root,
                computed,
            });
        }

        // 4. nullifier
        let nullifier_hash = derive_nullifier_hash(&identity.identity_nullifier, external_nullifier);

        // 5. assemble
        let witness = WitnessInputs {
            circuit_version: self.schema.version,
            identity_nullifier: identity.identity_nullifier,
            signing_public_key: identity.signing_public_key,
            signature,
            merkle_path: path.steps,
            root: tree_root,
            signal_hash,
            external_nullifier: *external_nullifier,
            nullifier_hash,
        };

        if witness.extract_root() != tree_root {
            return Err(WitnessError::WitnessRootMismatch);
        }
        Ok(witness)
    }
}

use serde::{Deserialize, Serialize};

use crate::hash::{keccak256_concat, pad_address};

/// Scopes nullifier hashes to one pool instance.
///
/// Bound to the pool contract address: 20 address bytes, big-endian,
/// left-padded with 12 zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalNullifier(pub [u8; 32]);

impl ExternalNullifier {
    pub fn from_address(pool_address: [u8; 20]) -> Self {
        Self(pad_address(&pool_address))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Public value the ledger records to reject a second withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NullifierHash(pub [u8; 32]);

impl NullifierHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// nullifier_hash = keccak256(identity_nullifier || external_nullifier)
pub fn derive_nullifier_hash(
    identity_nullifier: &[u8; 32],
    external_nullifier: &ExternalNullifier,
) -> NullifierHash {
    NullifierHash(keccak256_concat(&[identity_nullifier, external_nullifier.as_bytes()]))
}

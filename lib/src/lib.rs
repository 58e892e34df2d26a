//! Shared types and constraint logic for the mixer's anonymous withdrawals.
//!
//! Used by both the zkVM guest (`programs/withdraw`) and the host prover (`script`),
//! so everything here is `no_std` + `alloc`.

#![no_std]
extern crate alloc;

// =============================================================================
//                              MODULES
// =============================================================================

pub mod circuit;
pub mod error;
pub mod hash;
pub mod identity;
pub mod nullifier;
pub(crate) mod serde_bytes;
pub mod signal;
pub mod tree;
pub mod witness;

// =============================================================================
//                              RE-EXPORTS
// =============================================================================

pub use circuit::{evaluate, CircuitSchema, WITHDRAW_V1};
pub use error::{CircuitError, IdentityError, SignalError, TreeError, WitnessError};
pub use hash::{hash_pair, keccak256, pad_address};
pub use identity::{derive_commitment, Identity, IdentityCommitment, SigningPublicKey};
pub use nullifier::{derive_nullifier_hash, ExternalNullifier, NullifierHash};
pub use signal::{
    encode_signal, hash_signal, sign_message, signed_message, verify_signature, Signal,
    Signature, SIGNAL_LEN,
};
pub use tree::{
    compute_empty_root, compute_zeros, verify_merkle_proof, CommitmentTree, MerklePath,
    MerkleProofStep, ROOT_HISTORY_SIZE,
};
pub use witness::{extract_root, PublicSignals, WitnessBuilder, WitnessInputs, PUBLIC_SIGNALS_LEN};

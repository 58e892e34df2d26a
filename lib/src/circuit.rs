//! The withdraw circuit's constraints, executed inside the zkVM guest.
//!
//! Proves, for the public (root, nullifier_hash, signal_hash, external_nullifier):
//! - the prover knows an identity whose commitment is a leaf under `root`
//! - the identity's key signed keccak256(external_nullifier || signal_hash)
//! - nullifier_hash = keccak256(identity_nullifier || external_nullifier)

use crate::error::CircuitError;
use crate::identity::IdentityCommitment;
use crate::nullifier::derive_nullifier_hash;
use crate::signal::{signed_message, verify_signature};
use crate::tree::verify_merkle_proof;
use crate::witness::{PublicSignals, WitnessInputs};

/// Fixed input schema of one circuit version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSchema {
    pub version: u32,
    pub tree_depth: usize,
}

/// Withdraw circuit v1: depth-20 tree.
pub const WITHDRAW_V1: CircuitSchema = CircuitSchema {
    version: 1,
    tree_depth: 20,
};

const SCHEMAS: &[CircuitSchema] = &[WITHDRAW_V1];

impl CircuitSchema {
    /// Look up a schema by its version identifier.
    pub fn by_version(version: u32) -> Option<&'static CircuitSchema> {
        SCHEMAS.iter().find(|s| s.version == version)
    }
}

/// Check every constraint and return the public signals the proof attests to.
pub fn evaluate(inputs: &WitnessInputs) -> Result<PublicSignals, CircuitError> {
    let schema = CircuitSchema::by_version(inputs.circuit_version)
        .ok_or(CircuitError::UnsupportedVersion(inputs.circuit_version))?;

    if inputs.merkle_path.len() != schema.tree_depth {
        return Err(CircuitError::PathLength {
            expected: schema.tree_depth,
            actual: inputs.merkle_path.len(),
        });
    }

    // 1. Membership
    let commitment =
        IdentityCommitment::from_parts(&inputs.identity_nullifier, &inputs.signing_public_key);
    if !verify_merkle_proof(commitment.0, &inputs.merkle_path, inputs.root) {
        return Err(CircuitError::MembershipInvalid);
    }

    // 2. Authorization of this exact signal in this pool
    let message = signed_message(&inputs.external_nullifier, &inputs.signal_hash);
    if !verify_signature(&message, &inputs.signature, &inputs.signing_public_key) {
        return Err(CircuitError::SignatureInvalid);
    }

    // 3. Nullifier binding
    let nullifier_hash = derive_nullifier_hash(&inputs.identity_nullifier, &inputs.external_nullifier);
    if nullifier_hash != inputs.nullifier_hash {
        return Err(CircuitError::NullifierMismatch);
    }

    Ok(PublicSignals {
        root: inputs.root,
        nullifier_hash,
        signal_hash: inputs.signal_hash,
        external_nullifier: inputs.external_nullifier,
    })
}

//! Withdrawal intent encoding and the signature that binds it.
//!
//! signal         = abi.encode(address recipient, uint256 fee, address relayer)   (96 bytes)
//! signal_hash    = keccak256(signal)
//! signed message = keccak256(external_nullifier || signal_hash)

use core::fmt;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, SignalError};
use crate::hash::{keccak256, keccak256_concat, pad_address, u128_word};
use crate::identity::SigningPublicKey;
use crate::nullifier::ExternalNullifier;

/// Encoded signal length: three 32-byte ABI words.
pub const SIGNAL_LEN: usize = 96;
/// Signature length: r || s.
pub const SIGNATURE_LEN: usize = 64;

/// A withdrawal intent: who receives the funds, what the relayer is paid, and who relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub recipient: [u8; 20],
    pub fee: u128,
    pub relayer: [u8; 20],
}

impl Signal {
    pub fn new(recipient: [u8; 20], fee: u128, relayer: [u8; 20]) -> Self {
        Signal {
            recipient,
            fee,
            relayer,
        }
    }

    /// Canonical 96-byte encoding.
    pub fn encode(&self) -> [u8; SIGNAL_LEN] {
        let mut out = [0u8; SIGNAL_LEN];
        out[0..32].copy_from_slice(&pad_address(&self.recipient));
        out[32..64].copy_from_slice(&u128_word(self.fee));
        out[64..96].copy_from_slice(&pad_address(&self.relayer));
        out
    }

    /// Strict decoding; any non-zero padding byte is rejected so that exactly one byte
    /// string maps to each intent.
    pub fn decode(bytes: &[u8]) -> Result<Self, SignalError> {
        if bytes.len() != SIGNAL_LEN {
            return Err(SignalError::InvalidLength {
                expected: SIGNAL_LEN,
                actual: bytes.len(),
            });
        }
        let (recipient_word, rest) = bytes.split_at(32);
        let (fee_word, relayer_word) = rest.split_at(32);

        if recipient_word[..12].iter().any(|b| *b != 0) {
            return Err(SignalError::NonCanonicalPadding { word: 0 });
        }
        if fee_word[..16].iter().any(|b| *b != 0) {
            return Err(SignalError::NonCanonicalPadding { word: 1 });
        }
        if relayer_word[..12].iter().any(|b| *b != 0) {
            return Err(SignalError::NonCanonicalPadding { word: 2 });
        }

        let mut recipient = [0u8; 20];
        recipient.copy_from_slice(&recipient_word[12..]);
        let mut fee = [0u8; 16];
        fee.copy_from_slice(&fee_word[16..]);
        let mut relayer = [0u8; 20];
        relayer.copy_from_slice(&relayer_word[12..]);

        Ok(Signal {
            recipient,
            fee: u128::from_be_bytes(fee),
            relayer,
        })
    }

    pub fn hash(&self) -> [u8; 32] {
        hash_signal(&self.encode())
    }
}

/// Free-function form of [`Signal::new`].
pub fn encode_signal(recipient: [u8; 20], fee: u128, relayer: [u8; 20]) -> Signal {
    Signal::new(recipient, fee, relayer)
}

pub fn hash_signal(encoded: &[u8; SIGNAL_LEN]) -> [u8; 32] {
    keccak256(encoded)
}

/// The message an identity signs to authorize a withdrawal in one pool instance.
pub fn signed_message(external_nullifier: &ExternalNullifier, signal_hash: &[u8; 32]) -> [u8; 32] {
    keccak256_concat(&[external_nullifier.as_bytes(), signal_hash])
}

/// ECDSA/secp256k1 signature, `r || s`, low-S normalized.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "crate::serde_bytes")] pub [u8; SIGNATURE_LEN]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:02x?})", &self.0[..])
    }
}

/// Sign `message` with a 32-byte secp256k1 private key (RFC6979, deterministic).
pub fn sign_message(message: &[u8], private_key: &[u8; 32]) -> Result<Signature, IdentityError> {
    let signing_key =
        SigningKey::from_slice(private_key).map_err(|_| IdentityError::InvalidSigningKey)?;
    let signature: EcdsaSignature = signing_key.sign(message);
    let mut bytes = [0u8; SIGNATURE_LEN];
    bytes.copy_from_slice(&signature.to_bytes());
    Ok(Signature(bytes))
}

/// Check `signature` over `message`. Any parse failure is reported as `false`.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &SigningPublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = EcdsaSignature::from_slice(&signature.0) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

//! Identity material held by a depositor.
//!
//!   signing key        = secp256k1 scalar from a 32-byte seed
//!   identity nullifier = 31-byte seed as a big-endian 32-byte value (top byte zero)
//!   commitment         = keccak256(identity_nullifier || compressed_pubkey)

use core::fmt;

use k256::ecdsa::SigningKey;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::hash::keccak256_concat;

/// Bytes drawn for the signing key seed.
pub const SIGNING_SEED_LEN: usize = 32;
/// Bytes drawn for the identity nullifier seed.
pub const NULLIFIER_SEED_LEN: usize = 31;
/// SEC1 compressed secp256k1 public key length.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningPublicKey(#[serde(with = "crate::serde_bytes")] pub [u8; PUBLIC_KEY_LEN]);

impl SigningPublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({:02x?})", &self.0[..])
    }
}

/// Leaf value published on deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityCommitment(pub [u8; 32]);

impl IdentityCommitment {
    /// commitment = keccak256(identity_nullifier || public_key)
    pub fn from_parts(identity_nullifier: &[u8; 32], public_key: &SigningPublicKey) -> Self {
        Self(keccak256_concat(&[identity_nullifier, public_key.as_bytes()]))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

/// A depositor's secret identity. Never leaves the user's custody.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub signing_private_key: [u8; 32],
    pub signing_public_key: SigningPublicKey,
    pub identity_nullifier: [u8; 32],
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("signing_public_key", &self.signing_public_key)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Draw a fresh identity from `rng`. The two seeds come from separate draws.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, IdentityError> {
        let mut signing_seed = [0u8; SIGNING_SEED_LEN];
        rng.try_fill_bytes(&mut signing_seed)
            .map_err(|_| IdentityError::InsufficientEntropy {
                required: SIGNING_SEED_LEN,
                available: 0,
            })?;

        let mut nullifier_seed = [0u8; NULLIFIER_SEED_LEN];
        rng.try_fill_bytes(&mut nullifier_seed)
            .map_err(|_| IdentityError::InsufficientEntropy {
                required: NULLIFIER_SEED_LEN,
                available: 0,
            })?;

        Self::from_seeds(&signing_seed, &nullifier_seed)
    }

    /// Build an identity from raw seed buffers supplied by an external randomness source.
    /// Only the leading `SIGNING_SEED_LEN` / `NULLIFIER_SEED_LEN` bytes are used.
    pub fn from_seeds(signing_seed: &[u8], nullifier_seed: &[u8]) -> Result<Self, IdentityError> {
        if signing_seed.len() < SIGNING_SEED_LEN {
            return Err(IdentityError::InsufficientEntropy {
                required: SIGNING_SEED_LEN,
                available: signing_seed.len(),
            });
        }
        if nullifier_seed.len() < NULLIFIER_SEED_LEN {
            return Err(IdentityError::InsufficientEntropy {
                required: NULLIFIER_SEED_LEN,
                available: nullifier_seed.len(),
            });
        }

        let signing_seed = &signing_seed[..SIGNING_SEED_LEN];
        let nullifier_seed = &nullifier_seed[..NULLIFIER_SEED_LEN];
        if signing_seed[..NULLIFIER_SEED_LEN] == *nullifier_seed {
            return Err(IdentityError::SeedReuse);
        }

        let signing_key =
            SigningKey::from_slice(signing_seed).map_err(|_| IdentityError::InvalidSigningKey)?;

        let mut signing_private_key = [0u8; 32];
        signing_private_key.copy_from_slice(signing_seed);

        let mut identity_nullifier = [0u8; 32];
        identity_nullifier[32 - NULLIFIER_SEED_LEN..].copy_from_slice(nullifier_seed);

        Ok(Identity {
            signing_private_key,
            signing_public_key: public_key_of(&signing_key),
            identity_nullifier,
        })
    }

    /// Derive the commitment published on deposit.
    pub fn commitment(&self) -> IdentityCommitment {
        IdentityCommitment::from_parts(&self.identity_nullifier, &self.signing_public_key)
    }
}

/// Free-function form of [`Identity::commitment`].
pub fn derive_commitment(identity: &Identity) -> IdentityCommitment {
    identity.commitment()
}

pub(crate) fn public_key_of(signing_key: &SigningKey) -> SigningPublicKey {
    let point = signing_key.verifying_key().to_encoded_point(true);
    let mut bytes = [0u8; PUBLIC_KEY_LEN];
    bytes.copy_from_slice(point.as_bytes());
    SigningPublicKey(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroU32;
    use rand::{rngs::StdRng, SeedableRng};

    /// A source that runs dry after `remaining` bytes.
    struct ShortSource {
        remaining: usize,
    }

    impl RngCore for ShortSource {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(7);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            if dest.len() > self.remaining {
                let code = NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap();
                return Err(rand_core::Error::from(code));
            }
            self.remaining -= dest.len();
            for (i, b) in dest.iter_mut().enumerate() {
                *b = (i as u8).wrapping_mul(31).wrapping_add(self.remaining as u8);
            }
            Ok(())
        }
    }

    #[test]
    fn test_generate_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let identity = Identity::generate(&mut rng).unwrap();
        assert_eq!(identity.identity_nullifier[0], 0, "nullifier must fit in 31 bytes");
        assert_ne!(identity.identity_nullifier, [0u8; 32]);
        assert!(matches!(identity.signing_public_key.0[0], 0x02 | 0x03));
    }

    #[test]
    fn test_distinct_identities() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = Identity::generate(&mut rng).unwrap();
        let b = Identity::generate(&mut rng).unwrap();
        assert_ne!(a.commitment(), b.commitment());
        assert_ne!(a.identity_nullifier, b.identity_nullifier);
    }

    #[test]
    fn test_commitment_is_deterministic() {
        let identity = Identity::from_seeds(&[0x11; 32], &[0x22; 31]).unwrap();
        assert_eq!(identity.commitment(), identity.commitment());
        assert_eq!(derive_commitment(&identity), identity.commitment());
        assert_eq!(
            identity.commitment(),
            IdentityCommitment::from_parts(&identity.identity_nullifier, &identity.signing_public_key)
        );
    }

    #[test]
    fn test_insufficient_entropy_from_short_buffers() {
        assert_eq!(
            Identity::from_seeds(&[0x11; 16], &[0x22; 31]),
            Err(IdentityError::InsufficientEntropy { required: 32, available: 16 })
        );
        assert_eq!(
            Identity::from_seeds(&[0x11; 32], &[0x22; 30]),
            Err(IdentityError::InsufficientEntropy { required: 31, available: 30 })
        );
    }

    #[test]
    fn test_insufficient_entropy_from_source() {
        // enough for the signing seed, not for the nullifier seed
        let mut source = ShortSource { remaining: 40 };
        assert_eq!(
            Identity::generate(&mut source),
            Err(IdentityError::InsufficientEntropy { required: 31, available: 0 })
        );
    }

    #[test]
    fn test_seed_reuse_rejected() {
        let seed = [0x5Au8; 32];
        assert_eq!(Identity::from_seeds(&seed, &seed[..31]), Err(IdentityError::SeedReuse));
    }

    #[test]
    fn test_zero_signing_seed_rejected() {
        assert_eq!(
            Identity::from_seeds(&[0u8; 32], &[0x01; 31]),
            Err(IdentityError::InvalidSigningKey)
        );
    }

    #[test]
    fn test_identity_storage_roundtrip() {
        let identity = Identity::from_seeds(&[0x33; 32], &[0x44; 31]).unwrap();
        let json = serde_json::to_string(&identity).unwrap();
        let restored: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, identity);
    }
}

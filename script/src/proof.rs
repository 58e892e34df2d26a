//! Proof envelope: a backend proof plus the circuit and public signals it was made for.
//!
//! Wire layout (big-endian):
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | magic `MXPF`                  |
//! | 4      | 1    | envelope version (1)          |
//! | 5      | 4    | circuit version               |
//! | 9      | 32   | verifying key checksum        |
//! | 41     | 128  | public signals                |
//! | 169    | 4    | proof length `n`              |
//! | 173    | n    | backend proof bytes           |

use mixer_lib::{PublicSignals, PUBLIC_SIGNALS_LEN};
use thiserror::Error;

use crate::artifacts::CircuitId;

pub const MAGIC: [u8; 4] = *b"MXPF";
pub const ENVELOPE_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 32 + PUBLIC_SIGNALS_LEN + 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedProof {
    #[error("proof envelope truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("bad proof magic")]
    BadMagic,

    #[error("unsupported proof envelope version {0}")]
    UnsupportedEnvelope(u8),

    #[error("proof declares {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("backend proof bytes could not be parsed: {0}")]
    Backend(String),
}

/// A generated proof. Proofs are randomized, so two proofs of the same witness differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub circuit: CircuitId,
    pub public_signals: PublicSignals,
    pub bytes: Vec<u8>,
}

impl Proof {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bytes.len());
        out.extend_from_slice(&MAGIC);
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.circuit.version.to_be_bytes());
        out.extend_from_slice(&self.circuit.checksum);
        out.extend_from_slice(&self.public_signals.to_bytes());
        out.extend_from_slice(&(self.bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    /// Strict decode: every byte must be accounted for.
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedProof> {
        if bytes.len() < HEADER_LEN {
            return Err(MalformedProof::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let (magic, rest) = bytes.split_at(4);
        if magic != MAGIC {
            return Err(MalformedProof::BadMagic);
        }
        let (envelope, rest) = rest.split_at(1);
        if envelope[0] != ENVELOPE_VERSION {
            return Err(MalformedProof::UnsupportedEnvelope(envelope[0]));
        }
        let (version, rest) = rest.split_at(4);
        let (checksum, rest) = rest.split_at(32);
        let (signals, rest) = rest.split_at(PUBLIC_SIGNALS_LEN);
        let (len, proof) = rest.split_at(4);

        let declared = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if declared != proof.len() {
            return Err(MalformedProof::LengthMismatch {
                declared,
                actual: proof.len(),
            });
        }

        let mut sum = [0u8; 32];
        sum.copy_from_slice(checksum);
        let public_signals = PublicSignals::from_bytes(signals).map_err(|_| MalformedProof::Truncated {
            needed: HEADER_LEN,
            actual: bytes.len(),
        })?;

        Ok(Proof {
            circuit: CircuitId {
                version: u32::from_be_bytes([version[0], version[1], version[2], version[3]]),
                checksum: sum,
            },
            public_signals,
            bytes: proof.to_vec(),
        })
    }
}

use std::time::Duration;

use mixer_lib::{CircuitError, IdentityError, SignalError, TreeError, WitnessError};
use thiserror::Error;

use crate::artifacts::{ArtifactError, CircuitId};
use crate::backend::BackendError;
use crate::ledger::{LedgerError, Rejection};
use crate::proof::MalformedProof;
use crate::withdraw::WithdrawalState;

/// Failures of proof generation and verification.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The key belongs to another circuit than the witness or proof. `input_checksum` is
    /// `None` when the input only names a schema version.
    #[error("circuit mismatch: key is {key}, input targets v{input_version}")]
    CircuitVersionMismatch {
        key: CircuitId,
        input_version: u32,
        input_checksum: Option<[u8; 32]>,
    },

    #[error("witness root self-check failed before proving")]
    WitnessRootMismatch,

    #[error("prover committed public signals that differ from the witness")]
    PublicSignalsMismatch,

    #[error("malformed proof: {0}")]
    MalformedProof(#[from] MalformedProof),

    #[error("circuit rejected the witness: {0}")]
    Circuit(#[from] CircuitError),

    #[error("proving backend failed: {0}")]
    Backend(String),

    #[error("proof generation cancelled")]
    Cancelled,

    #[error("proof generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("proving worker failed: {0}")]
    Worker(String),
}

impl From<BackendError> for ProofError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Circuit(e) => ProofError::Circuit(e),
            BackendError::CircuitMismatch { key, derived } => ProofError::CircuitVersionMismatch {
                key,
                input_version: derived.version,
                input_checksum: Some(derived.checksum),
            },
            BackendError::MalformedProof(e) => ProofError::MalformedProof(e),
            BackendError::Prover(msg) => ProofError::Backend(msg),
        }
    }
}

/// Error taxonomy surfaced to callers of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input: malformed signal, unknown leaf, out-of-range index, short entropy.
    Input,
    /// The local tree is behind the ledger. Resync and rebuild the witness.
    Staleness,
    /// A local cryptographic self-check failed; nothing was submitted.
    CryptoMismatch,
    /// Key, witness and circuit versions disagree. Fatal.
    Version,
    /// The ledger refused the withdrawal. Terminal for the attempt.
    LedgerRejection,
    /// The caller abandoned proof generation.
    Cancelled,
    /// The ledger could not be reached.
    Transport,
}

impl ErrorKind {
    /// JSON-RPC error code a relayer reports for this kind.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::Input => -32602,
            ErrorKind::Transport => -32603,
            ErrorKind::CryptoMismatch | ErrorKind::LedgerRejection => -33000,
            ErrorKind::Staleness | ErrorKind::Version | ErrorKind::Cancelled => -32000,
        }
    }
}

/// Top-level failure of a withdrawal attempt.
#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("signal: {0}")]
    Signal(#[from] SignalError),

    #[error("tree: {0}")]
    Tree(#[from] TreeError),

    #[error("witness: {0}")]
    Witness(#[from] WitnessError),

    #[error("proof: {0}")]
    Proof(#[from] ProofError),

    #[error("artifacts: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error(
        "local tree is stale: {local_leaves} leaves (root {}), ledger has {ledger_leaves} (root {})",
        hex::encode(.local_root),
        hex::encode(.ledger_root)
    )]
    StaleReplica {
        local_root: [u8; 32],
        ledger_root: [u8; 32],
        local_leaves: u64,
        ledger_leaves: u64,
    },

    #[error("local verification of the generated proof failed")]
    LocalVerificationFailed,

    #[error("nullifier {} already spent", hex::encode(.0))]
    AlreadySpent([u8; 32]),

    #[error("withdrawal for this deposit was rejected earlier; reconcile before retrying")]
    PreviouslyRejected,

    #[error("withdrawal is {0:?}, cannot proceed")]
    InvalidState(WithdrawalState),
}

impl WithdrawError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WithdrawError::Identity(_) | WithdrawError::Signal(_) => ErrorKind::Input,
            WithdrawError::Tree(TreeError::InvalidDepth { .. }) => ErrorKind::Version,
            WithdrawError::Tree(_) => ErrorKind::Input,
            WithdrawError::Witness(err) => match err {
                WitnessError::StaleTree { .. } => ErrorKind::Staleness,
                WitnessError::DepthMismatch { .. } => ErrorKind::Version,
                WitnessError::Identity(_) | WitnessError::Tree(_) => ErrorKind::Input,
                WitnessError::CommitmentMismatch => ErrorKind::Input,
                WitnessError::SignatureMismatch | WitnessError::WitnessRootMismatch => {
                    ErrorKind::CryptoMismatch
                }
            },
            WithdrawError::Proof(err) => match err {
                ProofError::CircuitVersionMismatch { .. } => ErrorKind::Version,
                ProofError::Circuit(CircuitError::UnsupportedVersion(_)) => ErrorKind::Version,
                ProofError::MalformedProof(_) => ErrorKind::Input,
                ProofError::Cancelled | ProofError::Timeout(_) => ErrorKind::Cancelled,
                ProofError::Backend(_) | ProofError::Worker(_) => ErrorKind::Transport,
                ProofError::WitnessRootMismatch
                | ProofError::PublicSignalsMismatch
                | ProofError::Circuit(_) => ErrorKind::CryptoMismatch,
            },
            WithdrawError::Artifact(_) => ErrorKind::Version,
            WithdrawError::Ledger(LedgerError::Rpc(_)) => ErrorKind::Transport,
            WithdrawError::Ledger(LedgerError::Rejected(_)) => ErrorKind::LedgerRejection,
            WithdrawError::StaleReplica { .. } => ErrorKind::Staleness,
            WithdrawError::LocalVerificationFailed => ErrorKind::CryptoMismatch,
            WithdrawError::AlreadySpent(_) | WithdrawError::PreviouslyRejected => {
                ErrorKind::LedgerRejection
            }
            WithdrawError::InvalidState(_) => ErrorKind::Input,
        }
    }

    /// Relayer response code; ledger rejections keep their specific code.
    pub fn code(&self) -> i32 {
        match self {
            WithdrawError::Ledger(LedgerError::Rejected(rejection)) => rejection.code(),
            WithdrawError::AlreadySpent(_) => Rejection::NullifierSpent.code(),
            other => other.kind().code(),
        }
    }
}

//! Port to the on-chain mixer: leaf history, spent nullifiers, withdrawal submission.
//!
//! Implementations:
//! - `MemoryLedger` (in-process reference ledger for tests and demos)
//! - `EvmLedger` (alloy, mixer contract)

mod evm;
mod memory;

pub use evm::EvmLedger;
pub use memory::MemoryLedger;

use std::fmt;
use std::future::Future;

use mixer_lib::{ExternalNullifier, NullifierHash};
use thiserror::Error;

use crate::proof::Proof;

/// Everything the ledger needs to re-verify and pay out a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalSubmission {
    pub proof: Proof,
    pub recipient: [u8; 20],
    pub fee: u128,
    pub relayer: [u8; 20],
}

/// What a pool takes deposits in and pays withdrawals out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Asset {
    /// The chain's coin, sent as the deposit's value.
    #[default]
    Native,
    /// An ERC20 token, pulled from the depositor's allowance.
    Token([u8; 20]),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native coin"),
            Asset::Token(address) => write!(f, "token 0x{}", hex::encode(address)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// `None` when the payout was found on the ledger after a submission with no answer.
    pub tx_hash: Option<[u8; 32]>,
    pub nullifier_hash: NullifierHash,
}

/// Why the ledger refused a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("proof does not verify")]
    ProofInvalid,

    #[error("fee {fee} exceeds denomination {denomination}")]
    FeeTooHigh { fee: u128, denomination: u128 },

    #[error("signal hash does not match recipient, fee and relayer")]
    SignalHashMismatch,

    #[error("external nullifier is not this pool")]
    ExternalNullifierMismatch,

    #[error("relayer address is not allowed")]
    RelayerInvalid,

    #[error("root is not in recent history")]
    UnknownRoot,

    #[error("nullifier already spent")]
    NullifierSpent,

    #[error("proof is for circuit {0}, ledger verifies another")]
    CircuitMismatch(String),

    #[error("deposit must be exactly {expected}, got {actual}")]
    WrongAmount { expected: u128, actual: u128 },

    #[error("commitment tree is full")]
    TreeFull,

    /// The deposit used another asset than the pool holds.
    #[error("pool only takes {0}")]
    UnsupportedAsset(Asset),

    #[error("allowance {allowance} is below the denomination {required}")]
    InsufficientAllowance { allowance: u128, required: u128 },

    #[error("balance {balance} is below the denomination {required}")]
    InsufficientBalance { balance: u128, required: u128 },

    #[error("reverted: {0}")]
    Reverted(String),
}

impl Rejection {
    /// Relayer JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            Rejection::FeeTooHigh { .. }
            | Rejection::WrongAmount { .. }
            | Rejection::UnsupportedAsset(_)
            | Rejection::InsufficientAllowance { .. }
            | Rejection::InsufficientBalance { .. } => -33001,
            Rejection::SignalHashMismatch => -33002,
            Rejection::ExternalNullifierMismatch => -33004,
            Rejection::RelayerInvalid => -33005,
            Rejection::ProofInvalid
            | Rejection::UnknownRoot
            | Rejection::NullifierSpent
            | Rejection::CircuitMismatch(_)
            | Rejection::TreeFull
            | Rejection::Reverted(_) => -33000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("rejected: {0}")]
    Rejected(Rejection),
}

pub trait Ledger: Send + Sync {
    /// External nullifier of this pool instance.
    fn external_nullifier(&self) -> ExternalNullifier;

    /// All leaves in insertion order.
    fn current_leaves(&self) -> impl Future<Output = Result<Vec<[u8; 32]>, LedgerError>> + Send;

    fn current_root(&self) -> impl Future<Output = Result<[u8; 32], LedgerError>> + Send;

    fn is_spent(
        &self,
        nullifier_hash: &NullifierHash,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Submit a withdrawal. The ledger re-verifies everything; its answer is authoritative.
    fn submit_withdrawal(
        &self,
        submission: &WithdrawalSubmission,
    ) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;
}

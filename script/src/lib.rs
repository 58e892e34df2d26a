//! Host side of the mixer: artifact loading, proving backends, the proof service,
//! ledger adapters and the withdrawal flow that ties them together.

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod proof;
pub mod replica;
pub mod service;
pub mod withdraw;

pub use artifacts::{ArtifactManifest, CircuitArtifacts, CircuitId, ProvingKey, VerifyingKey};
pub use backend::{MockBackend, ProvingBackend, Sp1Backend};
pub use config::{MixerConfig, ProverKind};
pub use error::{ErrorKind, ProofError, WithdrawError};
pub use ledger::{
    Asset, EvmLedger, Ledger, LedgerError, MemoryLedger, Receipt, Rejection, WithdrawalSubmission,
};
pub use proof::{MalformedProof, Proof};
pub use replica::{LeafInserted, TreeReplica};
pub use service::{CancelHandle, ProofJob, ProofService};
pub use withdraw::{Withdrawal, WithdrawalFlow, WithdrawalState};

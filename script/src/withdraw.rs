//! End-to-end withdrawal: resync, witness, proof, local check, submission.

use std::sync::Arc;

use mixer_lib::{
    derive_nullifier_hash, CircuitSchema, Identity, IdentityCommitment, Signal, WitnessBuilder,
};
use tracing::{info, instrument, warn};

use crate::artifacts::{ArtifactError, CircuitArtifacts, ProvingKey, VerifyingKey};
use crate::backend::ProvingBackend;
use crate::error::WithdrawError;
use crate::ledger::{Ledger, LedgerError, Receipt, WithdrawalSubmission};
use crate::proof::Proof;
use crate::replica::TreeReplica;
use crate::service::{CancelHandle, ProofService};

/// Lifecycle of one deposit's withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalState {
    Deposited,
    WithdrawalProofBuilt,
    /// Sent, answer not yet known. [`WithdrawalFlow::reconcile`] settles it from the ledger.
    WithdrawalSubmitted,
    Withdrawn,
    /// Terminal. The caller must reconcile with the ledger before trying another path.
    Rejected,
}

/// A pending withdrawal for one deposit and one intent.
#[derive(Debug, Clone)]
pub struct Withdrawal {
    commitment: IdentityCommitment,
    signal: Signal,
    state: WithdrawalState,
    proof: Option<Proof>,
    receipt: Option<Receipt>,
}

impl Withdrawal {
    pub fn new(commitment: IdentityCommitment, signal: Signal) -> Self {
        Withdrawal {
            commitment,
            signal,
            state: WithdrawalState::Deposited,
            proof: None,
            receipt: None,
        }
    }

    pub fn state(&self) -> WithdrawalState {
        self.state
    }

    pub fn commitment(&self) -> &IdentityCommitment {
        &self.commitment
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn proof(&self) -> Option<&Proof> {
        self.proof.as_ref()
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    fn check_can_prove(&self) -> Result<(), WithdrawError> {
        match self.state {
            WithdrawalState::Deposited | WithdrawalState::WithdrawalProofBuilt => Ok(()),
            WithdrawalState::Rejected => Err(WithdrawError::PreviouslyRejected),
            other => Err(WithdrawError::InvalidState(other)),
        }
    }

    fn check_can_submit(&self) -> Result<Proof, WithdrawError> {
        match (self.state, &self.proof) {
            (WithdrawalState::WithdrawalProofBuilt, Some(p)) => Ok(p.clone()),
            (WithdrawalState::Rejected, _) => Err(WithdrawError::PreviouslyRejected),
            (other, _) => Err(WithdrawError::InvalidState(other)),
        }
    }
}

/// Drives withdrawals against one ledger with one circuit.
pub struct WithdrawalFlow<L, B> {
    ledger: Arc<L>,
    replica: Arc<TreeReplica>,
    service: ProofService<B>,
    builder: WitnessBuilder,
    proving_key: ProvingKey,
    verifying_key: VerifyingKey,
}

impl<L: Ledger, B: ProvingBackend> WithdrawalFlow<L, B> {
    pub fn new(
        ledger: Arc<L>,
        replica: Arc<TreeReplica>,
        service: ProofService<B>,
        proving_key: ProvingKey,
        verifying_key: VerifyingKey,
    ) -> Result<Self, WithdrawError> {
        let schema = *CircuitSchema::by_version(verifying_key.circuit.version)
            .ok_or(ArtifactError::UnknownVersion(verifying_key.circuit.version))?;
        Ok(WithdrawalFlow {
            ledger,
            replica,
            service,
            builder: WitnessBuilder::new(schema),
            proving_key,
            verifying_key,
        })
    }

    pub fn from_artifacts(
        ledger: Arc<L>,
        replica: Arc<TreeReplica>,
        service: ProofService<B>,
        artifacts: &CircuitArtifacts,
    ) -> Result<Self, WithdrawError> {
        Self::new(
            ledger,
            replica,
            service,
            artifacts.proving_key.clone(),
            artifacts.verifying_key.clone(),
        )
    }

    pub fn replica(&self) -> &Arc<TreeReplica> {
        &self.replica
    }

    /// Pull the ledger's leaves into the replica and confirm it matches the ledger root.
    pub async fn sync(&self) -> Result<(), WithdrawError> {
        let leaves = self.ledger.current_leaves().await?;
        self.replica.sync_from_leaves(&leaves)?;
        let root = self.ledger.current_root().await?;
        self.replica.ensure_fresh(root, leaves.len() as u64)
    }

    /// Build and locally verify a proof for `withdrawal`.
    #[instrument(skip_all, fields(commitment = %hex::encode(withdrawal.commitment.0)))]
    pub async fn prepare(
        &self,
        withdrawal: &mut Withdrawal,
        identity: &Identity,
        cancel: &CancelHandle,
    ) -> Result<Proof, WithdrawError> {
        withdrawal.check_can_prove()?;
        self.sync().await?;

        let tree = self.replica.snapshot();
        let index = tree.index_of(&withdrawal.commitment.0)?;

        let external_nullifier = self.ledger.external_nullifier();
        let nullifier_hash = derive_nullifier_hash(&identity.identity_nullifier, &external_nullifier);
        if self.ledger.is_spent(&nullifier_hash).await? {
            return Err(WithdrawError::AlreadySpent(nullifier_hash.0));
        }

        let witness = self.builder.build(
            &tree,
            index,
            &withdrawal.commitment,
            &withdrawal.signal,
            identity,
            &external_nullifier,
        )?;
        let public_signals = witness.public_signals();
        info!(index, "witness built, proving");

        let proof = self
            .service
            .generate_with(witness, self.proving_key.clone(), cancel)
            .wait()
            .await?;
        if !self.service.verify(&self.verifying_key, &proof, &public_signals)? {
            return Err(WithdrawError::LocalVerificationFailed);
        }

        withdrawal.proof = Some(proof.clone());
        withdrawal.state = WithdrawalState::WithdrawalProofBuilt;
        Ok(proof)
    }

    /// Settle a submission whose outcome was lost. A spent nullifier hash means the payout
    /// landed; otherwise the withdrawal goes back to `WithdrawalProofBuilt` and may be resent.
    /// Other states are returned unchanged.
    pub async fn reconcile(
        &self,
        withdrawal: &mut Withdrawal,
    ) -> Result<WithdrawalState, WithdrawError> {
        let nullifier_hash = match (withdrawal.state, &withdrawal.proof) {
            (WithdrawalState::WithdrawalSubmitted, Some(proof)) => {
                proof.public_signals.nullifier_hash
            }
            (state, _) => return Ok(state),
        };
        if self.ledger.is_spent(&nullifier_hash).await? {
            info!(nullifier_hash = %hex::encode(nullifier_hash.0), "submission landed");
            withdrawal.state = WithdrawalState::Withdrawn;
            withdrawal.receipt = Some(Receipt {
                tx_hash: None,
                nullifier_hash,
            });
        } else {
            warn!("submission did not land");
            withdrawal.state = WithdrawalState::WithdrawalProofBuilt;
        }
        Ok(withdrawal.state)
    }

    /// Hand the built proof to the ledger. A withdrawal left in `WithdrawalSubmitted` is
    /// reconciled first and only resent when its payout is not on the ledger.
    pub async fn submit(&self, withdrawal: &mut Withdrawal) -> Result<Receipt, WithdrawError> {
        if withdrawal.state == WithdrawalState::WithdrawalSubmitted
            && self.reconcile(withdrawal).await? == WithdrawalState::Withdrawn
        {
            if let Some(receipt) = &withdrawal.receipt {
                return Ok(receipt.clone());
            }
        }
        let proof = withdrawal.check_can_submit()?;
        withdrawal.state = WithdrawalState::WithdrawalSubmitted;

        let submission = WithdrawalSubmission {
            proof,
            recipient: withdrawal.signal.recipient,
            fee: withdrawal.signal.fee,
            relayer: withdrawal.signal.relayer,
        };
        match self.ledger.submit_withdrawal(&submission).await {
            Ok(receipt) => {
                info!(tx = ?receipt.tx_hash.map(hex::encode), "withdrawn");
                withdrawal.state = WithdrawalState::Withdrawn;
                withdrawal.receipt = Some(receipt.clone());
                Ok(receipt)
            }
            Err(LedgerError::Rejected(rejection)) => {
                warn!(%rejection, "ledger rejected withdrawal");
                withdrawal.state = WithdrawalState::Rejected;
                Err(LedgerError::Rejected(rejection).into())
            }
            // outcome unknown; stays submitted
            Err(err) => Err(err.into()),
        }
    }

    /// `prepare` then `submit`.
    pub async fn withdraw(
        &self,
        withdrawal: &mut Withdrawal,
        identity: &Identity,
    ) -> Result<Receipt, WithdrawError> {
        self.prepare(withdrawal, identity, &CancelHandle::new()).await?;
        self.submit(withdrawal).await
    }
}

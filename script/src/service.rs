//! Proof generation and verification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mixer_lib::{extract_root, CircuitSchema, CircuitError, PublicSignals, WitnessInputs};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifacts::{ProvingKey, VerifyingKey};
use crate::backend::ProvingBackend;
use crate::error::ProofError;
use crate::proof::Proof;

/// Stateless front end over a proving backend. Cheap to clone.
pub struct ProofService<B> {
    backend: Arc<B>,
    timeout: Option<Duration>,
}

impl<B> Clone for ProofService<B> {
    fn clone(&self) -> Self {
        ProofService {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        }
    }
}

impl<B: ProvingBackend> ProofService<B> {
    pub fn new(backend: Arc<B>) -> Self {
        ProofService {
            backend,
            timeout: None,
        }
    }

    /// Abandon proof jobs that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Generate a proof on the current thread.
    pub fn generate_blocking(
        &self,
        witness: &WitnessInputs,
        key: &ProvingKey,
    ) -> Result<Proof, ProofError> {
        if key.circuit.version != witness.circuit_version {
            return Err(ProofError::CircuitVersionMismatch {
                key: key.circuit,
                input_version: witness.circuit_version,
                input_checksum: None,
            });
        }
        if CircuitSchema::by_version(witness.circuit_version).is_none() {
            return Err(CircuitError::UnsupportedVersion(witness.circuit_version).into());
        }
        if extract_root(witness) != witness.root {
            return Err(ProofError::WitnessRootMismatch);
        }

        let start = std::time::Instant::now();
        let raw = self.backend.prove(key, witness)?;
        let public_signals = PublicSignals::from_bytes(&raw.public_values)?;
        if public_signals != witness.public_signals() {
            return Err(ProofError::PublicSignalsMismatch);
        }
        info!(
            backend = self.backend.name(),
            circuit = %key.circuit,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "proof generated"
        );

        Ok(Proof {
            circuit: key.circuit,
            public_signals,
            bytes: raw.proof,
        })
    }

    /// Start proof generation on a blocking worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn generate(&self, witness: WitnessInputs, key: ProvingKey) -> ProofJob {
        self.generate_with(witness, key, &CancelHandle::new())
    }

    /// Like [`generate`](Self::generate), cancelled through a handle the caller already holds.
    pub fn generate_with(
        &self,
        witness: WitnessInputs,
        key: ProvingKey,
        cancel: &CancelHandle,
    ) -> ProofJob {
        let service = self.clone();
        let started = cancel.epoch();
        let handle = tokio::task::spawn_blocking(move || service.generate_blocking(&witness, &key));
        ProofJob {
            handle,
            cancel: cancel.clone(),
            started,
            timeout: self.timeout,
        }
    }

    /// Verify `proof` for the supplied public signals.
    ///
    /// `Ok(false)` when the proof does not attest to exactly these signals. Errors only for a
    /// key from another circuit or unparseable proof bytes.
    pub fn verify(
        &self,
        key: &VerifyingKey,
        proof: &Proof,
        public_signals: &PublicSignals,
    ) -> Result<bool, ProofError> {
        if proof.circuit != key.circuit {
            return Err(ProofError::CircuitVersionMismatch {
                key: key.circuit,
                input_version: proof.circuit.version,
                input_checksum: Some(proof.circuit.checksum),
            });
        }
        let valid = self
            .backend
            .verify(key, &proof.bytes, &public_signals.to_bytes())?;
        debug!(circuit = %key.circuit, valid, "proof verified");
        Ok(valid)
    }

    /// Verify an encoded proof envelope.
    pub fn verify_encoded(
        &self,
        key: &VerifyingKey,
        proof: &[u8],
        public_signals: &PublicSignals,
    ) -> Result<bool, ProofError> {
        let proof = Proof::decode(proof)?;
        self.verify(key, &proof, public_signals)
    }
}

/// Cancels running [`ProofJob`]s. A cancel reaches every job started through this handle
/// that has not finished yet; jobs started afterwards are unaffected. Cancellation is best
/// effort: the worker finishes in the background and its result is dropped.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<CancelState>);

#[derive(Default)]
struct CancelState {
    /// Bumped on every cancel.
    epoch: AtomicU64,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.epoch.fetch_add(1, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    fn epoch(&self) -> u64 {
        self.0.epoch.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called after epoch `since`.
    async fn cancelled_since(&self, since: u64) {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.epoch() != since {
                return;
            }
            notified.await;
        }
    }
}

/// An in-flight proof generation.
pub struct ProofJob {
    handle: JoinHandle<Result<Proof, ProofError>>,
    cancel: CancelHandle,
    started: u64,
    timeout: Option<Duration>,
}

impl ProofJob {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the proof, a cancellation, or the timeout, whichever comes first.
    pub async fn wait(self) -> Result<Proof, ProofError> {
        let ProofJob {
            handle,
            cancel,
            started,
            timeout,
        } = self;

        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(err) => Err(ProofError::Worker(err.to_string())),
            },
            _ = cancel.cancelled_since(started) => {
                warn!("proof generation cancelled");
                Err(ProofError::Cancelled)
            }
            _ = deadline(timeout) => {
                warn!(?timeout, "proof generation timed out");
                Err(ProofError::Timeout(timeout.unwrap_or_default()))
            }
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use mixer_lib::{
        CommitmentTree, ExternalNullifier, Identity, NullifierHash, Signal, WitnessBuilder,
        WITHDRAW_V1,
    };

    fn witness() -> WitnessInputs {
        let identity = Identity::from_seeds(&[0x71; 32], &[0x72; 31]).unwrap();
        let tree = CommitmentTree::from_leaves(20, &[identity.commitment().0]).unwrap();
        WitnessBuilder::new(WITHDRAW_V1)
            .build(
                &tree,
                0,
                &identity.commitment(),
                &Signal::new([0x0A; 20], 1_000, [0x0B; 20]),
                &identity,
                &ExternalNullifier::from_address([0x0C; 20]),
            )
            .unwrap()
    }

    fn service() -> (ProofService<MockBackend>, ProvingKey, VerifyingKey) {
        let backend = MockBackend::new();
        let (pk, vk) = backend.setup(1);
        (ProofService::new(Arc::new(backend)), pk, vk)
    }

    #[test]
    fn test_generate_and_verify() {
        let (service, pk, vk) = service();
        let witness = witness();
        let proof = service.generate_blocking(&witness, &pk).unwrap();
        assert_eq!(proof.public_signals, witness.public_signals());
        assert!(service.verify(&vk, &proof, &witness.public_signals()).unwrap());
        assert!(service
            .verify_encoded(&vk, &proof.encode(), &witness.public_signals())
            .unwrap());
    }

    #[test]
    fn test_mutated_public_signals_fail() {
        let (service, pk, vk) = service();
        let witness = witness();
        let proof = service.generate_blocking(&witness, &pk).unwrap();
        let signals = witness.public_signals();

        let mut root = signals;
        root.root[0] ^= 1;
        let mut nullifier = signals;
        nullifier.nullifier_hash = NullifierHash([0xFF; 32]);
        let mut signal = signals;
        signal.signal_hash[31] ^= 1;
        let mut external = signals;
        external.external_nullifier = ExternalNullifier::from_address([0x0D; 20]);

        for mutated in [root, nullifier, signal, external] {
            assert!(!service.verify(&vk, &proof, &mutated).unwrap());
        }
    }

    #[test]
    fn test_version_mismatch() {
        let (service, pk, _) = service();
        let mut witness = witness();
        witness.circuit_version = 2;
        assert!(matches!(
            service.generate_blocking(&witness, &pk),
            Err(ProofError::CircuitVersionMismatch {
                input_version: 2,
                input_checksum: None,
                ..
            })
        ));
    }

    #[test]
    fn test_foreign_verifying_key() {
        let (service, pk, _) = service();
        let (_, other_vk) = MockBackend::new().setup(2);
        let witness = witness();
        let proof = service.generate_blocking(&witness, &pk).unwrap();
        assert!(matches!(
            service.verify(&other_vk, &proof, &witness.public_signals()),
            Err(ProofError::CircuitVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_foreign_proving_key() {
        let (service, pk, _) = service();
        let (other_pk, _) = MockBackend::new().setup(2);
        // v1 tag on key bytes from another setup
        let foreign = ProvingKey {
            circuit: pk.circuit,
            bytes: other_pk.bytes,
        };
        let err = service.generate_blocking(&witness(), &foreign).unwrap_err();
        match err {
            ProofError::CircuitVersionMismatch {
                key,
                input_checksum: Some(derived),
                ..
            } => {
                assert_eq!(key, pk.circuit);
                assert_ne!(derived, pk.circuit.checksum);
            }
            other => panic!("expected circuit mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_proof_is_an_error() {
        let (service, _, vk) = service();
        let signals = witness().public_signals();
        assert!(matches!(
            service.verify_encoded(&vk, b"garbage", &signals),
            Err(ProofError::MalformedProof(_))
        ));

        let bad = Proof {
            circuit: vk.circuit,
            public_signals: signals,
            bytes: vec![1, 2, 3],
        };
        assert!(matches!(
            service.verify(&vk, &bad, &signals),
            Err(ProofError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_self_check_before_proving() {
        let (service, pk, _) = service();
        let mut witness = witness();
        witness.root[0] ^= 1;
        assert!(matches!(
            service.generate_blocking(&witness, &pk),
            Err(ProofError::WitnessRootMismatch)
        ));
    }

    #[tokio::test]
    async fn test_async_generate() {
        let (service, pk, vk) = service();
        let witness = witness();
        let proof = service.generate(witness.clone(), pk).wait().await.unwrap();
        assert!(service.verify(&vk, &proof, &witness.public_signals()).unwrap());
    }

    /// Takes long enough that cancellation and timeouts win the race.
    struct SlowBackend;

    impl ProvingBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn prove(
            &self,
            key: &ProvingKey,
            witness: &WitnessInputs,
        ) -> Result<crate::backend::RawProof, crate::backend::BackendError> {
            std::thread::sleep(Duration::from_millis(500));
            MockBackend::new().prove(key, witness)
        }

        fn verify(
            &self,
            key: &VerifyingKey,
            proof: &[u8],
            public_values: &[u8],
        ) -> Result<bool, crate::backend::BackendError> {
            MockBackend::new().verify(key, proof, public_values)
        }
    }

    #[tokio::test]
    async fn test_cancel() {
        let (pk, _) = MockBackend::new().setup(1);
        let service = ProofService::new(Arc::new(SlowBackend));
        let job = service.generate(witness(), pk);
        job.cancel_handle().cancel();
        assert!(matches!(job.wait().await, Err(ProofError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_leaves_next_job_alone() {
        let (pk, _) = MockBackend::new().setup(1);
        let service = ProofService::new(Arc::new(MockBackend::new()));
        let cancel = CancelHandle::new();

        service
            .generate_with(witness(), pk.clone(), &cancel)
            .wait()
            .await
            .unwrap();
        cancel.cancel();

        let next = service.generate_with(witness(), pk, &cancel).wait().await;
        assert!(next.is_ok(), "stale cancel reached the next job: {next:?}");
    }

    #[tokio::test]
    async fn test_one_handle_cancels_every_running_job() {
        let (pk, _) = MockBackend::new().setup(1);
        let service = ProofService::new(Arc::new(SlowBackend));
        let cancel = CancelHandle::new();

        let first = service.generate_with(witness(), pk.clone(), &cancel);
        let second = service.generate_with(witness(), pk, &cancel);
        let waiting = tokio::spawn(async move { (first.wait().await, second.wait().await) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let (first, second) = waiting.await.unwrap();
        assert!(matches!(first, Err(ProofError::Cancelled)));
        assert!(matches!(second, Err(ProofError::Cancelled)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (pk, _) = MockBackend::new().setup(1);
        let service =
            ProofService::new(Arc::new(SlowBackend)).with_timeout(Duration::from_millis(20));
        let result = service.generate(witness(), pk).wait().await;
        assert!(matches!(result, Err(ProofError::Timeout(_))));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mixer_lib::*;
    use mixer_script::{
        CancelHandle, ErrorKind, Ledger, LedgerError, MemoryLedger, MockBackend, Proof,
        ProofService, ProvingKey, Rejection, TreeReplica, VerifyingKey, WithdrawError, Withdrawal,
        WithdrawalFlow, WithdrawalState, WithdrawalSubmission,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const POOL: [u8; 20] = [0x5F; 20];
    const DENOMINATION: u128 = 100_000_000_000_000_000; // 0.1 ETH
    const FEE: u128 = 2_000_000_000_000_000;
    const RECIPIENT: [u8; 20] = [0xDE; 20];
    const RELAYER: [u8; 20] = [0xBE; 20];

    struct Pool {
        ledger: Arc<MemoryLedger<MockBackend>>,
        service: ProofService<MockBackend>,
        pk: ProvingKey,
        vk: VerifyingKey,
    }

    /// Depth-20 in-memory pool with the mock prover.
    fn pool() -> Pool {
        let backend = Arc::new(MockBackend::new());
        let (pk, vk) = backend.setup(WITHDRAW_V1.version);
        let ledger = Arc::new(
            MemoryLedger::new(POOL, WITHDRAW_V1.tree_depth, DENOMINATION, vk.clone(), Arc::clone(&backend))
                .unwrap(),
        );
        Pool {
            ledger,
            service: ProofService::new(backend),
            pk,
            vk,
        }
    }

    fn identity(seed: u64) -> Identity {
        Identity::generate(&mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn flow(pool: &Pool) -> WithdrawalFlow<MemoryLedger<MockBackend>, MockBackend> {
        WithdrawalFlow::new(
            Arc::clone(&pool.ledger),
            Arc::new(TreeReplica::new(WITHDRAW_V1.tree_depth).unwrap()),
            pool.service.clone(),
            pool.pk.clone(),
            pool.vk.clone(),
        )
        .unwrap()
    }

    /// Prove against the ledger's current leaves without going through the flow.
    fn prove_now(pool: &Pool, identity: &Identity, signal: Signal) -> Proof {
        let leaves: Vec<[u8; 32]> = pool
            .ledger
            .events_since(0)
            .into_iter()
            .map(|e| e.commitment)
            .collect();
        let tree = CommitmentTree::from_leaves(WITHDRAW_V1.tree_depth, &leaves).unwrap();
        let commitment = identity.commitment();
        let index = tree.index_of(&commitment.0).unwrap();
        let witness = WitnessBuilder::default()
            .build(
                &tree,
                index,
                &commitment,
                &signal,
                identity,
                &ExternalNullifier::from_address(POOL),
            )
            .unwrap();
        pool.service.generate_blocking(&witness, &pool.pk).unwrap()
    }

    fn submission(proof: Proof, signal: &Signal) -> WithdrawalSubmission {
        WithdrawalSubmission {
            proof,
            recipient: signal.recipient,
            fee: signal.fee,
            relayer: signal.relayer,
        }
    }

    #[tokio::test]
    async fn test_deposit_withdraw_replay() {
        let pool = pool();
        let alice = identity(1);
        let bob = identity(2);

        let a = pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();
        let b = pool.ledger.deposit(bob.commitment(), DENOMINATION).unwrap();
        assert_eq!((a.index, b.index), (0, 1));

        let flow = flow(&pool);
        let signal = Signal::new(RECIPIENT, FEE, RELAYER);
        let mut withdrawal = Withdrawal::new(alice.commitment(), signal);
        let receipt = flow.withdraw(&mut withdrawal, &alice).await.unwrap();

        assert_eq!(withdrawal.state(), WithdrawalState::Withdrawn);
        assert_eq!(
            receipt.nullifier_hash,
            derive_nullifier_hash(&alice.identity_nullifier, &ExternalNullifier::from_address(POOL))
        );
        assert!(pool.ledger.is_spent(&receipt.nullifier_hash).await.unwrap());
        assert_eq!(pool.ledger.balance_of(&RECIPIENT), DENOMINATION - FEE);
        assert_eq!(pool.ledger.balance_of(&RELAYER), FEE);

        // Same proof again.
        let proof = withdrawal.proof().cloned().unwrap();
        assert_eq!(
            pool.ledger.submit_withdrawal(&submission(proof, &signal)).await,
            Err(LedgerError::Rejected(Rejection::NullifierSpent))
        );

        // Fresh proof for another recipient, same deposit.
        let other = Signal::new([0x01; 20], 0, [0u8; 20]);
        let proof = prove_now(&pool, &alice, other);
        assert_eq!(proof.public_signals.nullifier_hash, receipt.nullifier_hash);
        assert_ne!(proof.public_signals.signal_hash, signal.hash());
        assert_eq!(
            pool.ledger.submit_withdrawal(&submission(proof, &other)).await,
            Err(LedgerError::Rejected(Rejection::NullifierSpent))
        );

        // Bob is unaffected.
        let mut withdrawal = Withdrawal::new(bob.commitment(), Signal::new(RECIPIENT, 0, [0u8; 20]));
        flow.withdraw(&mut withdrawal, &bob).await.unwrap();
        assert_eq!(pool.ledger.balance_of(&RECIPIENT), 2 * DENOMINATION - FEE);
    }

    #[tokio::test]
    async fn test_tampered_recipient() {
        let pool = pool();
        let alice = identity(1);
        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();

        let signal = Signal::new(RECIPIENT, FEE, RELAYER);
        let proof = prove_now(&pool, &alice, signal);
        let thief = Signal::new([0x66; 20], FEE, RELAYER);

        assert_eq!(
            pool.ledger.submit_withdrawal(&submission(proof.clone(), &thief)).await,
            Err(LedgerError::Rejected(Rejection::SignalHashMismatch))
        );

        // Public signals rewritten to match the new recipient; the proof no longer attests to them.
        let mut forged = proof.clone();
        forged.public_signals.signal_hash = thief.hash();
        assert_eq!(
            pool.ledger.submit_withdrawal(&submission(forged, &thief)).await,
            Err(LedgerError::Rejected(Rejection::ProofInvalid))
        );

        // The honest submission still goes through.
        pool.ledger
            .submit_withdrawal(&submission(proof, &signal))
            .await
            .unwrap();
        assert_eq!(pool.ledger.balance_of(&[0x66; 20]), 0);
    }

    #[test]
    fn test_public_signal_mutation_fails_verification() {
        let pool = pool();
        let alice = identity(1);
        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();
        let proof = prove_now(&pool, &alice, Signal::new(RECIPIENT, 0, [0u8; 20]));
        assert!(pool.service.verify(&pool.vk, &proof, &proof.public_signals).unwrap());

        let mutations: [fn(&mut PublicSignals); 4] = [
            |s| s.root[0] ^= 1,
            |s| s.nullifier_hash.0[31] ^= 1,
            |s| s.signal_hash[5] ^= 1,
            |s| s.external_nullifier.0[12] ^= 1,
        ];
        for mutate in mutations {
            let mut signals = proof.public_signals;
            mutate(&mut signals);
            assert!(!pool.service.verify(&pool.vk, &proof, &signals).unwrap());
        }
    }

    #[test]
    fn test_encoded_proof_verifies() {
        let pool = pool();
        let alice = identity(1);
        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();
        let proof = prove_now(&pool, &alice, Signal::new(RECIPIENT, 0, [0u8; 20]));

        let encoded = proof.encode();
        assert!(pool
            .service
            .verify_encoded(&pool.vk, &encoded, &proof.public_signals)
            .unwrap());
        assert!(pool
            .service
            .verify_encoded(&pool.vk, &encoded[..encoded.len() - 1], &proof.public_signals)
            .is_err());
    }

    #[tokio::test]
    async fn test_recent_root_accepted_then_evicted() {
        let pool = pool();
        let alice = identity(1);
        let bob = identity(2);
        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();
        pool.ledger.deposit(bob.commitment(), DENOMINATION).unwrap();

        let signal = Signal::new(RECIPIENT, 0, [0u8; 20]);
        let alice_proof = prove_now(&pool, &alice, signal);
        let bob_proof = prove_now(&pool, &bob, signal);

        // Newer deposits do not invalidate a proof while its root is in the history window.
        for i in 0..(ROOT_HISTORY_SIZE as u64 - 1) {
            pool.ledger
                .deposit(identity(100 + i).commitment(), DENOMINATION)
                .unwrap();
        }
        pool.ledger
            .submit_withdrawal(&submission(alice_proof, &signal))
            .await
            .unwrap();

        pool.ledger
            .deposit(identity(999).commitment(), DENOMINATION)
            .unwrap();
        assert_eq!(
            pool.ledger.submit_withdrawal(&submission(bob_proof, &signal)).await,
            Err(LedgerError::Rejected(Rejection::UnknownRoot))
        );
    }

    #[tokio::test]
    async fn test_replica_follows_late_deposits() {
        let pool = pool();
        let alice = identity(1);
        let flow = flow(&pool);

        pool.ledger.deposit(identity(7).commitment(), DENOMINATION).unwrap();
        flow.sync().await.unwrap();
        assert_eq!(flow.replica().last_confirmed_index(), Some(0));

        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();
        let mut withdrawal = Withdrawal::new(alice.commitment(), Signal::new(RECIPIENT, 0, [0u8; 20]));
        flow.prepare(&mut withdrawal, &alice, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(flow.replica().last_confirmed_index(), Some(1));
        assert_eq!(
            withdrawal.proof().unwrap().public_signals.root,
            pool.ledger.current_root().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_wrong_identity_cannot_withdraw() {
        let pool = pool();
        let alice = identity(1);
        let mallory = identity(3);
        pool.ledger.deposit(alice.commitment(), DENOMINATION).unwrap();

        let flow = flow(&pool);
        let mut withdrawal = Withdrawal::new(alice.commitment(), Signal::new(RECIPIENT, 0, [0u8; 20]));
        let err = flow
            .prepare(&mut withdrawal, &mallory, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WithdrawError::Witness(WitnessError::CommitmentMismatch)
        ));
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(withdrawal.state(), WithdrawalState::Deposited);
    }

    #[test]
    fn test_full_tree() {
        let backend = Arc::new(MockBackend::new());
        let (_, vk) = backend.setup(WITHDRAW_V1.version);
        let ledger = MemoryLedger::new(POOL, 2, DENOMINATION, vk, backend).unwrap();
        for seed in 0..4 {
            ledger.deposit(identity(seed).commitment(), DENOMINATION).unwrap();
        }
        assert_eq!(
            ledger.deposit(identity(4).commitment(), DENOMINATION),
            Err(LedgerError::Rejected(Rejection::TreeFull))
        );

        let mut tree = CommitmentTree::new(2).unwrap();
        for seed in 0..4 {
            tree.insert(identity(seed).commitment().0).unwrap();
        }
        let root = tree.root();
        assert_eq!(tree.insert([1; 32]), Err(TreeError::TreeFull { capacity: 4 }));
        assert_eq!(tree.root(), root);
        assert_eq!(tree.next_index(), 4);
    }

    #[test]
    fn test_identity_json_roundtrip() {
        let alice = identity(1);
        let json = serde_json::to_string(&alice).unwrap();
        let parsed: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.commitment(), alice.commitment());
    }

    mod tree_properties {
        use mixer_lib::{verify_merkle_proof, CommitmentTree};
        use proptest::prelude::*;

        fn leaves() -> impl Strategy<Value = Vec<[u8; 32]>> {
            prop::collection::vec(any::<[u8; 32]>(), 1..24)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn insert_and_update_agree(leaves in leaves()) {
                let appended = CommitmentTree::from_leaves(6, &leaves).unwrap();

                let mut replayed = CommitmentTree::new(6).unwrap();
                for (i, leaf) in leaves.iter().enumerate().rev() {
                    replayed.update(i as u64, *leaf).unwrap();
                }
                // Re-applying an event is a no-op.
                replayed.update(0, leaves[0]).unwrap();

                prop_assert_eq!(appended.root(), replayed.root());
                prop_assert_eq!(replayed.last_confirmed_index(), Some(leaves.len() as u64 - 1));
            }

            #[test]
            fn every_path_folds_to_root(leaves in leaves()) {
                let tree = CommitmentTree::from_leaves(6, &leaves).unwrap();
                for (i, leaf) in leaves.iter().enumerate() {
                    let path = tree.path_to(i as u64).unwrap();
                    prop_assert_eq!(path.depth(), 6);
                    prop_assert!(verify_merkle_proof(*leaf, &path.steps, tree.root()));
                }
            }

            #[test]
            fn root_changes_with_any_leaf(leaves in leaves(), pick in any::<prop::sample::Index>()) {
                let tree = CommitmentTree::from_leaves(6, &leaves).unwrap();
                let i = pick.index(leaves.len());
                let mut changed = leaves.clone();
                changed[i][0] ^= 0xFF;
                let other = CommitmentTree::from_leaves(6, &changed).unwrap();
                prop_assert_ne!(tree.root(), other.root());
            }
        }
    }
}

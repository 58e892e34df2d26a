use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mixer_lib::{
    keccak256, CommitmentTree, ExternalNullifier, IdentityCommitment, NullifierHash, Signal,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{Asset, Ledger, LedgerError, Receipt, Rejection, WithdrawalSubmission};
use crate::artifacts::VerifyingKey;
use crate::backend::ProvingBackend;
use crate::replica::LeafInserted;

/// In-process mixer with the same acceptance rules as the pool contract:
/// fixed denomination, recent-root window, one withdrawal per nullifier hash.
///
/// A token pool keeps its own token ledger: holders are funded with [`mint`](Self::mint), grant
/// the pool an allowance with [`approve`](Self::approve) and deposit with
/// [`deposit_token`](Self::deposit_token). Balances are always in the pool's asset.
pub struct MemoryLedger<B> {
    pool_address: [u8; 20],
    asset: Asset,
    denomination: u128,
    verifying_key: VerifyingKey,
    backend: Arc<B>,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    tree: CommitmentTree,
    events: Vec<LeafInserted>,
    spent: HashSet<NullifierHash>,
    balances: HashMap<[u8; 20], u128>,
    /// Token allowances granted to the pool, per holder.
    allowances: HashMap<[u8; 20], u128>,
    tx_count: u64,
}

impl<B: ProvingBackend> MemoryLedger<B> {
    pub fn new(
        pool_address: [u8; 20],
        depth: usize,
        denomination: u128,
        verifying_key: VerifyingKey,
        backend: Arc<B>,
    ) -> Result<Self, mixer_lib::TreeError> {
        Ok(MemoryLedger {
            pool_address,
            asset: Asset::Native,
            denomination,
            verifying_key,
            backend,
            state: Mutex::new(LedgerState {
                tree: CommitmentTree::new(depth)?,
                events: Vec::new(),
                spent: HashSet::new(),
                balances: HashMap::new(),
                allowances: HashMap::new(),
                tx_count: 0,
            }),
        })
    }

    /// Hold `asset` instead of the native coin.
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = asset;
        self
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn pool_address(&self) -> [u8; 20] {
        self.pool_address
    }

    pub fn denomination(&self) -> u128 {
        self.denomination
    }

    /// Accept a native deposit of exactly one denomination and emit its leaf event.
    pub fn deposit(
        &self,
        commitment: IdentityCommitment,
        value: u128,
    ) -> Result<LeafInserted, LedgerError> {
        if self.asset != Asset::Native {
            return Err(LedgerError::Rejected(Rejection::UnsupportedAsset(self.asset)));
        }
        if value != self.denomination {
            return Err(LedgerError::Rejected(Rejection::WrongAmount {
                expected: self.denomination,
                actual: value,
            }));
        }
        let mut state = self.state.lock();
        insert_leaf(&mut state, commitment)
    }

    /// Pull one denomination of the pool's token from `from` and emit the leaf event.
    pub fn deposit_token(
        &self,
        commitment: IdentityCommitment,
        from: [u8; 20],
    ) -> Result<LeafInserted, LedgerError> {
        let Asset::Token(_) = self.asset else {
            return Err(LedgerError::Rejected(Rejection::UnsupportedAsset(self.asset)));
        };
        let required = self.denomination;
        let mut state = self.state.lock();

        let allowance = state.allowances.get(&from).copied().unwrap_or(0);
        if allowance < required {
            return Err(LedgerError::Rejected(Rejection::InsufficientAllowance {
                allowance,
                required,
            }));
        }
        let balance = state.balances.get(&from).copied().unwrap_or(0);
        if balance < required {
            return Err(LedgerError::Rejected(Rejection::InsufficientBalance {
                balance,
                required,
            }));
        }
        if state.tree.next_index() >= state.tree.capacity() {
            return Err(LedgerError::Rejected(Rejection::TreeFull));
        }

        state.allowances.insert(from, allowance - required);
        state.balances.insert(from, balance - required);
        insert_leaf(&mut state, commitment)
    }

    /// Credit `amount` of the pool's asset to `to`.
    pub fn mint(&self, to: [u8; 20], amount: u128) {
        *self.state.lock().balances.entry(to).or_default() += amount;
    }

    /// Let the pool pull up to `amount` from `owner`.
    pub fn approve(&self, owner: [u8; 20], amount: u128) {
        self.state.lock().allowances.insert(owner, amount);
    }

    /// Leaf events with index `>= from`.
    pub fn events_since(&self, from: u64) -> Vec<LeafInserted> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.index >= from)
            .copied()
            .collect()
    }

    pub fn balance_of(&self, address: &[u8; 20]) -> u128 {
        self.state.lock().balances.get(address).copied().unwrap_or(0)
    }

    fn check_and_apply(&self, submission: &WithdrawalSubmission) -> Result<Receipt, Rejection> {
        let signals = &submission.proof.public_signals;

        if signals.external_nullifier != self.external_nullifier() {
            return Err(Rejection::ExternalNullifierMismatch);
        }
        if submission.fee > self.denomination {
            return Err(Rejection::FeeTooHigh {
                fee: submission.fee,
                denomination: self.denomination,
            });
        }
        if submission.relayer == [0u8; 20] && submission.fee > 0 {
            return Err(Rejection::RelayerInvalid);
        }
        let signal = Signal::new(submission.recipient, submission.fee, submission.relayer);
        if signal.hash() != signals.signal_hash {
            return Err(Rejection::SignalHashMismatch);
        }
        if submission.proof.circuit != self.verifying_key.circuit {
            return Err(Rejection::CircuitMismatch(submission.proof.circuit.to_string()));
        }

        let mut state = self.state.lock();
        if !state.tree.is_known_root(signals.root) {
            return Err(Rejection::UnknownRoot);
        }
        if state.spent.contains(&signals.nullifier_hash) {
            return Err(Rejection::NullifierSpent);
        }
        match self.backend.verify(
            &self.verifying_key,
            &submission.proof.bytes,
            &signals.to_bytes(),
        ) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(Rejection::ProofInvalid),
        }

        state.spent.insert(signals.nullifier_hash);
        *state.balances.entry(submission.recipient).or_default() +=
            self.denomination - submission.fee;
        *state.balances.entry(submission.relayer).or_default() += submission.fee;
        state.tx_count += 1;

        let tx_hash = keccak256(
            &[
                &state.tx_count.to_be_bytes()[..],
                signals.nullifier_hash.as_bytes(),
            ]
            .concat(),
        );
        Ok(Receipt {
            tx_hash: Some(tx_hash),
            nullifier_hash: signals.nullifier_hash,
        })
    }
}

fn insert_leaf(
    state: &mut LedgerState,
    commitment: IdentityCommitment,
) -> Result<LeafInserted, LedgerError> {
    let index = state
        .tree
        .insert(commitment.0)
        .map_err(|_| LedgerError::Rejected(Rejection::TreeFull))?;
    let event = LeafInserted {
        index,
        commitment: commitment.0,
    };
    state.events.push(event);
    info!(index, "deposit accepted");
    Ok(event)
}

impl<B: ProvingBackend> Ledger for MemoryLedger<B> {
    fn external_nullifier(&self) -> ExternalNullifier {
        ExternalNullifier::from_address(self.pool_address)
    }

    async fn current_leaves(&self) -> Result<Vec<[u8; 32]>, LedgerError> {
        Ok(self.state.lock().tree.leaves().map(|(_, leaf)| leaf).collect())
    }

    async fn current_root(&self) -> Result<[u8; 32], LedgerError> {
        Ok(self.state.lock().tree.root())
    }

    async fn is_spent(&self, nullifier_hash: &NullifierHash) -> Result<bool, LedgerError> {
        Ok(self.state.lock().spent.contains(nullifier_hash))
    }

    async fn submit_withdrawal(
        &self,
        submission: &WithdrawalSubmission,
    ) -> Result<Receipt, LedgerError> {
        match self.check_and_apply(submission) {
            Ok(receipt) => {
                info!(nullifier_hash = %hex::encode(receipt.nullifier_hash.0), "withdrawal accepted");
                Ok(receipt)
            }
            Err(rejection) => {
                warn!(%rejection, "withdrawal rejected");
                Err(LedgerError::Rejected(rejection))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn ledger() -> MemoryLedger<MockBackend> {
        let backend = MockBackend::new();
        let (_, vk) = backend.setup(1);
        MemoryLedger::new([0x99; 20], 20, 100, vk, Arc::new(backend)).unwrap()
    }

    #[test]
    fn test_deposit_requires_denomination() {
        let ledger = ledger();
        let c = IdentityCommitment([1; 32]);
        assert_eq!(
            ledger.deposit(c, 99),
            Err(LedgerError::Rejected(Rejection::WrongAmount { expected: 100, actual: 99 }))
        );
        assert_eq!(ledger.deposit(c, 100).unwrap().index, 0);
        assert_eq!(ledger.deposit(IdentityCommitment([2; 32]), 100).unwrap().index, 1);
        assert_eq!(ledger.events_since(1).len(), 1);
    }

    const TOKEN: [u8; 20] = [0x70; 20];
    const HOLDER: [u8; 20] = [0x11; 20];

    #[test]
    fn test_native_deposit_into_token_pool_rejected() {
        let ledger = ledger().with_asset(Asset::Token(TOKEN));
        assert_eq!(
            ledger.deposit(IdentityCommitment([1; 32]), 100),
            Err(LedgerError::Rejected(Rejection::UnsupportedAsset(Asset::Token(TOKEN))))
        );
        assert!(ledger.events_since(0).is_empty());
    }

    #[test]
    fn test_token_deposit_into_native_pool_rejected() {
        let ledger = ledger();
        ledger.mint(HOLDER, 100);
        ledger.approve(HOLDER, 100);
        assert_eq!(
            ledger.deposit_token(IdentityCommitment([1; 32]), HOLDER),
            Err(LedgerError::Rejected(Rejection::UnsupportedAsset(Asset::Native)))
        );
        assert_eq!(ledger.balance_of(&HOLDER), 100);
    }

    #[test]
    fn test_token_deposit_pulls_allowance() {
        let ledger = ledger().with_asset(Asset::Token(TOKEN));
        let c = IdentityCommitment([1; 32]);
        ledger.mint(HOLDER, 150);

        assert_eq!(
            ledger.deposit_token(c, HOLDER),
            Err(LedgerError::Rejected(Rejection::InsufficientAllowance {
                allowance: 0,
                required: 100
            }))
        );

        ledger.approve(HOLDER, 200);
        assert_eq!(ledger.deposit_token(c, HOLDER).unwrap().index, 0);
        assert_eq!(ledger.balance_of(&HOLDER), 50);

        // allowance is left, balance is not
        assert_eq!(
            ledger.deposit_token(IdentityCommitment([2; 32]), HOLDER),
            Err(LedgerError::Rejected(Rejection::InsufficientBalance {
                balance: 50,
                required: 100
            }))
        );
        assert_eq!(ledger.events_since(0).len(), 1);
    }

    #[tokio::test]
    async fn test_leaves_and_root() {
        let ledger = ledger();
        ledger.deposit(IdentityCommitment([1; 32]), 100).unwrap();
        ledger.deposit(IdentityCommitment([2; 32]), 100).unwrap();
        let leaves = ledger.current_leaves().await.unwrap();
        assert_eq!(leaves, vec![[1; 32], [2; 32]]);
        assert_eq!(
            ledger.current_root().await.unwrap(),
            CommitmentTree::from_leaves(20, &leaves).unwrap().root()
        );
    }
}

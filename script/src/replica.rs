//! Local replica of the ledger's commitment tree.
//!
//! One writer applies ledger events; any number of readers take snapshots.

use mixer_lib::{CommitmentTree, IdentityCommitment, TreeError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WithdrawError;

/// Leaf-insertion event emitted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafInserted {
    pub index: u64,
    pub commitment: [u8; 32],
}

pub struct TreeReplica {
    tree: RwLock<CommitmentTree>,
}

impl TreeReplica {
    pub fn new(depth: usize) -> Result<Self, TreeError> {
        Ok(TreeReplica {
            tree: RwLock::new(CommitmentTree::new(depth)?),
        })
    }

    pub fn depth(&self) -> usize {
        self.tree.read().depth()
    }

    /// The single update entry point: set the leaf named by a ledger event.
    pub fn apply(&self, event: LeafInserted) -> Result<(), TreeError> {
        let mut tree = self.tree.write();
        tree.update(event.index, event.commitment)?;
        debug!(index = event.index, "applied leaf event");
        Ok(())
    }

    pub fn apply_all<I>(&self, events: I) -> Result<(), TreeError>
    where
        I: IntoIterator<Item = LeafInserted>,
    {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Bring the replica in line with the ledger's full ordered leaf list.
    pub fn sync_from_leaves(&self, leaves: &[[u8; 32]]) -> Result<(), TreeError> {
        let mut tree = self.tree.write();
        if tree.next_index() > leaves.len() as u64 {
            warn!(
                local = tree.next_index(),
                ledger = leaves.len(),
                "replica ahead of ledger, rebuilding"
            );
            *tree = CommitmentTree::from_leaves(tree.depth(), leaves)?;
            return Ok(());
        }
        let mut changed = 0usize;
        for (index, leaf) in leaves.iter().enumerate() {
            let index = index as u64;
            if tree.leaf(index) != Some(*leaf) {
                tree.update(index, *leaf)?;
                changed += 1;
            }
        }
        info!(leaves = leaves.len(), changed, "replica synced");
        Ok(())
    }

    /// Consistent copy of the tree for witness building.
    pub fn snapshot(&self) -> CommitmentTree {
        self.tree.read().clone()
    }

    pub fn root(&self) -> [u8; 32] {
        self.tree.read().root()
    }

    pub fn last_confirmed_index(&self) -> Option<u64> {
        self.tree.read().last_confirmed_index()
    }

    pub fn index_of(&self, commitment: &IdentityCommitment) -> Result<u64, TreeError> {
        self.tree.read().index_of(&commitment.0)
    }

    /// Fail unless the replica has no gaps and matches the ledger's root and leaf count.
    pub fn ensure_fresh(&self, ledger_root: [u8; 32], ledger_leaves: u64) -> Result<(), WithdrawError> {
        let tree = self.tree.read();
        let local_leaves = tree.last_confirmed_index().map_or(0, |i| i + 1);
        if tree.has_gaps() || local_leaves != ledger_leaves || tree.root() != ledger_root {
            return Err(WithdrawError::StaleReplica {
                local_root: tree.root(),
                ledger_root,
                local_leaves,
                ledger_leaves,
            });
        }
        Ok(())
    }
}

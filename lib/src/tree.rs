//! Fixed-depth Merkle accumulator over identity commitments.
//!
//! Zero values match the pool contract:
//!   zeros[0]   = keccak256(bytes32(0))
//!   zeros[i+1] = keccak256(zeros[i] || zeros[i])
//! so the root of an empty tree of depth D is zeros[D].

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::hash::{hash_pair, keccak256};

/// Deepest tree supported; indices stay within u64.
pub const MAX_DEPTH: usize = 32;

/// Matches the contract's ROOT_HISTORY_SIZE.
pub const ROOT_HISTORY_SIZE: usize = 30;

/// A single step in a Merkle proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProofStep {
    /// true if the current node is the LEFT child (index even at this level).
    /// When is_left=true:  parent = hash(current, sibling)
    /// When is_left=false: parent = hash(sibling, current)
    pub is_left: bool,
    /// The sibling hash at this level.
    pub sibling: [u8; 32],
}

/// Membership path for one leaf, ordered leaf to root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    pub leaf_index: u64,
    pub steps: Vec<MerkleProofStep>,
}

impl MerklePath {
    /// Root implied by folding `leaf` up the path.
    pub fn fold(&self, leaf: [u8; 32]) -> [u8; 32] {
        fold_path(leaf, &self.steps)
    }

    pub fn verify(&self, leaf: [u8; 32], expected_root: [u8; 32]) -> bool {
        verify_merkle_proof(leaf, &self.steps, expected_root)
    }

    /// Direction bits leaf to root; bit i is 1 when the node at level i is a right child.
    pub fn index_bits(&self) -> Vec<u8> {
        self.steps.iter().map(|s| u8::from(!s.is_left)).collect()
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

pub fn fold_path(leaf: [u8; 32], proof: &[MerkleProofStep]) -> [u8; 32] {
    let mut current = leaf;
    for step in proof {
        current = if step.is_left {
            hash_pair(&current, &step.sibling)
        } else {
            hash_pair(&step.sibling, &current)
        };
    }
    current
}

/// Verify a Merkle proof against an expected root.
pub fn verify_merkle_proof(
    leaf: [u8; 32],
    proof: &[MerkleProofStep],
    expected_root: [u8; 32],
) -> bool {
    fold_path(leaf, proof) == expected_root
}

/// Zero values for levels 0..=depth.
pub fn compute_zeros(depth: usize) -> Vec<[u8; 32]> {
    let mut zeros = vec![[0u8; 32]; depth + 1];
    zeros[0] = keccak256(&[0u8; 32]);
    for i in 1..=depth {
        zeros[i] = hash_pair(&zeros[i - 1], &zeros[i - 1]);
    }
    zeros
}

/// Root of an empty tree of the given depth.
pub fn compute_empty_root(depth: usize) -> [u8; 32] {
    compute_zeros(depth)[depth]
}

/// Sparse Merkle tree that mirrors the ledger's leaves.
///
/// Only set nodes are stored; every other node takes the zero value of its level.
/// Both `insert` (append) and `update` (ledger event at a known index) funnel into
/// the same node recomputation, so the root depends only on which leaves are set.
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    depth: usize,
    zeros: Vec<[u8; 32]>,
    /// nodes[level][index]; level 0 holds the leaves, level `depth` the root.
    nodes: Vec<BTreeMap<u64, [u8; 32]>>,
    next_index: u64,
    /// Number of leading indices 0..n that are all set.
    contiguous: u64,
    /// Circular buffer of recent roots.
    roots: Vec<[u8; 32]>,
    current_root_index: usize,
}

impl CommitmentTree {
    /// Create an empty tree.
    pub fn new(depth: usize) -> Result<Self, TreeError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth {
                depth,
                max: MAX_DEPTH,
            });
        }
        let zeros = compute_zeros(depth);
        let mut roots = vec![[0u8; 32]; ROOT_HISTORY_SIZE];
        roots[0] = zeros[depth];

        Ok(CommitmentTree {
            depth,
            zeros,
            nodes: vec![BTreeMap::new(); depth + 1],
            next_index: 0,
            contiguous: 0,
            roots,
            current_root_index: 0,
        })
    }

    /// Build a tree from the ledger's ordered leaf list.
    pub fn from_leaves(depth: usize, leaves: &[[u8; 32]]) -> Result<Self, TreeError> {
        let mut tree = Self::new(depth)?;
        for leaf in leaves {
            tree.insert(*leaf)?;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Maximum number of leaves, 2^depth.
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Next index `insert` will use.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Number of leaves that have been set.
    pub fn leaf_count(&self) -> u64 {
        self.nodes[0].len() as u64
    }

    /// Highest index `i` such that every leaf in `0..=i` is set.
    pub fn last_confirmed_index(&self) -> Option<u64> {
        self.contiguous.checked_sub(1)
    }

    /// True when some index below `next_index` was never set.
    pub fn has_gaps(&self) -> bool {
        self.contiguous != self.next_index
    }

    /// Append a leaf at the next free index.
    pub fn insert(&mut self, leaf: [u8; 32]) -> Result<u64, TreeError> {
        let index = self.next_index;
        if index >= self.capacity() {
            return Err(TreeError::TreeFull {
                capacity: self.capacity(),
            });
        }
        self.set_leaf(index, leaf);
        Ok(index)
    }

    /// Overwrite the leaf at `index` and recompute its ancestors. Re-applying the same
    /// `(index, leaf)` leaves the root unchanged.
    pub fn update(&mut self, index: u64, leaf: [u8; 32]) -> Result<(), TreeError> {
        if index >= self.capacity() {
            return Err(TreeError::IndexOutOfRange { index });
        }
        self.set_leaf(index, leaf);
        Ok(())
    }

    fn set_leaf(&mut self, index: u64, leaf: [u8; 32]) {
        let previous_root = self.root();

        self.nodes[0].insert(index, leaf);
        let mut idx = index;
        let mut current = leaf;
        for level in 0..self.depth {
            let sibling = self.node(level, idx ^ 1);
            current = if idx % 2 == 0 {
                hash_pair(&current, &sibling)
            } else {
                hash_pair(&sibling, &current)
            };
            idx /= 2;
            self.nodes[level + 1].insert(idx, current);
        }

        self.next_index = self.next_index.max(index + 1);
        while self.nodes[0].contains_key(&self.contiguous) {
            self.contiguous += 1;
        }

        if current != previous_root {
            self.current_root_index = (self.current_root_index + 1) % ROOT_HISTORY_SIZE;
            self.roots[self.current_root_index] = current;
        }
    }

    fn node(&self, level: usize, index: u64) -> [u8; 32] {
        self.nodes[level]
            .get(&index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Current root.
    pub fn root(&self) -> [u8; 32] {
        self.node(self.depth, 0)
    }

    /// Leaf at `index`, if set.
    pub fn leaf(&self, index: u64) -> Option<[u8; 32]> {
        self.nodes[0].get(&index).copied()
    }

    /// Set leaves in index order.
    pub fn leaves(&self) -> impl Iterator<Item = (u64, [u8; 32])> + '_ {
        self.nodes[0].iter().map(|(i, l)| (*i, *l))
    }

    /// Check if a root exists in recent history.
    pub fn is_known_root(&self, root: [u8; 32]) -> bool {
        if root == [0u8; 32] {
            return false;
        }
        let mut i = self.current_root_index;
        loop {
            if self.roots[i] == root {
                return true;
            }
            if i == 0 {
                i = ROOT_HISTORY_SIZE;
            }
            i -= 1;
            if i == self.current_root_index {
                break;
            }
        }
        false
    }

    /// Sibling path for the leaf at `index`.
    pub fn path_to(&self, index: u64) -> Result<MerklePath, TreeError> {
        if !self.nodes[0].contains_key(&index) {
            return Err(TreeError::IndexOutOfRange { index });
        }

        let mut steps = Vec::with_capacity(self.depth);
        let mut idx = index;
        for level in 0..self.depth {
            steps.push(MerkleProofStep {
                is_left: idx % 2 == 0,
                sibling: self.node(level, idx ^ 1),
            });
            idx /= 2;
        }

        Ok(MerklePath {
            leaf_index: index,
            steps,
        })
    }

    /// Lowest index holding `leaf`.
    pub fn index_of(&self, leaf: &[u8; 32]) -> Result<u64, TreeError> {
        self.nodes[0]
            .iter()
            .find(|(_, l)| *l == leaf)
            .map(|(i, _)| *i)
            .ok_or(TreeError::LeafNotFound)
    }
}

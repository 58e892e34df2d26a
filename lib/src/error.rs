use thiserror::Error;

/// Failures while deriving identity material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("insufficient entropy: need {required} bytes, source supplied {available}")]
    InsufficientEntropy { required: usize, available: usize },

    #[error("signing seed and identity-nullifier seed must be drawn independently")]
    SeedReuse,

    #[error("signing seed is not a valid secp256k1 scalar")]
    InvalidSigningKey,
}

/// Failures of the commitment tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("tree depth {depth} outside supported range 1..={max}")]
    InvalidDepth { depth: usize, max: usize },

    #[error("merkle tree is full (capacity {capacity})")]
    TreeFull { capacity: u64 },

    #[error("leaf index {index} has never been set")]
    IndexOutOfRange { index: u64 },

    #[error("leaf not found in tree (not yet deposited)")]
    LeafNotFound,
}

/// Failures decoding a signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("signal word {word} has non-zero padding")]
    NonCanonicalPadding { word: usize },
}

/// Failures while assembling a withdrawal witness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessError {
    #[error("identity does not produce the supplied commitment")]
    CommitmentMismatch,

    #[error("signature over the withdrawal message failed local verification")]
    SignatureMismatch,

    #[error("local tree is stale: path folds to {computed:02x?}, tree root is {tree_root:02x?}")]
    StaleTree {
        tree_root: [u8; 32],
        computed: [u8; 32],
    },

    #[error("witness root self-check failed")]
    WitnessRootMismatch,

    #[error("tree depth {tree} does not match circuit v{version} depth {circuit}")]
    DepthMismatch {
        version: u32,
        tree: usize,
        circuit: usize,
    },

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
}

/// A constraint of the withdraw circuit is not satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError {
    #[error("unsupported circuit version {0}")]
    UnsupportedVersion(u32),

    #[error("merkle path has {actual} levels, circuit expects {expected}")]
    PathLength { expected: usize, actual: usize },

    #[error("identity commitment is not a member of the tree with the given root")]
    MembershipInvalid,

    #[error("signature over external nullifier and signal hash is invalid")]
    SignatureInvalid,

    #[error("nullifier hash is not derived from the identity nullifier")]
    NullifierMismatch,

    #[error("public signals must be {expected} bytes, got {actual}")]
    MalformedPublicSignals { expected: usize, actual: usize },
}

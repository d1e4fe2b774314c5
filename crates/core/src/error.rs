//! Error taxonomy for build, query, save, and load.

/// Errors raised by the index core. All are returned to the immediate caller;
/// nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum AnnError {
    /// Query or save attempted before any successful build or load.
    #[error("index not ready: call build() or load() first")]
    NotBuilt,

    /// A vector width disagrees with the index dimension, or a graph binary
    /// disagrees with its sidecar.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Similarity space recorded in the sidecar differs from the graph binary.
    #[error("similarity space mismatch: sidecar says '{sidecar}', graph says '{graph}'")]
    SpaceMismatch { sidecar: String, graph: String },

    /// Insert attempted into a graph that is already at capacity.
    #[error("capacity exceeded: graph holds at most {capacity} elements")]
    CapacityExceeded { capacity: usize },

    /// Sidecar or graph binary missing, unreadable, or structurally invalid.
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    /// Embedding row count differs from external ID count at build time.
    #[error("input length mismatch: {embeddings} embeddings but {ids} ids")]
    InputLengthMismatch { embeddings: usize, ids: usize },

    /// Build called with zero embeddings.
    #[error("cannot build an index from zero embeddings")]
    EmptyInput,

    /// A configuration parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input artifact or query vector could not be used.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, AnnError>;

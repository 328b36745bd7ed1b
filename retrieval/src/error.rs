//! Error types for retrieval, ranking and context assembly.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval layer.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] triage_embeddings::EmbeddingError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Ranking weights do not sum to 1.0.
    #[error("ranking weights must be non-negative and sum to 1.0, got {sum}")]
    InvalidWeights { sum: f32 },

    /// A chunk is malformed.
    #[error("invalid chunk {id}: {reason}")]
    InvalidChunk { id: String, reason: String },

    /// The knowledge store could not serve the request.
    #[error("knowledge store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

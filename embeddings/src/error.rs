use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Failures while turning ticket or knowledge text into vectors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The provider has no credentials.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    #[error("embedding request failed: {0}")]
    ApiRequest(String),

    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("provider is rate limiting, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A vector does not match the index it is used against.
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed cache file: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache file i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

//! Error types for the triage pipeline.

use thiserror::Error;

use crate::state::PipelineState;
use crate::ticket::TicketStatus;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the pipeline.
///
/// Service failures inside a run are converted to fallbacks and never show
/// up here; only rejected input, misuse and configuration problems do.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The ticket failed validation.
    #[error("invalid ticket: {}", reasons.join("; "))]
    InvalidTicket { reasons: Vec<String> },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A state transition outside the pipeline graph was attempted.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    /// Feedback addressed to another ticket.
    #[error("feedback for ticket {actual} sent to ticket {expected}")]
    FeedbackMismatch { expected: String, actual: String },

    /// The ticket is not in a status the operation accepts.
    #[error("ticket {ticket_id} is {status}, expected {expected}")]
    UnexpectedStatus {
        ticket_id: String,
        status: TicketStatus,
        expected: TicketStatus,
    },

    /// A built-in detection pattern failed to compile.
    #[error("invalid {name} pattern: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex_lite::Error,
    },

    /// Retrieval layer error.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] triage_retrieval::RetrievalError),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] triage_embeddings::EmbeddingError),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by a [`crate::generation::TextGenerator`].
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Generator not configured (missing API key, etc.).
    #[error("generator not configured: {0}")]
    NotConfigured(String),

    /// The service answered with an error.
    #[error("generation request failed: {0}")]
    Request(String),

    /// Rate limited by the service.
    #[error("rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call did not finish in time.
    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

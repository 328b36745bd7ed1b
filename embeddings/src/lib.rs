//! Embeddings for the triage pipeline.
//!
//! Ticket text and knowledge-base chunks are turned into vectors by an
//! [`EmbeddingProvider`] and compared by cosine similarity in a
//! [`SimilarityIndex`].
//!
//! ```text
//!   ticket / chunk text
//!          │
//!          ▼
//!   CachedProvider ──miss──► OpenAIProvider | HashingEmbeddingProvider
//!          │
//!          ▼
//!   SimilarityIndex (unit vectors) ──► nearest k above a floor
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;

pub use cache::{CacheStats, CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use index::SimilarityIndex;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingEmbeddingProvider,
    OpenAIProvider,
};
pub use similarity::{Neighbor, cosine_similarity};

/// A dense vector.
pub type Embedding = Vec<f32>;

//! Knowledge chunks and retrieval results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to a knowledge chunk by the ingestion process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Support category the chunk belongs to.
    pub category: String,

    /// Section of the source document.
    #[serde(default)]
    pub section: String,

    /// Source document.
    #[serde(default)]
    pub source: String,

    /// Declared priority ("low", "medium", "high", "critical").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// When the source was last updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChunkMetadata {
    /// Create metadata for a category.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    /// Set the section.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Set the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the declared priority.
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Set the last update time.
    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Whether the declared priority is high or critical.
    pub fn is_high_priority(&self) -> bool {
        self.priority
            .as_deref()
            .map(str::to_ascii_lowercase)
            .is_some_and(|p| p == "high" || p == "critical")
    }
}

/// An immutable unit of retrievable knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Unique identifier; re-adding the same id overwrites.
    pub id: String,

    /// Text content.
    pub content: String,

    /// Ingestion metadata.
    pub metadata: ChunkMetadata,
}

impl KnowledgeChunk {
    /// Create a new chunk.
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }
}

/// A chunk admitted by a retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The retrieved chunk.
    pub chunk: Arc<KnowledgeChunk>,

    /// Cosine similarity with the query.
    pub similarity: f32,

    /// Threshold that admitted the chunk.
    pub threshold: f32,

    /// Whether the chunk came from the relaxed fallback pass.
    pub fallback: bool,
}

impl RetrievalResult {
    /// Chunk identifier.
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

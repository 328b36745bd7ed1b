//! Aggregate configuration, loadable from TOML.
//!
//! Every section is optional in the file; missing sections and keys take
//! their defaults.
//!
//! ```toml
//! [retrieval]
//! top_k = 5
//! similarity_threshold = 0.75
//!
//! [confidence]
//! threshold = 0.6
//!
//! [routing.category_queues]
//! billing = "billing"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use triage_retrieval::{ContextConfig, RankingConfig, RetrievalConfig};

use crate::confidence::ConfidenceConfig;
use crate::error::{PipelineError, Result};
use crate::generation::GenerationConfig;
use crate::priority::PriorityConfig;
use crate::query::QueryConfig;

/// Where escalated tickets go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Queue for tickets carrying sensitive data.
    pub security_queue: String,

    /// Queue when no category queue matches.
    pub default_queue: String,

    /// Queue per category.
    pub category_queues: BTreeMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let category_queues = [
            ("technical", "tier2_technical"),
            ("billing", "billing"),
            ("account", "account_management"),
            ("shipping", "logistics"),
        ]
        .into_iter()
        .map(|(c, q)| (c.to_string(), q.to_string()))
        .collect();

        Self {
            security_queue: "security".to_string(),
            default_queue: "general_support".to_string(),
            category_queues,
        }
    }
}

impl RoutingConfig {
    /// Queue for a ticket with the given category and sensitivity.
    pub fn queue_for(&self, category: Option<&str>, sensitive: bool) -> &str {
        if sensitive {
            return &self.security_queue;
        }
        category
            .and_then(|c| self.category_queues.get(c))
            .map_or(self.default_queue.as_str(), String::as_str)
    }
}

/// Configuration of the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub retrieval: RetrievalConfig,
    pub ranking: RankingConfig,
    pub context: ContextConfig,
    pub query: QueryConfig,
    pub priority: PriorityConfig,
    pub generation: GenerationConfig,
    pub confidence: ConfidenceConfig,
    pub routing: RoutingConfig,
}

impl TriageConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check weight sums, threshold ordering and timeouts.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        self.ranking.hybrid_weights.validate()?;
        self.context.validate()?;
        self.query.validate()?;
        self.confidence.validate()?;

        let generation = &self.generation;
        if generation.timeout_ms == 0 {
            return Err(PipelineError::Config(
                "generation.timeout_ms must be positive".to_string(),
            ));
        }
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(generation.default_confidence) || !in_unit(generation.fallback_confidence) {
            return Err(PipelineError::Config(
                "generation confidences must be within [0, 1]".to_string(),
            ));
        }

        if self.routing.default_queue.trim().is_empty() || self.routing.security_queue.trim().is_empty() {
            return Err(PipelineError::Config(
                "routing queues must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

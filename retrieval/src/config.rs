//! Configuration for retrieval, ranking and context assembly.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Tolerance used when checking that weights sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Configuration for the retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum number of chunks returned per pass.
    pub top_k: usize,

    /// Minimum cosine similarity for the primary pass.
    pub similarity_threshold: f32,

    /// Relaxed threshold used by the fallback pass.
    pub relaxed_threshold: f32,

    /// Whether the fallback pass is allowed at all.
    pub fallback_enabled: bool,

    /// The fallback pass runs when the primary pass returns fewer results.
    pub min_results: usize,

    /// What happens to the category filter on the fallback pass.
    pub category_filter_policy: CategoryFilterPolicy,

    /// Timeout for the query embedding call, in milliseconds.
    pub embed_timeout_ms: u64,
}

impl RetrievalConfig {
    /// Set the primary and relaxed thresholds.
    pub fn with_thresholds(mut self, primary: f32, relaxed: f32) -> Self {
        self.similarity_threshold = primary;
        self.relaxed_threshold = relaxed;
        self
    }

    /// Set the number of results per pass.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Enable or disable the fallback pass.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Set the category filter policy.
    pub fn with_filter_policy(mut self, policy: CategoryFilterPolicy) -> Self {
        self.category_filter_policy = policy;
        self
    }

    /// Check threshold ordering.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold)
            || !(0.0..=1.0).contains(&self.relaxed_threshold)
        {
            return Err(RetrievalError::Config(
                "similarity thresholds must be within [0, 1]".to_string(),
            ));
        }
        if self.relaxed_threshold > self.similarity_threshold {
            return Err(RetrievalError::Config(format!(
                "relaxed threshold {} is above primary threshold {}",
                self.relaxed_threshold, self.similarity_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.4,
            relaxed_threshold: 0.2,
            fallback_enabled: true,
            min_results: 1,
            category_filter_policy: CategoryFilterPolicy::DropOnFallback,
            embed_timeout_ms: 5_000,
        }
    }
}

/// How the category filter interacts with the fallback pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilterPolicy {
    /// Filter on the primary pass, search everything on the fallback pass.
    #[default]
    DropOnFallback,
    /// Apply the filter on both passes.
    KeepOnFallback,
    /// Never filter by category.
    NeverFilter,
}

/// Identifies a ranking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategyKind {
    /// Retrieval similarity as-is.
    Semantic,
    /// BM25-style term overlap.
    Keyword,
    /// Weighted blend of semantic, keyword and metadata signals.
    #[default]
    Hybrid,
    /// Semantic score plus fixed metadata boosts.
    Metadata,
}

/// Weights for the hybrid strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    /// Weight for the semantic similarity.
    pub semantic: f32,

    /// Weight for the keyword score.
    pub keyword: f32,

    /// Weight for the normalized metadata boost.
    pub metadata: f32,
}

impl HybridWeights {
    /// Create a set of weights.
    pub fn new(semantic: f32, keyword: f32, metadata: f32) -> Self {
        Self {
            semantic,
            keyword,
            metadata,
        }
    }

    /// Fails unless the weights are non-negative and sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        let sum = self.semantic + self.keyword + self.metadata;
        if self.semantic < 0.0 || self.keyword < 0.0 || self.metadata < 0.0 {
            return Err(RetrievalError::InvalidWeights { sum });
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RetrievalError::InvalidWeights { sum });
        }
        Ok(())
    }
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            keyword: 0.3,
            metadata: 0.1,
        }
    }
}

/// Fixed boosts applied by the metadata strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataBoosts {
    /// Added when the chunk category is one of the query categories.
    pub category_match: f32,

    /// Added when the chunk declares high or critical priority.
    pub high_priority: f32,

    /// Added when the chunk was updated within `recency_days`.
    pub recent: f32,

    /// Window for the recency boost.
    pub recency_days: i64,
}

impl MetadataBoosts {
    /// Largest total boost a chunk can receive.
    pub fn max_total(&self) -> f32 {
        self.category_match + self.high_priority + self.recent
    }
}

impl Default for MetadataBoosts {
    fn default() -> Self {
        Self {
            category_match: 0.15,
            high_priority: 0.10,
            recent: 0.05,
            recency_days: 90,
        }
    }
}

/// Configuration for ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Strategy used when none is requested explicitly.
    pub strategy: RankingStrategyKind,

    /// Hybrid strategy weights.
    pub hybrid_weights: HybridWeights,

    /// Metadata boosts.
    pub boosts: MetadataBoosts,
}

impl RankingConfig {
    /// Set the default strategy.
    pub fn with_strategy(mut self, strategy: RankingStrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the hybrid weights.
    pub fn with_hybrid_weights(mut self, weights: HybridWeights) -> Self {
        self.hybrid_weights = weights;
        self
    }
}

/// How selected chunks are merged into one context blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicyKind {
    /// Concatenate every chunk verbatim.
    #[default]
    Concatenate,
    /// Keep the top chunks verbatim and summarize the rest.
    TopVerbatim,
    /// Include chunk metadata inline.
    Structured,
}

/// Configuration for context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for the assembled context.
    pub target_tokens: usize,

    /// Characters per estimated token. Approximate; tune per model.
    pub chars_per_token: f32,

    /// Merge policy.
    pub merge_policy: MergePolicyKind,

    /// Chunks kept verbatim by the top-verbatim policy.
    pub verbatim_count: usize,

    /// Maximum characters of a summarized chunk.
    pub summary_chars: usize,
}

impl ContextConfig {
    /// Set the token budget.
    pub fn with_target_tokens(mut self, target_tokens: usize) -> Self {
        self.target_tokens = target_tokens;
        self
    }

    /// Set the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicyKind) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Check the token settings.
    pub fn validate(&self) -> Result<()> {
        if self.chars_per_token <= 0.0 {
            return Err(RetrievalError::Config(
                "chars_per_token must be positive".to_string(),
            ));
        }
        if self.target_tokens == 0 {
            return Err(RetrievalError::Config(
                "target_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            target_tokens: 2_000,
            chars_per_token: 4.0,
            merge_policy: MergePolicyKind::Concatenate,
            verbatim_count: 3,
            summary_chars: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_hybrid_weights_are_valid() {
        assert!(HybridWeights::default().validate().is_ok());
    }

    #[test]
    fn test_hybrid_weights_must_sum_to_one() {
        let err = HybridWeights::new(0.5, 0.5, 0.5).validate().unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidWeights { .. }));
        assert!(HybridWeights::new(1.2, -0.2, 0.0).validate().is_err());
    }

    #[test]
    fn test_retrieval_config_rejects_inverted_thresholds() {
        let config = RetrievalConfig::default().with_thresholds(0.2, 0.4);
        assert!(config.validate().is_err());
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RetrievalConfig =
            serde_json::from_str(r#"{"top_k": 3, "category_filter_policy": "keep_on_fallback"}"#)
                .unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(
            config.category_filter_policy,
            CategoryFilterPolicy::KeepOnFallback
        );
        assert_eq!(config.similarity_threshold, 0.4);
    }
}

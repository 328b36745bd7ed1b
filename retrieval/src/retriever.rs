//! Retrieval with a single relaxed-threshold fallback pass.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use triage_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest};

use crate::chunk::RetrievalResult;
use crate::config::{CategoryFilterPolicy, RetrievalConfig};
use crate::store::{KnowledgeIndex, ScoredChunk, SearchParams};

/// What to search for and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPlan {
    /// Text that gets embedded.
    pub search_text: String,

    /// Maximum results per pass.
    pub top_k: usize,

    /// Primary similarity threshold.
    pub similarity_threshold: f32,

    /// Categories to restrict the primary pass to.
    pub category_filter: Option<Vec<String>>,
}

impl RetrievalPlan {
    /// Create an unfiltered plan.
    pub fn new(search_text: impl Into<String>, top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            search_text: search_text.into(),
            top_k,
            similarity_threshold,
            category_filter: None,
        }
    }

    /// Restrict the primary pass to the given categories.
    pub fn with_category_filter(mut self, categories: Vec<String>) -> Self {
        self.category_filter = Some(categories);
        self
    }
}

/// Which pass produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPass {
    /// The primary threshold admitted enough results.
    Primary,
    /// The relaxed threshold was used.
    Fallback,
}

/// Result of [`Retriever::retrieve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Admitted chunks, best first.
    pub results: Vec<RetrievalResult>,

    /// Pass that produced `results`.
    pub pass: RetrievalPass,

    /// Number of store queries issued (at most two).
    pub attempts: u32,

    /// Set when the embedding service or the store failed.
    pub degraded: bool,

    /// Description of the failure, if any.
    pub error: Option<String>,
}

impl RetrievalOutcome {
    fn degraded(attempts: u32, error: String) -> Self {
        Self {
            results: Vec::new(),
            pass: RetrievalPass::Primary,
            attempts,
            degraded: true,
            error: Some(error),
        }
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether the results come from the fallback pass.
    pub fn used_fallback(&self) -> bool {
        self.pass == RetrievalPass::Fallback
    }
}

/// Embeds a plan's search text and queries the knowledge index.
///
/// Failures of either collaborator produce an empty, `degraded` outcome
/// rather than an error, so the pipeline can still reach an evaluation.
pub struct Retriever {
    config: RetrievalConfig,
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn KnowledgeIndex>,
}

impl Retriever {
    /// Create a new retriever.
    pub fn new(
        config: RetrievalConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn KnowledgeIndex>,
    ) -> Self {
        Self {
            config,
            provider,
            index,
        }
    }

    /// The retriever configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run the primary pass and, if it comes back short, one fallback pass.
    pub async fn retrieve(&self, plan: &RetrievalPlan) -> RetrievalOutcome {
        let query = match self.embed(&plan.search_text).await {
            Ok(query) => query,
            Err(error) => {
                warn!("Query embedding failed, continuing without knowledge: {error}");
                return RetrievalOutcome::degraded(0, error);
            }
        };

        let primary_filter = match self.config.category_filter_policy {
            CategoryFilterPolicy::NeverFilter => None,
            _ => plan.category_filter.clone(),
        };
        let primary_params = SearchParams {
            top_k: plan.top_k,
            threshold: plan.similarity_threshold,
            category_filter: primary_filter,
        };

        let primary = match self.index.search(&query, &primary_params).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Knowledge store search failed: {e}");
                return RetrievalOutcome::degraded(1, e.to_string());
            }
        };
        debug!(
            "Primary pass returned {} chunks at threshold {}",
            primary.len(),
            plan.similarity_threshold
        );

        let primary_results = Self::to_results(primary, plan, plan.similarity_threshold, false);
        if primary_results.len() >= self.config.min_results || !self.config.fallback_enabled {
            return RetrievalOutcome {
                results: primary_results,
                pass: RetrievalPass::Primary,
                attempts: 1,
                degraded: false,
                error: None,
            };
        }

        let relaxed = self.config.relaxed_threshold.min(plan.similarity_threshold);
        let fallback_filter = match self.config.category_filter_policy {
            CategoryFilterPolicy::KeepOnFallback => primary_params.category_filter.clone(),
            CategoryFilterPolicy::DropOnFallback | CategoryFilterPolicy::NeverFilter => None,
        };
        let fallback_params = SearchParams {
            top_k: plan.top_k,
            threshold: relaxed,
            category_filter: fallback_filter,
        };

        info!(
            "Primary pass returned {} chunks, retrying once at threshold {relaxed}",
            primary_results.len()
        );

        match self.index.search(&query, &fallback_params).await {
            Ok(hits) => {
                let relaxed_results = Self::to_results(hits, plan, relaxed, true);
                let (results, pass) = if relaxed_results.is_empty() {
                    (primary_results, RetrievalPass::Primary)
                } else {
                    (relaxed_results, RetrievalPass::Fallback)
                };
                RetrievalOutcome {
                    results,
                    pass,
                    attempts: 2,
                    degraded: false,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Fallback search failed: {e}");
                RetrievalOutcome {
                    results: primary_results,
                    pass: RetrievalPass::Primary,
                    attempts: 2,
                    degraded: true,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn embed(&self, text: &str) -> std::result::Result<Embedding, String> {
        let timeout = Duration::from_millis(self.config.embed_timeout_ms);
        match tokio::time::timeout(timeout, self.provider.embed(EmbeddingRequest::new(text))).await {
            Ok(Ok(response)) => Ok(response.embedding),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "embedding timed out after {}ms",
                self.config.embed_timeout_ms
            )),
        }
    }

    /// Convert index hits, enforcing the pass threshold and `top_k` here
    /// so the invariant does not depend on the index implementation.
    fn to_results(
        hits: Vec<ScoredChunk>,
        plan: &RetrievalPlan,
        threshold: f32,
        fallback: bool,
    ) -> Vec<RetrievalResult> {
        let offered = hits.len();
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .take(plan.top_k)
            .map(|hit| RetrievalResult {
                chunk: hit.chunk,
                similarity: hit.similarity,
                threshold,
                fallback,
            })
            .collect();
        if results.len() < offered {
            debug!(
                "Dropped {} index hits below {threshold} or past top_k",
                offered - results.len()
            );
        }
        results
    }
}

//! Ranking strategies for retrieved chunks.
//!
//! Every strategy produces one score per document; [`RankingStrategy::rank`]
//! turns those into a total order (score, then similarity, then chunk id)
//! with dense ranks starting at 1.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::RetrievalResult;
use crate::config::{HybridWeights, MetadataBoosts, RankingConfig, RankingStrategyKind};
use crate::error::Result;

/// BM25 term-frequency saturation.
const BM25_K1: f32 = 1.2;

/// BM25 length normalization.
const BM25_B: f32 = 0.75;

/// Split text into lowercase terms of at least two characters.
pub fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// What the documents are ranked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingQuery {
    /// Raw query text.
    pub text: String,

    /// Query terms used by keyword scoring.
    pub tokens: Vec<String>,

    /// Categories that earn the category boost.
    pub categories: Vec<String>,

    /// Reference time for the recency boost.
    pub now: DateTime<Utc>,
}

impl RankingQuery {
    /// Build a query, deriving terms from the text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            tokens: terms(&text),
            text,
            categories: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Set the boosted categories.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Use explicit query terms instead of the derived ones.
    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens = tokens.into_iter().map(|t| t.to_lowercase()).collect();
        self
    }

    /// Fix the reference time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// A document with its final score and rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedDocument {
    /// The retrieved chunk.
    pub result: RetrievalResult,

    /// Strategy score.
    pub score: f32,

    /// Position in the ranking, starting at 1.
    pub rank: usize,
}

impl RankedDocument {
    /// Chunk identifier.
    pub fn id(&self) -> &str {
        self.result.id()
    }
}

/// A way of scoring retrieved documents against a query.
pub trait RankingStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> RankingStrategyKind;

    /// One score per document, in input order.
    fn scores(&self, query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32>;

    /// Score and sort documents.
    ///
    /// Ties on score fall back to similarity (descending) and then to the
    /// chunk id (ascending), so the order is total and deterministic.
    fn rank(&self, query: &RankingQuery, docs: Vec<RetrievalResult>) -> Vec<RankedDocument> {
        let scores = self.scores(query, &docs);
        let mut ranked: Vec<RankedDocument> = docs
            .into_iter()
            .zip(scores)
            .map(|(result, score)| RankedDocument {
                result,
                score,
                rank: 0,
            })
            .collect();

        ranked.sort_by(compare_ranked);
        for (i, doc) in ranked.iter_mut().enumerate() {
            doc.rank = i + 1;
        }

        debug!("Ranked {} documents with {:?}", ranked.len(), self.kind());
        ranked
    }
}

fn compare_ranked(a: &RankedDocument, b: &RankedDocument) -> Ordering {
    OrderedFloat(b.score)
        .cmp(&OrderedFloat(a.score))
        .then_with(|| OrderedFloat(b.result.similarity).cmp(&OrderedFloat(a.result.similarity)))
        .then_with(|| a.id().cmp(b.id()))
}

/// Ranks by retrieval similarity alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticStrategy;

impl RankingStrategy for SemanticStrategy {
    fn kind(&self) -> RankingStrategyKind {
        RankingStrategyKind::Semantic
    }

    fn scores(&self, _query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32> {
        docs.iter().map(|d| d.similarity).collect()
    }
}

/// BM25 over the candidate set, normalized so the best document scores 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordStrategy;

impl KeywordStrategy {
    fn bm25(query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32> {
        if docs.is_empty() {
            return Vec::new();
        }

        let doc_terms: Vec<Vec<String>> = docs.iter().map(|d| terms(&d.chunk.content)).collect();
        let n = docs.len() as f32;
        let avg_len = doc_terms.iter().map(Vec::len).sum::<usize>() as f32 / n;

        let query_terms: HashSet<&str> = query.tokens.iter().map(String::as_str).collect();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for dt in &doc_terms {
            let present: HashSet<&str> = dt.iter().map(String::as_str).collect();
            for term in &query_terms {
                if present.contains(term) {
                    *doc_freq.entry(*term).or_insert(0) += 1;
                }
            }
        }

        let raw: Vec<f32> = doc_terms
            .iter()
            .map(|dt| {
                let len = dt.len() as f32;
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for t in dt {
                    *tf.entry(t.as_str()).or_insert(0) += 1;
                }

                query_terms
                    .iter()
                    .filter_map(|term| {
                        let f = *tf.get(term)? as f32;
                        let df = *doc_freq.get(term).unwrap_or(&0) as f32;
                        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                        let norm = if avg_len > 0.0 {
                            1.0 - BM25_B + BM25_B * len / avg_len
                        } else {
                            1.0
                        };
                        Some(idf * f * (BM25_K1 + 1.0) / (f + BM25_K1 * norm))
                    })
                    .sum::<f32>()
            })
            .collect();

        let max = raw.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            raw.into_iter().map(|s| s / max).collect()
        } else {
            raw
        }
    }
}

impl RankingStrategy for KeywordStrategy {
    fn kind(&self) -> RankingStrategyKind {
        RankingStrategyKind::Keyword
    }

    fn scores(&self, query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32> {
        Self::bm25(query, docs)
    }
}

/// Similarity plus fixed boosts for category match, priority and recency.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataStrategy {
    boosts: MetadataBoosts,
}

impl MetadataStrategy {
    /// Create the strategy with the given boosts.
    pub fn new(boosts: MetadataBoosts) -> Self {
        Self { boosts }
    }

    /// Total boost earned by one document.
    pub fn boost(&self, query: &RankingQuery, doc: &RetrievalResult) -> f32 {
        let meta = &doc.chunk.metadata;
        let mut boost = 0.0;

        if query
            .categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&meta.category))
        {
            boost += self.boosts.category_match;
        }
        if meta.is_high_priority() {
            boost += self.boosts.high_priority;
        }
        // Future timestamps are clock skew or bad data, not freshness.
        let window = Duration::days(self.boosts.recency_days);
        let age = meta.updated_at.map(|updated| query.now - updated);
        if age.is_some_and(|age| age >= Duration::zero() && age <= window) {
            boost += self.boosts.recent;
        }

        boost
    }
}

impl RankingStrategy for MetadataStrategy {
    fn kind(&self) -> RankingStrategyKind {
        RankingStrategyKind::Metadata
    }

    fn scores(&self, query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32> {
        docs.iter()
            .map(|d| d.similarity + self.boost(query, d))
            .collect()
    }
}

/// Weighted blend of similarity, BM25 and normalized metadata boost.
#[derive(Debug, Clone, Copy)]
pub struct HybridStrategy {
    weights: HybridWeights,
    metadata: MetadataStrategy,
}

impl HybridStrategy {
    /// Create the strategy, rejecting weights that do not sum to 1.0.
    pub fn new(weights: HybridWeights, boosts: MetadataBoosts) -> Result<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            metadata: MetadataStrategy::new(boosts),
        })
    }
}

impl RankingStrategy for HybridStrategy {
    fn kind(&self) -> RankingStrategyKind {
        RankingStrategyKind::Hybrid
    }

    fn scores(&self, query: &RankingQuery, docs: &[RetrievalResult]) -> Vec<f32> {
        let keyword = KeywordStrategy::bm25(query, docs);
        let max_boost = self.metadata.boosts.max_total();

        docs.iter()
            .zip(keyword)
            .map(|(doc, kw)| {
                let meta = if max_boost > 0.0 {
                    self.metadata.boost(query, doc) / max_boost
                } else {
                    0.0
                };
                self.weights.semantic * doc.similarity
                    + self.weights.keyword * kw
                    + self.weights.metadata * meta
            })
            .collect()
    }
}

/// Builds ranking strategies from configuration.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    /// Create a ranker.
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// The ranking configuration.
    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Construct a strategy by kind.
    pub fn strategy(&self, kind: RankingStrategyKind) -> Result<Box<dyn RankingStrategy>> {
        Ok(match kind {
            RankingStrategyKind::Semantic => Box::new(SemanticStrategy),
            RankingStrategyKind::Keyword => Box::new(KeywordStrategy),
            RankingStrategyKind::Metadata => Box::new(MetadataStrategy::new(self.config.boosts)),
            RankingStrategyKind::Hybrid => Box::new(HybridStrategy::new(
                self.config.hybrid_weights,
                self.config.boosts,
            )?),
        })
    }

    /// Rank with the configured default strategy.
    pub fn rank(&self, query: &RankingQuery, docs: Vec<RetrievalResult>) -> Result<Vec<RankedDocument>> {
        self.rank_with(self.config.strategy, query, docs)
    }

    /// Rank with an explicit strategy.
    pub fn rank_with(
        &self,
        kind: RankingStrategyKind,
        query: &RankingQuery,
        docs: Vec<RetrievalResult>,
    ) -> Result<Vec<RankedDocument>> {
        Ok(self.strategy(kind)?.rank(query, docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use crate::chunk::{ChunkMetadata, KnowledgeChunk};
    use crate::error::RetrievalError;

    fn doc(id: &str, content: &str, similarity: f32, metadata: ChunkMetadata) -> RetrievalResult {
        RetrievalResult {
            chunk: Arc::new(KnowledgeChunk::new(id, content, metadata)),
            similarity,
            threshold: 0.4,
            fallback: false,
        }
    }

    fn ids(ranked: &[RankedDocument]) -> Vec<&str> {
        ranked.iter().map(RankedDocument::id).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_semantic_orders_by_similarity() {
        let docs = vec![
            doc("a", "alpha", 0.5, ChunkMetadata::new("general")),
            doc("b", "beta", 0.9, ChunkMetadata::new("general")),
            doc("c", "gamma", 0.7, ChunkMetadata::new("general")),
        ];

        let ranked = SemanticStrategy.rank(&RankingQuery::new("anything"), docs);

        assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
        assert_eq!(
            ranked.iter().map(|d| d.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_ties_break_on_id() {
        let docs = vec![
            doc("zeta", "same", 0.6, ChunkMetadata::new("general")),
            doc("alpha", "same", 0.6, ChunkMetadata::new("general")),
            doc("mid", "same", 0.6, ChunkMetadata::new("general")),
        ];

        let ranked = SemanticStrategy.rank(&RankingQuery::new("same"), docs);

        assert_eq!(ids(&ranked), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_keyword_prefers_term_overlap() {
        let docs = vec![
            doc("a", "printer offline after driver update", 0.5, ChunkMetadata::new("technical")),
            doc("b", "billing cycle and invoices", 0.5, ChunkMetadata::new("billing")),
        ];

        let ranked = KeywordStrategy.rank(&RankingQuery::new("printer driver"), docs);

        assert_eq!(ids(&ranked), vec!["a", "b"]);
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[1].score, 0.0);
    }

    #[test]
    fn test_keyword_scores_are_normalized() {
        let docs = vec![
            doc("a", "vpn vpn vpn timeout", 0.5, ChunkMetadata::new("technical")),
            doc("b", "vpn timeout on login screen", 0.5, ChunkMetadata::new("technical")),
            doc("c", "password reset", 0.5, ChunkMetadata::new("account")),
        ];

        let scores = KeywordStrategy.scores(&RankingQuery::new("vpn timeout"), &docs);

        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores.iter().any(|s| *s == 1.0));
    }

    #[test]
    fn test_metadata_boosts() {
        let strategy = MetadataStrategy::default();
        let query = RankingQuery::new("refund")
            .with_categories(vec!["billing".to_string()])
            .at(now());

        let boosted = doc(
            "a",
            "refund policy",
            0.5,
            ChunkMetadata::new("billing")
                .with_priority("High")
                .updated_at(now() - Duration::days(10)),
        );
        let stale = doc(
            "b",
            "refund policy",
            0.5,
            ChunkMetadata::new("technical").updated_at(now() - Duration::days(400)),
        );

        assert!((strategy.boost(&query, &boosted) - 0.30).abs() < 1e-6);
        assert_eq!(strategy.boost(&query, &stale), 0.0);

        let ranked = strategy.rank(&query, vec![stale, boosted]);
        assert_eq!(ids(&ranked), vec!["a", "b"]);
    }

    #[test]
    fn test_future_dated_chunk_gets_no_recency_boost() {
        let strategy = MetadataStrategy::default();
        let query = RankingQuery::new("refund").at(now());

        let future = doc(
            "f",
            "refund policy",
            0.5,
            ChunkMetadata::new("billing").updated_at(now() + Duration::days(3)),
        );
        let today = doc(
            "t",
            "refund policy",
            0.5,
            ChunkMetadata::new("billing").updated_at(now()),
        );

        assert_eq!(strategy.boost(&query, &future), 0.0);
        assert!(strategy.boost(&query, &today) > 0.0);
    }

    #[test]
    fn test_hybrid_blends_signals() {
        let strategy = HybridStrategy::new(HybridWeights::default(), MetadataBoosts::default()).unwrap();
        let query = RankingQuery::new("reset password")
            .with_categories(vec!["account".to_string()])
            .at(now());

        let docs = vec![
            doc("a", "reset your password from settings", 0.6, ChunkMetadata::new("account")),
            doc("b", "shipping times for hardware orders", 0.65, ChunkMetadata::new("shipping")),
        ];

        let ranked = strategy.rank(&query, docs);

        assert_eq!(ids(&ranked), vec!["a", "b"]);
        // 0.6 * 0.6 + 0.3 * 1.0 + 0.1 * (0.15 / 0.30)
        assert!((ranked[0].score - 0.71).abs() < 1e-5);
    }

    #[test]
    fn test_hybrid_rejects_bad_weights() {
        let err = HybridStrategy::new(HybridWeights::new(0.5, 0.3, 0.1), MetadataBoosts::default())
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidWeights { .. }));

        let ranker = Ranker::new(
            RankingConfig::default().with_hybrid_weights(HybridWeights::new(0.9, 0.9, 0.0)),
        );
        assert!(ranker.strategy(RankingStrategyKind::Hybrid).is_err());
        assert!(ranker.strategy(RankingStrategyKind::Semantic).is_ok());
    }

    #[test]
    fn test_ranker_uses_configured_strategy() {
        let ranker = Ranker::new(RankingConfig::default().with_strategy(RankingStrategyKind::Semantic));
        let docs = vec![
            doc("a", "x", 0.3, ChunkMetadata::new("general")),
            doc("b", "y", 0.8, ChunkMetadata::new("general")),
        ];

        let ranked = ranker.rank(&RankingQuery::new("q"), docs).unwrap();

        assert_eq!(ids(&ranked), vec!["b", "a"]);
    }

    #[test]
    fn test_empty_input() {
        let ranker = Ranker::default();
        let ranked = ranker.rank(&RankingQuery::new("q"), Vec::new()).unwrap();
        assert!(ranked.is_empty());
    }
}

//! # Retrieval
//!
//! This crate turns a retrieval plan into prompt-ready context:
//!
//! - **Knowledge Store**: chunks plus embeddings, searchable by cosine
//!   similarity with optional category filtering
//! - **Retriever**: primary search with a single relaxed-threshold fallback
//! - **Ranking**: interchangeable semantic, keyword, hybrid and metadata
//!   strategies
//! - **Context Assembly**: greedy selection under a token budget and merging
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Retrieval Pipeline                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  RetrievalPlan ──► Retriever ──► KnowledgeIndex (RCU snapshot)  │
//! │                        │                                        │
//! │                        ▼                                        │
//! │                 RetrievalResult[] ──► Ranker (strategy by kind) │
//! │                                            │                    │
//! │                                            ▼                    │
//! │                 ContextBundle ◄── ContextAssembler (budget)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use triage_retrieval::{ContextAssembler, Ranker, RankingQuery, Retriever, RetrievalPlan};
//!
//! let outcome = retriever.retrieve(&RetrievalPlan::new("vpn keeps dropping", 5, 0.4)).await;
//! let ranked = Ranker::default().rank(&RankingQuery::new("vpn keeps dropping"), outcome.results)?;
//! let bundle = ContextAssembler::default().assemble(ranked);
//! ```

pub mod chunk;
pub mod config;
pub mod context;
pub mod error;
pub mod ranking;
pub mod retriever;
pub mod store;
pub mod tokens;

pub use chunk::{ChunkMetadata, KnowledgeChunk, RetrievalResult};
pub use config::{
    CategoryFilterPolicy, ContextConfig, HybridWeights, MergePolicyKind, MetadataBoosts,
    RankingConfig, RankingStrategyKind, RetrievalConfig,
};
pub use context::{
    ContextAssembler, ContextBundle, MergePolicy, OptimizationInfo, PromptTicket,
};
pub use error::{Result, RetrievalError};
pub use ranking::{RankedDocument, Ranker, RankingQuery, RankingStrategy};
pub use retriever::{RetrievalOutcome, RetrievalPass, RetrievalPlan, Retriever};
pub use store::{KnowledgeIndex, KnowledgeStore, ScoredChunk, SearchParams, StoreStats};
pub use tokens::TokenEstimator;

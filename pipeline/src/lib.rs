//! Support ticket triage pipeline.
//!
//! Takes a ticket from intake to either an automatic answer or a routed
//! escalation, and handles the customer's feedback afterwards.
//!
//! ```text
//! ┌──────────────────────────────── Orchestrator ────────────────────────────────┐
//! │                                                                              │
//! │  validate ─► priority ─► augment/classify ─► retrieve ─► rank ─► assemble    │
//! │  (query)     (priority)  (query)             (triage_retrieval)              │
//! │                                                        │                     │
//! │                                  generate answer ◄─────┘                     │
//! │                                  (generation)                                │
//! │                                        │                                     │
//! │                                        ▼                                     │
//! │                         confidence + safety (confidence)                     │
//! │                           │                        │                         │
//! │                       respond                  escalate ─► routed queue      │
//! │                           │                                                  │
//! │                     feedback: close │ retry (max 2 attempts) │ escalate      │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use triage_embeddings::HashingEmbeddingProvider;
//! use triage_pipeline::{Feedback, Orchestrator, ScriptedGenerator, Ticket, TriageConfig};
//! use triage_retrieval::KnowledgeStore;
//!
//! let provider = Arc::new(HashingEmbeddingProvider::default());
//! let store = Arc::new(KnowledgeStore::new(provider.clone()));
//! let generator = Arc::new(ScriptedGenerator::constant(r#"{"answer": "..."}"#));
//! let orchestrator = Orchestrator::new(TriageConfig::default(), provider, store, generator)?;
//!
//! let mut ticket = Ticket::new("T-1", "VPN drops", "My VPN disconnects every few minutes");
//! let outcome = orchestrator.process(&mut ticket).await?;
//! orchestrator.handle_feedback(&mut ticket, Feedback::satisfied("T-1")).await?;
//! ```

pub mod confidence;
pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod priority;
pub mod query;
pub mod state;
pub mod telemetry;
mod text;
pub mod ticket;

pub use confidence::{
    ConfidenceBreakdown, ConfidenceConfig, ConfidenceEvaluator, ConfidenceWeights, Evaluation,
    EvaluationInput, SensitiveDataDetector, SensitiveKind, SentimentDetector, Signals,
};
pub use config::{RoutingConfig, TriageConfig};
pub use error::{GenerationError, PipelineError, Result};
pub use generation::{
    AnswerGenerator, GeneratedAnswer, GenerationConfig, GenerationResult, OpenAIChatGenerator,
    ScriptedGenerator, TextGenerator,
};
pub use orchestrator::{Feedback, FeedbackOutcome, MAX_ATTEMPTS, Orchestrator, PipelineOutcome};
pub use priority::{PriorityAssessment, PriorityConfig, PriorityScorer};
pub use query::{
    Augmentation, AugmentationSource, CategoryScore, Classification, QueryConfig,
    QueryIntelligence, Validation,
};
pub use state::{PipelineState, StateTransition};
pub use telemetry::init_tracing;
pub use ticket::{
    EscalationReason, EscalationRecord, PriorityLevel, Snippet, Ticket, TicketStatus,
};

//! End-to-end tests of the triage pipeline.
//!
//! Knowledge comes from a fixed index whose similarities are set by the test,
//! so every confidence value below can be worked out by hand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use triage_embeddings::{EmbeddingProvider, HashingEmbeddingProvider};
use triage_pipeline::{
    EscalationReason, Feedback, FeedbackOutcome, GenerationResult, MAX_ATTEMPTS, Orchestrator,
    PipelineError, PipelineOutcome, PipelineState, ScriptedGenerator, TextGenerator, Ticket,
    TicketStatus, TriageConfig,
};
use triage_retrieval::{
    ChunkMetadata, KnowledgeChunk, KnowledgeIndex, KnowledgeStore, ScoredChunk, SearchParams,
};

const ANSWER: &str = r#"{"answer": "Clear the CDN cache and redeploy the checkout service.", "confidence": 0.8, "suggested_actions": ["redeploy"], "escalate": false}"#;

/// Index returning preset chunks with preset similarities.
struct FixedIndex {
    hits: Vec<(KnowledgeChunk, f32)>,
}

impl FixedIndex {
    fn technical(similarity: f32) -> Self {
        let hits = [
            ("kb-cdn", "Stale CDN caches make the checkout page return errors. Purge the cache."),
            ("kb-deploy", "Redeploy the checkout service after a failed production release."),
            ("kb-status", "Check the status page before escalating a production outage."),
        ]
        .into_iter()
        .map(|(id, content)| {
            (
                KnowledgeChunk::new(id, content, ChunkMetadata::new("technical")),
                similarity,
            )
        })
        .collect();
        Self { hits }
    }
}

#[async_trait]
impl KnowledgeIndex for FixedIndex {
    async fn add_documents(&self, chunks: Vec<KnowledgeChunk>) -> triage_retrieval::Result<usize> {
        Ok(chunks.len())
    }

    async fn search(&self, _query: &[f32], params: &SearchParams) -> triage_retrieval::Result<Vec<ScoredChunk>> {
        Ok(self
            .hits
            .iter()
            .filter(|(_, similarity)| *similarity >= params.threshold)
            .filter(|(chunk, _)| {
                params
                    .category_filter
                    .as_ref()
                    .is_none_or(|cats| cats.contains(&chunk.metadata.category))
            })
            .take(params.top_k)
            .map(|(chunk, similarity)| ScoredChunk {
                chunk: Arc::new(chunk.clone()),
                similarity: *similarity,
            })
            .collect())
    }

    async fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Generator that never answers in time.
struct StalledGenerator;

#[async_trait]
impl TextGenerator for StalledGenerator {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn generate(&self, _prompt: &str) -> GenerationResult<String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(String::new())
    }
}

fn config() -> TriageConfig {
    let mut config = TriageConfig::default();
    config.query = config.query.without_generator();
    config
}

fn orchestrator_with(index: Arc<dyn KnowledgeIndex>, generator: Arc<dyn TextGenerator>) -> Orchestrator {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::default());
    Orchestrator::new(config(), provider, index, generator).unwrap()
}

fn answering_orchestrator() -> Orchestrator {
    orchestrator_with(
        Arc::new(FixedIndex::technical(0.9)),
        Arc::new(ScriptedGenerator::constant(ANSWER)),
    )
}

fn checkout_ticket() -> Ticket {
    Ticket::new(
        "T-100",
        "Checkout page down",
        "Urgent: the production checkout page is down and shows an error",
    )
    .with_requester("Dana", "dana@shop.test")
}

#[tokio::test]
async fn test_strong_evidence_is_answered() {
    let orchestrator = answering_orchestrator();
    let mut ticket = checkout_ticket();

    let outcome = orchestrator.process(&mut ticket).await.unwrap();

    let PipelineOutcome::Responded { response, evaluation } = outcome else {
        panic!("expected an answer");
    };
    assert_eq!(response, "Clear the CDN cache and redeploy the checkout service.");
    // 0.4 * 0.93 + 0.3 * 0.8 + 0.2 * 0.2 + 0.1 * 0.05
    assert!((evaluation.confidence - 0.657).abs() < 1e-4);
    assert!(!evaluation.escalate);

    assert_eq!(ticket.status, TicketStatus::AwaitingFeedback);
    assert_eq!(ticket.state(), Some(PipelineState::AwaitingFeedback));
    assert_eq!(ticket.attempts, 1);
    assert_eq!(ticket.priority_score, Some(85));
    assert_eq!(ticket.category.as_deref(), Some("technical"));
    assert_eq!(ticket.snippets.len(), 3);
    assert!(ticket.escalation.is_none());

    let states: Vec<PipelineState> = ticket.history.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            PipelineState::Scoring,
            PipelineState::Analyzing,
            PipelineState::Retrieving,
            PipelineState::Evaluating,
            PipelineState::Responding,
            PipelineState::AwaitingFeedback,
        ]
    );

    let closed = orchestrator
        .handle_feedback(&mut ticket, Feedback::satisfied("T-100"))
        .await
        .unwrap();
    assert_eq!(closed, FeedbackOutcome::Closed);
    assert_eq!(ticket.status, TicketStatus::Answered);
    assert_eq!(ticket.state(), Some(PipelineState::Closed));
}

#[tokio::test]
async fn test_p1_outage_is_escalated() {
    let orchestrator = answering_orchestrator();
    let mut ticket = Ticket::new(
        "T-A",
        "Database outage",
        "URGENT production database down for all 5000 users",
    );

    let outcome = orchestrator.process(&mut ticket).await.unwrap();

    assert!(outcome.is_escalated());
    assert!(ticket.priority_score.unwrap() >= 90);
    assert_eq!(ticket.category.as_deref(), Some("technical"));
    assert_eq!(ticket.status, TicketStatus::Escalated);
    assert_eq!(
        outcome.evaluation().escalation_reason,
        Some(EscalationReason::CriticalPriority)
    );
    assert_eq!(
        ticket.escalation.as_ref().unwrap().target_queue,
        "tier2_technical"
    );
}

#[tokio::test]
async fn test_card_number_is_escalated_to_security() {
    let orchestrator = answering_orchestrator();
    let mut ticket = Ticket::new(
        "T-B",
        "Checkout error",
        "The checkout page shows an error when I pay with 4532-1234-5678-9999",
    );

    let outcome = orchestrator.process(&mut ticket).await.unwrap();

    let PipelineOutcome::Escalated { record, evaluation } = outcome else {
        panic!("expected escalation");
    };
    assert!(evaluation.sensitive);
    assert!(evaluation.escalate);
    assert!(ticket.sensitive);
    assert_eq!(record.target_queue, "security");
    assert_eq!(ticket.escalation, Some(record));
}

#[tokio::test]
async fn test_empty_knowledge_base_escalates() {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::default());
    let store = Arc::new(KnowledgeStore::new(Arc::clone(&provider)));
    let orchestrator = Orchestrator::new(
        config(),
        provider,
        store,
        Arc::new(ScriptedGenerator::constant(ANSWER)),
    )
    .unwrap();
    let mut ticket = checkout_ticket();

    let outcome = orchestrator.process(&mut ticket).await.unwrap();

    assert!(outcome.is_escalated());
    assert_eq!(outcome.evaluation().breakdown.rag, 0.0);
    assert!(outcome.evaluation().confidence < 0.6);
    assert_eq!(
        outcome.evaluation().escalation_reason,
        Some(EscalationReason::LowConfidence)
    );
    assert!(ticket.snippets.is_empty());
}

#[tokio::test]
async fn test_two_unsatisfied_rounds_escalate() {
    let orchestrator = answering_orchestrator();
    let mut ticket = checkout_ticket();
    orchestrator.process(&mut ticket).await.unwrap();

    let retried = orchestrator
        .handle_feedback(
            &mut ticket,
            Feedback::unsatisfied("T-100", "The cache purge did not fix it"),
        )
        .await
        .unwrap();
    assert!(matches!(
        retried,
        FeedbackOutcome::Retried(PipelineOutcome::Responded { .. })
    ));
    assert_eq!(ticket.attempts, 2);
    assert_eq!(ticket.status, TicketStatus::AwaitingFeedback);
    assert!(
        ticket
            .description
            .ends_with("Customer feedback: The cache purge did not fix it")
    );

    let escalated = orchestrator
        .handle_feedback(&mut ticket, Feedback::unsatisfied("T-100", "Still failing"))
        .await
        .unwrap();
    let FeedbackOutcome::Escalated(record) = escalated else {
        panic!("expected escalation");
    };
    assert_eq!(record.reason, EscalationReason::MaxAttemptsExceeded);
    assert_eq!(ticket.status, TicketStatus::Escalated);
    assert_eq!(ticket.attempts, 2);
    assert_eq!(ticket.state(), Some(PipelineState::Escalated));

    // Further feedback returns the existing record.
    let again = orchestrator
        .handle_feedback(&mut ticket, Feedback::unsatisfied("T-100", "Hello?"))
        .await
        .unwrap();
    assert_eq!(again, FeedbackOutcome::Escalated(record));
    assert_eq!(ticket.attempts, 2);
}

#[tokio::test]
async fn test_attempts_never_exceed_cap() {
    for pattern in 0u32..16 {
        let orchestrator = answering_orchestrator();
        let mut ticket = checkout_ticket();
        orchestrator.process(&mut ticket).await.unwrap();

        for step in 0..4 {
            let satisfied = pattern & (1 << step) != 0;
            let feedback = if satisfied {
                Feedback::satisfied("T-100")
            } else {
                Feedback::unsatisfied("T-100", "no luck")
            };
            match orchestrator.handle_feedback(&mut ticket, feedback).await {
                Ok(_) | Err(PipelineError::UnexpectedStatus { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(ticket.attempts <= MAX_ATTEMPTS);
        }

        let retries = ticket
            .history
            .iter()
            .filter(|t| t.to == PipelineState::Retrying)
            .count();
        assert!(retries < MAX_ATTEMPTS as usize, "pattern {pattern:04b} retried {retries} times");
        assert!(ticket.status.is_terminal(), "pattern {pattern:04b} left {}", ticket.status);
    }
}

#[tokio::test]
async fn test_generator_outage_degrades_to_template() {
    let orchestrator = orchestrator_with(
        Arc::new(FixedIndex::technical(0.9)),
        Arc::new(ScriptedGenerator::failing()),
    );
    let mut ticket = checkout_ticket();

    let outcome = orchestrator.process(&mut ticket).await.unwrap();

    // A template earns no solution bonus and costs the degradation penalty:
    // 0.657 - 0.02 - 0.05 < 0.6.
    assert!(outcome.is_escalated());
    assert!((outcome.evaluation().breakdown.penalty - 0.05).abs() < 1e-6);
    assert!(ticket.solution.as_deref().unwrap().contains("technical issue"));
}

#[tokio::test]
async fn test_cancelled_run_leaves_ticket_pending() {
    let orchestrator = orchestrator_with(
        Arc::new(FixedIndex::technical(0.9)),
        Arc::new(StalledGenerator),
    );
    let mut ticket = checkout_ticket();
    let before = ticket.clone();

    let result = tokio::time::timeout(Duration::from_millis(50), orchestrator.process(&mut ticket)).await;

    assert!(result.is_err());
    assert_eq!(ticket, before);
    assert_eq!(ticket.status, TicketStatus::Pending);
}

#[tokio::test]
async fn test_tickets_run_concurrently_on_one_orchestrator() {
    let orchestrator = Arc::new(answering_orchestrator());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let mut ticket = checkout_ticket();
                ticket.id = format!("T-{i}");
                orchestrator.process(&mut ticket).await.map(|_| ticket)
            })
        })
        .collect();

    for handle in handles {
        let ticket = handle.await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::AwaitingFeedback);
    }
}

//! Runs tickets through the pipeline and handles customer feedback.
//!
//! Every run works on a copy of the caller's ticket and commits it back only
//! when the run completes. Dropping the future of [`Orchestrator::process`]
//! therefore leaves the ticket exactly as it was, still `Pending`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span};

use triage_embeddings::EmbeddingProvider;
use triage_retrieval::{
    ContextAssembler, KnowledgeChunk, KnowledgeIndex, PromptTicket, Ranker, RankingQuery,
    RankingStrategy, Retriever,
};

use crate::confidence::{ConfidenceEvaluator, Evaluation, EvaluationInput};
use crate::config::TriageConfig;
use crate::error::{PipelineError, Result};
use crate::generation::{AnswerGenerator, TextGenerator};
use crate::priority::PriorityScorer;
use crate::query::QueryIntelligence;
use crate::state::{PipelineState, StateTransition};
use crate::ticket::{EscalationReason, EscalationRecord, Snippet, Ticket, TicketStatus};

/// Hard cap on resolution attempts per ticket.
pub const MAX_ATTEMPTS: u32 = 2;

/// Customer reaction to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Ticket the feedback is about.
    pub ticket_id: String,

    /// Whether the answer solved the problem.
    pub satisfied: bool,

    /// Optional free text.
    #[serde(default)]
    pub comment: Option<String>,
}

impl Feedback {
    /// The answer solved the problem.
    pub fn satisfied(ticket_id: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            satisfied: true,
            comment: None,
        }
    }

    /// The answer did not help.
    pub fn unsatisfied(ticket_id: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            satisfied: false,
            comment: Some(comment.into()),
        }
    }
}

/// How a pipeline run ended. Exactly one of the two happens.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// An answer was sent; the ticket awaits feedback.
    Responded {
        response: String,
        evaluation: Evaluation,
    },
    /// The ticket was handed to a human.
    Escalated {
        record: EscalationRecord,
        evaluation: Evaluation,
    },
}

impl PipelineOutcome {
    /// The evaluation that decided the outcome.
    pub fn evaluation(&self) -> &Evaluation {
        match self {
            PipelineOutcome::Responded { evaluation, .. }
            | PipelineOutcome::Escalated { evaluation, .. } => evaluation,
        }
    }

    /// Whether the ticket was escalated.
    pub fn is_escalated(&self) -> bool {
        matches!(self, PipelineOutcome::Escalated { .. })
    }
}

/// Result of [`Orchestrator::handle_feedback`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    /// The customer was satisfied; the ticket is answered.
    Closed,
    /// The ticket went through the pipeline again.
    Retried(PipelineOutcome),
    /// The ticket is (or already was) with a human.
    Escalated(EscalationRecord),
}

/// Sequences every stage of the pipeline for one ticket at a time.
///
/// An `Orchestrator` holds no per-ticket state and can serve many tickets
/// concurrently; the knowledge index is the only shared resource.
pub struct Orchestrator {
    config: TriageConfig,
    index: Arc<dyn KnowledgeIndex>,
    query: QueryIntelligence,
    scorer: PriorityScorer,
    retriever: Retriever,
    strategy: Box<dyn RankingStrategy>,
    assembler: ContextAssembler,
    answers: AnswerGenerator,
    evaluator: ConfidenceEvaluator,
}

impl Orchestrator {
    /// Build the pipeline, validating the configuration.
    pub fn new(
        config: TriageConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn KnowledgeIndex>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        config.validate()?;

        let strategy = Ranker::new(config.ranking.clone()).strategy(config.ranking.strategy)?;
        let query = QueryIntelligence::new(config.query.clone(), config.retrieval.clone())
            .with_generator(Arc::clone(&generator));

        Ok(Self {
            query,
            scorer: PriorityScorer::new(config.priority.clone())?,
            retriever: Retriever::new(config.retrieval.clone(), provider, Arc::clone(&index)),
            strategy,
            assembler: ContextAssembler::new(config.context.clone()),
            answers: AnswerGenerator::new(config.generation.clone(), generator),
            evaluator: ConfidenceEvaluator::new(config.confidence.clone())?,
            index,
            config,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Add knowledge chunks to the shared index.
    pub async fn add_documents(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize> {
        Ok(self.index.add_documents(chunks).await?)
    }

    /// Run a pending ticket through the pipeline.
    ///
    /// Returns [`PipelineError::InvalidTicket`] when validation fails; the
    /// ticket is then committed as `Invalid`. Every other stage failure is
    /// absorbed by a fallback.
    pub async fn process(&self, ticket: &mut Ticket) -> Result<PipelineOutcome> {
        if ticket.status != TicketStatus::Pending {
            return Err(PipelineError::UnexpectedStatus {
                ticket_id: ticket.id.clone(),
                status: ticket.status,
                expected: TicketStatus::Pending,
            });
        }

        let mut work = ticket.clone();
        let span = info_span!("triage", ticket_id = %work.id, attempt = 1);
        let result = self.run(&mut work).instrument(span).await;
        *ticket = work;
        result
    }

    /// Apply customer feedback to a ticket awaiting it.
    pub async fn handle_feedback(&self, ticket: &mut Ticket, feedback: Feedback) -> Result<FeedbackOutcome> {
        if feedback.ticket_id != ticket.id {
            return Err(PipelineError::FeedbackMismatch {
                expected: ticket.id.clone(),
                actual: feedback.ticket_id,
            });
        }

        match (ticket.status, &ticket.escalation) {
            (TicketStatus::Escalated, Some(record)) => {
                debug!("Ticket {} already escalated, ignoring feedback", ticket.id);
                return Ok(FeedbackOutcome::Escalated(record.clone()));
            }
            (TicketStatus::AwaitingFeedback, _) => {}
            (status, _) => {
                return Err(PipelineError::UnexpectedStatus {
                    ticket_id: ticket.id.clone(),
                    status,
                    expected: TicketStatus::AwaitingFeedback,
                });
            }
        }

        let mut work = ticket.clone();

        if feedback.satisfied {
            transition(&mut work, PipelineState::Closed, Some("customer satisfied".to_string()))?;
            work.status = TicketStatus::Answered;
            info!("Ticket {} closed after {} attempt(s)", work.id, work.attempts);
            *ticket = work;
            return Ok(FeedbackOutcome::Closed);
        }

        if work.attempts >= MAX_ATTEMPTS {
            transition(
                &mut work,
                PipelineState::Escalating,
                Some("customer unsatisfied".to_string()),
            )?;
            let detail = format!("customer still unsatisfied after {} attempts", work.attempts);
            let record = self.escalate(&mut work, EscalationReason::MaxAttemptsExceeded, detail)?;
            *ticket = work;
            return Ok(FeedbackOutcome::Escalated(record));
        }

        transition(&mut work, PipelineState::Retrying, feedback.comment.clone())?;
        if let Some(comment) = feedback.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            work.description.push_str("\n\nCustomer feedback: ");
            work.description.push_str(comment);
        }
        work.attempts += 1;
        transition(&mut work, PipelineState::Analyzing, None)?;

        let span = info_span!("triage", ticket_id = %work.id, attempt = work.attempts);
        let outcome = self.resolve(&mut work).instrument(span).await?;
        *ticket = work;
        Ok(FeedbackOutcome::Retried(outcome))
    }

    async fn run(&self, work: &mut Ticket) -> Result<PipelineOutcome> {
        info!("Validating ticket {}", work.id);
        let validation = self.query.validate(work);
        if !validation.valid {
            transition(work, PipelineState::Invalid, Some(validation.reasons.join("; ")))?;
            work.status = TicketStatus::Invalid;
            info!("Ticket {} rejected: {}", work.id, validation.reasons.join("; "));
            return Err(PipelineError::InvalidTicket {
                reasons: validation.reasons,
            });
        }

        transition(work, PipelineState::Scoring, None)?;
        let assessment = self.scorer.assess(&work.full_text());
        info!(
            "Ticket {} priority {} ({})",
            work.id, assessment.score, assessment.level
        );
        work.priority_score = Some(assessment.score);
        work.priority = Some(assessment.level);

        transition(work, PipelineState::Analyzing, None)?;
        work.attempts = 1;
        self.resolve(work).await
    }

    /// Analyzing through responding or escalating.
    async fn resolve(&self, work: &mut Ticket) -> Result<PipelineOutcome> {
        let augmentation = self.query.augment(work).await;
        let classification = self.query.classify(work, &augmentation);
        let plan = self.query.plan(work, &augmentation, &classification);
        info!(
            "Ticket {} classified as {} ({:.2})",
            work.id, classification.primary_class, classification.primary_score
        );

        work.category = Some(classification.primary_class.clone());
        work.keywords = augmentation.keywords.clone();
        work.summary = augmentation.rephrased.clone();
        let ranking_query =
            RankingQuery::new(plan.search_text.clone()).with_categories(classification.relevant_classes.clone());
        work.classification = Some(classification);

        transition(work, PipelineState::Retrieving, None)?;
        let retrieval = self.retriever.retrieve(&plan).await;
        let retrieval_degraded = retrieval.degraded;
        info!(
            "Retrieved {} chunk(s) for ticket {} ({:?} pass)",
            retrieval.results.len(),
            work.id,
            retrieval.pass
        );
        let ranked = self.strategy.rank(&ranking_query, retrieval.results);
        let bundle = self.assembler.assemble(ranked);
        work.snippets = bundle
            .documents
            .iter()
            .map(|d| Snippet::retrieved(d.id(), d.result.chunk.content.clone(), d.result.similarity))
            .collect();

        transition(work, PipelineState::Evaluating, None)?;
        let prompt = self.assembler.build_prompt(
            &PromptTicket {
                subject: &work.subject,
                description: &work.description,
                category: work.category.as_deref(),
            },
            &bundle,
        );
        let answer = self.answers.generate(work, &prompt).await;
        if answer.escalation_hint {
            debug!("Generator suggested escalation for ticket {}", work.id);
        }
        work.solution = Some(answer.answer.clone());

        let degraded_stages = u32::from(augmentation.degraded)
            + u32::from(retrieval_degraded)
            + u32::from(answer.degraded);
        let text = work.full_text();
        let mut input = EvaluationInput::from_ticket(work, &text).with_degraded_stages(degraded_stages);
        if answer.degraded {
            // A fallback template is not a solution.
            input.solution = None;
        }
        let evaluation = self.evaluator.evaluate(&input);
        work.confidence = Some(evaluation.confidence);
        work.sensitive = evaluation.sensitive;
        work.negative_sentiment = evaluation.negative_sentiment;
        info!(
            "Ticket {} confidence {:.3}, escalate: {}",
            work.id, evaluation.confidence, evaluation.escalate
        );

        if evaluation.escalate {
            let reason = evaluation
                .escalation_reason
                .unwrap_or(EscalationReason::LowConfidence);
            let detail = evaluation.reasons.join("; ");
            transition(work, PipelineState::Escalating, Some(detail.clone()))?;
            let record = self.escalate(work, reason, detail)?;
            return Ok(PipelineOutcome::Escalated { record, evaluation });
        }

        transition(work, PipelineState::Responding, None)?;
        transition(work, PipelineState::AwaitingFeedback, None)?;
        work.status = TicketStatus::AwaitingFeedback;
        Ok(PipelineOutcome::Responded {
            response: answer.answer,
            evaluation,
        })
    }

    /// Escalating to escalated, with a routed record.
    fn escalate(&self, work: &mut Ticket, reason: EscalationReason, detail: String) -> Result<EscalationRecord> {
        let queue = self
            .config
            .routing
            .queue_for(work.category.as_deref(), work.sensitive);
        let record = EscalationRecord::new(work.id.clone(), reason, detail, queue);

        transition(work, PipelineState::Escalated, Some(reason.to_string()))?;
        work.status = TicketStatus::Escalated;
        work.escalation = Some(record.clone());
        info!("Ticket {} escalated to {queue}: {reason}", work.id);
        Ok(record)
    }
}

/// Record a move to `to`, rejecting edges outside the pipeline graph.
///
/// A ticket without history is in `Validating`.
fn transition(ticket: &mut Ticket, to: PipelineState, note: Option<String>) -> Result<()> {
    let from = ticket.state().unwrap_or(PipelineState::Validating);
    if !from.can_transition_to(to) {
        return Err(PipelineError::InvalidTransition { from, to });
    }
    debug!("Ticket {}: {from} -> {to}", ticket.id);
    ticket.history.push(StateTransition::new(from, to, note));
    Ok(())
}

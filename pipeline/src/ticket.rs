//! Ticket model and escalation records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::Classification;
use crate::state::{PipelineState, StateTransition};

/// Priority bucket derived from the 0-100 priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    /// Low < 40 <= Medium < 70 <= High < 90 <= Critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => PriorityLevel::Low,
            40..=69 => PriorityLevel::Medium,
            70..=89 => PriorityLevel::High,
            _ => PriorityLevel::Critical,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible ticket status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Not processed, or a run did not complete.
    #[default]
    Pending,
    /// An answer was sent and feedback is expected.
    AwaitingFeedback,
    /// Closed after a satisfied answer.
    Answered,
    /// Handed to a human.
    Escalated,
    /// Rejected by validation.
    Invalid,
}

impl TicketStatus {
    /// Whether the ticket is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Answered | TicketStatus::Escalated | TicketStatus::Invalid
        )
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::AwaitingFeedback => "awaiting_feedback",
            TicketStatus::Answered => "answered",
            TicketStatus::Escalated => "escalated",
            TicketStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of knowledge used to answer a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Snippet text.
    pub content: String,

    /// Retrieval similarity, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,

    /// Knowledge chunk the snippet came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl Snippet {
    /// A plain-text snippet without similarity.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            similarity: None,
            chunk_id: None,
        }
    }

    /// A snippet from a retrieved chunk.
    pub fn retrieved(chunk_id: impl Into<String>, content: impl Into<String>, similarity: f32) -> Self {
        Self {
            content: content.into(),
            similarity: Some(similarity),
            chunk_id: Some(chunk_id.into()),
        }
    }
}

/// Why a ticket was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Confidence under the escalation threshold.
    LowConfidence,
    /// Personal or payment data in the description.
    SensitiveData,
    /// Negative sentiment with less than high confidence.
    NegativeSentiment,
    /// Priority score at or above the critical override.
    CriticalPriority,
    /// The customer stayed unsatisfied after the last allowed attempt.
    MaxAttemptsExceeded,
}

impl EscalationReason {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::LowConfidence => "low_confidence",
            EscalationReason::SensitiveData => "sensitive_data",
            EscalationReason::NegativeSentiment => "negative_sentiment",
            EscalationReason::CriticalPriority => "critical_priority",
            EscalationReason::MaxAttemptsExceeded => "max_attempts_exceeded",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hand-off of a ticket to a human queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Record identifier.
    pub id: Uuid,

    /// Escalated ticket.
    pub ticket_id: String,

    /// Primary reason.
    pub reason: EscalationReason,

    /// Human-readable detail.
    pub detail: String,

    /// Queue the ticket was routed to.
    pub target_queue: String,

    /// When the escalation happened.
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    /// Create a record stamped now.
    pub fn new(
        ticket_id: impl Into<String>,
        reason: EscalationReason,
        detail: impl Into<String>,
        target_queue: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket_id.into(),
            reason,
            detail: detail.into(),
            target_queue: target_queue.into(),
            created_at: Utc::now(),
        }
    }
}

/// A support request and everything the pipeline learns about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ticket {
    /// Ticket identifier.
    pub id: String,

    /// Requester display name.
    pub requester_name: Option<String>,

    /// Requester email address.
    pub requester_email: Option<String>,

    /// Subject line.
    pub subject: String,

    /// Free-text description. Feedback comments are appended on retry.
    pub description: String,

    /// Priority score, 0-100.
    pub priority_score: Option<u8>,

    /// Priority bucket.
    pub priority: Option<PriorityLevel>,

    /// Primary category.
    pub category: Option<String>,

    /// Per-category scores.
    pub classification: Option<Classification>,

    /// Extracted keywords.
    pub keywords: Vec<String>,

    /// Reformulated request.
    pub summary: Option<String>,

    /// Generated answer.
    pub solution: Option<String>,

    /// Knowledge used for the answer.
    pub snippets: Vec<Snippet>,

    /// Last computed confidence.
    pub confidence: Option<f32>,

    /// Whether the description contains sensitive data.
    pub sensitive: bool,

    /// Whether negative sentiment was flagged.
    pub negative_sentiment: bool,

    /// Completed resolution attempts.
    pub attempts: u32,

    /// Status.
    pub status: TicketStatus,

    /// Escalation record, once escalated.
    pub escalation: Option<EscalationRecord>,

    /// State transitions, oldest first.
    pub history: Vec<StateTransition>,
}

impl Ticket {
    /// Create a pending ticket.
    pub fn new(id: impl Into<String>, subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Set the requester.
    pub fn with_requester(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.requester_name = Some(name.into());
        self.requester_email = Some(email.into());
        self
    }

    /// Current pipeline state, if the ticket has been through the pipeline.
    pub fn state(&self) -> Option<PipelineState> {
        self.history.last().map(|t| t.to)
    }

    /// Subject and description as one text.
    pub fn full_text(&self) -> String {
        format!("{}\n{}", self.subject, self.description)
    }
}

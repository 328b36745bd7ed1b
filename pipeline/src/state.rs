//! Pipeline state machine.
//!
//! ```text
//! validating ─► scoring ─► analyzing ─► retrieving ─► evaluating ─► responding ─► awaiting_feedback ─► closed
//!     │                        ▲                           │                            │    │
//!     ▼                        └──────── retrying ◄────────┼────────────────────────────┘    │
//!  invalid                                                 └─► escalating ◄──────────────────┘
//!                                                                  │
//!                                                                  ▼
//!                                                              escalated
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stage of a ticket's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Scoring,
    Analyzing,
    Retrieving,
    Evaluating,
    Responding,
    Escalating,
    AwaitingFeedback,
    Retrying,
    Closed,
    Escalated,
    Invalid,
}

impl PipelineState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Closed | PipelineState::Escalated | PipelineState::Invalid
        )
    }

    /// Whether `next` is an edge of the pipeline graph.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, next),
            (Validating, Scoring)
                | (Validating, Invalid)
                | (Scoring, Analyzing)
                | (Analyzing, Retrieving)
                | (Retrieving, Evaluating)
                | (Evaluating, Responding)
                | (Evaluating, Escalating)
                | (Responding, AwaitingFeedback)
                | (AwaitingFeedback, Closed)
                | (AwaitingFeedback, Retrying)
                | (AwaitingFeedback, Escalating)
                | (Retrying, Analyzing)
                | (Escalating, Escalated)
        )
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Validating => "validating",
            PipelineState::Scoring => "scoring",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Evaluating => "evaluating",
            PipelineState::Responding => "responding",
            PipelineState::Escalating => "escalating",
            PipelineState::AwaitingFeedback => "awaiting_feedback",
            PipelineState::Retrying => "retrying",
            PipelineState::Closed => "closed",
            PipelineState::Escalated => "escalated",
            PipelineState::Invalid => "invalid",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded move between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: PipelineState,

    /// New state.
    pub to: PipelineState,

    /// When the transition happened.
    pub timestamp: DateTime<Utc>,

    /// Why it happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StateTransition {
    /// Record a transition happening now.
    pub fn new(from: PipelineState, to: PipelineState, note: Option<String>) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            note,
        }
    }
}

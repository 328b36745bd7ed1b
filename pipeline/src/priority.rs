//! Rule-based priority scoring.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::text::{matching_terms, normalize};
use crate::ticket::PriorityLevel;

/// "5000 users", "1,200 customers", "300 usuarios" and similar.
const USER_COUNT_PATTERN: &str = r"(?i)(\d[\d,.]*)\+?\s+(?:users|customers|clients|employees|people|accounts|usuarios|clientes|utilisateurs)";

/// Configuration for [`PriorityScorer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Starting score.
    pub base_score: u8,

    /// Terms signalling urgency.
    pub urgency_terms: Vec<String>,

    /// Added once when any urgency term matches.
    pub urgency_boost: u8,

    /// Terms signalling business impact.
    pub impact_terms: Vec<String>,

    /// Added per matching impact term.
    pub impact_boost: u8,

    /// Cap on the total impact boost.
    pub impact_cap: u8,

    /// Terms signalling a low-urgency request.
    pub low_urgency_terms: Vec<String>,

    /// Subtracted once when any low-urgency term matches.
    pub low_urgency_penalty: u8,

    /// Affected-user count that earns `many_users_boost`.
    pub many_users: u64,

    /// Boost for at least `many_users` affected users.
    pub many_users_boost: u8,

    /// Affected-user count that earns `some_users_boost`.
    pub some_users: u64,

    /// Boost for at least `some_users` affected users.
    pub some_users_boost: u8,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            base_score: 30,
            urgency_terms: terms(&[
                "urgent",
                "asap",
                "critical",
                "emergency",
                "immediately",
                "right now",
                "urgente",
                "inmediatamente",
                "urgence",
            ]),
            urgency_boost: 25,
            impact_terms: terms(&[
                "production",
                "down",
                "outage",
                "data loss",
                "all users",
                "everyone",
                "security breach",
                "cannot work",
                "revenue",
                "caído",
                "producción",
            ]),
            impact_boost: 15,
            impact_cap: 45,
            low_urgency_terms: terms(&[
                "when you have time",
                "no rush",
                "question",
                "feature request",
                "suggestion",
                "just wondering",
                "cuando puedas",
            ]),
            low_urgency_penalty: 15,
            many_users: 1_000,
            many_users_boost: 20,
            some_users: 100,
            some_users_boost: 10,
        }
    }
}

/// Result of scoring a ticket text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAssessment {
    /// Score, 0-100.
    pub score: u8,

    /// Bucket for `score`.
    pub level: PriorityLevel,

    /// Terms and counts that moved the score.
    pub signals: Vec<String>,
}

/// Scores ticket text for urgency and impact.
pub struct PriorityScorer {
    config: PriorityConfig,
    user_count: Regex,
}

impl PriorityScorer {
    /// Create a scorer. Fails if the affected-user pattern does not compile.
    pub fn new(config: PriorityConfig) -> Result<Self> {
        let user_count =
            Regex::new(USER_COUNT_PATTERN).map_err(|source| PipelineError::Pattern {
                name: "affected users".to_string(),
                source,
            })?;
        Ok(Self { config, user_count })
    }

    /// Score `text` (subject and description).
    pub fn assess(&self, text: &str) -> PriorityAssessment {
        let normalized = normalize(text);
        let cfg = &self.config;
        let mut score = i32::from(cfg.base_score);
        let mut signals = Vec::new();

        let urgency = matching_terms(&normalized, &cfg.urgency_terms);
        if !urgency.is_empty() {
            score += i32::from(cfg.urgency_boost);
            signals.extend(urgency.iter().map(|t| format!("urgency:{t}")));
        }

        let impact = matching_terms(&normalized, &cfg.impact_terms);
        if !impact.is_empty() {
            let boost = (impact.len() as i32 * i32::from(cfg.impact_boost)).min(i32::from(cfg.impact_cap));
            score += boost;
            signals.extend(impact.iter().map(|t| format!("impact:{t}")));
        }

        if let Some(users) = self.affected_users(text) {
            if users >= cfg.many_users {
                score += i32::from(cfg.many_users_boost);
                signals.push(format!("users:{users}"));
            } else if users >= cfg.some_users {
                score += i32::from(cfg.some_users_boost);
                signals.push(format!("users:{users}"));
            }
        }

        let low = matching_terms(&normalized, &cfg.low_urgency_terms);
        if !low.is_empty() {
            score -= i32::from(cfg.low_urgency_penalty);
            signals.extend(low.iter().map(|t| format!("low:{t}")));
        }

        let score = score.clamp(0, 100) as u8;
        debug!("Priority score {score} from {} signals", signals.len());

        PriorityAssessment {
            score,
            level: PriorityLevel::from_score(score),
            signals,
        }
    }

    /// Largest "N users"-style count mentioned in `text`.
    pub fn affected_users(&self, text: &str) -> Option<u64> {
        self.user_count
            .captures_iter(text)
            .filter_map(|cap| {
                let digits: String = cap.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .max()
    }
}

//! Confidence scoring and the escalation decision.
//!
//! The evaluator blends four weighted components into one score in [0, 1]:
//!
//! ```text
//! confidence = w_rag * rag + w_prio * priority + w_cat * category + w_adj * adjustment
//!            - degradation_penalty * degraded_stages
//! ```
//!
//! Safety signals (sensitive data, negative sentiment) and the critical
//! priority override can force escalation regardless of the score.

use std::fmt;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::text::{matching_terms, normalize};
use crate::ticket::{EscalationReason, PriorityLevel, Snippet, Ticket};

/// Weights of the four confidence components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    /// Retrieval evidence.
    pub rag: f32,
    /// Priority clarity.
    pub priority: f32,
    /// Categorization and solution presence.
    pub category: f32,
    /// Priority-level adjustment.
    pub adjustment: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            rag: 0.40,
            priority: 0.30,
            category: 0.20,
            adjustment: 0.10,
        }
    }
}

impl ConfidenceWeights {
    /// Check that all weights are non-negative and sum to 1.
    pub fn validate(&self) -> Result<()> {
        let weights = [self.rag, self.priority, self.category, self.adjustment];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::Config(
                "confidence weights must be non-negative".to_string(),
            ));
        }
        let sum: f32 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(PipelineError::Config(format!(
                "confidence weights must sum to 1.0, got {sum:.3}"
            )));
        }
        Ok(())
    }
}

/// Configuration for [`ConfidenceEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Component weights.
    pub weights: ConfidenceWeights,

    /// Escalate below this confidence.
    pub threshold: f32,

    /// Negative sentiment escalates below this confidence.
    pub sentiment_threshold: f32,

    /// Subtracted per degraded stage.
    pub degradation_penalty: f32,

    /// Length at which a plain-text snippet counts as fully similar.
    pub reference_snippet_len: usize,

    /// Whether a critical priority score forces escalation.
    pub critical_override: bool,

    /// Priority score at which the override applies.
    pub critical_override_score: u8,

    /// Negative-sentiment terms, matched as whole words or phrases.
    pub sentiment_terms: Vec<String>,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            threshold: 0.60,
            sentiment_threshold: 0.75,
            degradation_penalty: 0.05,
            reference_snippet_len: 500,
            critical_override: true,
            critical_override_score: 90,
            sentiment_terms: default_sentiment_terms(),
        }
    }
}

impl ConfidenceConfig {
    /// Set the weights.
    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the escalation threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Enable or disable the critical priority override.
    pub fn with_critical_override(mut self, enabled: bool) -> Self {
        self.critical_override = enabled;
        self
    }

    /// Check weights and threshold ordering.
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.threshold) || !(0.0..=1.0).contains(&self.sentiment_threshold) {
            return Err(PipelineError::Config(
                "confidence thresholds must be within [0, 1]".to_string(),
            ));
        }
        if self.sentiment_threshold < self.threshold {
            return Err(PipelineError::Config(format!(
                "sentiment_threshold {} is below threshold {}",
                self.sentiment_threshold, self.threshold
            )));
        }
        if self.degradation_penalty < 0.0 {
            return Err(PipelineError::Config(
                "degradation_penalty must be non-negative".to_string(),
            ));
        }
        if self.reference_snippet_len == 0 {
            return Err(PipelineError::Config(
                "reference_snippet_len must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_sentiment_terms() -> Vec<String> {
    [
        // English
        "angry",
        "frustrated",
        "frustrating",
        "furious",
        "terrible",
        "awful",
        "horrible",
        "unacceptable",
        "disappointed",
        "worst",
        "ridiculous",
        "useless",
        "hate",
        "scam",
        "fed up",
        "waste of time",
        // Spanish
        "enojado",
        "frustrado",
        "furioso",
        "pésimo",
        "inaceptable",
        "decepcionado",
        "molesto",
        "harto",
        // French
        "furieux",
        "inacceptable",
        "déçu",
        "en colère",
        "nul",
        "scandaleux",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Kind of sensitive data found in a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    Email,
    Phone,
    CreditCard,
    Ssn,
    Passport,
}

impl SensitiveKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitiveKind::Email => "email",
            SensitiveKind::Phone => "phone",
            SensitiveKind::CreditCard => "credit_card",
            SensitiveKind::Ssn => "ssn",
            SensitiveKind::Passport => "passport",
        }
    }
}

impl fmt::Display for SensitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regex scan for personal and payment data.
pub struct SensitiveDataDetector {
    patterns: Vec<(SensitiveKind, Regex)>,
}

impl SensitiveDataDetector {
    /// Compile every pattern. Failing to compile any of them is an error
    /// rather than a silently narrower scan.
    pub fn new() -> Result<Self> {
        let sources = [
            (
                SensitiveKind::Email,
                r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            ),
            (SensitiveKind::CreditCard, r"\b(?:\d{4}[ -]?){3}\d{4}\b"),
            (SensitiveKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
            (
                SensitiveKind::Phone,
                r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b",
            ),
            (SensitiveKind::Passport, r"\b[A-Z]\d{8}\b"),
        ];
        let patterns = sources
            .into_iter()
            .map(|(kind, source)| {
                Regex::new(source)
                    .map(|re| (kind, re))
                    .map_err(|source| PipelineError::Pattern {
                        name: kind.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Kinds this detector scans for, in pattern order.
    pub fn kinds(&self) -> Vec<SensitiveKind> {
        self.patterns.iter().map(|(kind, _)| *kind).collect()
    }

    /// Kinds of sensitive data in `text`, sorted and without duplicates.
    pub fn scan(&self, text: &str) -> Vec<SensitiveKind> {
        let mut kinds: Vec<SensitiveKind> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Case-insensitive negative-sentiment term matcher.
pub struct SentimentDetector {
    terms: Vec<String>,
}

impl SentimentDetector {
    pub fn new(terms: Vec<String>) -> Self {
        Self { terms }
    }

    /// Negative terms found in `text`.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        matching_terms(&normalize(text), &self.terms)
    }
}

/// Raw values of the four components and the applied penalty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    /// Retrieval confidence, [0, 1].
    pub rag: f32,
    /// Priority confidence, [0.2, 0.8].
    pub priority: f32,
    /// Category bonus, 0 to 0.2.
    pub category: f32,
    /// Priority adjustment, -0.1 to 0.05.
    pub adjustment: f32,
    /// Total degradation penalty.
    pub penalty: f32,
}

/// Everything the evaluator looks at for one ticket.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub description: &'a str,
    pub text: &'a str,
    pub snippets: &'a [Snippet],
    pub priority_score: Option<u8>,
    pub category: Option<&'a str>,
    pub solution: Option<&'a str>,
    pub degraded_stages: u32,
}

impl<'a> EvaluationInput<'a> {
    /// Input drawn from the fields a pipeline run has populated.
    ///
    /// `text` is the text scanned for sentiment, usually
    /// [`Ticket::full_text`].
    pub fn from_ticket(ticket: &'a Ticket, text: &'a str) -> Self {
        Self {
            description: &ticket.description,
            text,
            snippets: &ticket.snippets,
            priority_score: ticket.priority_score,
            category: ticket.category.as_deref(),
            solution: ticket.solution.as_deref(),
            degraded_stages: 0,
        }
    }

    /// Set the number of stages that fell back.
    pub fn with_degraded_stages(mut self, degraded_stages: u32) -> Self {
        self.degraded_stages = degraded_stages;
        self
    }
}

/// Safety signals fed to the escalation decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    pub sensitive_kinds: Vec<SensitiveKind>,
    pub sentiment_terms: Vec<String>,
    pub priority_score: Option<u8>,
}

/// Output of the escalation decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
    pub reasons: Vec<String>,
    pub negative_sentiment: bool,
}

/// Confidence and escalation verdict for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Combined confidence, [0, 1].
    pub confidence: f32,

    /// Whether the ticket goes to a human.
    pub escalate: bool,

    /// Human-readable reasons, one per true condition.
    pub reasons: Vec<String>,

    /// First true condition in reporting order.
    pub escalation_reason: Option<EscalationReason>,

    /// Sensitive data found in the description.
    pub sensitive: bool,

    /// Negative sentiment under the secondary threshold.
    pub negative_sentiment: bool,

    /// Kinds of sensitive data found.
    pub sensitive_kinds: Vec<SensitiveKind>,

    /// Component values.
    pub breakdown: ConfidenceBreakdown,
}

/// Combines retrieval, priority and classification evidence into a
/// confidence score and decides on escalation.
pub struct ConfidenceEvaluator {
    config: ConfidenceConfig,
    sensitive: SensitiveDataDetector,
    sentiment: SentimentDetector,
}

impl ConfidenceEvaluator {
    /// Create an evaluator, validating the configuration.
    pub fn new(config: ConfidenceConfig) -> Result<Self> {
        config.validate()?;
        let sentiment = SentimentDetector::new(config.sentiment_terms.clone());
        Ok(Self {
            config,
            sensitive: SensitiveDataDetector::new()?,
            sentiment,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Evaluate one ticket.
    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> Evaluation {
        let breakdown = self.breakdown(input);
        let confidence = self.combine(&breakdown);

        let signals = Signals {
            sensitive_kinds: self.sensitive.scan(input.description),
            sentiment_terms: self
                .sentiment
                .matches(input.text)
                .into_iter()
                .map(str::to_string)
                .collect(),
            priority_score: input.priority_score,
        };
        let decision = self.decide(confidence, &signals);

        debug!(
            "Confidence {confidence:.3} (rag {:.3}, priority {:.3}, category {:.3}, adjustment {:.3}, penalty {:.3}), escalate: {}",
            breakdown.rag,
            breakdown.priority,
            breakdown.category,
            breakdown.adjustment,
            breakdown.penalty,
            decision.escalate
        );

        Evaluation {
            confidence,
            escalate: decision.escalate,
            reasons: decision.reasons,
            escalation_reason: decision.reason,
            sensitive: !signals.sensitive_kinds.is_empty(),
            negative_sentiment: decision.negative_sentiment,
            sensitive_kinds: signals.sensitive_kinds,
            breakdown,
        }
    }

    /// Component values for `input`.
    pub fn breakdown(&self, input: &EvaluationInput<'_>) -> ConfidenceBreakdown {
        let score = input.priority_score.unwrap_or(0);
        let adjustment = match input.priority_score.map(PriorityLevel::from_score) {
            Some(PriorityLevel::Low) => -0.1,
            Some(PriorityLevel::High | PriorityLevel::Critical) => 0.05,
            Some(PriorityLevel::Medium) | None => 0.0,
        };

        let mut category = 0.0;
        if input.category.is_some_and(|c| !c.trim().is_empty()) {
            category += 0.1;
        }
        if input.solution.is_some_and(|s| !s.trim().is_empty()) {
            category += 0.1;
        }

        ConfidenceBreakdown {
            rag: self.rag_confidence(input.snippets),
            priority: (f32::from(score) / 100.0).clamp(0.2, 0.8),
            category,
            adjustment,
            penalty: self.config.degradation_penalty * input.degraded_stages as f32,
        }
    }

    /// `0.7 * mean similarity + 0.1 * min(count, 3)`, clamped; 0 without
    /// snippets.
    pub fn rag_confidence(&self, snippets: &[Snippet]) -> f32 {
        if snippets.is_empty() {
            return 0.0;
        }
        let reference = self.config.reference_snippet_len.max(1) as f32;
        let total: f32 = snippets
            .iter()
            .map(|s| {
                s.similarity
                    .unwrap_or_else(|| s.content.chars().count() as f32 / reference)
                    .clamp(0.0, 1.0)
            })
            .sum();
        let mean = total / snippets.len() as f32;
        (0.7 * mean + 0.1 * snippets.len().min(3) as f32).clamp(0.0, 1.0)
    }

    fn combine(&self, b: &ConfidenceBreakdown) -> f32 {
        let w = &self.config.weights;
        let raw = w.rag * b.rag + w.priority * b.priority + w.category * b.category
            + w.adjustment * b.adjustment
            - b.penalty;
        raw.clamp(0.0, 1.0)
    }

    /// Escalation verdict for a confidence value and safety signals.
    ///
    /// Reasons are reported in the order low confidence, sensitive data,
    /// negative sentiment, critical priority.
    pub fn decide(&self, confidence: f32, signals: &Signals) -> Decision {
        let cfg = &self.config;
        let mut reasons = Vec::new();
        let mut first = None;
        let mut flag = |reason: EscalationReason, text: String| {
            first.get_or_insert(reason);
            reasons.push(text);
        };

        if confidence < cfg.threshold {
            flag(
                EscalationReason::LowConfidence,
                format!("confidence {confidence:.2} below threshold {:.2}", cfg.threshold),
            );
        }

        if !signals.sensitive_kinds.is_empty() {
            let kinds: Vec<&str> = signals.sensitive_kinds.iter().map(SensitiveKind::as_str).collect();
            flag(
                EscalationReason::SensitiveData,
                format!("sensitive data detected: {}", kinds.join(", ")),
            );
        }

        let negative_sentiment =
            !signals.sentiment_terms.is_empty() && confidence < cfg.sentiment_threshold;
        if negative_sentiment {
            flag(
                EscalationReason::NegativeSentiment,
                format!(
                    "negative sentiment ({}) with confidence below {:.2}",
                    signals.sentiment_terms.join(", "),
                    cfg.sentiment_threshold
                ),
            );
        }

        let critical = signals
            .priority_score
            .filter(|score| cfg.critical_override && *score >= cfg.critical_override_score);
        if let Some(score) = critical {
            flag(
                EscalationReason::CriticalPriority,
                format!("critical priority score {score}"),
            );
        }

        Decision {
            escalate: first.is_some(),
            reason: first,
            reasons,
            negative_sentiment,
        }
    }
}

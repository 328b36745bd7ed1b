//! Context assembly under a token budget.
//!
//! The assembler walks ranked documents greedily, keeps what fits into the
//! budget and merges the selection into one text blob with a pluggable
//! [`MergePolicy`].

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunk::KnowledgeChunk;
use crate::config::{ContextConfig, MergePolicyKind};
use crate::ranking::RankedDocument;
use crate::tokens::TokenEstimator;

/// Separator placed between merged documents.
const SEPARATOR: &str = "\n\n";

/// Statistics about one [`ContextAssembler::optimize`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInfo {
    /// Documents offered.
    pub total_candidates: usize,

    /// Documents selected.
    pub accepted: usize,

    /// Estimated tokens of the merged text.
    pub accepted_tokens: usize,

    /// Budget the selection was made against.
    pub target_tokens: usize,

    /// `accepted_tokens / target_tokens`.
    pub efficiency: f32,

    /// Whether the single selected document was cut to fit.
    pub truncated: bool,
}

/// Documents selected for the prompt, plus their merged text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Selected documents in rank order.
    pub documents: Vec<RankedDocument>,

    /// Merged text.
    pub text: String,

    /// Estimated tokens of `text`, separators and headers included.
    pub estimated_tokens: usize,

    /// Whether the last (and only) document was truncated.
    pub truncated: bool,

    /// Selection statistics.
    pub info: OptimizationInfo,
}

impl ContextBundle {
    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Merges selected documents into a single text.
pub trait MergePolicy: Send + Sync {
    /// Which policy this is.
    fn kind(&self) -> MergePolicyKind;

    /// Merge documents, in the order given.
    fn merge(&self, documents: &[RankedDocument]) -> String;
}

/// Joins every document verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenatePolicy;

impl MergePolicy for ConcatenatePolicy {
    fn kind(&self) -> MergePolicyKind {
        MergePolicyKind::Concatenate
    }

    fn merge(&self, documents: &[RankedDocument]) -> String {
        documents
            .iter()
            .map(|d| d.result.chunk.content.trim())
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

/// Keeps the top documents verbatim and reduces the rest to their first
/// sentence.
#[derive(Debug, Clone, Copy)]
pub struct TopVerbatimPolicy {
    verbatim_count: usize,
    summary_chars: usize,
}

impl TopVerbatimPolicy {
    /// Create the policy.
    pub fn new(verbatim_count: usize, summary_chars: usize) -> Self {
        Self {
            verbatim_count,
            summary_chars,
        }
    }

    /// Extractive summary: first sentence, capped at `summary_chars`.
    pub fn summarize(&self, text: &str) -> String {
        let text = text.trim();
        let sentence_end = text
            .char_indices()
            .find(|&(i, c)| {
                matches!(c, '.' | '!' | '?')
                    && text[i + c.len_utf8()..]
                        .chars()
                        .next()
                        .is_none_or(char::is_whitespace)
            })
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(text.len());
        let sentence = &text[..sentence_end];

        if sentence.chars().count() <= self.summary_chars {
            return sentence.to_string();
        }
        let cut: String = sentence.chars().take(self.summary_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

impl Default for TopVerbatimPolicy {
    fn default() -> Self {
        Self::new(3, 200)
    }
}

impl MergePolicy for TopVerbatimPolicy {
    fn kind(&self) -> MergePolicyKind {
        MergePolicyKind::TopVerbatim
    }

    fn merge(&self, documents: &[RankedDocument]) -> String {
        documents
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let content = d.result.chunk.content.trim();
                if i < self.verbatim_count {
                    content.to_string()
                } else {
                    self.summarize(content)
                }
            })
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

/// Prefixes each document with a metadata header.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredPolicy;

impl MergePolicy for StructuredPolicy {
    fn kind(&self) -> MergePolicyKind {
        MergePolicyKind::Structured
    }

    fn merge(&self, documents: &[RankedDocument]) -> String {
        let mut out = String::new();
        for (i, doc) in documents.iter().enumerate() {
            if i > 0 {
                out.push_str(SEPARATOR);
            }
            let chunk = &doc.result.chunk;
            let meta = &chunk.metadata;
            let _ = write!(out, "[{}] {}", doc.rank, chunk.id);
            let _ = write!(out, " | category: {}", meta.category);
            if !meta.section.is_empty() {
                let _ = write!(out, " | section: {}", meta.section);
            }
            if !meta.source.is_empty() {
                let _ = write!(out, " | source: {}", meta.source);
            }
            let _ = writeln!(out, " | similarity: {:.2}", doc.result.similarity);
            out.push_str(chunk.content.trim());
        }
        out
    }
}

/// Build the merge policy for a kind.
pub fn merge_policy(kind: MergePolicyKind, config: &ContextConfig) -> Box<dyn MergePolicy> {
    match kind {
        MergePolicyKind::Concatenate => Box::new(ConcatenatePolicy),
        MergePolicyKind::TopVerbatim => Box::new(TopVerbatimPolicy::new(
            config.verbatim_count,
            config.summary_chars,
        )),
        MergePolicyKind::Structured => Box::new(StructuredPolicy),
    }
}

/// Ticket fields rendered into the answer prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptTicket<'a> {
    /// Ticket subject.
    pub subject: &'a str,

    /// Ticket description.
    pub description: &'a str,

    /// Assigned category.
    pub category: Option<&'a str>,
}

/// Selects and merges ranked documents into prompt context.
pub struct ContextAssembler {
    config: ContextConfig,
    estimator: TokenEstimator,
    policy: Box<dyn MergePolicy>,
}

impl ContextAssembler {
    /// Create an assembler using the configured merge policy.
    pub fn new(config: ContextConfig) -> Self {
        let estimator = TokenEstimator::new(config.chars_per_token);
        let policy = merge_policy(config.merge_policy, &config);
        Self {
            config,
            estimator,
            policy,
        }
    }

    /// Replace the merge policy.
    pub fn with_policy(mut self, policy: Box<dyn MergePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The token estimator in use.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// The context configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Merge documents with the configured policy.
    pub fn merge(&self, documents: &[RankedDocument]) -> String {
        self.policy.merge(documents)
    }

    /// Select documents for the configured budget.
    pub fn assemble(&self, ranked: Vec<RankedDocument>) -> ContextBundle {
        self.optimize(ranked, self.config.target_tokens)
    }

    /// Greedily select documents in rank order within `target_tokens`.
    ///
    /// The budget is charged against the merged text, so separators and any
    /// headers the merge policy adds count too: a candidate is accepted only
    /// if merging it with the documents already selected still fits.
    ///
    /// A candidate that does not fit is skipped and the walk continues, so a
    /// smaller lower-ranked document can still use the remaining budget.
    /// This deliberately differs from stopping at the first misfit.
    ///
    /// If the first document alone is over budget it is cut to fit and
    /// returned alone, so the bundle is never empty when there is at least
    /// one candidate.
    pub fn optimize(&self, mut ranked: Vec<RankedDocument>, target_tokens: usize) -> ContextBundle {
        ranked.sort_by_key(|d| d.rank);
        let total_candidates = ranked.len();

        let mut selected: Vec<RankedDocument> = Vec::new();
        let mut text = String::new();
        let mut truncated = false;

        let mut iter = ranked.into_iter();
        if let Some(first) = iter.next() {
            let alone = self.merge(std::slice::from_ref(&first));
            if self.estimator.estimate(&alone) > target_tokens {
                let (doc, merged) = self.truncate_first(first, target_tokens);
                selected.push(doc);
                text = merged;
                truncated = true;
            } else {
                selected.push(first);
                text = alone;

                for doc in iter {
                    selected.push(doc);
                    let merged = self.merge(&selected);
                    if self.estimator.estimate(&merged) <= target_tokens {
                        text = merged;
                    } else if let Some(skipped) = selected.pop() {
                        debug!("Skipping {} over budget", skipped.id());
                    }
                }
            }
        }

        let used = self.estimator.estimate(&text);
        let info = OptimizationInfo {
            total_candidates,
            accepted: selected.len(),
            accepted_tokens: used,
            target_tokens,
            efficiency: if target_tokens > 0 {
                used as f32 / target_tokens as f32
            } else {
                0.0
            },
            truncated,
        };

        info!(
            "Assembled context: {}/{} documents, {used}/{target_tokens} tokens",
            info.accepted, info.total_candidates
        );

        ContextBundle {
            documents: selected,
            text,
            estimated_tokens: used,
            truncated,
            info,
        }
    }

    /// Cut the first document so that its merged form fits `target_tokens`.
    ///
    /// When the policy's own overhead leaves no room, the cut content is
    /// returned as the text without any header.
    fn truncate_first(&self, first: RankedDocument, target_tokens: usize) -> (RankedDocument, String) {
        let content = first.result.chunk.content.clone();
        let original = self.estimator.estimate(&content);

        let empty = Self::with_content(first.clone(), String::new());
        let overhead = self.estimator.estimate(&self.merge(std::slice::from_ref(&empty)));
        let mut content_budget = target_tokens.saturating_sub(overhead);

        loop {
            let cut = self.estimator.truncate_to(&content, content_budget).to_string();
            let doc = Self::with_content(first.clone(), cut);
            let merged = self.merge(std::slice::from_ref(&doc));
            if self.estimator.estimate(&merged) <= target_tokens {
                debug!(
                    "Truncated {} from {original} to {content_budget} content tokens",
                    doc.id()
                );
                return (doc, merged);
            }
            if content_budget == 0 {
                break;
            }
            content_budget -= 1;
        }

        let mut budget = target_tokens;
        let cut = loop {
            let cut = self.estimator.truncate_to(content.trim(), budget);
            if self.estimator.estimate(cut) <= target_tokens || budget == 0 {
                break cut.to_string();
            }
            budget -= 1;
        };
        debug!(
            "Merge overhead exceeds {target_tokens} tokens, sending {} unformatted",
            first.id()
        );
        (Self::with_content(first, cut.clone()), cut)
    }

    /// Render the answer prompt for a ticket and its context.
    pub fn build_prompt(&self, ticket: &PromptTicket<'_>, bundle: &ContextBundle) -> String {
        let knowledge = if bundle.text.trim().is_empty() {
            "(no relevant knowledge found)"
        } else {
            bundle.text.as_str()
        };

        format!(
            "You are a customer support assistant. Answer the ticket using only the \
             knowledge below. If the knowledge does not cover the problem, say so.\n\
             \n\
             Subject: {subject}\n\
             Category: {category}\n\
             Description:\n{description}\n\
             \n\
             Knowledge:\n{knowledge}\n\
             \n\
             Respond with a single JSON object: {{\"answer\": string, \"confidence\": \
             number between 0 and 1, \"suggested_actions\": [string], \"escalate\": \
             boolean}}.",
            subject = ticket.subject.trim(),
            category = ticket.category.unwrap_or("uncategorized"),
            description = ticket.description.trim(),
        )
    }

    fn with_content(doc: RankedDocument, content: String) -> RankedDocument {
        let chunk = &doc.result.chunk;
        let cut = KnowledgeChunk::new(chunk.id.clone(), content, chunk.metadata.clone());
        let mut doc = doc;
        doc.result.chunk = Arc::new(cut);
        doc
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

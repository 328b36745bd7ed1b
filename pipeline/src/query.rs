//! Query intelligence: validation, augmentation, multi-class classification
//! and retrieval planning.
//!
//! Validation and classification are pure rule evaluation. Augmentation asks
//! the text generator for a rewrite and falls back to keyword extraction when
//! the generator is missing, slow or returns something unparseable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use triage_retrieval::{RetrievalConfig, RetrievalPlan};

use crate::error::{PipelineError, Result};
use crate::generation::{TextGenerator, extract_json_object};
use crate::text::{matching_terms, normalize, words};
use crate::ticket::Ticket;

const STOPWORDS: &[&str] = &[
    // English
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "been", "from", "this", "that", "with", "they", "will",
    "would", "there", "their", "what", "when", "where", "which", "while", "who", "how", "why",
    "about", "into", "than", "then", "them", "these", "those", "some", "such", "only", "also",
    "just", "very", "more", "most", "other", "your", "yours", "mine", "its", "his", "she", "him",
    "please", "thanks", "thank", "hello", "since", "does", "did", "doing", "after", "before",
    "again", "being", "could", "should", "get", "got", "my", "me", "is", "it", "to", "of", "in",
    "on", "at", "an", "or", "be", "do", "so", "if", "as", "by", "we", "no", "am", "any",
    // Spanish
    "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "que", "en", "por",
    "para", "con", "sin", "sobre", "es", "son", "está", "están", "esta", "este", "estos", "pero",
    "como", "más", "mi", "mis", "su", "sus", "se", "lo", "le", "les", "ya", "muy", "hola",
    "gracias", "favor", "porque", "cuando", "donde", "hay", "tengo", "tiene",
];

/// Configuration for [`QueryIntelligence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Minimum trimmed subject length, in characters.
    pub min_subject_len: usize,

    /// Minimum trimmed description length, in characters.
    pub min_description_len: usize,

    /// Runs of this many identical non-digit characters are rejected.
    pub max_repeated_run: usize,

    /// Descriptions need at least this many distinct letters or digits.
    pub min_distinct_alphanumerics: usize,

    /// Subjects or descriptions consisting only of one of these are rejected.
    pub boilerplate: Vec<String>,

    /// Whether to ask the generator for a rewrite.
    pub use_generator: bool,

    /// Timeout for the rewrite call, in milliseconds.
    pub augment_timeout_ms: u64,

    /// Keywords kept by the fallback extraction.
    pub max_keywords: usize,

    /// Evidence contributed by each matching category keyword.
    pub per_hit: f32,

    /// Categories scoring at least this are relevant.
    pub relevance_floor: f32,

    /// Retrieval is restricted to relevant categories only when the primary
    /// category scores at least this.
    pub filter_min_primary_score: f32,

    /// Primary category when nothing scores.
    pub default_category: String,

    /// Keywords per category.
    pub categories: BTreeMap<String, Vec<String>>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for QueryConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            "technical".to_string(),
            owned(&[
                "error", "bug", "crash", "crashes", "down", "outage", "server", "database",
                "production", "timeout", "slow", "api", "install", "installation", "update",
                "connection", "vpn", "network", "broken", "not working", "fails", "failing",
                "sync", "app", "website", "servidor", "fallo",
            ]),
        );
        categories.insert(
            "billing".to_string(),
            owned(&[
                "invoice", "invoices", "payment", "charge", "charged", "refund", "billing",
                "subscription", "price", "pricing", "receipt", "plan", "credit card", "paid",
                "factura", "pago", "cobro", "reembolso",
            ]),
        );
        categories.insert(
            "account".to_string(),
            owned(&[
                "password", "login", "log in", "sign in", "account", "username", "locked",
                "reset", "2fa", "two factor", "profile", "email address", "access",
                "contraseña", "cuenta",
            ]),
        );
        categories.insert(
            "shipping".to_string(),
            owned(&[
                "shipping", "delivery", "package", "tracking", "shipped", "courier",
                "delivered", "parcel", "order", "envío", "pedido",
            ]),
        );

        Self {
            min_subject_len: 3,
            min_description_len: 10,
            max_repeated_run: 6,
            min_distinct_alphanumerics: 3,
            boilerplate: owned(&[
                "test", "testing", "asdf", "qwerty", "lorem ipsum", "n/a", "na", "none",
                "xxx", "help", "hello", "prueba",
            ]),
            use_generator: true,
            augment_timeout_ms: 5_000,
            max_keywords: 8,
            per_hit: 0.35,
            relevance_floor: 0.3,
            filter_min_primary_score: 0.5,
            default_category: "general".to_string(),
            categories,
        }
    }
}

impl QueryConfig {
    /// Disable the generator rewrite.
    pub fn without_generator(mut self) -> Self {
        self.use_generator = false;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.per_hit > 0.0 && self.per_hit <= 1.0) {
            return Err(PipelineError::Config(format!(
                "per_hit must be within (0, 1], got {}",
                self.per_hit
            )));
        }
        for (name, value) in [
            ("relevance_floor", self.relevance_floor),
            ("filter_min_primary_score", self.filter_min_primary_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.default_category.trim().is_empty() {
            return Err(PipelineError::Config(
                "default_category must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`QueryIntelligence::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the ticket may enter the pipeline.
    pub valid: bool,

    /// Why it may not.
    pub reasons: Vec<String>,
}

/// Where an [`Augmentation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationSource {
    /// Parsed from the generator's rewrite.
    Generated,
    /// Keyword extraction.
    Keyword,
}

/// Search-oriented rewrite of a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Augmentation {
    /// Rewritten request.
    pub rephrased: Option<String>,

    /// Additional search terms.
    pub expansion: Vec<String>,

    /// Synonyms of key terms.
    pub synonyms: Vec<String>,

    /// Context the customer implied but did not state.
    pub implicit_context: Option<String>,

    /// Extracted keywords (always computed).
    pub keywords: Vec<String>,

    /// Producer of this augmentation.
    pub source: AugmentationSource,

    /// Whether the generator failed and keywords were used instead.
    pub degraded: bool,
}

impl Augmentation {
    fn from_keywords(keywords: Vec<String>, degraded: bool) -> Self {
        Self {
            rephrased: None,
            expansion: keywords.clone(),
            synonyms: Vec::new(),
            implicit_context: None,
            keywords,
            source: AugmentationSource::Keyword,
            degraded,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratedRewrite {
    rephrased: Option<String>,
    expansion: Vec<String>,
    synonyms: Vec<String>,
    implicit_context: Option<String>,
}

/// Evidence for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    /// Relevance in [0, 1].
    pub score: f32,

    /// How much evidence backs the score, in [0, 1].
    pub confidence: f32,

    /// Matching category keywords.
    pub hits: usize,
}

/// Per-category relevance of a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Score of every configured category.
    pub scores: BTreeMap<String, CategoryScore>,

    /// Best category, or the default category when nothing scores.
    pub primary_class: String,

    /// Score of `primary_class`.
    pub primary_score: f32,

    /// Categories at or above the relevance floor, best first.
    pub relevant_classes: Vec<String>,
}

/// Understands a ticket well enough to search for it.
pub struct QueryIntelligence {
    config: QueryConfig,
    retrieval: RetrievalConfig,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl QueryIntelligence {
    /// Create a rule-only instance.
    pub fn new(config: QueryConfig, retrieval: RetrievalConfig) -> Self {
        Self {
            config,
            retrieval,
            generator: None,
        }
    }

    /// Use a generator for augmentation.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Check that a ticket carries enough signal to process.
    pub fn validate(&self, ticket: &Ticket) -> Validation {
        let cfg = &self.config;
        let mut reasons = Vec::new();
        let subject = ticket.subject.trim();
        let description = ticket.description.trim();

        if subject.chars().count() < cfg.min_subject_len {
            reasons.push(format!(
                "subject shorter than {} characters",
                cfg.min_subject_len
            ));
        }
        if description.chars().count() < cfg.min_description_len {
            reasons.push(format!(
                "description shorter than {} characters",
                cfg.min_description_len
            ));
        }
        if is_pure_url(description) {
            reasons.push("description is only a URL".to_string());
        }
        if longest_run(description) >= cfg.max_repeated_run {
            reasons.push(format!(
                "description repeats a character {} or more times",
                cfg.max_repeated_run
            ));
        }
        if distinct_alphanumerics(description) < cfg.min_distinct_alphanumerics {
            reasons.push("description has too little distinct content".to_string());
        }

        let boilerplate: Vec<String> = cfg.boilerplate.iter().map(|b| normalize(b)).collect();
        for (field, value) in [("subject", subject), ("description", description)] {
            let normalized = normalize(value);
            if boilerplate.contains(&normalized) || normalized.contains(" lorem ipsum ") {
                reasons.push(format!("{field} is placeholder text"));
            }
        }

        debug!(
            "Validated ticket {}: {} problems",
            ticket.id,
            reasons.len()
        );
        Validation {
            valid: reasons.is_empty(),
            reasons,
        }
    }

    /// Rewrite the ticket for search, falling back to keywords.
    pub async fn augment(&self, ticket: &Ticket) -> Augmentation {
        let keywords = extract_keywords(&ticket.full_text(), self.config.max_keywords);

        let generator = match &self.generator {
            Some(generator) if self.config.use_generator => generator,
            _ => return Augmentation::from_keywords(keywords, false),
        };

        let prompt = format!(
            "Rewrite this support request for a knowledge base search.\n\
             Subject: {}\n\
             Description: {}\n\
             Reply with a JSON object with the keys \"rephrased\" (string), \
             \"expansion\" (list of extra search terms), \"synonyms\" (list) and \
             \"implicit_context\" (string).",
            ticket.subject.trim(),
            ticket.description.trim()
        );

        let timeout = Duration::from_millis(self.config.augment_timeout_ms);
        let reply = match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Augmentation failed, using keywords: {e}");
                return Augmentation::from_keywords(keywords, true);
            }
            Err(_) => {
                warn!(
                    "Augmentation timed out after {}ms, using keywords",
                    self.config.augment_timeout_ms
                );
                return Augmentation::from_keywords(keywords, true);
            }
        };

        let parsed = extract_json_object(&reply)
            .and_then(|json| serde_json::from_str::<GeneratedRewrite>(json).ok());
        match parsed {
            Some(rewrite) => Augmentation {
                rephrased: rewrite.rephrased.filter(|r| !r.trim().is_empty()),
                expansion: rewrite.expansion,
                synonyms: rewrite.synonyms,
                implicit_context: rewrite.implicit_context,
                keywords,
                source: AugmentationSource::Generated,
                degraded: false,
            },
            None => {
                warn!("Augmentation reply was not valid JSON, using keywords");
                Augmentation::from_keywords(keywords, true)
            }
        }
    }

    /// Score the ticket against every configured category.
    pub fn classify(&self, ticket: &Ticket, augmentation: &Augmentation) -> Classification {
        let cfg = &self.config;
        let mut text = ticket.full_text();
        for extra in augmentation
            .expansion
            .iter()
            .chain(&augmentation.synonyms)
            .chain(&augmentation.rephrased)
        {
            text.push('\n');
            text.push_str(extra);
        }
        let normalized = normalize(&text);

        let scores: BTreeMap<String, CategoryScore> = cfg
            .categories
            .iter()
            .map(|(name, keywords)| {
                let hits = matching_terms(&normalized, keywords).len();
                let score = 1.0 - (1.0 - cfg.per_hit).powi(hits as i32);
                let confidence = (hits as f32 / 3.0).min(1.0);
                (
                    name.clone(),
                    CategoryScore {
                        score,
                        confidence,
                        hits,
                    },
                )
            })
            .collect();

        let mut relevant: Vec<(&String, f32)> = scores
            .iter()
            .filter(|(_, s)| s.hits > 0 && s.score >= cfg.relevance_floor)
            .map(|(name, s)| (name, s.score))
            .collect();
        relevant.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let (primary_class, primary_score) = match relevant.first() {
            Some((name, score)) => ((*name).clone(), *score),
            None => (cfg.default_category.clone(), 0.0),
        };
        let relevant_classes: Vec<String> = relevant.into_iter().map(|(n, _)| n.clone()).collect();

        debug!(
            "Classified ticket {} as {primary_class} ({primary_score:.2}), relevant: {relevant_classes:?}",
            ticket.id
        );

        Classification {
            scores,
            primary_class,
            primary_score,
            relevant_classes,
        }
    }

    /// Build the retrieval plan.
    pub fn plan(
        &self,
        ticket: &Ticket,
        augmentation: &Augmentation,
        classification: &Classification,
    ) -> RetrievalPlan {
        let search_text = augmentation
            .rephrased
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| ticket.description.trim())
            .to_string();

        let mut plan = RetrievalPlan::new(
            search_text,
            self.retrieval.top_k,
            self.retrieval.similarity_threshold,
        );
        if classification.primary_score >= self.config.filter_min_primary_score
            && !classification.relevant_classes.is_empty()
        {
            plan = plan.with_category_filter(classification.relevant_classes.clone());
        }
        plan
    }
}

/// Top `max` non-stopword terms by frequency, ties broken by first
/// occurrence.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in words(text, 3).into_iter().enumerate() {
        if STOPWORDS.contains(&word.as_str()) || word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then_with(|| a.1.1.cmp(&b.1.1)));
    ranked.into_iter().take(max).map(|(word, _)| word).collect()
}

fn is_pure_url(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www."))
        && !text.contains(char::is_whitespace)
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<char> = None;
    for c in text.chars() {
        if c.is_whitespace() || c.is_ascii_digit() {
            previous = None;
            current = 0;
            continue;
        }
        let c = c.to_lowercase().next().unwrap_or(c);
        if previous == Some(c) {
            current += 1;
        } else {
            previous = Some(c);
            current = 1;
        }
        longest = longest.max(current);
    }
    longest
}

fn distinct_alphanumerics(text: &str) -> usize {
    let mut seen: Vec<char> = text
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use pretty_assertions::assert_eq;

    fn intelligence() -> QueryIntelligence {
        QueryIntelligence::new(QueryConfig::default(), RetrievalConfig::default())
    }

    #[test]
    fn test_valid_ticket() {
        let ticket = Ticket::new("T-1", "VPN drops", "My VPN client disconnects every few minutes.");
        let validation = intelligence().validate(&ticket);
        assert!(validation.valid, "{:?}", validation.reasons);
    }

    #[test]
    fn test_rejects_short_fields() {
        let ticket = Ticket::new("T-1", "Hi", "short");
        let validation = intelligence().validate(&ticket);
        assert!(!validation.valid);
        assert_eq!(validation.reasons.len(), 2);
    }

    #[test]
    fn test_rejects_low_signal_patterns() {
        let qi = intelligence();
        let url = Ticket::new("T-1", "Link", "https://example.com/some/page");
        let repeated = Ticket::new("T-2", "Help me", "aaaaaaaaaaaaaa please");
        let lorem = Ticket::new("T-3", "Subject here", "Lorem ipsum dolor sit amet");
        let boiler = Ticket::new("T-4", "test", "this is a real description");

        assert!(!qi.validate(&url).valid);
        assert!(!qi.validate(&repeated).valid);
        assert!(!qi.validate(&lorem).valid);
        assert!(!qi.validate(&boiler).valid);
    }

    #[test]
    fn test_digits_do_not_count_as_repeats() {
        let ticket = Ticket::new("T-1", "Order", "Order 1000000 never arrived at my door");
        assert!(intelligence().validate(&ticket).valid);
    }

    #[test]
    fn test_extract_keywords_by_frequency() {
        let keywords = extract_keywords(
            "The printer is offline. The printer queue is stuck and the printer shows an error.",
            3,
        );
        assert_eq!(keywords, vec!["printer", "offline", "queue"]);
    }

    #[test]
    fn test_extract_keywords_drops_spanish_stopwords() {
        let keywords = extract_keywords("No puedo entrar a mi cuenta para pagar la factura", 8);
        assert!(keywords.contains(&"cuenta".to_string()));
        assert!(!keywords.contains(&"para".to_string()));
    }

    #[tokio::test]
    async fn test_augment_without_generator_uses_keywords() {
        let ticket = Ticket::new("T-1", "Refund", "I was charged twice for my subscription");
        let augmentation = intelligence().augment(&ticket).await;
        assert_eq!(augmentation.source, AugmentationSource::Keyword);
        assert!(!augmentation.degraded);
        assert!(augmentation.keywords.contains(&"charged".to_string()));
    }

    #[tokio::test]
    async fn test_augment_parses_generated_rewrite() {
        let generator = Arc::new(ScriptedGenerator::constant(
            r#"Sure! {"rephrased": "duplicate subscription charge refund", "expansion": ["billing"], "synonyms": ["double charge"]}"#,
        ));
        let qi = intelligence().with_generator(generator);
        let ticket = Ticket::new("T-1", "Refund", "I was charged twice for my subscription");

        let augmentation = qi.augment(&ticket).await;

        assert_eq!(augmentation.source, AugmentationSource::Generated);
        assert_eq!(
            augmentation.rephrased.as_deref(),
            Some("duplicate subscription charge refund")
        );
        assert_eq!(augmentation.synonyms, vec!["double charge"]);
    }

    #[tokio::test]
    async fn test_augment_falls_back_on_garbage() {
        let qi = intelligence().with_generator(Arc::new(ScriptedGenerator::constant("no json here")));
        let ticket = Ticket::new("T-1", "Refund", "I was charged twice for my subscription");

        let augmentation = qi.augment(&ticket).await;

        assert_eq!(augmentation.source, AugmentationSource::Keyword);
        assert!(augmentation.degraded);
    }

    #[tokio::test]
    async fn test_augment_falls_back_on_error() {
        let qi = intelligence().with_generator(Arc::new(ScriptedGenerator::failing()));
        let ticket = Ticket::new("T-1", "Refund", "I was charged twice for my subscription");
        assert!(qi.augment(&ticket).await.degraded);
    }

    #[test]
    fn test_classification_is_multi_class() {
        let qi = intelligence();
        let ticket = Ticket::new(
            "T-1",
            "Cannot login after payment",
            "My payment went through and I got a receipt but login says my account is locked",
        );
        let augmentation = Augmentation::from_keywords(Vec::new(), false);

        let classification = qi.classify(&ticket, &augmentation);

        assert_eq!(classification.primary_class, "account");
        assert_eq!(classification.relevant_classes, vec!["account", "billing"]);
        let account = classification.scores["account"];
        assert_eq!(account.hits, 3);
        assert!((account.score - (1.0 - 0.65f32.powi(3))).abs() < 1e-6);
        assert_eq!(account.confidence, 1.0);
    }

    #[test]
    fn test_classification_defaults_when_nothing_matches() {
        let ticket = Ticket::new("T-1", "Question", "What are your opening hours on holidays?");
        let classification =
            intelligence().classify(&ticket, &Augmentation::from_keywords(Vec::new(), false));

        assert_eq!(classification.primary_class, "general");
        assert_eq!(classification.primary_score, 0.0);
        assert!(classification.relevant_classes.is_empty());
    }

    #[test]
    fn test_plan_filters_only_on_confident_primary() {
        let qi = intelligence();
        let ticket = Ticket::new("T-1", "Server down", "The production database server is down");
        let augmentation = Augmentation::from_keywords(Vec::new(), false);

        let classification = qi.classify(&ticket, &augmentation);
        let plan = qi.plan(&ticket, &augmentation, &classification);
        assert_eq!(plan.search_text, "The production database server is down");
        assert_eq!(plan.category_filter, Some(vec!["technical".to_string()]));
        assert_eq!(plan.top_k, 5);

        let weak = Ticket::new("T-2", "Hmm", "The app shows something odd");
        let classification = qi.classify(&weak, &augmentation);
        assert!(classification.primary_score < 0.5);
        assert_eq!(qi.plan(&weak, &augmentation, &classification).category_filter, None);
    }

    #[test]
    fn test_plan_prefers_rephrasing() {
        let qi = intelligence();
        let ticket = Ticket::new("T-1", "Refund", "I was charged twice");
        let mut augmentation = Augmentation::from_keywords(Vec::new(), false);
        augmentation.rephrased = Some("duplicate charge refund".to_string());

        let classification = qi.classify(&ticket, &augmentation);
        let plan = qi.plan(&ticket, &augmentation, &classification);

        assert_eq!(plan.search_text, "duplicate charge refund");
    }
}

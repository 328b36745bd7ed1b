//! Text generation and answer drafting.
//!
//! [`TextGenerator`] is the narrow `generate(prompt) -> text` seam to the
//! language model. [`AnswerGenerator`] drives it for one ticket, parses the
//! structured reply and substitutes a per-category template when the model
//! is unreachable, slow or incoherent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::ticket::Ticket;

/// Result type for text generation.
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// A language model behind a prompt-in, text-out interface.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name of this generator.
    fn name(&self) -> &str;

    /// Complete `prompt`.
    async fn generate(&self, prompt: &str) -> GenerationResult<String>;
}

/// Chat completion generator for OpenAI-compatible servers.
pub struct OpenAIChatGenerator {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name.
    model: String,

    /// Sampling temperature.
    temperature: f32,

    /// Per-request timeout.
    timeout: Duration,
}

impl OpenAIChatGenerator {
    /// Create a generator reading the key from `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OpenAIChatGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn generate(&self, prompt: &str) -> GenerationResult<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GenerationError::NotConfigured("OPENAI_API_KEY is not set".to_string()))?;

        debug!("Requesting completion from {}", self.model);

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(GenerationError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!("{status}: {error_text}")));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("no completion in response".to_string()))
    }
}

type Script = dyn Fn(&str) -> GenerationResult<String> + Send + Sync;

/// Generator driven by a closure, for tests and offline runs.
pub struct ScriptedGenerator {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    /// Answer every prompt with `script(prompt)`.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str) -> GenerationResult<String> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every prompt with the same text.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Fail every call.
    pub fn failing() -> Self {
        Self::new(|_| Err(GenerationError::Request("service unavailable".to_string())))
    }

    /// Number of prompts seen.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> GenerationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(prompt)
    }
}

/// Configuration for [`AnswerGenerator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Timeout for one generation call, in milliseconds.
    pub timeout_ms: u64,

    /// Confidence assumed when the reply does not state one.
    pub default_confidence: f32,

    /// Confidence reported with a fallback template.
    pub fallback_confidence: f32,

    /// Fallback answer per category.
    pub templates: BTreeMap<String, String>,

    /// Fallback answer for categories without a template.
    pub default_template: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            "technical".to_string(),
            "Thanks for reporting this technical issue. Our engineers have been notified and \
             will follow up with troubleshooting steps shortly."
                .to_string(),
        );
        templates.insert(
            "billing".to_string(),
            "Thanks for contacting us about billing. A member of our billing team will review \
             your account and get back to you."
                .to_string(),
        );
        templates.insert(
            "account".to_string(),
            "Thanks for reaching out about your account. For your security, an agent will \
             verify the details and contact you."
                .to_string(),
        );
        templates.insert(
            "shipping".to_string(),
            "Thanks for your message about your order. We are checking its status with the \
             carrier and will update you soon."
                .to_string(),
        );

        Self {
            timeout_ms: 10_000,
            default_confidence: 0.5,
            fallback_confidence: 0.3,
            templates,
            default_template: "Thanks for contacting support. We have received your request \
                               and an agent will get back to you shortly."
                .to_string(),
        }
    }
}

impl GenerationConfig {
    /// Fallback answer for a category.
    pub fn template_for(&self, category: Option<&str>) -> &str {
        category
            .and_then(|c| self.templates.get(c))
            .map_or(self.default_template.as_str(), String::as_str)
    }
}

/// Parsed answer of the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    /// Answer text.
    pub answer: String,

    /// Confidence the model reported, in [0, 1].
    pub self_reported_confidence: f32,

    /// Follow-up actions suggested by the model.
    pub suggested_actions: Vec<String>,

    /// Whether the model (or the fallback) suggests escalation.
    pub escalation_hint: bool,

    /// Whether this is a fallback template.
    pub degraded: bool,
}

/// Reply fields under every name models have been seen to use. Synonyms
/// are separate fields so a reply carrying two of them still parses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnswer {
    answer: Option<String>,
    solution: Option<String>,
    response: Option<String>,
    confidence: Option<f32>,
    self_reported_confidence: Option<f32>,
    suggested_actions: Option<Vec<String>>,
    actions: Option<Vec<String>>,
    escalate: Option<bool>,
    escalation_hint: Option<bool>,
    needs_escalation: Option<bool>,
}

impl RawAnswer {
    /// First non-blank of `answer`, `solution`, `response`.
    fn answer(&mut self) -> Option<String> {
        [
            self.answer.take(),
            self.solution.take(),
            self.response.take(),
        ]
        .into_iter()
        .flatten()
        .find(|a| !a.trim().is_empty())
    }
}

/// First balanced `{...}` block of `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drafts the answer for a ticket.
pub struct AnswerGenerator {
    config: GenerationConfig,
    generator: Arc<dyn TextGenerator>,
}

impl AnswerGenerator {
    /// Create an answer generator.
    pub fn new(config: GenerationConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self { config, generator }
    }

    /// The configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Make one bounded generation call and parse the reply.
    pub async fn generate(&self, ticket: &Ticket, prompt: &str) -> GeneratedAnswer {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let reply = match tokio::time::timeout(timeout, self.generator.generate(prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Answer generation failed for {}: {e}", ticket.id);
                return self.fallback(ticket);
            }
            Err(_) => {
                let err = GenerationError::Timeout(self.config.timeout_ms);
                warn!("Answer generation failed for {}: {err}", ticket.id);
                return self.fallback(ticket);
            }
        };

        match self.parse(&reply) {
            Some(answer) => answer,
            None => {
                warn!("Unparseable answer for {}, using template", ticket.id);
                self.fallback(ticket)
            }
        }
    }

    /// Parse a reply; `None` when it has no JSON object or no answer.
    pub fn parse(&self, reply: &str) -> Option<GeneratedAnswer> {
        let mut raw: RawAnswer = serde_json::from_str(extract_json_object(reply)?).ok()?;
        let answer = raw.answer()?;

        Some(GeneratedAnswer {
            answer,
            self_reported_confidence: raw
                .confidence
                .or(raw.self_reported_confidence)
                .unwrap_or(self.config.default_confidence)
                .clamp(0.0, 1.0),
            suggested_actions: raw.suggested_actions.or(raw.actions).unwrap_or_default(),
            escalation_hint: raw
                .escalate
                .or(raw.escalation_hint)
                .or(raw.needs_escalation)
                .unwrap_or(false),
            degraded: false,
        })
    }

    fn fallback(&self, ticket: &Ticket) -> GeneratedAnswer {
        GeneratedAnswer {
            answer: self
                .config
                .template_for(ticket.category.as_deref())
                .to_string(),
            self_reported_confidence: self.config.fallback_confidence,
            suggested_actions: Vec::new(),
            escalation_hint: true,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _prompt: &str) -> GenerationResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    fn ticket(category: Option<&str>) -> Ticket {
        let mut ticket = Ticket::new("T-1", "Invoice", "Where can I download my invoice?");
        ticket.category = category.map(str::to_string);
        ticket
    }

    fn answers(generator: impl TextGenerator + 'static) -> AnswerGenerator {
        AnswerGenerator::new(GenerationConfig::default(), Arc::new(generator))
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object(r#"Here you go: {"a": {"b": "}"}} trailing"#),
            Some(r#"{"a": {"b": "}"}}"#)
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("{ unbalanced"), None);
        assert_eq!(
            extract_json_object(r#"{"q": "say \"hi\" {"}"#),
            Some(r#"{"q": "say \"hi\" {"}"#)
        );
    }

    #[tokio::test]
    async fn test_parses_full_answer() {
        let generator = answers(ScriptedGenerator::constant(
            r#"{"answer": "Open Billing > Invoices.", "confidence": 0.9, "suggested_actions": ["send link"], "escalate": false}"#,
        ));

        let answer = generator.generate(&ticket(Some("billing")), "prompt").await;

        assert_eq!(answer.answer, "Open Billing > Invoices.");
        assert_eq!(answer.self_reported_confidence, 0.9);
        assert_eq!(answer.suggested_actions, vec!["send link"]);
        assert!(!answer.escalation_hint);
        assert!(!answer.degraded);
    }

    #[tokio::test]
    async fn test_reply_with_synonym_keys_parses() {
        let generator = answers(ScriptedGenerator::constant(
            r#"{"answer": "Reset it from Settings.", "response": "ignored", "confidence": 0.8, "self_reported_confidence": 0.2, "needs_escalation": true}"#,
        ));

        let answer = generator.generate(&ticket(None), "prompt").await;

        assert!(!answer.degraded);
        assert_eq!(answer.answer, "Reset it from Settings.");
        assert_eq!(answer.self_reported_confidence, 0.8);
        assert!(answer.escalation_hint);
    }

    #[tokio::test]
    async fn test_blank_answer_falls_back_to_response() {
        let generator = answers(ScriptedGenerator::constant(
            r#"{"answer": "", "response": "Clear the printer queue."}"#,
        ));

        let answer = generator.generate(&ticket(None), "prompt").await;

        assert_eq!(answer.answer, "Clear the printer queue.");
    }

    #[tokio::test]
    async fn test_missing_fields_get_defaults() {
        let generator = answers(ScriptedGenerator::constant(
            "```json\n{\"answer\": \"Open Billing > Invoices.\"}\n```",
        ));

        let answer = generator.generate(&ticket(Some("billing")), "prompt").await;

        assert_eq!(answer.self_reported_confidence, 0.5);
        assert!(answer.suggested_actions.is_empty());
        assert!(!answer.degraded);
    }

    #[tokio::test]
    async fn test_malformed_reply_uses_category_template() {
        let generator = answers(ScriptedGenerator::constant("I think you should check billing"));

        let answer = generator.generate(&ticket(Some("billing")), "prompt").await;

        assert!(answer.degraded);
        assert!(answer.escalation_hint);
        assert_eq!(answer.self_reported_confidence, 0.3);
        assert_eq!(
            answer.answer,
            GenerationConfig::default().template_for(Some("billing"))
        );
    }

    #[tokio::test]
    async fn test_empty_answer_is_a_failure() {
        let generator = answers(ScriptedGenerator::constant(r#"{"answer": "  "}"#));
        assert!(generator.generate(&ticket(None), "prompt").await.degraded);
    }

    #[tokio::test]
    async fn test_service_error_uses_default_template() {
        let generator = answers(ScriptedGenerator::failing());

        let answer = generator.generate(&ticket(Some("unknown")), "prompt").await;

        assert!(answer.degraded);
        assert_eq!(answer.answer, GenerationConfig::default().default_template);
    }

    #[tokio::test]
    async fn test_timeout_uses_template() {
        let config = GenerationConfig {
            timeout_ms: 20,
            ..GenerationConfig::default()
        };
        let generator = AnswerGenerator::new(config, Arc::new(SlowGenerator));

        let answer = generator.generate(&ticket(None), "prompt").await;

        assert!(answer.degraded);
    }

    #[tokio::test]
    async fn test_scripted_generator_counts_calls() {
        let generator = ScriptedGenerator::new(|prompt| Ok(prompt.to_uppercase()));
        assert_eq!(generator.generate("abc").await.unwrap(), "ABC");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_openai_chat_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"answer\": \"hi\"}"}}]
            })))
            .mount(&server)
            .await;

        let generator = OpenAIChatGenerator::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());

        assert_eq!(generator.generate("hello").await.unwrap(), "{\"answer\": \"hi\"}");
    }

    #[tokio::test]
    async fn test_openai_chat_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let generator = OpenAIChatGenerator::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());

        assert!(matches!(
            generator.generate("hello").await,
            Err(GenerationError::RateLimited {
                retry_after_secs: Some(3)
            })
        ));
    }

    #[tokio::test]
    async fn test_openai_chat_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let generator = OpenAIChatGenerator::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());

        assert!(matches!(
            generator.generate("hello").await,
            Err(GenerationError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_openai_chat_requires_key() {
        let generator = OpenAIChatGenerator {
            api_key: None,
            ..OpenAIChatGenerator::new()
        };
        assert!(matches!(
            generator.generate("hello").await,
            Err(GenerationError::NotConfigured(_))
        ));
    }
}

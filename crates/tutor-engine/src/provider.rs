use std::collections::BTreeMap;
use std::fmt;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::payload::{ProviderContent, ProviderMessage, ProviderRole};

const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ProviderMessage>,
    pub max_output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    /// The provider rejected the request or could not be reached.
    Provider,
    /// Anything else: malformed or empty answers, local failures.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub provider: String,
    pub status: Option<u16>,
    pub message: String,
}

impl CompletionError {
    pub fn provider(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: CompletionErrorKind::Provider,
            provider: provider.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn unexpected(provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind: CompletionErrorKind::Unexpected,
            provider: provider.to_string(),
            status: None,
            message: message.into(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            CompletionErrorKind::Provider => "provider",
            CompletionErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CompletionErrorKind::Provider => {
                write!(f, "{} API error: ", provider_label(&self.provider))?;
                if let Some(status) = self.status {
                    write!(f, "({status}) ")?;
                }
                write!(f, "{}", self.message)
            }
            CompletionErrorKind::Unexpected => {
                write!(f, "An unexpected error occurred: {}", self.message)
            }
        }
    }
}

impl std::error::Error for CompletionError {}

fn provider_label(name: &str) -> &str {
    match name {
        "openai" => "OpenAI",
        "dryrun" => "Dryrun",
        other => other,
    }
}

/// A remote (or simulated) chat-completion backend.
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, CompletionError>;
}

#[derive(Default)]
pub struct CompletionProviderRegistry {
    providers: BTreeMap<String, Box<dyn CompletionProvider>>,
}

impl CompletionProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: CompletionProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn CompletionProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Registry with the offline provider, plus OpenAI when a config is present.
pub fn default_registry(config: Option<&ClientConfig>) -> anyhow::Result<CompletionProviderRegistry> {
    let mut registry = CompletionProviderRegistry::new();
    registry.register(DryrunProvider);
    if let Some(config) = config {
        registry.register(OpenAiChatProvider::new(config)?);
    }
    Ok(registry)
}

/// Answers locally without any network access.
pub struct DryrunProvider;

impl CompletionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == ProviderRole::User)
            .ok_or_else(|| CompletionError::unexpected(self.name(), "no user message to answer"))?;
        let images = last_user
            .parts()
            .iter()
            .filter(|part| part.image_url().is_some())
            .count();
        let problem = last_user
            .parts()
            .iter()
            .find_map(|part| part.as_text())
            .unwrap_or_default();

        let lines = [
            format!("1. Problem received: {problem}"),
            format!(
                "2. Context: {} message(s), {} image(s) attached.",
                request.messages.len(),
                images
            ),
            "3. Dryrun mode: no model was called.".to_string(),
        ];
        let text = lines.join("\n");
        Ok(CompletionResponse {
            output_tokens: Some(estimate_tokens(&text)),
            input_tokens: Some(
                request
                    .messages
                    .iter()
                    .map(|message| match &message.content {
                        ProviderContent::Text(text) => estimate_tokens(text),
                        ProviderContent::Parts(parts) => parts
                            .iter()
                            .filter_map(|part| part.as_text())
                            .map(estimate_tokens)
                            .sum::<i64>(),
                    })
                    .sum::<i64>(),
            ),
            text,
            model: request.model.clone(),
        })
    }
}

fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

/// Blocking client for `{api_base}/chat/completions`.
pub struct OpenAiChatProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiChatProvider {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

impl CompletionProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let payload = chat_completion_body(request);
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| CompletionError::provider(self.name(), None, err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CompletionError::provider(self.name(), None, err.to_string()))?;
        if !status.is_success() {
            return Err(CompletionError::provider(
                self.name(),
                Some(status.as_u16()),
                provider_error_message(&body),
            ));
        }
        parse_chat_completion(self.name(), &body, &request.model)
    }
}

pub(crate) fn chat_completion_body(request: &CompletionRequest) -> Value {
    json!({
        "model": request.model,
        "messages": request.messages,
        "max_tokens": request.max_output_tokens,
    })
}

pub(crate) fn parse_chat_completion(
    provider: &str,
    body: &str,
    requested_model: &str,
) -> Result<CompletionResponse, CompletionError> {
    let parsed: Value = serde_json::from_str(body).map_err(|err| {
        CompletionError::unexpected(provider, format!("invalid JSON payload: {err}"))
    })?;
    let text = parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(CompletionError::unexpected(
            provider,
            "the response contained no answer text",
        ));
    }
    Ok(CompletionResponse {
        text: text.to_string(),
        model: parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        input_tokens: parsed.pointer("/usage/prompt_tokens").and_then(Value::as_i64),
        output_tokens: parsed
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_i64),
    })
}

// Prefer the provider's `error.message`; otherwise a truncated raw body.
fn provider_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| truncate_text(body.trim(), ERROR_BODY_MAX_CHARS))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use tutor_contracts::conversation::ConversationStore;

    use super::*;
    use crate::payload::build_messages;

    fn request_for(store: &ConversationStore) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: build_messages(store.history()),
            max_output_tokens: 1000,
        }
    }

    #[test]
    fn body_carries_model_messages_and_token_cap() {
        let mut store = ConversationStore::new();
        store.append_user_text("2+2");
        let body = chat_completion_body(&request_for(&store));

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn parses_answer_and_usage() {
        let body = r#"{
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "  1. x = 2\n"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        }"#;
        let response = parse_chat_completion("openai", body, "gpt-4o-mini").unwrap();
        assert_eq!(response.text, "  1. x = 2\n");
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.input_tokens, Some(120));
        assert_eq!(response.output_tokens, Some(8));
    }

    #[test]
    fn empty_or_malformed_answers_are_unexpected_errors() {
        let empty = parse_chat_completion(
            "openai",
            r#"{"choices": [{"message": {"content": " \n "}}]}"#,
            "m",
        )
        .unwrap_err();
        assert_eq!(empty.kind, CompletionErrorKind::Unexpected);

        let garbage = parse_chat_completion("openai", "<html>", "m").unwrap_err();
        assert_eq!(garbage.kind, CompletionErrorKind::Unexpected);
        assert!(garbage.to_string().starts_with("An unexpected error occurred:"));
    }

    #[test]
    fn provider_errors_prefer_json_message() {
        assert_eq!(
            provider_error_message(r#"{"error": {"message": "Incorrect API key provided"}}"#),
            "Incorrect API key provided"
        );
        let long = "x".repeat(ERROR_BODY_MAX_CHARS + 10);
        assert_eq!(
            provider_error_message(&long).chars().count(),
            ERROR_BODY_MAX_CHARS + 1
        );

        let err = CompletionError::provider("openai", Some(401), "Incorrect API key provided");
        assert_eq!(
            err.to_string(),
            "OpenAI API error: (401) Incorrect API key provided"
        );
        assert_eq!(err.kind_str(), "provider");
    }

    #[test]
    fn dryrun_answers_the_latest_user_message() {
        let mut store = ConversationStore::new();
        store.append_user_text("solve x^2=4");
        let response = DryrunProvider.complete(&request_for(&store)).unwrap();

        assert!(response.text.starts_with("1. Problem received: Please provide"));
        assert!(response.text.contains("solve x^2=4"));
        assert!(response.text.contains("2 message(s), 0 image(s)"));
        assert_eq!(response.model, "gpt-4o-mini");
    }

    #[test]
    fn dryrun_requires_a_user_message() {
        let err = DryrunProvider
            .complete(&request_for(&ConversationStore::new()))
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Unexpected);
    }

    #[test]
    fn registry_lists_providers_by_name() -> anyhow::Result<()> {
        let offline = default_registry(None)?;
        assert_eq!(offline.names(), vec!["dryrun"]);
        assert!(offline.get("openai").is_none());

        let config = ClientConfig::from_lookup(|key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })?;
        let online = default_registry(Some(&config))?;
        assert_eq!(online.names(), vec!["dryrun", "openai"]);
        assert_eq!(online.get("openai").map(|p| p.name()), Some("openai"));
        Ok(())
    }
}

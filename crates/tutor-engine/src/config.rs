use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 1000;
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const API_KEY_VARS: &[&str] = &["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"];
const API_BASE_VARS: &[&str] = &["OPENAI_API_BASE", "OPENAI_BASE_URL"];

/// Model selection for each completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSettings {
    pub model: String,
    pub max_output_tokens: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// Connection settings for the chat-completions endpoint, read once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(api_key) = first_non_empty(&lookup, API_KEY_VARS) else {
            bail!(
                "OpenAI API key not found. Please set the 'OPENAI_API_KEY' environment variable."
            );
        };
        let api_base = normalize_api_base(
            first_non_empty(&lookup, API_BASE_VARS).as_deref().unwrap_or(DEFAULT_API_BASE),
        );
        Ok(Self {
            api_key,
            api_base,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

// A bare host ("https://proxy.local") gets the "/v1" path the endpoint expects.
fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "   ")]))
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("OPENAI_API_KEY"), "unexpected error: {err}");
    }

    #[test]
    fn backup_key_and_default_base_are_used() -> Result<()> {
        let config = ClientConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY_BACKUP", " sk-2 ")]))?;
        assert_eq!(config.api_key, "sk-2");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.timeout, DEFAULT_REQUEST_TIMEOUT);
        Ok(())
    }

    #[test]
    fn api_base_override_is_normalized() -> Result<()> {
        let bare = ClientConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("OPENAI_BASE_URL", "http://localhost:8080/"),
        ]))?;
        assert_eq!(bare.api_base, "http://localhost:8080/v1");

        let pathed = ClientConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("OPENAI_API_BASE", "https://proxy.example/openai/v1/"),
        ]))?;
        assert_eq!(pathed.api_base, "https://proxy.example/openai/v1");
        Ok(())
    }

    #[test]
    fn debug_output_hides_the_key() -> Result<()> {
        let config = ClientConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk-secret")]))?
            .with_timeout(Duration::from_secs(5));
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        Ok(())
    }
}

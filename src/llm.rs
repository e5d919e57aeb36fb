//! Language-model backend abstraction for feedback generation.
//!
//! [`LanguageModel`] mirrors the embedding boundary: a closed set of vendor
//! implementations selected once by [`create_model`], all speaking the
//! OpenAI-compatible chat-completions shape. Credentials come from the
//! [`Credentials`](crate::config::Credentials) value object and are checked
//! at construction.
//!
//! | Config value | Model | Endpoint |
//! |--------------|-------|----------|
//! | `"openai"` | `gpt-4.1` | `api.openai.com` |
//! | `"deepseek"` | `deepseek-reasoner` | `api.deepseek.com` |
//! | `"gitee"` | `Qwen3-235B-A22B` | `ai.gitee.com` |
//!
//! Generation calls carry a bounded timeout (minutes, given upstream
//! latency variance) and the same 429/5xx backoff as the embedding layer.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::{Credentials, LlmConfig};

/// One turn of a chat-completions conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Capability boundary for chat-completion backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Generate a completion for the given conversation, returning the
    /// raw response text. The whole call fails or succeeds; there is no
    /// partial output.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Resolve the configured LLM provider tag to a concrete backend.
///
/// Unknown tags and missing API keys fail here, at construction.
pub fn create_model(config: &LlmConfig, credentials: &Credentials) -> Result<Box<dyn LanguageModel>> {
    let backend = match config.provider.as_str() {
        "openai" => ChatCompletionsModel::new(
            config,
            credentials.openai_api_key.as_deref(),
            "OPENAI_API_KEY",
            "gpt-4.1",
            "https://api.openai.com/v1/chat/completions",
        )?,
        "deepseek" => ChatCompletionsModel::new(
            config,
            credentials.deepseek_api_key.as_deref(),
            "DEEPSEEK_API_KEY",
            "deepseek-reasoner",
            "https://api.deepseek.com/v1/chat/completions",
        )?,
        "gitee" => ChatCompletionsModel::new(
            config,
            credentials.gitee_api_key.as_deref(),
            "GITEE_API_KEY",
            "Qwen3-235B-A22B",
            "https://ai.gitee.com/api/v1/chat/completions",
        )?,
        other => bail!("Unknown LLM provider: {}", other),
    };
    Ok(Box::new(backend))
}

/// Shared backend for every OpenAI-compatible chat-completions vendor.
pub struct ChatCompletionsModel {
    model: String,
    api_key: String,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
}

impl ChatCompletionsModel {
    const TEMPERATURE: f64 = 0.2;

    fn new(
        config: &LlmConfig,
        api_key: Option<&str>,
        key_name: &str,
        default_model: &str,
        default_endpoint: &str,
    ) -> Result<Self> {
        let api_key = api_key
            .map(str::to_string)
            .with_context(|| format!("{} not set (required by the {} LLM provider)", key_name, config.provider))?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            api_key,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_endpoint.to_string()),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": Self::TEMPERATURE,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Chat API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_fails_at_construction() {
        let config = LlmConfig {
            provider: "foo".to_string(),
            ..LlmConfig::default()
        };
        let err = create_model(&config, &Credentials::default()).unwrap_err();
        assert!(err.to_string().contains("Unknown LLM provider"));
    }

    #[test]
    fn test_missing_credential_fails_at_construction() {
        let config = LlmConfig {
            provider: "deepseek".to_string(),
            ..LlmConfig::default()
        };
        let err = create_model(&config, &Credentials::default()).unwrap_err();
        assert!(err.to_string().contains("DEEPSEEK_API_KEY"));
    }

    #[test]
    fn test_default_models_per_vendor() {
        let credentials = Credentials {
            openai_api_key: Some("k".to_string()),
            gitee_api_key: Some("k".to_string()),
            deepseek_api_key: Some("k".to_string()),
        };
        for (provider, model) in [
            ("openai", "gpt-4.1"),
            ("deepseek", "deepseek-reasoner"),
            ("gitee", "Qwen3-235B-A22B"),
        ] {
            let config = LlmConfig {
                provider: provider.to_string(),
                ..LlmConfig::default()
            };
            let backend = create_model(&config, &credentials).unwrap();
            assert_eq!(backend.model_name(), model);
        }
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "hello");
    }

    #[test]
    fn test_parse_chat_response_malformed() {
        let err = parse_chat_response(&serde_json::json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("missing choices"));
    }
}

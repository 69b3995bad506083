// src/provider/openai_compat.rs — Generic OpenAI-compatible back-end
//
// Works with any `/chat/completions` endpoint: OpenAI, DeepSeek, Groq,
// OpenRouter, and local servers such as Ollama (`http://localhost:11434/v1`).

use async_trait::async_trait;
use std::time::Duration;

use super::{ExecuteOptions, ModelProvider, ProviderConfig};
use crate::infra::errors::{DraftloomError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAICompatProvider {
    id: String,
    api_key: String,
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        id: impl Into<String>,
        api_key: String,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            id: id.into(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build a back-end from a registry config (first model is the default).
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.api_key.clone(),
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            config.models.first().cloned().unwrap_or_default(),
        )
    }

    fn request_body(&self, prompt: &str, options: &ExecuteOptions) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let mut body = serde_json::json!({
            "model": options.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = options.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

/// Pull the first choice's text out of a chat-completions response.
pub(crate) fn extract_content(resp: &serde_json::Value) -> Option<String> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, prompt: &str, options: &ExecuteOptions) -> Result<String> {
        let body = self.request_body(prompt, options);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                format!("draftloom/{}", env!("CARGO_PKG_VERSION")),
            )
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| DraftloomError::Provider {
                provider: self.id.clone(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(DraftloomError::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {status}: {error_body}"),
                retriable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| {
            DraftloomError::provider(&self.id, format!("Failed to parse response: {e}"))
        })?;

        extract_content(&resp)
            .ok_or_else(|| DraftloomError::provider(&self.id, "Response had no message content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAICompatProvider {
        OpenAICompatProvider::new("deepseek", "k".into(), "https://api.example.com/v1/", "chat")
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider().base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_request_body_defaults_model() {
        let body = provider().request_body("hi", &ExecuteOptions::default());
        assert_eq!(body["model"], "chat");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_request_body_with_system_and_options() {
        let opts = ExecuteOptions {
            model: Some("reasoner".into()),
            system: Some("be brief".into()),
            temperature: Some(0.5),
            max_tokens: Some(100),
        };
        let body = provider().request_body("hi", &opts);
        assert_eq!(body["model"], "reasoner");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn test_extract_content() {
        let resp = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(extract_content(&resp).as_deref(), Some("hello"));
        assert!(extract_content(&serde_json::json!({"choices": []})).is_none());
    }

    #[test]
    fn test_from_config_uses_first_model_and_default_url() {
        let cfg = ProviderConfig::new("openai", "k").with_models(["gpt-4.1", "gpt-4.1-mini"]);
        let p = OpenAICompatProvider::from_config(&cfg);
        assert_eq!(p.default_model, "gpt-4.1");
        assert_eq!(p.base_url, DEFAULT_BASE_URL);
    }
}

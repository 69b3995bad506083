// src/provider/mod.rs — Model provider layer

pub mod mock;
pub mod openai_compat;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::infra::errors::{DraftloomError, Result};

/// Core trait that all model back-ends implement: send a prompt, get text back.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, prompt: &str, options: &ExecuteOptions) -> Result<String>;
}

/// Per-call knobs. Back-ends ignore what they do not support.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ExecuteOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = if system.is_empty() { None } else { Some(system) };
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Registration record for a provider. The credential is opaque: it is
/// redacted from `Debug` output and never serialized.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub const MAX_PRIORITY: u8 = 100;

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            models: Vec::new(),
            priority: 50,
            base_url: None,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Schema checks applied at registration. Priority is clamped, not rejected.
    pub(crate) fn normalized(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(DraftloomError::Validation(
                "provider name must not be empty".into(),
            ));
        }
        if self.api_key.is_empty() {
            return Err(DraftloomError::Validation(format!(
                "provider '{}' requires a non-empty api key",
                self.name
            )));
        }
        self.priority = self.priority.min(MAX_PRIORITY);
        Ok(self)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("models", &self.models)
            .field("priority", &self.priority)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Reference to a specific model on a specific provider.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse "provider/model" format
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── ProviderConfig ─────────────────────────────────────────

    #[test]
    fn test_debug_redacts_api_key() {
        let cfg = ProviderConfig::new("openai", "sk-secret-123");
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("sk-secret-123"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_serialize_skips_api_key() {
        let cfg = ProviderConfig::new("openai", "sk-secret-123").with_models(["gpt-4.1"]);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("gpt-4.1"));
    }

    #[test]
    fn test_normalized_clamps_priority() {
        let cfg = ProviderConfig::new("a", "k").with_priority(250);
        assert_eq!(cfg.normalized().unwrap().priority, 100);
    }

    #[test]
    fn test_normalized_requires_api_key() {
        let cfg = ProviderConfig::new("a", "");
        assert!(matches!(
            cfg.normalized(),
            Err(DraftloomError::Validation(_))
        ));
    }

    #[test]
    fn test_normalized_requires_name() {
        assert!(ProviderConfig::new("  ", "k").normalized().is_err());
    }

    // ─── ModelRef ───────────────────────────────────────────────

    #[test]
    fn test_model_ref_parse() {
        let r = ModelRef::parse("deepseek/deepseek-chat").unwrap();
        assert_eq!(r.provider, "deepseek");
        assert_eq!(r.model, "deepseek-chat");
    }

    #[test]
    fn test_model_ref_parse_rejects_malformed() {
        assert!(ModelRef::parse("no-slash").is_none());
        assert!(ModelRef::parse("/model").is_none());
        assert!(ModelRef::parse("provider/").is_none());
    }

    #[test]
    fn test_model_ref_display() {
        assert_eq!(ModelRef::new("openai", "gpt-4.1").to_string(), "openai/gpt-4.1");
    }

    // ─── ExecuteOptions ─────────────────────────────────────────

    #[test]
    fn test_execute_options_empty_system_is_none() {
        let opts = ExecuteOptions::for_model("m").with_system("");
        assert!(opts.system.is_none());
        assert_eq!(opts.model.as_deref(), Some("m"));
    }
}

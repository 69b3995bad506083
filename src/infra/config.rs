// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::types::{LoopPolicy, PipelineConfig};
use crate::infra::errors::{DraftloomError, Result};
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "loop")]
    pub feedback_loop: LoopConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_rounds: u8,
    pub min_score: f64,
    #[serde(default)]
    pub soft_threshold: Option<f64>,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            min_score: 0.85,
            soft_threshold: None,
            history_window: default_history_window(),
        }
    }
}

fn default_history_window() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_modules: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_modules: 128,
            ttl_seconds: 3600,
        }
    }
}

/// `[pipeline]` — rounds and score fall back to `[loop]` when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_true")]
    pub break_on_error: bool,
    #[serde(default)]
    pub max_rounds: Option<u8>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            break_on_error: true,
            max_rounds: None,
            min_score: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A `[[providers]]` entry. The key itself is read from `api_key_env` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_priority() -> u8 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self> {
        match paths::config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DraftloomError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.loop_policy()?;
        self.pipeline_config()?;
        if self.cache.max_modules == 0 {
            return Err(DraftloomError::Validation(
                "cache.max_modules must be at least 1".into(),
            ));
        }
        for agent in &self.agents {
            if !self.providers.iter().any(|p| p.name == agent.provider) {
                return Err(DraftloomError::Config(format!(
                    "agent '{}' references unknown provider '{}'",
                    agent.id, agent.provider
                )));
            }
        }
        Ok(())
    }

    pub fn loop_policy(&self) -> Result<LoopPolicy> {
        let section = &self.feedback_loop;
        Ok(LoopPolicy::new(section.max_rounds, section.min_score)?
            .with_soft_threshold(section.soft_threshold)?
            .with_history_window(section.history_window))
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let policy = LoopPolicy::new(
            self.pipeline
                .max_rounds
                .unwrap_or(self.feedback_loop.max_rounds),
            self.pipeline
                .min_score
                .unwrap_or(self.feedback_loop.min_score),
        )?;
        Ok(PipelineConfig {
            max_rounds: policy.max_rounds,
            min_score: policy.min_score,
            break_on_error: self.pipeline.break_on_error,
            model_assignments: Default::default(),
        })
    }
}

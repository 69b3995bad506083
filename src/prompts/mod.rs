// src/prompts/mod.rs — Prompt modules, rendering, and the render cache

pub mod cache;
pub mod manager;
pub mod template;

use serde::{Deserialize, Serialize};

use crate::infra::errors::{DraftloomError, Result};

/// Values a template is rendered against. Only string values substitute.
pub type Context = serde_json::Map<String, serde_json::Value>;

pub const MAX_TURNS_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopCriteria {
    /// Output containing this keyword short-circuits a pipeline. Empty disables it.
    #[serde(default)]
    pub keyword: String,
    pub max_turns: u32,
}

impl Default for StopCriteria {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            max_turns: 3,
        }
    }
}

impl StopCriteria {
    pub fn matches(&self, output: &str) -> bool {
        !self.keyword.is_empty() && output.contains(&self.keyword)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptModule {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub system_prompt: String,
    pub user_template: String,
    #[serde(default)]
    pub stop_criteria: StopCriteria,
}

impl PromptModule {
    pub fn new(id: impl Into<String>, user_template: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            system_prompt: String::new(),
            user_template: user_template.into(),
            stop_criteria: StopCriteria::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_stop_criteria(mut self, keyword: impl Into<String>, max_turns: u32) -> Self {
        self.stop_criteria = StopCriteria {
            keyword: keyword.into(),
            max_turns,
        };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DraftloomError::Validation(
                "module id must not be empty".into(),
            ));
        }
        let turns = self.stop_criteria.max_turns;
        if !(1..=MAX_TURNS_LIMIT).contains(&turns) {
            return Err(DraftloomError::Validation(format!(
                "module '{}': stopCriteria.maxTurns must be within [1, {MAX_TURNS_LIMIT}], got {turns}",
                self.id
            )));
        }
        Ok(())
    }
}

/// A module's templates after substitution. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPrompt {
    pub module_id: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub stop_criteria: StopCriteria,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_deserializes_camel_case() {
        let json = r#"{
            "id": "summarize",
            "title": "Summarize",
            "systemPrompt": "You summarize.",
            "userTemplate": "Summarize: {{text}}",
            "stopCriteria": {"keyword": "DONE", "maxTurns": 3}
        }"#;
        let module: PromptModule = serde_json::from_str(json).unwrap();
        assert_eq!(module.id, "summarize");
        assert_eq!(module.stop_criteria.keyword, "DONE");
        assert_eq!(module.stop_criteria.max_turns, 3);
        assert!(module.validate().is_ok());
    }

    #[test]
    fn test_validate_max_turns_bounds() {
        let ok = PromptModule::new("m", "x").with_stop_criteria("", 10);
        assert!(ok.validate().is_ok());
        let zero = PromptModule::new("m", "x").with_stop_criteria("", 0);
        assert!(zero.validate().is_err());
        let eleven = PromptModule::new("m", "x").with_stop_criteria("", 11);
        assert!(eleven.validate().is_err());
    }

    #[test]
    fn test_validate_empty_id() {
        assert!(PromptModule::new("", "x").validate().is_err());
    }

    #[test]
    fn test_stop_criteria_empty_keyword_never_matches() {
        let sc = StopCriteria::default();
        assert!(!sc.matches("anything at all"));
        let sc = StopCriteria {
            keyword: "DONE".into(),
            max_turns: 1,
        };
        assert!(sc.matches("we are DONE here"));
        assert!(!sc.matches("done"));
    }
}

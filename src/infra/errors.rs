// src/infra/errors.rs — Error types for draftloom

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DraftloomError {
    // Lookups
    #[error("Provider '{name}' not found")]
    ProviderNotFound { name: String },

    #[error("Module not found: {id}")]
    ModuleNotFound { id: String },

    // Schema / policy bounds
    #[error("Validation error: {0}")]
    Validation(String),

    // Escalated partial failures
    #[error("No drafts provided for integration")]
    NoDraftsProvided,

    // Per-agent, recoverable
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Critic '{critic}' returned an unusable rubric: {message}")]
    CriticParse { critic: String, message: String },

    #[error("Pipeline module '{module_id}' failed: {message}")]
    PipelineModule { module_id: String, message: String },

    #[error("A feedback loop is already running on this instance")]
    LoopBusy,

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DraftloomError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DraftloomError::Provider {
                retriable: true,
                ..
            }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DraftloomError::ProviderNotFound { .. } | DraftloomError::ModuleNotFound { .. }
        )
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DraftloomError::Provider {
            provider: provider.into(),
            message: message.into(),
            retriable: false,
        }
    }
}

pub type Result<T, E = DraftloomError> = std::result::Result<T, E>;

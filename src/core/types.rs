// src/core/types.rs — Core domain types

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evaluator::CriticFeedback;
use crate::infra::errors::{DraftloomError, Result};
use crate::prompts::{Context, PromptModule};
use crate::provider::ModelRef;

pub const MAX_ROUNDS_LIMIT: u8 = 8;
pub const DEFAULT_HISTORY_WINDOW: usize = 3;

/// One agent's raw output for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub round: u8,
    pub agent_id: String,
    pub provider_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Draft {
    pub fn new(
        round: u8,
        agent_id: impl Into<String>,
        provider_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            id: format!("draft-{round}-{agent_id}"),
            round,
            agent_id,
            provider_id: provider_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-execution loop bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPolicy {
    #[serde(alias = "maxRounds")]
    pub max_rounds: u8,
    #[serde(alias = "minScore")]
    pub min_score: f64,
    /// Secondary acceptance bar, applied only without blocking feedback.
    #[serde(default, alias = "softThreshold")]
    pub soft_threshold: Option<f64>,
    #[serde(default = "default_history_window", alias = "historyWindow")]
    pub history_window: usize,
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            min_score: 0.85,
            soft_threshold: None,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl LoopPolicy {
    pub fn new(max_rounds: u8, min_score: f64) -> Result<Self> {
        let policy = Self {
            max_rounds,
            min_score,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_soft_threshold(mut self, soft_threshold: Option<f64>) -> Result<Self> {
        self.soft_threshold = soft_threshold;
        self.validate()?;
        Ok(self)
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ROUNDS_LIMIT).contains(&self.max_rounds) {
            return Err(DraftloomError::Validation(format!(
                "max_rounds must be within [1, {MAX_ROUNDS_LIMIT}], got {}",
                self.max_rounds
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(DraftloomError::Validation(format!(
                "min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        if let Some(soft) = self.soft_threshold {
            if !(0.0..=1.0).contains(&soft) {
                return Err(DraftloomError::Validation(format!(
                    "soft_threshold must be within [0, 1], got {soft}"
                )));
            }
        }
        Ok(())
    }

    /// The same policy with at most `max_turns` rounds.
    pub fn capped(&self, max_turns: u32) -> Self {
        let cap = u8::try_from(max_turns).unwrap_or(u8::MAX).max(1);
        Self {
            max_rounds: self.max_rounds.min(cap),
            ..self.clone()
        }
    }
}

/// Provider routing for one pipeline module. Deserializes from a bare
/// provider name or from `{provider_id, model_id?, custom_prompt?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AssignmentRepr")]
pub struct ModelAssignment {
    pub provider_id: String,
    pub model_id: Option<String>,
    pub custom_prompt: Option<String>,
}

impl ModelAssignment {
    pub fn provider(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: None,
            custom_prompt: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssignmentRepr {
    Provider(String),
    Full {
        #[serde(alias = "providerId")]
        provider_id: String,
        #[serde(default, alias = "modelId")]
        model_id: Option<String>,
        #[serde(default, alias = "customPrompt")]
        custom_prompt: Option<String>,
    },
}

impl From<AssignmentRepr> for ModelAssignment {
    fn from(repr: AssignmentRepr) -> Self {
        match repr {
            AssignmentRepr::Provider(provider_id) => Self::provider(provider_id),
            AssignmentRepr::Full {
                provider_id,
                model_id,
                custom_prompt,
            } => Self {
                provider_id,
                model_id,
                custom_prompt,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_rounds", alias = "maxRounds")]
    pub max_rounds: u8,
    #[serde(default = "default_pipeline_min_score", alias = "minScore")]
    pub min_score: f64,
    #[serde(default = "default_true", alias = "breakOnError")]
    pub break_on_error: bool,
    /// Module id to provider routing.
    #[serde(default, alias = "modelAssignments")]
    pub model_assignments: HashMap<String, ModelAssignment>,
}

fn default_pipeline_rounds() -> u8 {
    4
}

fn default_pipeline_min_score() -> f64 {
    0.85
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_pipeline_rounds(),
            min_score: default_pipeline_min_score(),
            break_on_error: true,
            model_assignments: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn assign(mut self, module_id: impl Into<String>, assignment: ModelAssignment) -> Self {
        self.model_assignments.insert(module_id.into(), assignment);
        self
    }

    pub fn loop_policy(&self) -> Result<LoopPolicy> {
        LoopPolicy::new(self.max_rounds, self.min_score)
    }
}

/// Pipeline settings supplied with a request. Fields left unset fall back
/// to the orchestrator's defaults; a given assignment map replaces the
/// default map whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOverrides {
    #[serde(default, alias = "maxRounds")]
    pub max_rounds: Option<u8>,
    #[serde(default, alias = "minScore")]
    pub min_score: Option<f64>,
    #[serde(default, alias = "breakOnError")]
    pub break_on_error: Option<bool>,
    #[serde(default, alias = "modelAssignments")]
    pub model_assignments: Option<HashMap<String, ModelAssignment>>,
}

impl PipelineOverrides {
    pub fn apply(self, defaults: &PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            max_rounds: self.max_rounds.unwrap_or(defaults.max_rounds),
            min_score: self.min_score.unwrap_or(defaults.min_score),
            break_on_error: self.break_on_error.unwrap_or(defaults.break_on_error),
            model_assignments: self
                .model_assignments
                .unwrap_or_else(|| defaults.model_assignments.clone()),
        }
    }
}

impl From<PipelineConfig> for PipelineOverrides {
    fn from(config: PipelineConfig) -> Self {
        Self {
            max_rounds: Some(config.max_rounds),
            min_score: Some(config.min_score),
            break_on_error: Some(config.break_on_error),
            model_assignments: Some(config.model_assignments),
        }
    }
}

/// Why a loop ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    QualityReached { score: f64 },
    SoftThreshold { score: f64 },
    Blocked { issues: Vec<String> },
    RoundBudgetExhausted { rounds: u8 },
    NoDrafts { round: u8 },
    AllCriticsFailed { round: u8 },
    Cancelled,
}

impl StopReason {
    /// The output met the acceptance bar.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StopReason::QualityReached { .. } | StopReason::SoftThreshold { .. }
        )
    }

    /// No usable data survived, or the run was cancelled.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::NoDrafts { .. } | StopReason::AllCriticsFailed { .. } | StopReason::Cancelled
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::QualityReached { score } => {
                write!(f, "average score {score:.2} reached the minimum")
            }
            StopReason::SoftThreshold { score } => write!(
                f,
                "no blocking feedback and average score {score:.2} is above the soft threshold"
            ),
            StopReason::Blocked { issues } if issues.is_empty() => {
                write!(f, "blocked by critic feedback")
            }
            StopReason::Blocked { issues } => {
                write!(f, "blocked by critic feedback: {}", issues.join("; "))
            }
            StopReason::RoundBudgetExhausted { rounds } => {
                write!(f, "round budget exhausted after {rounds} rounds")
            }
            StopReason::NoDrafts { round } => write!(f, "no drafts collected in round {round}"),
            StopReason::AllCriticsFailed { round } => {
                write!(f, "every critic failed in round {round}")
            }
            StopReason::Cancelled => write!(f, "stopped by request"),
        }
    }
}

/// Single-module execution request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(alias = "promptModuleId")]
    pub prompt_module_id: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default, alias = "loopPolicy")]
    pub loop_policy: Option<LoopPolicy>,
    /// Route to a specific provider instead of the registry's best pick.
    #[serde(default)]
    pub assignment: Option<ModelAssignment>,
}

impl TaskRequest {
    pub fn new(prompt_module_id: impl Into<String>, context: Context) -> Self {
        Self {
            prompt_module_id: prompt_module_id.into(),
            context,
            loop_policy: None,
            assignment: None,
        }
    }

    pub fn with_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = Some(policy);
        self
    }

    pub fn with_assignment(mut self, assignment: ModelAssignment) -> Self {
        self.assignment = Some(assignment);
        self
    }
}

/// Terminal record of one single-module run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub module_id: String,
    pub final_output: String,
    pub feedback: Option<CriticFeedback>,
    pub round: u8,
    pub complete: bool,
    pub stop_reason: StopReason,
    pub provider: Option<ModelRef>,
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub modules: Vec<PromptModule>,
    #[serde(default, alias = "initialContext")]
    pub initial_context: Context,
    #[serde(default, alias = "pipelineConfig")]
    pub pipeline_config: Option<PipelineOverrides>,
}

impl PipelineRequest {
    pub fn new(modules: Vec<PromptModule>, initial_context: Context) -> Self {
        Self {
            modules,
            initial_context,
            pipeline_config: None,
        }
    }

    /// Run with exactly `config`, ignoring the orchestrator's defaults.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config.into());
        self
    }

    pub fn with_overrides(mut self, overrides: PipelineOverrides) -> Self {
        self.pipeline_config = Some(overrides);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleExecutionRecord {
    pub module_id: String,
    pub provider_id: String,
    pub model: Option<String>,
    pub input: Context,
    pub output: Context,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub rounds: u8,
    pub score: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Correlates the run's log lines.
    pub run_id: Uuid,
    /// Context after the last module ran.
    pub final_output: Context,
    pub execution_history: Vec<ModuleExecutionRecord>,
    /// False only when a failure aborted the pipeline.
    pub success: bool,
    pub error: Option<String>,
    /// Module whose stop keyword ended the pipeline early.
    pub stopped_by: Option<String>,
}

impl PipelineResult {
    pub fn failures(&self) -> impl Iterator<Item = &ModuleExecutionRecord> {
        self.execution_history.iter().filter(|r| !r.success)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    #[default]
    Idle,
    CollectingDrafts,
    Integrating,
    CollectingFeedback,
    Evaluating,
    Complete,
    Stopped,
}

impl LoopStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopStatus::Complete | LoopStatus::Stopped)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != LoopStatus::Idle
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopStatus::Idle => "idle",
            LoopStatus::CollectingDrafts => "collecting_drafts",
            LoopStatus::Integrating => "integrating",
            LoopStatus::CollectingFeedback => "collecting_feedback",
            LoopStatus::Evaluating => "evaluating",
            LoopStatus::Complete => "complete",
            LoopStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Full live-loop state, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub goal: String,
    pub round: u8,
    pub status: LoopStatus,
    /// Drafts of every round so far, tagged with their round.
    pub drafts: Vec<Draft>,
    /// Current round's feedback keyed by critic id.
    pub feedback: BTreeMap<String, CriticFeedback>,
    pub integrated_draft: Option<String>,
    pub best_score: Option<f64>,
    pub best_draft: Option<String>,
    pub history: Vec<String>,
    pub final_output: Option<String>,
    pub stop_reason: Option<StopReason>,
}

impl LoopSnapshot {
    pub fn current_drafts(&self) -> impl Iterator<Item = &Draft> {
        self.drafts.iter().filter(move |d| d.round == self.round)
    }

    pub fn complete(&self) -> bool {
        self.stop_reason.as_ref().is_some_and(StopReason::is_success)
    }
}

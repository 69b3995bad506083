// src/evaluator/mod.rs — Critic feedback, scoring strategies, and critics

pub mod parser;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::infra::errors::{DraftloomError, Result};
use crate::provider::{ExecuteOptions, ModelProvider};
use crate::util::excerpt;

/// One critic's verdict on an integrated draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticFeedback {
    /// Always within [0, 1].
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    pub blocking: bool,
    #[serde(default)]
    pub critic_id: String,
}

impl CriticFeedback {
    pub fn new(score: f64) -> Self {
        Self {
            score: clamp_score(score),
            rationale: String::new(),
            suggestions: Vec::new(),
            blocking_issues: Vec::new(),
            blocking: false,
            critic_id: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Any blocking issue makes the feedback blocking.
    pub fn with_blocking_issue(mut self, issue: impl Into<String>) -> Self {
        self.blocking_issues.push(issue.into());
        self.blocking = true;
        self
    }

    pub fn with_critic_id(mut self, id: impl Into<String>) -> Self {
        self.critic_id = id.into();
        self
    }

    /// Fold several verdicts into one: mean score, notes concatenated in
    /// order, blocking if any input blocks.
    pub fn combine(feedback: &[CriticFeedback]) -> Option<Self> {
        match feedback {
            [] => None,
            [only] => Some(only.clone()),
            many => Some(Self {
                score: clamp_score(
                    many.iter().map(|f| f.score).sum::<f64>() / many.len() as f64,
                ),
                rationale: many
                    .iter()
                    .map(|f| f.rationale.as_str())
                    .filter(|r| !r.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
                suggestions: many.iter().flat_map(|f| f.suggestions.clone()).collect(),
                blocking_issues: many
                    .iter()
                    .flat_map(|f| f.blocking_issues.clone())
                    .collect(),
                blocking: many.iter().any(|f| f.blocking),
                critic_id: many
                    .iter()
                    .map(|f| f.critic_id.as_str())
                    .collect::<Vec<_>>()
                    .join("+"),
            }),
        }
    }

    pub fn suggestions_text(&self) -> String {
        self.suggestions.join("\n")
    }

    /// Restore the invariants a strategy may have violated.
    fn normalized(mut self) -> Self {
        self.score = clamp_score(self.score);
        self.blocking |= !self.blocking_issues.is_empty();
        self
    }
}

/// Clamp into [0, 1]; NaN maps to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Synchronous scoring strategy behind `CriticEvaluator`.
pub trait Scorer: Send + Sync {
    fn assess(&self, output: &str) -> CriticFeedback;
}

/// Deterministic text heuristics: length against a target, structure,
/// a finished last sentence, and line-level repetition.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    pub target_chars: usize,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self { target_chars: 400 }
    }
}

impl Scorer for HeuristicScorer {
    fn assess(&self, output: &str) -> CriticFeedback {
        let text = output.trim();
        if text.is_empty() {
            return CriticFeedback::new(0.0)
                .with_rationale("empty output")
                .with_blocking_issue("output is empty");
        }

        let mut feedback = CriticFeedback::new(0.0);
        let chars = text.chars().count();
        let length = (chars as f64 / self.target_chars.max(1) as f64).min(1.0);
        if length < 0.5 {
            feedback = feedback.with_suggestion("Expand the answer with more detail.");
        }

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let structure = match lines.len() {
            0 | 1 => 0.0,
            2 => 0.5,
            _ => 1.0,
        };
        if structure < 1.0 {
            feedback = feedback.with_suggestion("Break the answer into sections or steps.");
        }

        let finished = text.ends_with(['.', '!', '?', '。', '！', '？', '`', ')']);
        if !finished {
            feedback = feedback.with_suggestion("Finish the last sentence.");
        }

        let mut unique = lines.clone();
        unique.sort_unstable();
        unique.dedup();
        let variety = unique.len() as f64 / lines.len().max(1) as f64;
        if variety < 0.8 {
            feedback = feedback.with_suggestion("Remove repeated lines.");
        }

        let score = 0.5 * length
            + 0.2 * structure
            + 0.15 * if finished { 1.0 } else { 0.0 }
            + 0.15 * variety;
        feedback.score = clamp_score(score);
        feedback.rationale = format!(
            "length {length:.2}, structure {structure:.2}, variety {variety:.2}, finished {finished}"
        );
        feedback
    }
}

/// Returns the same verdict for every output.
#[derive(Debug, Clone)]
pub struct FixedScorer {
    feedback: CriticFeedback,
}

impl FixedScorer {
    pub fn new(score: f64) -> Self {
        Self {
            feedback: CriticFeedback::new(score),
        }
    }

    pub fn from_feedback(feedback: CriticFeedback) -> Self {
        Self { feedback }
    }
}

impl Scorer for FixedScorer {
    fn assess(&self, _output: &str) -> CriticFeedback {
        self.feedback.clone()
    }
}

/// Pure evaluator: the scoring strategy is injected, the score range and
/// blocking flag are enforced here regardless of the strategy.
#[derive(Clone)]
pub struct CriticEvaluator {
    id: String,
    scorer: Arc<dyn Scorer>,
}

impl Default for CriticEvaluator {
    fn default() -> Self {
        Self::new(HeuristicScorer::default())
    }
}

impl CriticEvaluator {
    pub fn new(scorer: impl Scorer + 'static) -> Self {
        Self {
            id: "evaluator".into(),
            scorer: Arc::new(scorer),
        }
    }

    pub fn fixed(score: f64) -> Self {
        Self::new(FixedScorer::new(score))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn evaluate(&self, output: &str) -> CriticFeedback {
        let mut feedback = self.scorer.assess(output).normalized();
        if feedback.critic_id.is_empty() {
            feedback.critic_id = self.id.clone();
        }
        feedback
    }
}

/// Async critique seam used by the feedback loop and the orchestrator.
#[async_trait]
pub trait Critic: Send + Sync {
    fn id(&self) -> &str;

    async fn critique(&self, goal: &str, draft: &str) -> Result<CriticFeedback>;
}

#[async_trait]
impl Critic for CriticEvaluator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn critique(&self, _goal: &str, draft: &str) -> Result<CriticFeedback> {
        Ok(self.evaluate(draft))
    }
}

const RUBRIC_SYSTEM: &str = "You are a strict reviewer. Reply with a single JSON object and nothing else.";

/// Asks a model back-end for a JSON rubric and parses the reply.
pub struct ProviderCritic {
    id: String,
    provider: Arc<dyn ModelProvider>,
    options: ExecuteOptions,
}

impl ProviderCritic {
    pub fn new(id: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: id.into(),
            provider,
            options: ExecuteOptions::default().with_system(RUBRIC_SYSTEM),
        }
    }

    /// Model and temperature come from `options`; the rubric system prompt is kept.
    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = ExecuteOptions {
            system: self.options.system.take(),
            ..options
        };
        self
    }

    pub fn rubric_prompt(goal: &str, draft: &str) -> String {
        format!(
            "# Task\n{goal}\n\n# Draft\n{draft}\n\n# Instructions\n\
             Evaluate the draft against the task and reply with JSON:\n\
             {{\"score\": <number 0-1>, \"rationale\": \"<why>\", \
             \"suggestions\": [\"<improvement>\"], \"blocking_issues\": [\"<critical problem>\"], \
             \"blocking\": <true if the draft must not be accepted>}}"
        )
    }
}

#[async_trait]
impl Critic for ProviderCritic {
    fn id(&self) -> &str {
        &self.id
    }

    async fn critique(&self, goal: &str, draft: &str) -> Result<CriticFeedback> {
        let prompt = Self::rubric_prompt(goal, draft);
        let response = self.provider.execute(&prompt, &self.options).await?;

        let rubric = parser::parse_rubric(&response).map_err(|e| {
            tracing::debug!(
                critic = %self.id,
                response = %excerpt(&response, 200),
                "Unparseable rubric"
            );
            DraftloomError::CriticParse {
                critic: self.id.clone(),
                message: format!("{e:#}"),
            }
        })?;

        Ok(CriticFeedback {
            score: rubric.score,
            rationale: rubric.rationale,
            suggestions: rubric.suggestions,
            blocking_issues: rubric.blocking_issues,
            blocking: rubric.blocking,
            critic_id: self.id.clone(),
        }
        .normalized())
    }
}

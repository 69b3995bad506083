// src/core/feedback_loop.rs — Live multi-agent draft/integrate/critique loop
//
// idle -> collecting_drafts -> integrating -> collecting_feedback -> evaluating
//      -> {collecting_drafts | complete | stopped}
//
// Every transition publishes a full snapshot on a broadcast channel. A stop
// request is honored at the next transition: results of the step in flight
// are discarded and the loop moves to `stopped`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::sync::broadcast;

use super::history::compress_history;
use super::policy::{average_score, decide, Verdict};
use super::types::{Draft, LoopPolicy, LoopSnapshot, LoopStatus, StopReason};
use crate::evaluator::{Critic, CriticFeedback, ProviderCritic};
use crate::infra::errors::{DraftloomError, Result};
use crate::integrator::{DraftIntegrator, IntegratorInput};
use crate::provider::{ExecuteOptions, ModelProvider};
use crate::util::excerpt;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;
const HISTORY_EXCERPT: usize = 50;

/// A drafting participant bound to a model back-end.
#[derive(Clone)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub provider: Arc<dyn ModelProvider>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl Agent {
    pub fn new(id: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider,
            model: None,
            temperature: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn options(&self) -> ExecuteOptions {
        ExecuteOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider.id())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Cloneable stop switch for a running loop.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clears the stop request and the running flag when a run ends.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    stop: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct FeedbackLoop {
    agents: Vec<Agent>,
    critics: Vec<Arc<dyn Critic>>,
    integrator: DraftIntegrator,
    policy: LoopPolicy,
    state: Mutex<LoopSnapshot>,
    events: broadcast::Sender<LoopSnapshot>,
    stop: Arc<AtomicBool>,
    running: AtomicBool,
}

impl FeedbackLoop {
    /// Each agent also critiques through its own back-end unless
    /// `with_critics` overrides that.
    pub fn new(agents: Vec<Agent>, policy: LoopPolicy) -> Self {
        let critics = agents
            .iter()
            .map(|agent| {
                Arc::new(
                    ProviderCritic::new(agent.id.clone(), agent.provider.clone())
                        .with_options(agent.options()),
                ) as Arc<dyn Critic>
            })
            .collect();
        let (events, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);

        Self {
            agents,
            critics,
            integrator: DraftIntegrator::new(),
            policy,
            state: Mutex::new(LoopSnapshot::default()),
            events,
            stop: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_critics(mut self, critics: Vec<Arc<dyn Critic>>) -> Self {
        self.critics = critics;
        self
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Receive a snapshot per transition. Dropping the receiver unsubscribes;
    /// a receiver that falls behind sees `Lagged` instead of blocking the loop.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopSnapshot> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        self.lock().clone()
    }

    /// Ask the loop to stop. A request made while no run is active cancels
    /// the next run before its first step.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reset state and drive the loop to `complete` or `stopped`.
    pub async fn start(&self, goal: &str) -> Result<LoopSnapshot> {
        if self.agents.is_empty() {
            return Err(DraftloomError::Validation(
                "feedback loop needs at least one agent".into(),
            ));
        }
        self.policy.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DraftloomError::LoopBusy);
        }
        let _running = RunningGuard {
            running: &self.running,
            stop: &self.stop,
        };

        self.publish(|state| {
            *state = LoopSnapshot {
                goal: goal.to_string(),
                round: 1,
                status: LoopStatus::CollectingDrafts,
                history: vec![format!("goal: {goal}")],
                ..Default::default()
            };
        });
        tracing::info!(
            agents = self.agents.len(),
            max_rounds = self.policy.max_rounds,
            min_score = self.policy.min_score,
            "Feedback loop started"
        );

        loop {
            let status = self.lock().status;
            if status.is_active() && self.stop.load(Ordering::SeqCst) {
                self.transition(|_| {});
                break;
            }
            match status {
                LoopStatus::CollectingDrafts => self.collect_drafts().await,
                LoopStatus::Integrating => self.integrate(),
                LoopStatus::CollectingFeedback => self.collect_feedback().await,
                LoopStatus::Evaluating => self.evaluate(),
                LoopStatus::Idle | LoopStatus::Complete | LoopStatus::Stopped => break,
            }
        }

        Ok(self.snapshot())
    }

    async fn collect_drafts(&self) {
        let (goal, round, history) = {
            let state = self.lock();
            (
                state.goal.clone(),
                state.round,
                compress_history(&state.history, self.policy.history_window),
            )
        };
        let prompt = draft_prompt(&goal, &history);

        let results = join_all(self.agents.iter().map(|agent| {
            let options = agent.options();
            let prompt = prompt.as_str();
            async move { agent.provider.execute(prompt, &options).await }
        }))
        .await;

        self.transition(|state| {
            for (agent, result) in self.agents.iter().zip(results) {
                match result {
                    Ok(content) => {
                        state.history.push(format!(
                            "draft from {} (round {round}): {}",
                            agent.name,
                            excerpt(&content, HISTORY_EXCERPT)
                        ));
                        state
                            .drafts
                            .push(Draft::new(round, &agent.id, agent.provider.id(), content));
                    }
                    Err(e) => {
                        tracing::warn!(round, agent = %agent.id, error = %e, "Draft failed, skipping agent");
                        state
                            .history
                            .push(format!("draft from {} failed (round {round}): {e}", agent.name));
                    }
                }
            }
            state.status = LoopStatus::Integrating;
        });
    }

    fn integrate(&self) {
        let input = {
            let state = self.lock();
            IntegratorInput {
                drafts: state.current_drafts().map(|d| d.content.clone()).collect(),
                history: Some(compress_history(&state.history, self.policy.history_window)),
            }
        };

        match self.integrator.integrate(&input) {
            Ok(output) => self.transition(|state| {
                state.history.push(format!(
                    "integrated {} drafts (round {}): {}",
                    output.draft_count(),
                    state.round,
                    excerpt(&output.unified, HISTORY_EXCERPT)
                ));
                state.integrated_draft = Some(output.unified);
                state.status = LoopStatus::CollectingFeedback;
            }),
            Err(e) => self.transition(|state| {
                tracing::warn!(round = state.round, error = %e, "No drafts to integrate");
                let reason = StopReason::NoDrafts { round: state.round };
                finish(state, reason, "draft collection failed; no output was produced");
            }),
        }
    }

    async fn collect_feedback(&self) {
        let (goal, round, integrated) = {
            let state = self.lock();
            (state.goal.clone(), state.round, state.integrated_draft.clone())
        };
        let Some(integrated) = integrated else {
            self.transition(|state| {
                finish(
                    state,
                    StopReason::NoDrafts { round },
                    "integration failed; no output was produced",
                );
            });
            return;
        };

        let results = join_all(
            self.critics
                .iter()
                .map(|critic| critic.critique(&goal, &integrated)),
        )
        .await;

        self.transition(|state| {
            state.feedback.clear();
            for (critic, result) in self.critics.iter().zip(results) {
                match result {
                    Ok(feedback) => {
                        state.history.push(feedback_entry(critic.id(), round, &feedback));
                        state.feedback.insert(critic.id().to_string(), feedback);
                    }
                    Err(e) => {
                        tracing::warn!(round, agent = %critic.id(), error = %e, "Critique failed, skipping critic");
                        state
                            .history
                            .push(format!("feedback from {} failed (round {round}): {e}", critic.id()));
                    }
                }
            }
            state.status = LoopStatus::Evaluating;
        });
    }

    fn evaluate(&self) {
        self.transition(|state| {
            let feedback: Vec<CriticFeedback> = state.feedback.values().cloned().collect();

            if let (Some(average), Some(draft)) =
                (average_score(&feedback), state.integrated_draft.as_ref())
            {
                if state.best_score.is_none_or(|best| average > best) {
                    state.best_score = Some(average);
                    state.best_draft = Some(draft.clone());
                }
            }

            match decide(&self.policy, state.round, &feedback) {
                Verdict::Stop(reason) => {
                    tracing::info!(round = state.round, reason = %reason, "Feedback loop finished");
                    finish(state, reason, "no output was produced");
                }
                Verdict::Continue { average } => {
                    state.history.push(format!(
                        "evaluation: average score {average:.2} below {:.2}; continuing to round {}",
                        self.policy.min_score,
                        state.round + 1
                    ));
                    state.round += 1;
                    state.status = LoopStatus::CollectingDrafts;
                }
            }
        });
    }

    /// Apply a step's result unless a stop was requested, then publish.
    fn transition(&self, apply: impl FnOnce(&mut LoopSnapshot)) {
        if self.stop.load(Ordering::SeqCst) {
            self.publish(|state| {
                let output = state
                    .best_draft
                    .clone()
                    .or_else(|| state.integrated_draft.clone());
                state.history.push("stopped by request".into());
                state.final_output = output;
                state.stop_reason = Some(StopReason::Cancelled);
                state.status = LoopStatus::Stopped;
            });
            tracing::info!("Feedback loop stopped by request");
        } else {
            self.publish(apply);
        }
    }

    fn publish(&self, apply: impl FnOnce(&mut LoopSnapshot)) {
        let snapshot = {
            let mut state = self.lock();
            apply(&mut state);
            state.clone()
        };
        // No subscribers is fine.
        let _ = self.events.send(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, LoopSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Move to `complete`. An exhausted budget ends on the best-scoring draft,
/// everything else on the latest integration.
fn finish(state: &mut LoopSnapshot, reason: StopReason, fallback: &str) {
    let output = match reason {
        StopReason::RoundBudgetExhausted { .. } | StopReason::NoDrafts { .. } => state
            .best_draft
            .clone()
            .or_else(|| state.integrated_draft.clone()),
        _ => state.integrated_draft.clone(),
    };
    state.history.push(format!("evaluation: {reason}; finishing"));
    state.final_output = Some(output.unwrap_or_else(|| fallback.to_string()));
    state.stop_reason = Some(reason);
    state.status = LoopStatus::Complete;
}

fn draft_prompt(goal: &str, history: &str) -> String {
    format!(
        "# Task\n{goal}\n\n# History\n{history}\n\n# Instructions\n\
         Propose a solution to the task above. Address any feedback from earlier rounds."
    )
}

fn feedback_entry(critic: &str, round: u8, feedback: &CriticFeedback) -> String {
    let mut entry = format!(
        "feedback from {critic} (round {round}): score {:.2}",
        feedback.score
    );
    if !feedback.suggestions.is_empty() {
        entry.push_str("; suggestions: ");
        entry.push_str(&feedback.suggestions.join(" / "));
    }
    if feedback.blocking {
        entry.push_str(" [blocking]");
    }
    entry
}

// src/core/orchestrator.rs — Single-module loop and pipeline runner

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use uuid::Uuid;

use super::policy::{decide, Verdict};
use super::types::*;
use crate::evaluator::{Critic, CriticEvaluator, CriticFeedback};
use crate::infra::errors::{DraftloomError, Result};
use crate::integrator::{DraftIntegrator, IntegratorInput};
use crate::prompts::manager::PromptModuleManager;
use crate::prompts::template::{references, render_template};
use crate::prompts::{Context, PromptModule};
use crate::provider::registry::{ModelRequirements, ProviderRegistry};
use crate::provider::{ExecuteOptions, ModelProvider, ModelRef};

/// Provider id recorded when a module has no explicit assignment and
/// routing fails before a provider is chosen.
pub const DEFAULT_PROVIDER: &str = "default";

const FEEDBACK_KEY: &str = "_feedback";
const PREVIOUS_RESULT_KEY: &str = "_previousResult";
const PREVIOUS_RESULTS_KEY: &str = "_previousResults";

/// Composes the registry, the module manager, the integrator, and the
/// critics. Owns no loop state; every call runs independently.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    modules: Arc<PromptModuleManager>,
    integrator: DraftIntegrator,
    critics: Vec<Arc<dyn Critic>>,
    default_policy: LoopPolicy,
    pipeline_defaults: PipelineConfig,
}

/// Where one module's prompts go.
struct Route {
    backend: Arc<dyn ModelProvider>,
    model: ModelRef,
    custom_prompt: Option<String>,
}

/// Accumulated state of a single-module run.
#[derive(Default)]
struct RunLog {
    history: Vec<String>,
    latest: Option<String>,
    best: Option<(f64, String)>,
    feedback: Option<CriticFeedback>,
}

impl RunLog {
    fn conclude(
        mut self,
        module_id: &str,
        model: &ModelRef,
        round: u8,
        reason: StopReason,
    ) -> ExecutionResult {
        let best = self.best.map(|(_, text)| text);
        let output = match reason {
            StopReason::RoundBudgetExhausted { .. } | StopReason::NoDrafts { .. } => {
                best.or(self.latest)
            }
            _ => self.latest.or(best),
        };
        tracing::info!(module = %module_id, round, reason = %reason, "Module run finished");
        self.history.push(format!("stopped: {reason}"));

        ExecutionResult {
            module_id: module_id.to_string(),
            final_output: output.unwrap_or_default(),
            feedback: self.feedback,
            round,
            complete: reason.is_success(),
            stop_reason: reason,
            provider: Some(model.clone()),
            history: self.history,
        }
    }
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, modules: Arc<PromptModuleManager>) -> Self {
        Self {
            registry,
            modules,
            integrator: DraftIntegrator::new(),
            critics: vec![Arc::new(CriticEvaluator::default())],
            default_policy: LoopPolicy::default(),
            pipeline_defaults: PipelineConfig::default(),
        }
    }

    pub fn with_critics(mut self, critics: Vec<Arc<dyn Critic>>) -> Self {
        self.critics = critics;
        self
    }

    pub fn with_default_policy(mut self, policy: LoopPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_pipeline_defaults(mut self, config: PipelineConfig) -> Self {
        self.pipeline_defaults = config;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn modules(&self) -> &PromptModuleManager {
        &self.modules
    }

    /// Run one registered module through the feedback loop.
    pub async fn execute_task(&self, request: TaskRequest) -> Result<ExecutionResult> {
        let module = self
            .modules
            .get_module(&request.prompt_module_id)
            .ok_or_else(|| DraftloomError::ModuleNotFound {
                id: request.prompt_module_id.clone(),
            })?;
        let policy = request
            .loop_policy
            .unwrap_or_else(|| self.default_policy.clone());
        policy.validate()?;
        let route = self.resolve(request.assignment.as_ref())?;

        self.run_module(&self.modules, &module, request.context, &route, &policy)
            .await
    }

    /// Run modules in order, threading each output into the next context.
    /// Request settings override the orchestrator's pipeline defaults field
    /// by field. The modules are rendered from a catalog private to this run;
    /// the shared catalog is never touched.
    pub async fn execute_pipeline(&self, request: PipelineRequest) -> Result<PipelineResult> {
        let config = match request.pipeline_config {
            Some(overrides) => overrides.apply(&self.pipeline_defaults),
            None => self.pipeline_defaults.clone(),
        };
        let policy = config
            .loop_policy()?
            .with_soft_threshold(self.default_policy.soft_threshold)?
            .with_history_window(self.default_policy.history_window);

        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, modules = request.modules.len(), "Pipeline started");

        let catalog = PromptModuleManager::default();
        let mut state = request.initial_context;
        let mut execution_history = Vec::with_capacity(request.modules.len());
        let mut success = true;
        let mut error = None;
        let mut stopped_by = None;

        for module in &request.modules {
            let started = Instant::now();
            let timestamp = Utc::now();
            let assignment = config.model_assignments.get(&module.id);
            let input = state.clone();

            match self
                .run_pipeline_module(&catalog, module, state.clone(), assignment, &policy)
                .await
            {
                Ok(result) => {
                    let output = module_output(&module.id, &result.final_output);
                    execution_history.push(ModuleExecutionRecord {
                        module_id: module.id.clone(),
                        provider_id: result
                            .provider
                            .as_ref()
                            .map(|m| m.provider.clone())
                            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
                        model: result.provider.as_ref().map(|m| m.model.clone()),
                        input,
                        output: output.clone(),
                        timestamp,
                        duration_ms: started.elapsed().as_millis() as u64,
                        rounds: result.round,
                        score: result.feedback.as_ref().map(|f| f.score),
                        success: true,
                        error: None,
                    });

                    thread_output(&mut state, &module.id, output);

                    if module.stop_criteria.matches(&result.final_output) {
                        tracing::info!(
                            module = %module.id,
                            keyword = %module.stop_criteria.keyword,
                            "Stop keyword found, ending pipeline"
                        );
                        stopped_by = Some(module.id.clone());
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(module = %module.id, error = %e, "Pipeline module failed");
                    execution_history.push(ModuleExecutionRecord {
                        module_id: module.id.clone(),
                        provider_id: assignment
                            .map(|a| a.provider_id.clone())
                            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
                        model: assignment.and_then(|a| a.model_id.clone()),
                        input,
                        output: Context::new(),
                        timestamp,
                        duration_ms: started.elapsed().as_millis() as u64,
                        rounds: 0,
                        score: None,
                        success: false,
                        error: Some(e.to_string()),
                    });

                    if config.break_on_error {
                        success = false;
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        tracing::info!(
            %run_id,
            success,
            ran = execution_history.len(),
            stopped_by = stopped_by.as_deref().unwrap_or("-"),
            "Pipeline finished"
        );
        Ok(PipelineResult {
            run_id,
            final_output: state,
            execution_history,
            success,
            error,
            stopped_by,
        })
    }

    async fn run_pipeline_module(
        &self,
        catalog: &PromptModuleManager,
        module: &PromptModule,
        context: Context,
        assignment: Option<&ModelAssignment>,
        policy: &LoopPolicy,
    ) -> Result<ExecutionResult> {
        catalog.add_module(module.clone())?;
        let route = self.resolve(assignment)?;
        let result = self.run_module(catalog, module, context, &route, policy).await?;
        if result.stop_reason.is_failure() {
            return Err(DraftloomError::PipelineModule {
                module_id: module.id.clone(),
                message: result.stop_reason.to_string(),
            });
        }
        Ok(result)
    }

    fn resolve(&self, assignment: Option<&ModelAssignment>) -> Result<Route> {
        match assignment {
            Some(assignment) => {
                let entry = self
                    .registry
                    .get_provider(&assignment.provider_id)
                    .ok_or_else(|| DraftloomError::ProviderNotFound {
                        name: assignment.provider_id.clone(),
                    })?;
                let model = assignment
                    .model_id
                    .clone()
                    .or_else(|| entry.default_model().map(str::to_string))
                    .unwrap_or_default();
                Ok(Route {
                    backend: entry.backend.clone(),
                    model: ModelRef::new(entry.name(), model),
                    custom_prompt: assignment.custom_prompt.clone(),
                })
            }
            None => {
                let selected = self
                    .registry
                    .select_model(&ModelRequirements::default())
                    .ok_or_else(|| DraftloomError::ProviderNotFound {
                        name: DEFAULT_PROVIDER.into(),
                    })?;
                let entry = self.registry.get_provider(&selected.provider).ok_or_else(|| {
                    DraftloomError::ProviderNotFound {
                        name: selected.provider.clone(),
                    }
                })?;
                Ok(Route {
                    backend: entry.backend.clone(),
                    model: selected,
                    custom_prompt: None,
                })
            }
        }
    }

    /// Draft, integrate, critique, and decide until the policy stops.
    /// Rounds are capped by the module's `max_turns`.
    async fn run_module(
        &self,
        catalog: &PromptModuleManager,
        module: &PromptModule,
        mut context: Context,
        route: &Route,
        policy: &LoopPolicy,
    ) -> Result<ExecutionResult> {
        let policy = policy.capped(module.stop_criteria.max_turns);
        let mut log = RunLog::default();

        for round in 1..=policy.max_rounds {
            let (system, user) = render(catalog, module, &context, route)?;
            let mut options = ExecuteOptions::default().with_system(system);
            if !route.model.model.is_empty() {
                options.model = Some(route.model.model.clone());
            }

            let draft = match route.backend.execute(&user, &options).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(module = %module.id, round, agent = %route.model.provider, error = %e, "Draft failed");
                    log.history
                        .push(format!("round {round}: draft from {} failed: {e}", route.model));
                    return Ok(log.conclude(&module.id, &route.model, round, StopReason::NoDrafts { round }));
                }
            };
            log.history.push(format!(
                "round {round}: draft from {} ({} chars)",
                route.model,
                draft.chars().count()
            ));

            let integrated = self
                .integrator
                .integrate(&IntegratorInput::new([draft]))?
                .unified;
            log.latest = Some(integrated.clone());

            let results = join_all(
                self.critics
                    .iter()
                    .map(|critic| critic.critique(&user, &integrated)),
            )
            .await;
            let mut feedback = Vec::with_capacity(results.len());
            for (critic, result) in self.critics.iter().zip(results) {
                match result {
                    Ok(f) => feedback.push(f),
                    Err(e) => {
                        tracing::warn!(module = %module.id, round, agent = %critic.id(), error = %e, "Critique failed, skipping critic");
                        log.history
                            .push(format!("round {round}: critic {} failed: {e}", critic.id()));
                    }
                }
            }

            let combined = CriticFeedback::combine(&feedback);
            if let Some(fb) = &combined {
                log.history
                    .push(format!("round {round}: score {:.2}", fb.score));
                if log.best.as_ref().is_none_or(|(best, _)| fb.score > *best) {
                    log.best = Some((fb.score, integrated.clone()));
                }
            }
            let suggestions = combined
                .as_ref()
                .map(CriticFeedback::suggestions_text)
                .unwrap_or_default();
            log.feedback = combined;

            match decide(&policy, round, &feedback) {
                Verdict::Stop(reason) => {
                    return Ok(log.conclude(&module.id, &route.model, round, reason));
                }
                Verdict::Continue { average } => {
                    tracing::debug!(module = %module.id, round, average, "Below threshold, continuing");
                    log.history.push(format!(
                        "round {round}: average {average:.2} below {:.2}, continuing",
                        policy.min_score
                    ));
                    context.insert(FEEDBACK_KEY.into(), Value::String(suggestions));
                    context.insert(PREVIOUS_RESULT_KEY.into(), Value::String(integrated));
                }
            }
        }

        // `decide` stops at the last round; this covers an empty range.
        let rounds = policy.max_rounds;
        Ok(log.conclude(
            &module.id,
            &route.model,
            rounds,
            StopReason::RoundBudgetExhausted { rounds },
        ))
    }
}

/// `(system, user)` prompts for one round. A custom prompt replaces both
/// module templates and carries no system prompt.
fn render(
    catalog: &PromptModuleManager,
    module: &PromptModule,
    context: &Context,
    route: &Route,
) -> Result<(String, String)> {
    if let Some(custom) = &route.custom_prompt {
        let user = render_template(custom, context);
        return Ok((String::new(), with_feedback(user, custom, context)));
    }
    let rendered = catalog.render_module(&module.id, context)?;
    let user = with_feedback(
        rendered.user_prompt.clone(),
        &module.user_template,
        context,
    );
    Ok((rendered.system_prompt.clone(), user))
}

/// Append critic suggestions when the template has no `{{_feedback}}` slot.
fn with_feedback(user: String, template: &str, context: &Context) -> String {
    match context.get(FEEDBACK_KEY).and_then(Value::as_str) {
        Some(feedback) if !feedback.is_empty() && !references(template, FEEDBACK_KEY) => {
            format!("{user}\n\n# Feedback on the previous attempt\n{feedback}")
        }
        _ => user,
    }
}

fn module_output(module_id: &str, result: &str) -> Context {
    let mut output = Context::new();
    output.insert("result".into(), Value::String(result.to_string()));
    output.insert("moduleId".into(), Value::String(module_id.to_string()));
    output
}

/// Merge a module's output into the pipeline context and record it in
/// `_previousResults`.
fn thread_output(state: &mut Context, module_id: &str, output: Context) {
    let result = output.get("result").cloned().unwrap_or(Value::Null);
    state.extend(output);

    let entry = json!({ "moduleId": module_id, "result": result });
    match state.get_mut(PREVIOUS_RESULTS_KEY) {
        Some(Value::Array(items)) => items.push(entry),
        _ => {
            state.insert(PREVIOUS_RESULTS_KEY.into(), Value::Array(vec![entry]));
        }
    }
}

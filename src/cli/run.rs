// src/cli/run.rs — Command handlers

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _};

use super::progress;
use crate::core::feedback_loop::{Agent, FeedbackLoop};
use crate::core::orchestrator::Orchestrator;
use crate::core::types::{
    LoopPolicy, ModelAssignment, PipelineOverrides, PipelineRequest, TaskRequest,
};
use crate::evaluator::{Critic, CriticEvaluator, ProviderCritic};
use crate::infra::config::{Config, ProviderEntry};
use crate::prompts::manager::PromptModuleManager;
use crate::prompts::Context;
use crate::provider::mock::MockProvider;
use crate::provider::openai_compat::OpenAICompatProvider;
use crate::provider::registry::{ModelRequirements, ProviderRegistry};
use crate::provider::{ExecuteOptions, ModelProvider, ModelRef, ProviderConfig};

const DRY_RUN_PROVIDER: &str = "local";
const DRY_RUN_KEY: &str = "dry-run";

/// Options shared by every command.
pub struct RunOptions<'a> {
    pub config: &'a Config,
    pub dry_run: bool,
    pub quiet: bool,
}

/// Register every configured provider. With `dry_run` each one is backed by
/// a local echo mock, and a `local` provider is added when none are configured.
pub fn build_registry(config: &Config, dry_run: bool) -> anyhow::Result<ProviderRegistry> {
    let registry = ProviderRegistry::new();

    for entry in &config.providers {
        let (provider_config, backend) = if dry_run {
            let backend: Arc<dyn ModelProvider> = Arc::new(MockProvider::echo(entry.name.clone()));
            (entry_config(entry, DRY_RUN_KEY.into()), backend)
        } else {
            let env_var = api_key_env(entry);
            let Ok(key) = std::env::var(&env_var) else {
                tracing::warn!(provider = %entry.name, env = %env_var, "API key not set, skipping provider");
                continue;
            };
            let cfg = entry_config(entry, key);
            let backend: Arc<dyn ModelProvider> = Arc::new(OpenAICompatProvider::from_config(&cfg));
            (cfg, backend)
        };
        registry.add_provider(provider_config, backend)?;
    }

    if dry_run && registry.is_empty() {
        registry.add_provider(
            ProviderConfig::new(DRY_RUN_PROVIDER, DRY_RUN_KEY).with_models(["echo"]),
            Arc::new(MockProvider::echo(DRY_RUN_PROVIDER)),
        )?;
    }
    Ok(registry)
}

fn entry_config(entry: &ProviderEntry, api_key: String) -> ProviderConfig {
    let mut cfg = ProviderConfig::new(entry.name.clone(), api_key)
        .with_models(entry.models.clone())
        .with_priority(entry.priority);
    if let Some(url) = &entry.base_url {
        cfg = cfg.with_base_url(url.clone());
    }
    cfg
}

/// `api_key_env`, or `<NAME>_API_KEY`.
pub fn api_key_env(entry: &ProviderEntry) -> String {
    entry.api_key_env.clone().unwrap_or_else(|| {
        let name: String = entry
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{name}_API_KEY")
    })
}

pub fn parse_context(json: Option<&str>) -> anyhow::Result<Context> {
    let Some(json) = json else {
        return Ok(Context::new());
    };
    match serde_json::from_str(json).context("--context is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--context must be a JSON object"),
    }
}

/// `name` or `name/model`.
pub fn parse_assignment(spec: &str) -> ModelAssignment {
    match ModelRef::parse(spec) {
        Some(ModelRef { provider, model }) => ModelAssignment::provider(provider).with_model(model),
        None => ModelAssignment::provider(spec),
    }
}

fn load_modules(config: &Config, catalog: &Path) -> anyhow::Result<Arc<PromptModuleManager>> {
    let manager = PromptModuleManager::from_config(&config.cache);
    manager
        .load_catalog(catalog)
        .with_context(|| format!("loading {}", catalog.display()))?;
    Ok(Arc::new(manager))
}

/// Real runs are judged by the best provider; dry runs by the heuristic scorer.
fn judges(registry: &ProviderRegistry, dry_run: bool) -> Vec<Arc<dyn Critic>> {
    let heuristic: Arc<dyn Critic> = Arc::new(CriticEvaluator::default());
    if dry_run {
        return vec![heuristic];
    }
    let Some(model) = registry.select_model(&ModelRequirements::default()) else {
        return vec![heuristic];
    };
    let Some(entry) = registry.get_provider(&model.provider) else {
        return vec![heuristic];
    };
    let judge: Arc<dyn Critic> = Arc::new(
        ProviderCritic::new(format!("judge:{}", model.provider), entry.backend.clone())
            .with_options(ExecuteOptions::for_model(model.model)),
    );
    vec![judge]
}

fn orchestrator(
    opts: &RunOptions<'_>,
    modules: Arc<PromptModuleManager>,
) -> anyhow::Result<Orchestrator> {
    let registry = build_registry(opts.config, opts.dry_run)?;
    if registry.is_empty() {
        bail!("No providers available. Configure [[providers]] or pass --dry-run.");
    }
    let critics = judges(&registry, opts.dry_run);
    Ok(Orchestrator::new(Arc::new(registry), modules)
        .with_critics(critics)
        .with_default_policy(opts.config.loop_policy()?)
        .with_pipeline_defaults(opts.config.pipeline_config()?))
}

fn policy_override(
    base: LoopPolicy,
    rounds: Option<u8>,
    min_score: Option<f64>,
) -> anyhow::Result<LoopPolicy> {
    let policy = LoopPolicy::new(
        rounds.unwrap_or(base.max_rounds),
        min_score.unwrap_or(base.min_score),
    )?
    .with_soft_threshold(base.soft_threshold)?
    .with_history_window(base.history_window);
    Ok(policy)
}

pub async fn run_module(
    opts: &RunOptions<'_>,
    catalog: &Path,
    module_id: &str,
    context: Option<&str>,
    rounds: Option<u8>,
    min_score: Option<f64>,
    provider: Option<&str>,
) -> anyhow::Result<()> {
    let modules = load_modules(opts.config, catalog)?;
    let orchestrator = orchestrator(opts, modules)?;

    let mut request = TaskRequest::new(module_id, parse_context(context)?)
        .with_policy(policy_override(opts.config.loop_policy()?, rounds, min_score)?);
    if let Some(spec) = provider {
        request = request.with_assignment(parse_assignment(spec));
    }

    let result = orchestrator.execute_task(request).await?;

    if !opts.quiet {
        for entry in &result.history {
            eprintln!("  {entry}");
        }
        let score = result
            .feedback
            .as_ref()
            .map(|f| format!("{:.2}", f.score))
            .unwrap_or_else(|| "-".into());
        eprintln!(
            "[done] module={} round={} score={score} complete={}",
            result.module_id, result.round, result.complete
        );
    }
    println!("{}", result.final_output);
    Ok(())
}

pub async fn run_pipeline(
    opts: &RunOptions<'_>,
    catalog: &Path,
    context: Option<&str>,
    assignments: Option<&Path>,
    keep_going: bool,
) -> anyhow::Result<()> {
    let modules = load_modules(opts.config, catalog)?;
    let ordered: Vec<_> = read_catalog_order(catalog)?
        .into_iter()
        .filter_map(|id| modules.get_module(&id))
        .collect();
    let orchestrator = orchestrator(opts, modules)?;

    let mut overrides = PipelineOverrides::default();
    if keep_going {
        overrides.break_on_error = Some(false);
    }
    if let Some(path) = assignments {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let map: HashMap<String, ModelAssignment> =
            serde_json::from_str(&content).context("assignments must be a JSON object")?;
        overrides.model_assignments = Some(map);
    }

    let request =
        PipelineRequest::new(ordered, parse_context(context)?).with_overrides(overrides);
    let result = orchestrator.execute_pipeline(request).await?;

    if !opts.quiet {
        for record in &result.execution_history {
            let status = if record.success { "ok" } else { "failed" };
            eprintln!(
                "[{}] {} via {} in {}ms{}",
                status,
                record.module_id,
                record.provider_id,
                record.duration_ms,
                record
                    .error
                    .as_ref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default()
            );
        }
        if let Some(module) = &result.stopped_by {
            eprintln!("[stop] keyword matched in {module}");
        }
    }

    if let Some(output) = result.final_output.get("result").and_then(|v| v.as_str()) {
        println!("{output}");
    }
    if !result.success {
        bail!(
            "pipeline aborted: {}",
            result.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    Ok(())
}

/// Module ids in file order.
fn read_catalog_order(catalog: &Path) -> anyhow::Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct IdOnly {
        id: String,
    }
    let content = std::fs::read_to_string(catalog)?;
    let is_yaml = matches!(
        catalog.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let ids: Vec<IdOnly> = if is_yaml {
        serde_yml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(ids.into_iter().map(|m| m.id).collect())
}

pub async fn run_loop(
    opts: &RunOptions<'_>,
    goal: &str,
    rounds: Option<u8>,
    min_score: Option<f64>,
) -> anyhow::Result<()> {
    let registry = build_registry(opts.config, opts.dry_run)?;
    let agents = build_agents(opts.config, &registry)?;
    let policy = policy_override(opts.config.loop_policy()?, rounds, min_score)?;

    let mut feedback_loop = FeedbackLoop::new(agents, policy.clone());
    if opts.dry_run {
        let critic: Arc<dyn Critic> = Arc::new(CriticEvaluator::default());
        feedback_loop = feedback_loop.with_critics(vec![critic]);
    }
    let feedback_loop = Arc::new(feedback_loop);

    let renderer = (!opts.quiet).then(|| {
        let rx = feedback_loop.subscribe();
        tokio::spawn(progress::follow(rx, policy.max_rounds))
    });

    let stop = feedback_loop.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[stop] finishing the current step...");
            stop.stop();
        }
    });

    let result = feedback_loop.start(goal).await;
    ctrl_c.abort();
    if let Some(renderer) = renderer {
        // The renderer only exits on a terminal snapshot, which a failed start never sends.
        if result.is_err() {
            renderer.abort();
        }
        let _ = renderer.await;
    }

    let snapshot = result?;
    println!("{}", snapshot.final_output.unwrap_or_default());
    Ok(())
}

/// Configured `[[agents]]`, or one agent per registered provider.
fn build_agents(config: &Config, registry: &ProviderRegistry) -> anyhow::Result<Vec<Agent>> {
    let mut agents = Vec::new();
    if config.agents.is_empty() {
        let mut providers = registry.list_providers();
        providers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        for cfg in providers {
            let Some(entry) = registry.get_provider(&cfg.name) else {
                continue;
            };
            let mut agent = Agent::new(cfg.name.clone(), entry.backend.clone());
            if let Some(model) = entry.default_model() {
                agent = agent.with_model(model);
            }
            agents.push(agent);
        }
    } else {
        for agent_cfg in &config.agents {
            let entry = registry.get_provider(&agent_cfg.provider).with_context(|| {
                format!(
                    "agent '{}' needs provider '{}', which is not available",
                    agent_cfg.id, agent_cfg.provider
                )
            })?;
            let mut agent = Agent::new(agent_cfg.id.clone(), entry.backend.clone());
            if let Some(name) = &agent_cfg.name {
                agent = agent.with_name(name.clone());
            }
            if let Some(model) = agent_cfg
                .model
                .as_deref()
                .or_else(|| entry.default_model())
            {
                agent = agent.with_model(model);
            }
            if let Some(t) = agent_cfg.temperature {
                agent = agent.with_temperature(t);
            }
            agents.push(agent);
        }
    }
    if agents.is_empty() {
        bail!("No agents available. Configure [[providers]] or pass --dry-run.");
    }
    Ok(agents)
}

pub fn list_providers(opts: &RunOptions<'_>) -> anyhow::Result<()> {
    let registry = build_registry(opts.config, opts.dry_run)?;
    let mut providers = registry.list_providers();
    providers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    if providers.is_empty() {
        println!("No providers available.");
    }
    for p in providers {
        println!(
            "{:<16} priority={:<3} models={}",
            p.name,
            p.priority,
            if p.models.is_empty() {
                "-".to_string()
            } else {
                p.models.join(",")
            }
        );
    }
    Ok(())
}

pub fn list_modules(config: &Config, catalog: &Path) -> anyhow::Result<()> {
    let manager = load_modules(config, catalog)?;
    for module in manager.list_modules() {
        let keyword = if module.stop_criteria.keyword.is_empty() {
            "-"
        } else {
            module.stop_criteria.keyword.as_str()
        };
        println!(
            "{:<20} {:<30} max_turns={} stop={keyword}",
            module.id, module.title, module.stop_criteria.max_turns
        );
    }
    Ok(())
}

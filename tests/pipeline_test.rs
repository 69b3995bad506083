// tests/pipeline_test.rs — Integration test: sequential module pipelines

use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use draftloom::core::orchestrator::{Orchestrator, DEFAULT_PROVIDER};
use draftloom::core::types::{
    ModelAssignment, PipelineConfig, PipelineOverrides, PipelineRequest, TaskRequest,
};
use draftloom::evaluator::CriticEvaluator;
use draftloom::prompts::manager::PromptModuleManager;
use draftloom::prompts::{Context, PromptModule};
use draftloom::provider::mock::MockProvider;
use draftloom::provider::registry::ProviderRegistry;
use draftloom::provider::ProviderConfig;

fn context(value: serde_json::Value) -> Context {
    value.as_object().cloned().unwrap()
}

fn orchestrator(providers: Vec<(&str, u8, Arc<MockProvider>)>) -> Orchestrator {
    let registry = ProviderRegistry::new();
    for (name, priority, backend) in providers {
        registry
            .add_provider(
                ProviderConfig::new(name, "k")
                    .with_models([format!("{name}-model")])
                    .with_priority(priority),
                backend,
            )
            .unwrap();
    }
    Orchestrator::new(Arc::new(registry), Arc::new(PromptModuleManager::default()))
        .with_critics(vec![Arc::new(CriticEvaluator::fixed(0.9))])
}

fn outline_then_expand() -> Vec<PromptModule> {
    vec![
        PromptModule::new("outline", "Outline: {{topic}}"),
        PromptModule::new("expand", "Expand: {{result}}"),
    ]
}

fn config() -> PipelineConfig {
    PipelineConfig {
        max_rounds: 2,
        min_score: 0.8,
        ..PipelineConfig::default()
    }
}

// ─── Threading ──────────────────────────────────────────────

#[tokio::test]
async fn test_outputs_thread_into_next_module() {
    let echo = Arc::new(MockProvider::echo("mock"));
    let orchestrator = orchestrator(vec![("mock", 50, echo.clone())]);

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(outline_then_expand(), context(json!({"topic": "rust"})))
                .with_config(config()),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.error, None);
    assert_eq!(result.stopped_by, None);
    assert!(!result.run_id.is_nil());
    assert_eq!(
        echo.prompts(),
        vec![
            "Outline: rust".to_string(),
            "Expand: [mock] Outline: rust".to_string()
        ]
    );
    assert_eq!(
        result.final_output["result"],
        "[mock] Expand: [mock] Outline: rust"
    );
    assert_eq!(result.final_output["moduleId"], "expand");
    assert_eq!(result.final_output["topic"], "rust");
    assert_eq!(
        result.final_output["_previousResults"],
        json!([
            {"moduleId": "outline", "result": "[mock] Outline: rust"},
            {"moduleId": "expand", "result": "[mock] Expand: [mock] Outline: rust"},
        ])
    );

    let records = &result.execution_history;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.success && r.rounds == 1));
    assert_eq!(records[0].provider_id, "mock");
    assert_eq!(records[0].model.as_deref(), Some("mock-model"));
    assert_eq!(records[0].score, Some(0.9));
    assert!(records[0].input.get("result").is_none());
    assert_eq!(records[1].input["result"], "[mock] Outline: rust");
}

#[tokio::test]
async fn test_pipeline_leaves_shared_catalog_untouched() {
    let echo = Arc::new(MockProvider::echo("mock"));
    let orchestrator = orchestrator(vec![("mock", 50, echo.clone())]);
    orchestrator
        .modules()
        .add_module(PromptModule::new("summarize", "Summarize: {{text}}"))
        .unwrap();

    orchestrator
        .execute_pipeline(
            PipelineRequest::new(
                vec![PromptModule::new("summarize", "Translate: {{text}}")],
                context(json!({"text": "hello"})),
            )
            .with_config(config()),
        )
        .await
        .unwrap();

    let modules = orchestrator.modules().list_modules();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].user_template, "Summarize: {{text}}");

    orchestrator
        .execute_task(TaskRequest::new("summarize", context(json!({"text": "hello"}))))
        .await
        .unwrap();
    assert_eq!(
        echo.prompts(),
        vec!["Translate: hello".to_string(), "Summarize: hello".to_string()]
    );
}

#[tokio::test]
async fn test_stop_keyword_short_circuits() {
    let provider = Arc::new(MockProvider::constant("mock", "nothing to add. DONE"));
    let orchestrator = orchestrator(vec![("mock", 50, provider.clone())]);
    let modules = vec![
        PromptModule::new("review", "Review: {{topic}}").with_stop_criteria("DONE", 3),
        PromptModule::new("rewrite", "Rewrite: {{result}}"),
    ];

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(modules, context(json!({"topic": "x"}))).with_config(config()),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.stopped_by.as_deref(), Some("review"));
    assert_eq!(result.execution_history.len(), 1);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(result.final_output["moduleId"], "review");
}

// ─── Failures ───────────────────────────────────────────────

#[tokio::test]
async fn test_failure_breaks_pipeline_by_default() {
    let orchestrator = orchestrator(vec![("mock", 50, Arc::new(MockProvider::echo("mock")))]);
    let config = config().assign("outline", ModelAssignment::provider("ghost"));

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(outline_then_expand(), context(json!({"topic": "x"})))
                .with_config(config),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("ghost"));
    assert_eq!(result.execution_history.len(), 1);
    let failed = &result.execution_history[0];
    assert!(!failed.success);
    assert_eq!(failed.provider_id, "ghost");
    assert_eq!(failed.rounds, 0);
    assert!(failed.output.is_empty());
    assert!(result.final_output.get("result").is_none());
}

#[tokio::test]
async fn test_keep_going_runs_remaining_modules() {
    let orchestrator = orchestrator(vec![("mock", 50, Arc::new(MockProvider::echo("mock")))]);
    let config = PipelineConfig {
        break_on_error: false,
        ..config().assign("outline", ModelAssignment::provider("ghost"))
    };

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(outline_then_expand(), context(json!({"topic": "x"})))
                .with_config(config),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.error, None);
    assert_eq!(result.execution_history.len(), 2);
    assert_eq!(result.failures().count(), 1);
    // Nothing was threaded from the failed module.
    assert_eq!(result.final_output["result"], "[mock] Expand: {{result}}");
}

#[tokio::test]
async fn test_provider_failure_is_recorded_against_default_route() {
    let orchestrator = orchestrator(vec![(
        "mock",
        50,
        Arc::new(MockProvider::failing("mock", "service unavailable")),
    )]);

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(outline_then_expand(), context(json!({"topic": "x"})))
                .with_config(config()),
        )
        .await
        .unwrap();

    assert!(!result.success);
    let failed = &result.execution_history[0];
    assert_eq!(failed.provider_id, DEFAULT_PROVIDER);
    assert_eq!(
        failed.error.as_deref(),
        Some("Pipeline module 'outline' failed: no drafts collected in round 1")
    );
}

// ─── Routing ────────────────────────────────────────────────

#[tokio::test]
async fn test_assignments_from_json_route_and_override_prompts() {
    let primary = Arc::new(MockProvider::echo("primary"));
    let backup = Arc::new(MockProvider::echo("backup"));
    let orchestrator = orchestrator(vec![
        ("primary", 90, primary.clone()),
        ("backup", 10, backup.clone()),
    ]);
    let assignments: HashMap<String, ModelAssignment> = serde_json::from_value(json!({
        "outline": "backup",
        "expand": {
            "providerId": "primary",
            "modelId": "primary-large",
            "customPrompt": "Custom: {{result}}"
        }
    }))
    .unwrap();
    let config = PipelineConfig {
        model_assignments: assignments,
        ..config()
    };

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(outline_then_expand(), context(json!({"topic": "t"})))
                .with_config(config),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(backup.prompts(), vec!["Outline: t".to_string()]);
    assert_eq!(primary.prompts(), vec!["Custom: [backup] Outline: t".to_string()]);
    let records = &result.execution_history;
    assert_eq!(records[0].provider_id, "backup");
    assert_eq!(records[0].model.as_deref(), Some("backup-model"));
    assert_eq!(records[1].provider_id, "primary");
    assert_eq!(records[1].model.as_deref(), Some("primary-large"));
}

#[tokio::test]
async fn test_pipeline_defaults_apply_without_config() {
    let provider = Arc::new(MockProvider::constant("mock", "same"));
    let orchestrator = orchestrator(vec![("mock", 50, provider.clone())])
        .with_critics(vec![Arc::new(CriticEvaluator::fixed(0.1))])
        .with_pipeline_defaults(PipelineConfig {
            max_rounds: 2,
            min_score: 0.9,
            ..PipelineConfig::default()
        });

    let result = orchestrator
        .execute_pipeline(PipelineRequest::new(
            vec![PromptModule::new("only", "Go")],
            Context::new(),
        ))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.execution_history[0].rounds, 2);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_partial_overrides_merge_with_defaults() {
    let provider = Arc::new(MockProvider::constant("mock", "same"));
    let orchestrator = orchestrator(vec![("mock", 50, provider.clone())])
        .with_critics(vec![Arc::new(CriticEvaluator::fixed(0.1))])
        .with_pipeline_defaults(PipelineConfig {
            max_rounds: 2,
            min_score: 0.9,
            ..PipelineConfig::default()
        });
    let overrides: PipelineOverrides =
        serde_json::from_value(json!({"breakOnError": false})).unwrap();

    let result = orchestrator
        .execute_pipeline(
            PipelineRequest::new(
                vec![PromptModule::new("first", "A"), PromptModule::new("second", "B")],
                Context::new(),
            )
            .with_overrides(overrides),
        )
        .await
        .unwrap();

    assert!(result.success);
    let rounds: Vec<u8> = result.execution_history.iter().map(|r| r.rounds).collect();
    assert_eq!(rounds, vec![2, 2]);
    assert_eq!(provider.call_count(), 4);
}

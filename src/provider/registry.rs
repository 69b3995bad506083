// src/provider/registry.rs — Provider registry and model selection

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{ModelProvider, ModelRef, ProviderConfig};
use crate::infra::errors::Result;

/// A registered provider: its configuration plus the back-end that serves it.
pub struct RegisteredProvider {
    pub config: ProviderConfig,
    pub backend: Arc<dyn ModelProvider>,
}

impl RegisteredProvider {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The model used when a request does not name one.
    pub fn default_model(&self) -> Option<&str> {
        self.config.models.first().map(String::as_str)
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("config", &self.config)
            .field("backend", &self.backend.id())
            .finish()
    }
}

/// Filters applied before the priority sort in `select_model`.
#[derive(Debug, Clone, Default)]
pub struct ModelRequirements {
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl ModelRequirements {
    pub fn provider(name: impl Into<String>) -> Self {
        Self {
            provider: Some(name.into()),
            model: None,
        }
    }

    pub fn model(model: impl Into<String>) -> Self {
        Self {
            provider: None,
            model: Some(model.into()),
        }
    }
}

/// Holds provider configurations and answers "which provider/model should
/// serve this request". Entries are replaced whole, never mutated in place.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<RegisteredProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by `name`. Priority is clamped to [0, 100]; an
    /// empty api key is rejected.
    pub fn add_provider(
        &self,
        config: ProviderConfig,
        backend: Arc<dyn ModelProvider>,
    ) -> Result<()> {
        let config = config.normalized()?;
        let name = config.name.clone();
        let entry = Arc::new(RegisteredProvider { config, backend });

        let replaced = self
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.clone(), entry)
            .is_some();
        tracing::debug!(provider = %name, replaced, "Provider registered");
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<RegisteredProvider>> {
        self.read().get(name).cloned()
    }

    pub fn remove_provider(&self, name: &str) -> bool {
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
            .is_some()
    }

    /// All provider configs, in no particular order.
    pub fn list_providers(&self) -> Vec<ProviderConfig> {
        self.read().values().map(|p| p.config.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Highest-priority provider, ties broken by name.
    pub fn best_provider(&self) -> Option<ProviderConfig> {
        self.ranked(&ModelRequirements::default())
            .into_iter()
            .next()
            .map(|p| p.config.clone())
    }

    /// Providers that list `model`, highest priority first.
    pub fn find_providers_for_model(&self, model: &str) -> Vec<ProviderConfig> {
        self.ranked(&ModelRequirements::model(model))
            .into_iter()
            .map(|p| p.config.clone())
            .collect()
    }

    /// Pick the highest-priority candidate. If it lists no models the
    /// result is `None`; the next provider is not consulted.
    pub fn select_model(&self, requirements: &ModelRequirements) -> Option<ModelRef> {
        let ranked = self.ranked(requirements);
        let top = ranked.first()?;

        let model = match &requirements.model {
            Some(model) => model.clone(),
            None => match top.default_model() {
                Some(model) => model.to_string(),
                None => {
                    tracing::debug!(
                        provider = %top.name(),
                        "Top-priority provider lists no models"
                    );
                    return None;
                }
            },
        };

        Some(ModelRef::new(top.name(), model))
    }

    fn ranked(&self, requirements: &ModelRequirements) -> Vec<Arc<RegisteredProvider>> {
        let mut candidates: Vec<Arc<RegisteredProvider>> = self
            .read()
            .values()
            .filter(|p| {
                requirements
                    .provider
                    .as_ref()
                    .is_none_or(|name| &p.config.name == name)
            })
            .filter(|p| {
                requirements
                    .model
                    .as_ref()
                    .is_none_or(|model| p.config.models.contains(model))
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.config
                .priority
                .cmp(&a.config.priority)
                .then_with(|| a.config.name.cmp(&b.config.name))
        });
        candidates
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegisteredProvider>>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use pretty_assertions::assert_eq;

    fn backend(name: &str) -> Arc<dyn ModelProvider> {
        Arc::new(MockProvider::echo(name))
    }

    fn config(name: &str, priority: u8, models: &[&str]) -> ProviderConfig {
        ProviderConfig::new(name, "test-api-key")
            .with_priority(priority)
            .with_models(models.iter().copied())
    }

    #[test]
    fn test_add_and_get_provider() {
        let registry = ProviderRegistry::new();
        let cfg = config("test-provider", 50, &["model-1", "model-2"]);
        registry
            .add_provider(cfg.clone(), backend("test-provider"))
            .unwrap();

        let got = registry.get_provider("test-provider").unwrap();
        assert_eq!(got.config, cfg);
        assert_eq!(got.default_model(), Some("model-1"));
    }

    #[test]
    fn test_get_unknown_provider_is_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.get_provider("missing").is_none());
    }

    #[test]
    fn test_add_replaces_by_name() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("a", 10, &["old"]), backend("a"))
            .unwrap();
        registry
            .add_provider(config("a", 90, &["new"]), backend("a"))
            .unwrap();

        assert_eq!(registry.len(), 1);
        let got = registry.get_provider("a").unwrap();
        assert_eq!(got.config.priority, 90);
        assert_eq!(got.config.models, vec!["new".to_string()]);
    }

    #[test]
    fn test_add_rejects_empty_api_key() {
        let registry = ProviderRegistry::new();
        let result = registry.add_provider(ProviderConfig::new("a", ""), backend("a"));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_clamps_priority() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("a", 200, &["m"]), backend("a"))
            .unwrap();
        assert_eq!(registry.get_provider("a").unwrap().config.priority, 100);
    }

    #[test]
    fn test_list_providers() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("a", 10, &["m"]), backend("a"))
            .unwrap();
        registry
            .add_provider(config("b", 20, &["m"]), backend("b"))
            .unwrap();

        let mut names: Vec<String> = registry
            .list_providers()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_remove_provider() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("a", 10, &["m"]), backend("a"))
            .unwrap();
        assert!(registry.remove_provider("a"));
        assert!(!registry.remove_provider("a"));
        assert!(registry.get_provider("a").is_none());
    }

    // ─── select_model ───────────────────────────────────────────

    #[test]
    fn test_select_model_highest_priority_first_model() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("A", 80, &["a-large", "a-small"]), backend("A"))
            .unwrap();
        registry
            .add_provider(config("B", 40, &["b-large"]), backend("B"))
            .unwrap();

        let selection = registry.select_model(&ModelRequirements::default()).unwrap();
        assert_eq!(selection, ModelRef::new("A", "a-large"));
    }

    #[test]
    fn test_select_model_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.select_model(&ModelRequirements::default()).is_none());
    }

    #[test]
    fn test_select_model_top_provider_without_models_is_none() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("A", 90, &[]), backend("A"))
            .unwrap();
        registry
            .add_provider(config("B", 10, &["b-model"]), backend("B"))
            .unwrap();

        // No fall-through to B.
        assert!(registry.select_model(&ModelRequirements::default()).is_none());
    }

    #[test]
    fn test_select_model_tie_breaks_by_name() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("zeta", 50, &["z"]), backend("zeta"))
            .unwrap();
        registry
            .add_provider(config("alpha", 50, &["a"]), backend("alpha"))
            .unwrap();

        let selection = registry.select_model(&ModelRequirements::default()).unwrap();
        assert_eq!(selection.provider, "alpha");
    }

    #[test]
    fn test_select_model_by_model_requirement() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("A", 80, &["shared", "a-only"]), backend("A"))
            .unwrap();
        registry
            .add_provider(config("B", 40, &["b-only"]), backend("B"))
            .unwrap();

        let selection = registry
            .select_model(&ModelRequirements::model("b-only"))
            .unwrap();
        assert_eq!(selection, ModelRef::new("B", "b-only"));

        assert!(registry
            .select_model(&ModelRequirements::model("nobody-has-this"))
            .is_none());
    }

    #[test]
    fn test_select_model_by_provider_requirement() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("A", 80, &["a-model"]), backend("A"))
            .unwrap();
        registry
            .add_provider(config("B", 40, &["b-model"]), backend("B"))
            .unwrap();

        let selection = registry
            .select_model(&ModelRequirements::provider("B"))
            .unwrap();
        assert_eq!(selection, ModelRef::new("B", "b-model"));
    }

    #[test]
    fn test_best_provider_and_find_for_model() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(config("low", 10, &["m"]), backend("low"))
            .unwrap();
        registry
            .add_provider(config("high", 70, &["m", "x"]), backend("high"))
            .unwrap();

        assert_eq!(registry.best_provider().unwrap().name, "high");
        let names: Vec<String> = registry
            .find_providers_for_model("m")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["high".to_string(), "low".to_string()]);
        assert_eq!(registry.find_providers_for_model("x").len(), 1);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(ProviderRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let name = format!("p{i}");
                    registry
                        .add_provider(config(&name, i as u8, &["m"]), backend(&name))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.best_provider().unwrap().name, "p7");
    }
}

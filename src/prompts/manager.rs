// src/prompts/manager.rs — Prompt module catalog with cached rendering

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use super::cache::{CacheKey, CacheStats, RenderCache};
use super::template::render_template;
use super::{Context, PromptModule, RenderedPrompt};
use crate::infra::config::CacheConfig;
use crate::infra::errors::{DraftloomError, Result};

/// Owns the module catalog and a bounded render cache. Rendering never
/// mutates a stored module; the cache is the only state that changes.
///
/// Lock order is always cache, then modules, so a render can never cache
/// output for a definition that was replaced underneath it.
pub struct PromptModuleManager {
    modules: RwLock<HashMap<String, PromptModule>>,
    cache: Mutex<RenderCache>,
}

impl Default for PromptModuleManager {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl PromptModuleManager {
    pub fn new(max_modules: usize, ttl: Duration) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            cache: Mutex::new(RenderCache::new(max_modules, ttl)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_modules, Duration::from_secs(config.ttl_seconds))
    }

    /// Insert or replace by id. Replacing with a different definition drops
    /// that module's cached renders.
    pub fn add_module(&self, module: PromptModule) -> Result<()> {
        module.validate()?;
        let id = module.id.clone();
        let mut cache = self.cache();
        let previous = self
            .modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), module.clone());

        if previous.is_some_and(|prev| prev != module) {
            let dropped = cache.remove_module(&id);
            tracing::debug!(module = %id, dropped, "Module replaced, cache invalidated");
        }
        Ok(())
    }

    pub fn get_module(&self, id: &str) -> Option<PromptModule> {
        self.read_modules().get(id).cloned()
    }

    pub fn remove_module(&self, id: &str) -> bool {
        let mut cache = self.cache();
        cache.remove_module(id);
        self.modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
            .is_some()
    }

    /// All modules, sorted by id.
    pub fn list_modules(&self) -> Vec<PromptModule> {
        let mut modules: Vec<PromptModule> = self.read_modules().values().cloned().collect();
        modules.sort_by(|a, b| a.id.cmp(&b.id));
        modules
    }

    pub fn render_module(&self, id: &str, context: &Context) -> Result<Arc<RenderedPrompt>> {
        self.render_module_at(id, context, Instant::now())
    }

    /// Render as of `now`: a live cache entry is returned as-is, otherwise
    /// the templates are substituted and the result stored.
    pub fn render_module_at(
        &self,
        id: &str,
        context: &Context,
        now: Instant,
    ) -> Result<Arc<RenderedPrompt>> {
        let mut cache = self.cache();
        let module = self
            .get_module(id)
            .ok_or_else(|| DraftloomError::ModuleNotFound { id: id.to_string() })?;

        let key = CacheKey::new(id, context);
        if let Some(hit) = cache.get_at(&key, now) {
            return Ok(hit);
        }

        let rendered = Arc::new(RenderedPrompt {
            module_id: module.id.clone(),
            system_prompt: render_template(&module.system_prompt, context),
            user_prompt: render_template(&module.user_template, context),
            stop_criteria: module.stop_criteria.clone(),
        });
        cache.insert_at(key, rendered.clone(), now);
        Ok(rendered)
    }

    pub fn clear_module_cache(&self, id: &str) {
        self.cache().remove_module(id);
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn set_cache_ttl(&self, ttl_seconds: u64) {
        self.cache().set_ttl(Duration::from_secs(ttl_seconds));
    }

    pub fn purge_expired(&self) -> usize {
        self.cache().purge_expired(Instant::now())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    /// Load a JSON (`.json`) or YAML (`.yaml`/`.yml`) array of modules.
    /// Nothing is registered unless every module validates.
    pub fn load_catalog(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let modules = parse_catalog(&content, path)?;
        for module in &modules {
            module.validate()?;
        }
        let count = modules.len();
        for module in modules {
            self.add_module(module)?;
        }
        tracing::info!(count, path = %path.display(), "Loaded prompt modules");
        Ok(count)
    }

    fn read_modules(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PromptModule>> {
        self.modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, RenderCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_catalog(content: &str, path: &Path) -> Result<Vec<PromptModule>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| {
            DraftloomError::Config(format!("{}: invalid module catalog: {e}", path.display()))
        }),
        _ => Ok(serde_json::from_str(content)?),
    }
}

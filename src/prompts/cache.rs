// src/prompts/cache.rs — Bounded render cache (arena slots + LRU + TTL)
//
// Entries live in a slot arena indexed by a content-addressed key: the
// SHA-256 of the module id and the canonical JSON of the context. Expired
// entries are treated as absent on read. Eviction is an explicit operation;
// `insert` calls it only when the cache is full.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use super::{Context, RenderedPrompt};

/// Hex SHA-256 of `(module_id, context)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `serde_json::Map` iterates in key order, so the serialization is canonical.
    pub fn new(module_id: &str, context: &Context) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(module_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::Value::Object(context.clone()).to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Slot {
    key: CacheKey,
    module_id: String,
    value: Arc<RenderedPrompt>,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
pub struct RenderCache {
    slots: Vec<Option<Slot>>,
    index: HashMap<CacheKey, usize>,
    free: Vec<usize>,
    max_entries: usize,
    ttl: Duration,
    tick: u64,
    stats: CacheStats,
}

impl RenderCache {
    /// `max_entries` is raised to 1 if zero.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            max_entries: max_entries.max(1),
            ttl,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            ..self.stats
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<RenderedPrompt>> {
        self.get_at(key, Instant::now())
    }

    /// Lookup as of `now`. A hit refreshes recency; an expired entry is
    /// dropped and reported as a miss.
    pub fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<Arc<RenderedPrompt>> {
        let Some(&idx) = self.index.get(key) else {
            self.stats.misses += 1;
            return None;
        };

        let expired = self.slots[idx]
            .as_ref()
            .is_none_or(|slot| self.is_expired(slot, now));
        if expired {
            self.remove_slot(idx);
            self.stats.misses += 1;
            return None;
        }

        let tick = self.next_tick();
        let slot = self.slots[idx].as_mut()?;
        slot.last_used = tick;
        self.stats.hits += 1;
        Some(slot.value.clone())
    }

    pub fn insert(&mut self, key: CacheKey, value: Arc<RenderedPrompt>) -> Option<CacheKey> {
        self.insert_at(key, value, Instant::now())
    }

    /// Store `value` as of `now`. Returns the key evicted to make room, if any.
    pub fn insert_at(
        &mut self,
        key: CacheKey,
        value: Arc<RenderedPrompt>,
        now: Instant,
    ) -> Option<CacheKey> {
        let tick = self.next_tick();
        let module_id = value.module_id.clone();

        if let Some(&idx) = self.index.get(&key) {
            self.slots[idx] = Some(Slot {
                key,
                module_id,
                value,
                stored_at: now,
                last_used: tick,
            });
            return None;
        }

        let evicted = if self.len() >= self.max_entries {
            self.evict_lru()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            module_id,
            value,
            stored_at: now,
            last_used: tick,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        evicted
    }

    /// Remove the least-recently-used entry.
    pub fn evict_lru(&mut self) -> Option<CacheKey> {
        let idx = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.last_used)))
            .min_by_key(|&(_, used)| used)
            .map(|(i, _)| i)?;

        let slot = self.remove_slot(idx)?;
        self.stats.evictions += 1;
        tracing::debug!(module = %slot.module_id, key = %slot.key.as_str(), "Evicted LRU render");
        Some(slot.key)
    }

    /// Drop every expired entry as of `now`. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| self.is_expired(s, now)).map(|_| i))
            .collect();
        for &idx in &expired {
            self.remove_slot(idx);
        }
        expired.len()
    }

    /// Drop every entry rendered from `module_id`.
    pub fn remove_module(&mut self, module_id: &str) -> usize {
        let matching: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.module_id == module_id).map(|_| i))
            .collect();
        for &idx in &matching {
            self.remove_slot(idx);
        }
        matching.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        now.saturating_duration_since(slot.stored_at) >= self.ttl
    }

    fn remove_slot(&mut self, idx: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&slot.key);
        self.free.push(idx);
        Some(slot)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

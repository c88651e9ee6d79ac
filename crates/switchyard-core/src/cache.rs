//! LRU+TTL response cache keyed by (prompt, command, agent, model).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_models::{now_ms, CacheEntry, CacheStats};
use switchyard_storage::{keys, KvStore};
use tracing::{debug, warn};

/// Outcome of a key lookup.
#[derive(Debug, PartialEq)]
pub enum CacheLookup {
    Found(String),
    /// The entry existed but its TTL had elapsed; it has been evicted.
    Expired,
    Absent,
}

/// Cache tuning, host-settings driven.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 200,
            ttl_ms: 600_000,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Rendered-response cache.
///
/// The agent id always participates in the key, so one agent can never be
/// served another agent's output for the same prompt. Expired entries are
/// evicted lazily on read; at capacity the entry with the lowest blended
/// age/popularity score is evicted first. Contents are durable through
/// the host's opaque KV facility.
pub struct ResponseCache {
    state: Mutex<CacheState>,
    config: Mutex<CacheConfig>,
    kv: Option<Arc<dyn KvStore>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, kv: Option<Arc<dyn KvStore>>) -> Self {
        let cache = Self {
            state: Mutex::new(CacheState::default()),
            config: Mutex::new(config),
            kv,
        };
        cache.load();
        cache
    }

    /// Ordered key: normalized prompt, then command, agent, and model
    /// segments.
    pub fn make_key(
        prompt: &str,
        command: Option<&str>,
        agent_id: &str,
        model_id: Option<&str>,
    ) -> String {
        let mut key = prompt.trim().to_lowercase();
        if let Some(command) = command {
            key.push_str("|cmd:");
            key.push_str(command);
        }
        key.push_str("|agent:");
        key.push_str(agent_id);
        if let Some(model_id) = model_id {
            key.push_str("|model:");
            key.push_str(model_id);
        }
        key
    }

    pub fn configure(&self, config: CacheConfig) {
        *self.config.lock() = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.lock().enabled
    }

    /// Classified lookup. Counts one hit or one miss (expired counts as a
    /// miss) and bumps the entry's popularity on a hit.
    pub fn lookup(&self, key: &str) -> CacheLookup {
        if !self.is_enabled() {
            return CacheLookup::Absent;
        }

        let now = now_ms();
        let mut state = self.state.lock();
        let status = state.entries.get(key).map(|entry| entry.is_expired(now));
        match status {
            None => {
                state.misses += 1;
                CacheLookup::Absent
            }
            Some(true) => {
                state.entries.remove(key);
                state.misses += 1;
                drop(state);
                self.persist();
                CacheLookup::Expired
            }
            Some(false) => {
                state.hits += 1;
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.hit_count += 1;
                    return CacheLookup::Found(entry.value.clone());
                }
                CacheLookup::Absent
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.lookup(key) {
            CacheLookup::Found(value) => Some(value),
            CacheLookup::Expired | CacheLookup::Absent => None,
        }
    }

    pub fn set(&self, key: &str, value: &str, agent_id: &str, model_id: Option<&str>) {
        let config = *self.config.lock();
        if !config.enabled {
            return;
        }

        let entry = CacheEntry::new(
            key,
            value,
            config.ttl_ms,
            agent_id,
            model_id.map(str::to_string),
        );

        {
            let mut state = self.state.lock();
            if !state.entries.contains_key(key) && state.entries.len() >= config.max_entries
            {
                Self::evict_coldest(&mut state.entries);
            }
            state.entries.insert(key.to_string(), entry);
        }
        self.persist();
    }

    /// Drop the entry with the lowest retention score (oldest, least hit).
    fn evict_coldest(entries: &mut HashMap<String, CacheEntry>) {
        let coldest = entries
            .values()
            .min_by_key(|entry| entry.retention_score())
            .map(|entry| entry.key.clone());
        if let Some(key) = coldest {
            debug!(key = %key, "evicting cache entry at capacity");
            entries.remove(&key);
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.state.lock().entries.remove(key).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Remove every entry produced by one agent.
    pub fn invalidate_by_agent(&self, agent_id: &str) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|_, entry| entry.agent_id != agent_id);
            before - state.entries.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
        self.persist();
    }

    /// Evict everything past its TTL.
    pub fn prune(&self) -> usize {
        let now = now_ms();
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|_, entry| !entry.is_expired(now));
            before - state.entries.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        let hit_rate_percent = if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64 * 100.0
        };
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate_percent,
        }
    }

    fn load(&self) {
        let Some(kv) = &self.kv else { return };
        let payload = match kv.get(keys::RESPONSE_CACHE) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(error) => {
                warn!(error = %error, "failed to read persisted cache");
                return;
            }
        };

        match serde_json::from_str::<Vec<(String, CacheEntry)>>(&payload) {
            Ok(pairs) => {
                let mut state = self.state.lock();
                state.entries = pairs.into_iter().collect();
            }
            Err(error) => {
                warn!(error = %error, "persisted cache is corrupt; starting empty");
            }
        }
    }

    fn persist(&self) {
        let Some(kv) = &self.kv else { return };
        let pairs: Vec<(String, CacheEntry)> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };
        match serde_json::to_string(&pairs) {
            Ok(payload) => {
                if let Err(error) = kv.set(keys::RESPONSE_CACHE, &payload) {
                    warn!(error = %error, "failed to persist cache");
                }
            }
            Err(error) => warn!(error = %error, "failed to serialize cache"),
        }
    }
}

//! Persistent per-agent memory with deterministic pruning.

use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_models::{now_ms, MemoryKind, MemoryRecord, MemoryStats, RecallFilter};
use switchyard_storage::{keys, KvStore};
use tracing::warn;

/// Per-agent fact store.
///
/// Records live in memory and write through to the host's KV facility
/// under one `memory.<agentId>` key per agent. A persistence failure is
/// logged and surfaced as a warning; the in-memory mutation stands.
pub struct MemoryStore {
    records: Mutex<Vec<MemoryRecord>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl MemoryStore {
    pub fn new(kv: Option<Arc<dyn KvStore>>) -> Self {
        let store = Self {
            records: Mutex::new(Vec::new()),
            kv,
        };
        store.load();
        store
    }

    pub fn remember(
        &self,
        agent_id: &str,
        content: &str,
        tags: Vec<String>,
        kind: MemoryKind,
    ) -> MemoryRecord {
        let record = MemoryRecord::new(agent_id, content)
            .with_tags(tags)
            .with_kind(kind);
        self.records.lock().push(record.clone());
        self.persist_agent(agent_id);
        record
    }

    /// Most-recent-first records for one agent. Recalled records get
    /// their `accessed_at` bumped, which is what keeps them alive under
    /// LRU pruning.
    pub fn recall(&self, agent_id: &str, filter: &RecallFilter) -> Vec<MemoryRecord> {
        let now = now_ms();
        let mut matched: Vec<MemoryRecord> = {
            let mut records = self.records.lock();
            let mut matched = Vec::new();
            for record in records.iter_mut() {
                if record.agent_id != agent_id {
                    continue;
                }
                if let Some(kind) = filter.kind {
                    if record.kind != kind {
                        continue;
                    }
                }
                if let Some(tag) = &filter.tag {
                    if !record.tags.iter().any(|t| t == tag) {
                        continue;
                    }
                }
                record.accessed_at = now;
                matched.push(record.clone());
            }
            matched
        };

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        self.persist_agent(agent_id);
        matched
    }

    /// Substring search over content and tags, across all agents.
    /// Ranked by match strength, then recency.
    pub fn search(&self, query: &str) -> Vec<MemoryRecord> {
        let needle = query.to_lowercase();
        let mut scored: Vec<(usize, MemoryRecord)> = self
            .records
            .lock()
            .iter()
            .filter(|record| record.matches(query))
            .map(|record| {
                let content_hits = record.content.to_lowercase().matches(&needle).count();
                let tag_hits = record
                    .tags
                    .iter()
                    .filter(|tag| tag.to_lowercase().contains(&needle))
                    .count();
                (content_hits + tag_hits * 2, record.clone())
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.created_at.cmp(&a.1.created_at))
        });
        scored.into_iter().map(|(_, record)| record).collect()
    }

    /// Deterministic eviction: first everything older than `max_age_ms`,
    /// then least-recently-accessed records until at most `max_count`
    /// remain. A second call with no intervening writes evicts nothing.
    pub fn prune(&self, max_age_ms: Option<i64>, max_count: Option<usize>) -> usize {
        let now = now_ms();
        let (evicted, touched_agents) = {
            let mut records = self.records.lock();
            let before = records.len();
            let mut touched: Vec<String> = Vec::new();

            if let Some(max_age) = max_age_ms {
                let cutoff = now - max_age;
                records.retain(|record| {
                    let keep = record.created_at >= cutoff;
                    if !keep {
                        touched.push(record.agent_id.clone());
                    }
                    keep
                });
            }

            if let Some(max_count) = max_count {
                if records.len() > max_count {
                    records.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
                    for record in records.drain(max_count..) {
                        touched.push(record.agent_id);
                    }
                }
            }

            touched.sort();
            touched.dedup();
            (before - records.len(), touched)
        };

        for agent_id in &touched_agents {
            self.persist_agent(agent_id);
        }
        evicted
    }

    pub fn clear(&self) {
        let agent_ids: Vec<String> = {
            let mut records = self.records.lock();
            let mut ids: Vec<String> =
                records.iter().map(|r| r.agent_id.clone()).collect();
            ids.sort();
            ids.dedup();
            records.clear();
            ids
        };

        if let Some(kv) = &self.kv {
            for agent_id in agent_ids {
                if let Err(error) = kv.remove(&keys::memory(&agent_id)) {
                    warn!(agent_id = %agent_id, error = %error, "failed to clear persisted memory");
                }
            }
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let records = self.records.lock();
        let mut stats = MemoryStats {
            total_records: records.len(),
            ..MemoryStats::default()
        };
        for record in records.iter() {
            *stats
                .per_agent_counts
                .entry(record.agent_id.clone())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Concatenate the most recent records for an agent, newest first,
    /// stopping at the character budget.
    pub fn build_context_window(&self, agent_id: &str, max_chars: usize) -> String {
        let mut recent: Vec<MemoryRecord> = self
            .records
            .lock()
            .iter()
            .filter(|record| record.agent_id == agent_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut window = String::new();
        for record in recent {
            let line = format!("- {}\n", record.content);
            if window.len() + line.len() > max_chars {
                break;
            }
            window.push_str(&line);
        }
        window
    }

    fn load(&self) {
        let Some(kv) = &self.kv else { return };
        let agent_keys = match kv.keys(keys::memory_prefix()) {
            Ok(agent_keys) => agent_keys,
            Err(error) => {
                warn!(error = %error, "failed to list persisted memory");
                return;
            }
        };

        let mut records = self.records.lock();
        for key in agent_keys {
            match kv.get(&key) {
                Ok(Some(payload)) => match serde_json::from_str::<Vec<MemoryRecord>>(&payload)
                {
                    Ok(loaded) => records.extend(loaded),
                    Err(error) => {
                        warn!(key = %key, error = %error, "persisted memory is corrupt; skipping key")
                    }
                },
                Ok(None) => {}
                Err(error) => warn!(key = %key, error = %error, "failed to read persisted memory"),
            }
        }
    }

    fn persist_agent(&self, agent_id: &str) {
        let Some(kv) = &self.kv else { return };
        let agent_records: Vec<MemoryRecord> = self
            .records
            .lock()
            .iter()
            .filter(|record| record.agent_id == agent_id)
            .cloned()
            .collect();

        let key = keys::memory(agent_id);
        if agent_records.is_empty() {
            if let Err(error) = kv.remove(&key) {
                warn!(agent_id, error = %error, "failed to remove persisted memory");
            }
            return;
        }

        match serde_json::to_string(&agent_records) {
            Ok(payload) => {
                if let Err(error) = kv.set(&key, &payload) {
                    warn!(agent_id, error = %error, "failed to persist memory");
                }
            }
            Err(error) => warn!(agent_id, error = %error, "failed to serialize memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_storage::MemoryKvStore;

    fn store() -> MemoryStore {
        MemoryStore::new(None)
    }

    #[test]
    fn test_remember_then_recall() {
        let store = store();
        store.remember("code", "uses rustfmt defaults", vec![], MemoryKind::Fact);
        store.remember("docs", "prefers short sentences", vec![], MemoryKind::Fact);

        let recalled = store.recall("code", &RecallFilter::default());
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].content, "uses rustfmt defaults");
    }

    #[test]
    fn test_recall_is_most_recent_first_and_respects_filters() {
        let store = store();
        let first = store.remember("a", "first", vec![], MemoryKind::Fact);
        {
            // Force distinct creation times without sleeping.
            let mut records = store.records.lock();
            if let Some(record) = records.iter_mut().find(|r| r.id == first.id) {
                record.created_at -= 10;
            }
        }
        store.remember("a", "second", vec!["pin".to_string()], MemoryKind::Decision);

        let all = store.recall("a", &RecallFilter::default());
        assert_eq!(all[0].content, "second");
        assert_eq!(all[1].content, "first");

        let decisions = store.recall(
            "a",
            &RecallFilter {
                kind: Some(MemoryKind::Decision),
                ..RecallFilter::default()
            },
        );
        assert_eq!(decisions.len(), 1);

        let tagged = store.recall(
            "a",
            &RecallFilter {
                tag: Some("pin".to_string()),
                ..RecallFilter::default()
            },
        );
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].content, "second");
    }

    #[test]
    fn test_search_ranks_tag_matches_higher() {
        let store = store();
        store.remember("a", "mentions rust once", vec![], MemoryKind::Fact);
        store.remember(
            "b",
            "unrelated content",
            vec!["rust".to_string()],
            MemoryKind::Fact,
        );

        let results = store.search("rust");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_id, "b");
    }

    #[test]
    fn test_prune_by_age_then_count_is_fixed_point() {
        let store = store();
        for index in 0..5_i64 {
            let record = store.remember("a", &format!("item {index}"), vec![], MemoryKind::Fact);
            let mut records = store.records.lock();
            if let Some(stored) = records.iter_mut().find(|r| r.id == record.id) {
                stored.created_at -= (5 - index) * 1_000;
                stored.accessed_at = stored.created_at;
            }
        }

        // Age threshold removes the two oldest, count removes one more.
        let evicted = store.prune(Some(3_500), Some(2));
        assert_eq!(evicted, 3);
        assert_eq!(store.stats().total_records, 2);

        assert_eq!(store.prune(Some(3_500), Some(2)), 0);
    }

    #[test]
    fn test_prune_keeps_recently_accessed_records() {
        let store = store();
        let keep = store.remember("a", "keep me", vec![], MemoryKind::Fact);
        let drop_record = store.remember("a", "drop me", vec![], MemoryKind::Fact);
        {
            let mut records = store.records.lock();
            for record in records.iter_mut() {
                record.accessed_at = if record.id == keep.id { 2_000 } else { 1_000 };
            }
            let _ = drop_record;
        }

        assert_eq!(store.prune(None, Some(1)), 1);
        let remaining = store.recall("a", &RecallFilter::default());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "keep me");
    }

    #[test]
    fn test_context_window_honors_char_budget() {
        let store = store();
        store.remember("a", "alpha fact", vec![], MemoryKind::Fact);
        store.remember("a", "beta fact", vec![], MemoryKind::Fact);

        let window = store.build_context_window("a", 1_000);
        assert!(window.contains("alpha fact"));
        assert!(window.contains("beta fact"));

        let tight = store.build_context_window("a", 13);
        assert_eq!(tight.lines().count(), 1);
    }

    #[test]
    fn test_persists_per_agent_and_reloads() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        {
            let store = MemoryStore::new(Some(kv.clone()));
            store.remember("code", "persisted fact", vec![], MemoryKind::Fact);
        }

        assert!(kv.get("memory.code").unwrap().is_some());

        let revived = MemoryStore::new(Some(kv.clone()));
        let recalled = revived.recall("code", &RecallFilter::default());
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].content, "persisted fact");

        revived.clear();
        assert!(kv.get("memory.code").unwrap().is_none());
    }

    #[test]
    fn test_stats_counts_per_agent() {
        let store = store();
        store.remember("a", "1", vec![], MemoryKind::Fact);
        store.remember("a", "2", vec![], MemoryKind::Fact);
        store.remember("b", "3", vec![], MemoryKind::Fact);

        let stats = store.stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.per_agent_counts.get("a"), Some(&2));
        assert_eq!(stats.per_agent_counts.get("b"), Some(&1));
    }
}

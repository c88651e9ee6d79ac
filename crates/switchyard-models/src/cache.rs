//! Response cache entry and statistics.

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// A cached rendered response.
///
/// Entries are scoped to the agent that produced them: the agent id is
/// part of the cache key, so two agents can never serve each other's
/// output for the same prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// Rendered markdown.
    pub value: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    pub expires_at: i64,
    pub hit_count: u64,
    pub agent_id: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        ttl_ms: i64,
        agent_id: impl Into<String>,
        model_id: Option<String>,
    ) -> Self {
        let created_at = now_ms();
        Self {
            key: key.into(),
            value: value.into(),
            created_at,
            expires_at: created_at + ttl_ms,
            hit_count: 0,
            agent_id: agent_id.into(),
            model_id,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Blended age/popularity score used at eviction time. Lower is
    /// colder: an old entry with few hits loses to a fresh or popular one.
    pub fn retention_score(&self) -> i64 {
        self.created_at + (self.hit_count as i64) * 60_000
    }
}

/// Aggregate cache counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

//! Per-agent long-lived memory records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// What kind of knowledge a record holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Fact,
    Decision,
    Context,
}

/// One remembered item for an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub agent_id: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Bumped on every recall; drives LRU pruning.
    pub accessed_at: i64,
    #[serde(default)]
    pub kind: MemoryKind,
}

impl MemoryRecord {
    pub fn new(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: now,
            accessed_at: now,
            kind: MemoryKind::Fact,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Case-insensitive substring match over content and tags.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.content.to_lowercase().contains(&needle)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
    }
}

/// Filter applied by `recall`.
#[derive(Debug, Clone, Default)]
pub struct RecallFilter {
    pub kind: Option<MemoryKind>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

/// Store-wide counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryStats {
    pub total_records: usize,
    pub per_agent_counts: BTreeMap<String, usize>,
}

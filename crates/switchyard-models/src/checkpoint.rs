//! File-state checkpoints backing autonomous-agent rollback.

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Lifecycle of a checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Open,
    Committed,
    RolledBack,
}

/// Pre-mutation state of one file.
///
/// `original_content` is `None` either because the file did not exist
/// before the checkpoint (`existed_before == false`, rollback deletes it)
/// or because capture failed and rollback for this path is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSnapshot {
    /// Workspace-relative path.
    pub path: String,
    #[serde(default)]
    pub original_content: Option<String>,
    pub existed_before: bool,
}

/// Snapshot of everything an autonomous invocation touched.
///
/// A committed checkpoint keeps its snapshots so an explicit undo can
/// still synthesize the reverse operation later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub agent_id: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    #[serde(default)]
    pub files: Vec<FileSnapshot>,
    pub status: CheckpointStatus,
}

impl Checkpoint {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            created_at: now_ms(),
            files: Vec::new(),
            status: CheckpointStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CheckpointStatus::Open
    }

    /// Whether this checkpoint already captured state for `path`.
    pub fn has_snapshot(&self, path: &str) -> bool {
        self.files.iter().any(|snapshot| snapshot.path == path)
    }
}

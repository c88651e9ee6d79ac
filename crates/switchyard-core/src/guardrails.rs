//! Checkpoints, rollback, dry-run rendering, and destructive-op
//! confirmation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_models::{Checkpoint, CheckpointStatus, FileSnapshot};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::stream::OutputStream;

/// Host-provided confirmation dialog for destructive operations.
///
/// The dispatcher starts its timing clock only after `confirm` resolves,
/// so dialog time never counts against the agent.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, description: &str) -> bool;
}

/// Approves everything; hosts without a dialog use this.
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _description: &str) -> bool {
        true
    }
}

/// A file or shell operation described before execution, for dry-run
/// rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedOp {
    Create { path: String, bytes: usize },
    Edit { path: String },
    Delete { path: String },
    Command { line: String },
}

/// Snapshot store for autonomous invocations.
///
/// One open checkpoint per invocation: the executor announces each file
/// before mutating it (original content captured lazily on first touch),
/// the dispatcher commits on success or rolls back on failure. Committed
/// checkpoints keep their snapshots so an explicit undo can still reverse
/// them.
pub struct CheckpointStore {
    root: PathBuf,
    checkpoints: Mutex<Vec<Checkpoint>>,
    enabled: AtomicBool,
    dry_run: AtomicBool,
    confirm_destructive: AtomicBool,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checkpoints: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
            dry_run: AtomicBool::new(false),
            confirm_destructive: AtomicBool::new(true),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_dry_run(&self, dry_run: bool) {
        self.dry_run.store(dry_run, Ordering::SeqCst);
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    pub fn set_confirm_destructive(&self, confirm: bool) {
        self.confirm_destructive.store(confirm, Ordering::SeqCst);
    }

    pub fn confirms_destructive(&self) -> bool {
        self.confirm_destructive.load(Ordering::SeqCst)
    }

    pub fn create_checkpoint(&self, agent_id: &str) -> Result<String> {
        let checkpoint = Checkpoint::new(agent_id);
        let id = checkpoint.id.clone();
        self.checkpoints.lock().push(checkpoint);
        debug!(agent_id, checkpoint_id = %id, "checkpoint opened");
        Ok(id)
    }

    /// Capture a file's pre-mutation state, once per path. Called by the
    /// executor before the first write to each path.
    pub fn record_original(&self, checkpoint_id: &str, relative_path: &str) -> Result<()> {
        let absolute = self.root.join(relative_path);
        let existed = absolute.exists();
        let original_content = if existed {
            match std::fs::read_to_string(&absolute) {
                Ok(content) => Some(content),
                Err(error) => {
                    warn!(path = relative_path, error = %error, "could not capture original content");
                    None
                }
            }
        } else {
            None
        };

        let mut checkpoints = self.checkpoints.lock();
        let checkpoint = Self::find_open(&mut checkpoints, checkpoint_id)?;
        if checkpoint.has_snapshot(relative_path) {
            return Ok(());
        }
        checkpoint.files.push(FileSnapshot {
            path: relative_path.to_string(),
            original_content,
            existed_before: existed,
        });
        Ok(())
    }

    /// Fold in files the handler reported as affected. New paths are
    /// recorded as created (their original state is absence).
    pub fn mark_created(&self, checkpoint_id: &str, files: &[String]) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock();
        let checkpoint = Self::find_open(&mut checkpoints, checkpoint_id)?;
        for path in files {
            if !checkpoint.has_snapshot(path) {
                checkpoint.files.push(FileSnapshot {
                    path: path.clone(),
                    original_content: None,
                    existed_before: false,
                });
            }
        }
        Ok(())
    }

    pub fn commit(&self, checkpoint_id: &str) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock();
        let checkpoint = Self::find_open(&mut checkpoints, checkpoint_id)?;
        checkpoint.status = CheckpointStatus::Committed;
        debug!(checkpoint_id, "checkpoint committed");
        Ok(())
    }

    /// Restore every captured path to its pre-checkpoint state,
    /// best-effort: edited files get their content back, created files
    /// are deleted, capture failures are skipped with a warning.
    pub fn rollback(&self, checkpoint_id: &str) -> Result<bool> {
        let snapshot = {
            let mut checkpoints = self.checkpoints.lock();
            let checkpoint = checkpoints
                .iter_mut()
                .find(|checkpoint| checkpoint.id == checkpoint_id)
                .ok_or_else(|| {
                    CoreError::Checkpoint(format!("unknown checkpoint {checkpoint_id}"))
                })?;
            if checkpoint.status == CheckpointStatus::RolledBack {
                return Ok(false);
            }
            checkpoint.status = CheckpointStatus::RolledBack;
            checkpoint.clone()
        };

        for file in snapshot.files.iter().rev() {
            let absolute = self.root.join(&file.path);
            if file.existed_before {
                match &file.original_content {
                    Some(content) => {
                        if let Err(error) = std::fs::write(&absolute, content) {
                            warn!(path = %file.path, error = %error, "rollback write failed");
                        }
                    }
                    None => {
                        warn!(path = %file.path, "no captured content; leaving file as-is");
                    }
                }
            } else if absolute.exists() {
                if let Err(error) = std::fs::remove_file(&absolute) {
                    warn!(path = %file.path, error = %error, "rollback delete failed");
                }
            }
        }

        debug!(checkpoint_id, files = snapshot.files.len(), "checkpoint rolled back");
        Ok(true)
    }

    pub fn get(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.checkpoints
            .lock()
            .iter()
            .find(|checkpoint| checkpoint.id == checkpoint_id)
            .cloned()
    }

    /// Newest first.
    pub fn list_recent(&self, n: usize) -> Vec<Checkpoint> {
        let checkpoints = self.checkpoints.lock();
        checkpoints.iter().rev().take(n).cloned().collect()
    }

    /// Most recent committed checkpoint, for undo.
    pub fn latest_committed(&self) -> Option<String> {
        self.checkpoints
            .lock()
            .iter()
            .rev()
            .find(|checkpoint| checkpoint.status == CheckpointStatus::Committed)
            .map(|checkpoint| checkpoint.id.clone())
    }

    pub fn clear(&self) {
        self.checkpoints.lock().clear();
    }

    /// Render what would happen, without touching the filesystem.
    pub async fn dry_run(
        &self,
        ops: &[PlannedOp],
        target: Option<&Arc<dyn OutputStream>>,
    ) -> String {
        let mut rendered = String::from("Dry run. No changes were made:\n");
        for op in ops {
            let line = match op {
                PlannedOp::Create { path, bytes } => {
                    format!("- create `{path}` ({bytes} bytes)\n")
                }
                PlannedOp::Edit { path } => format!("- edit `{path}`\n"),
                PlannedOp::Delete { path } => format!("- delete `{path}`\n"),
                PlannedOp::Command { line } => format!("- run `{line}`\n"),
            };
            rendered.push_str(&line);
        }
        if let Some(stream) = target {
            stream.emit_markdown(&rendered).await;
        }
        rendered
    }

    fn find_open<'a>(
        checkpoints: &'a mut Vec<Checkpoint>,
        checkpoint_id: &str,
    ) -> Result<&'a mut Checkpoint> {
        let checkpoint = checkpoints
            .iter_mut()
            .find(|checkpoint| checkpoint.id == checkpoint_id)
            .ok_or_else(|| {
                CoreError::Checkpoint(format!("unknown checkpoint {checkpoint_id}"))
            })?;
        if !checkpoint.is_open() {
            return Err(CoreError::Checkpoint(format!(
                "checkpoint {checkpoint_id} is not open"
            )));
        }
        Ok(checkpoint)
    }
}

//! Bounded file and shell operations for autonomous agents.

mod diagnostics;
mod path;
mod preview;

pub use diagnostics::{Diagnostic, DiagnosticsProvider, Severity, StaticDiagnostics};
pub use path::resolve_within_root;
pub use preview::{ChangeKind, CollectedChange, DiffCollector, RecordingCollector};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{CoreError, Result};
use crate::guardrails::{CheckpointStore, PlannedOp};
use crate::stream::OutputStream;

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Options for [`AutonomousExecutor::run_command`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Workspace-relative working directory.
    pub cwd: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Captured subshell result.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Per-file outcome of an atomic batch create.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    Created,
    Failed(String),
    /// Created earlier in the batch, then removed when a later file
    /// failed.
    RolledBack,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub path: String,
    pub status: BatchStatus,
}

/// File and shell operations bounded by a step budget.
///
/// Reads are free; every mutation and every command consumes one step,
/// and an exhausted budget is a permanent error. All operations observe
/// the cancel token and validate paths against the workspace root. When
/// a diff collector is attached, mutations divert into it; when dry-run
/// is active, mutations render a description instead of touching disk.
pub struct AutonomousExecutor {
    root: PathBuf,
    token: CancelToken,
    budget: u32,
    remaining: Mutex<u32>,
    checkpoint: Option<(Arc<CheckpointStore>, String)>,
    collector: Option<Arc<dyn DiffCollector>>,
    diagnostics: Option<Arc<dyn DiagnosticsProvider>>,
    dry_run_target: Option<Arc<dyn OutputStream>>,
    touched: Mutex<Vec<String>>,
    command_timeout_ms: u64,
}

impl AutonomousExecutor {
    pub fn new(root: impl Into<PathBuf>, token: CancelToken, max_steps: u32) -> Self {
        Self {
            root: root.into(),
            token,
            budget: max_steps,
            remaining: Mutex::new(max_steps),
            checkpoint: None,
            collector: None,
            diagnostics: None,
            dry_run_target: None,
            touched: Mutex::new(Vec::new()),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }

    /// Announce mutations to this checkpoint before performing them.
    #[must_use]
    pub fn with_checkpoint(mut self, store: Arc<CheckpointStore>, checkpoint_id: String) -> Self {
        self.checkpoint = Some((store, checkpoint_id));
        self
    }

    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn DiffCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, provider: Arc<dyn DiagnosticsProvider>) -> Self {
        self.diagnostics = Some(provider);
        self
    }

    /// Render mutations to this stream instead of performing them.
    #[must_use]
    pub fn with_dry_run(mut self, target: Arc<dyn OutputStream>) -> Self {
        self.dry_run_target = Some(target);
        self
    }

    pub fn remaining_steps(&self) -> u32 {
        *self.remaining.lock()
    }

    /// Workspace-relative paths this executor actually mutated, in order.
    pub fn touched_paths(&self) -> Vec<String> {
        self.touched.lock().clone()
    }

    fn consume_step(&self) -> Result<()> {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return Err(CoreError::StepBudgetExceeded(self.budget));
        }
        *remaining -= 1;
        Ok(())
    }

    fn announce(&self, relative: &str) -> Result<()> {
        if let Some((store, checkpoint_id)) = &self.checkpoint {
            store.record_original(checkpoint_id, relative)?;
        }
        Ok(())
    }

    // ── read operations ──────────────────────────────────────────────

    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.token.ensure_active()?;
        let relative = resolve_within_root(path)?;
        Ok(tokio::fs::read_to_string(self.root.join(relative)).await?)
    }

    /// Sorted entry names; directories carry a trailing slash.
    pub async fn list_dir(&self, path: Option<&str>) -> Result<Vec<String>> {
        self.token.ensure_active()?;
        let absolute = match path {
            Some(path) => self.root.join(resolve_within_root(path)?),
            None => self.root.clone(),
        };

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(absolute).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await?.is_dir() {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Workspace-relative files matching a glob pattern, sorted.
    pub async fn find_files(&self, pattern: &str) -> Result<Vec<String>> {
        self.token.ensure_active()?;
        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if glob_match::glob_match(pattern, &relative) {
                matches.push(relative);
            }
        }
        matches.sort();
        Ok(matches)
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        self.token.ensure_active()?;
        let relative = resolve_within_root(path)?;
        Ok(self.root.join(relative).exists())
    }

    // ── mutating operations ──────────────────────────────────────────

    pub async fn create_file(&self, path: &str, content: &str) -> Result<()> {
        self.token.ensure_active()?;
        let relative = resolve_within_root(path)?;
        let relative_str = relative.to_string_lossy().to_string();
        self.consume_step()?;

        if let Some(collector) = &self.collector {
            collector.collect(CollectedChange {
                path: relative_str,
                kind: ChangeKind::Create,
                before: None,
                after: Some(content.to_string()),
            });
            return Ok(());
        }

        if let Some(target) = &self.dry_run_target {
            let rendered = format!("Dry run: create `{relative_str}` ({} bytes)\n", content.len());
            target.emit_markdown(&rendered).await;
            return Ok(());
        }

        self.announce(&relative_str)?;
        let absolute = self.root.join(&relative);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, content).await?;
        self.touched.lock().push(relative_str.clone());
        debug!(path = %relative_str, "file created");
        Ok(())
    }

    pub async fn edit_file(&self, path: &str, old_text: &str, new_text: &str) -> Result<()> {
        self.token.ensure_active()?;
        let relative = resolve_within_root(path)?;
        let relative_str = relative.to_string_lossy().to_string();
        self.consume_step()?;

        let absolute = self.root.join(&relative);
        let current = tokio::fs::read_to_string(&absolute).await.map_err(|_| {
            CoreError::Execution(format!("cannot edit `{relative_str}`: file not found"))
        })?;
        if !current.contains(old_text) {
            return Err(CoreError::Execution(format!(
                "cannot edit `{relative_str}`: the text to replace was not found"
            )));
        }
        let updated = current.replacen(old_text, new_text, 1);

        if let Some(collector) = &self.collector {
            collector.collect(CollectedChange {
                path: relative_str,
                kind: ChangeKind::Edit,
                before: Some(current),
                after: Some(updated),
            });
            return Ok(());
        }

        if let Some(target) = &self.dry_run_target {
            target
                .emit_markdown(&format!("Dry run: edit `{relative_str}`\n"))
                .await;
            return Ok(());
        }

        self.announce(&relative_str)?;
        tokio::fs::write(&absolute, updated).await?;
        self.touched.lock().push(relative_str.clone());
        debug!(path = %relative_str, "file edited");
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.token.ensure_active()?;
        let relative = resolve_within_root(path)?;
        let relative_str = relative.to_string_lossy().to_string();
        self.consume_step()?;

        let absolute = self.root.join(&relative);
        if !absolute.exists() {
            return Err(CoreError::Execution(format!(
                "cannot delete `{relative_str}`: file not found"
            )));
        }

        if let Some(collector) = &self.collector {
            let before = tokio::fs::read_to_string(&absolute).await.ok();
            collector.collect(CollectedChange {
                path: relative_str,
                kind: ChangeKind::Delete,
                before,
                after: None,
            });
            return Ok(());
        }

        if let Some(target) = &self.dry_run_target {
            target
                .emit_markdown(&format!("Dry run: delete `{relative_str}`\n"))
                .await;
            return Ok(());
        }

        self.announce(&relative_str)?;
        tokio::fs::remove_file(&absolute).await?;
        self.touched.lock().push(relative_str.clone());
        debug!(path = %relative_str, "file deleted");
        Ok(())
    }

    /// Create a batch of files as one atomic step sequence: if a file
    /// fails after earlier ones were created, the earlier ones are
    /// removed (best-effort) and the rest are skipped. With an active
    /// diff collector the batch is not atomic; everything simply routes
    /// into the preview.
    pub async fn create_files(&self, files: Vec<(String, String)>) -> Vec<BatchOutcome> {
        let mut outcomes: Vec<BatchOutcome> = Vec::with_capacity(files.len());
        let mut failed = false;

        for (path, content) in &files {
            if failed {
                outcomes.push(BatchOutcome {
                    path: path.clone(),
                    status: BatchStatus::Skipped,
                });
                continue;
            }

            match self.create_file(path, content).await {
                Ok(()) => outcomes.push(BatchOutcome {
                    path: path.clone(),
                    status: BatchStatus::Created,
                }),
                Err(error) => {
                    outcomes.push(BatchOutcome {
                        path: path.clone(),
                        status: BatchStatus::Failed(error.to_string()),
                    });
                    failed = true;
                }
            }
        }

        if failed && self.collector.is_none() && self.dry_run_target.is_none() {
            for outcome in outcomes.iter_mut() {
                if outcome.status == BatchStatus::Created {
                    let absolute = self.root.join(&outcome.path);
                    if let Err(error) = std::fs::remove_file(&absolute) {
                        warn!(path = %outcome.path, error = %error, "batch rollback delete failed");
                    }
                    self.touched.lock().retain(|touched| touched != &outcome.path);
                    outcome.status = BatchStatus::RolledBack;
                }
            }
        }

        outcomes
    }

    /// Apply the approved subset of a preview. Consumes no steps; they
    /// were spent when the changes were collected.
    pub async fn apply_approved(&self, approved: &[CollectedChange]) -> Result<Vec<String>> {
        let mut applied = Vec::with_capacity(approved.len());
        for change in approved {
            self.token.ensure_active()?;
            self.announce(&change.path)?;
            let absolute = self.root.join(&change.path);
            match change.kind {
                ChangeKind::Create | ChangeKind::Edit => {
                    let content = change.after.clone().unwrap_or_default();
                    if let Some(parent) = absolute.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&absolute, content).await?;
                }
                ChangeKind::Delete => {
                    if absolute.exists() {
                        tokio::fs::remove_file(&absolute).await?;
                    }
                }
            }
            self.touched.lock().push(change.path.clone());
            applied.push(change.path.clone());
        }
        Ok(applied)
    }

    /// Run a shell command under the workspace root with an enforced
    /// timeout. Consumes one step. Timeouts are transient; cancellation
    /// kills the child.
    pub async fn run_command(
        &self,
        command_line: &str,
        options: ExecOptions,
    ) -> Result<CommandOutput> {
        self.token.ensure_active()?;
        self.consume_step()?;

        let parts = shell_words::split(command_line)
            .map_err(|error| CoreError::Execution(format!("unparseable command: {error}")))?;
        let Some((program, args)) = parts.split_first() else {
            return Err(CoreError::Execution("empty command".to_string()));
        };

        let cwd = match &options.cwd {
            Some(cwd) => self.root.join(resolve_within_root(cwd)?),
            None => self.root.clone(),
        };

        if let Some(target) = &self.dry_run_target {
            target
                .emit_markdown(&format!("Dry run: run `{command_line}`\n"))
                .await;
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let timeout = Duration::from_millis(
            options.timeout_ms.unwrap_or(self.command_timeout_ms),
        );

        let mut command = tokio::process::Command::new(program);
        command.args(args).current_dir(cwd).kill_on_drop(true);

        let output = tokio::select! {
            _ = self.token.cancelled() => return Err(CoreError::Cancelled),
            result = tokio::time::timeout(timeout, command.output()) => match result {
                Err(_) => {
                    return Err(CoreError::Timeout(format!(
                        "command `{command_line}` exceeded {}ms",
                        timeout.as_millis()
                    )))
                }
                Ok(Err(error)) => return Err(error.into()),
                Ok(Ok(output)) => output,
            },
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Host diagnostics at or above the given severity.
    pub fn get_diagnostics(&self, min_severity: Option<Severity>) -> Vec<Diagnostic> {
        let Some(provider) = &self.diagnostics else {
            return Vec::new();
        };
        let floor = min_severity.unwrap_or(Severity::Hint);
        provider
            .diagnostics()
            .into_iter()
            .filter(|diagnostic| diagnostic.severity >= floor)
            .collect()
    }

    /// Describe a batch without running it.
    pub fn plan_of(files: &[(String, String)]) -> Vec<PlannedOp> {
        files
            .iter()
            .map(|(path, content)| PlannedOp::Create {
                path: path.clone(),
                bytes: content.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferStream;
    use tempfile::tempdir;

    fn executor(root: &std::path::Path, steps: u32) -> AutonomousExecutor {
        AutonomousExecutor::new(root, CancelToken::new(), steps)
    }

    #[tokio::test]
    async fn test_reads_are_free_and_mutations_consume_steps() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let exec = executor(dir.path(), 2);

        assert_eq!(exec.read_file("a.txt").await.unwrap(), "hi");
        assert!(exec.file_exists("a.txt").await.unwrap());
        assert_eq!(exec.remaining_steps(), 2);

        exec.create_file("b.txt", "B").await.unwrap();
        exec.edit_file("b.txt", "B", "BB").await.unwrap();
        assert_eq!(exec.remaining_steps(), 0);

        let result = exec.delete_file("b.txt").await;
        assert!(matches!(result, Err(CoreError::StepBudgetExceeded(2))));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "BB"
        );
    }

    #[tokio::test]
    async fn test_path_validation_applies_to_every_operation() {
        let dir = tempdir().unwrap();
        let exec = executor(dir.path(), 10);

        assert!(matches!(
            exec.read_file("/etc/passwd").await,
            Err(CoreError::InvalidPath(_))
        ));
        assert!(matches!(
            exec.create_file("../outside.txt", "x").await,
            Err(CoreError::InvalidPath(_))
        ));
        assert!(matches!(
            exec.delete_file("a/../../b").await,
            Err(CoreError::InvalidPath(_))
        ));
        // Failed validation must not burn budget.
        assert_eq!(exec.remaining_steps(), 10);
    }

    #[tokio::test]
    async fn test_edit_requires_existing_text() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha beta").unwrap();
        let exec = executor(dir.path(), 10);

        exec.edit_file("a.txt", "beta", "gamma").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "alpha gamma"
        );

        let missing = exec.edit_file("a.txt", "delta", "x").await;
        assert!(matches!(missing, Err(CoreError::Execution(_))));
    }

    #[tokio::test]
    async fn test_touched_paths_track_mutations() {
        let dir = tempdir().unwrap();
        let exec = executor(dir.path(), 10);

        exec.create_file("one.txt", "1").await.unwrap();
        exec.create_file("nested/two.txt", "2").await.unwrap();
        exec.delete_file("one.txt").await.unwrap();

        assert_eq!(
            exec.touched_paths(),
            vec!["one.txt", "nested/two.txt", "one.txt"]
        );
    }

    #[tokio::test]
    async fn test_atomic_batch_rolls_back_created_files() {
        let dir = tempdir().unwrap();
        // Two steps: the third file in the batch exhausts the budget.
        let exec = executor(dir.path(), 2);

        let outcomes = exec
            .create_files(vec![
                ("a.txt".to_string(), "A".to_string()),
                ("b.txt".to_string(), "B".to_string()),
                ("c.txt".to_string(), "C".to_string()),
                ("d.txt".to_string(), "D".to_string()),
            ])
            .await;

        assert_eq!(outcomes[0].status, BatchStatus::RolledBack);
        assert_eq!(outcomes[1].status, BatchStatus::RolledBack);
        assert!(matches!(outcomes[2].status, BatchStatus::Failed(_)));
        assert_eq!(outcomes[3].status, BatchStatus::Skipped);

        assert!(!dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
        assert!(exec.touched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_collector_diverts_mutations_from_disk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "old").unwrap();
        let collector = Arc::new(RecordingCollector::new());
        let exec = executor(dir.path(), 10).with_collector(collector.clone());

        exec.create_file("new.txt", "fresh").await.unwrap();
        exec.edit_file("existing.txt", "old", "new").await.unwrap();
        exec.delete_file("existing.txt").await.unwrap();

        assert!(!dir.path().join("new.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("existing.txt")).unwrap(),
            "old"
        );

        let changes = collector.collected();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Create);
        assert_eq!(changes[1].kind, ChangeKind::Edit);
        assert_eq!(changes[1].after.as_deref(), Some("new"));
        assert_eq!(changes[2].kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_apply_approved_subset() {
        let dir = tempdir().unwrap();
        let collector = Arc::new(RecordingCollector::new());
        let exec = executor(dir.path(), 10).with_collector(collector.clone());

        exec.create_file("yes.txt", "keep").await.unwrap();
        exec.create_file("no.txt", "reject").await.unwrap();

        let changes = collector.drain();
        let approved: Vec<CollectedChange> = changes
            .into_iter()
            .filter(|change| change.path == "yes.txt")
            .collect();

        let applied = exec.apply_approved(&approved).await.unwrap();
        assert_eq!(applied, vec!["yes.txt"]);
        assert!(dir.path().join("yes.txt").exists());
        assert!(!dir.path().join("no.txt").exists());
    }

    #[tokio::test]
    async fn test_dry_run_renders_instead_of_writing() {
        let dir = tempdir().unwrap();
        let stream = BufferStream::new();
        let exec = executor(dir.path(), 10).with_dry_run(stream.clone());

        exec.create_file("a.txt", "content").await.unwrap();
        let output = exec
            .run_command("echo hello", ExecOptions::default())
            .await
            .unwrap();

        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(output.exit_code, 0);
        assert!(stream.markdown().contains("create `a.txt`"));
        assert!(stream.markdown().contains("run `echo hello`"));
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let dir = tempdir().unwrap();
        let exec = executor(dir.path(), 10);

        let output = exec
            .run_command("echo hello", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(exec.remaining_steps(), 9);
    }

    #[tokio::test]
    async fn test_run_command_timeout_is_transient() {
        let dir = tempdir().unwrap();
        let exec = executor(dir.path(), 10);

        let result = exec
            .run_command(
                "sleep 5",
                ExecOptions {
                    timeout_ms: Some(50),
                    ..ExecOptions::default()
                },
            )
            .await;

        match result {
            Err(error) => assert!(error.is_transient()),
            Ok(_) => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_everything() {
        let dir = tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let exec = AutonomousExecutor::new(dir.path(), token, 10);

        assert!(matches!(
            exec.read_file("a.txt").await,
            Err(CoreError::Cancelled)
        ));
        assert!(matches!(
            exec.create_file("a.txt", "x").await,
            Err(CoreError::Cancelled)
        ));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_find_files_with_glob() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();
        let exec = executor(dir.path(), 10);

        let rust = exec.find_files("src/*.rs").await.unwrap();
        assert_eq!(rust, vec!["src/lib.rs", "src/main.rs"]);

        let markdown = exec.find_files("*.md").await.unwrap();
        assert_eq!(markdown, vec!["readme.md"]);
    }

    #[tokio::test]
    async fn test_diagnostics_filter_by_severity() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(StaticDiagnostics::new(vec![
            Diagnostic {
                path: "a.rs".to_string(),
                line: 1,
                message: "unused variable".to_string(),
                severity: Severity::Warning,
            },
            Diagnostic {
                path: "b.rs".to_string(),
                line: 2,
                message: "type mismatch".to_string(),
                severity: Severity::Error,
            },
        ]));
        let exec = executor(dir.path(), 10).with_diagnostics(provider);

        assert_eq!(exec.get_diagnostics(None).len(), 2);
        assert_eq!(exec.get_diagnostics(Some(Severity::Error)).len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_sees_mutations() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tracked.txt"), "original").unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let checkpoint_id = store.create_checkpoint("builder").unwrap();
        let exec = executor(dir.path(), 10)
            .with_checkpoint(store.clone(), checkpoint_id.clone());

        exec.edit_file("tracked.txt", "original", "changed")
            .await
            .unwrap();
        exec.create_file("made.txt", "new").await.unwrap();

        store.rollback(&checkpoint_id).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tracked.txt")).unwrap(),
            "original"
        );
        assert!(!dir.path().join("made.txt").exists());
    }
}

//! Diff-preview collection for deferred apply/reject.

use parking_lot::Mutex;

/// What kind of mutation a collected change represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Edit,
    Delete,
}

/// One mutation diverted into the preview instead of the filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedChange {
    pub path: String,
    pub kind: ChangeKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Sink for previewed mutations. When a collector is active, the
/// executor routes every mutating operation here; the host shows diffs
/// and hands the approved subset back for application.
pub trait DiffCollector: Send + Sync {
    fn collect(&self, change: CollectedChange);
    /// Remove and return everything collected so far.
    fn drain(&self) -> Vec<CollectedChange>;
}

/// In-memory collector.
#[derive(Default)]
pub struct RecordingCollector {
    changes: Mutex<Vec<CollectedChange>>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<CollectedChange> {
        self.changes.lock().clone()
    }
}

impl DiffCollector for RecordingCollector {
    fn collect(&self, change: CollectedChange) {
        self.changes.lock().push(change);
    }

    fn drain(&self) -> Vec<CollectedChange> {
        std::mem::take(&mut *self.changes.lock())
    }
}

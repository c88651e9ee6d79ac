//! Host-supplied diagnostics surface.

use serde::{Deserialize, Serialize};

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Info,
    Warning,
    Error,
}

/// One host-reported problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub message: String,
    pub severity: Severity,
}

/// The host feeds current errors/warnings through this.
pub trait DiagnosticsProvider: Send + Sync {
    fn diagnostics(&self) -> Vec<Diagnostic>;
}

/// Fixed diagnostics list; test and offline stand-in.
pub struct StaticDiagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl StaticDiagnostics {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }
}

impl DiagnosticsProvider for StaticDiagnostics {
    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Hint);
    }
}

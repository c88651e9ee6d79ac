//! Error types for the dispatch kernel.
//!
//! Every error belongs to one of four classes that drive retry and
//! rollback behavior: transient (retry with backoff), permanent
//! (user-visible, no retry), critical (halt, roll back, escalate), and
//! cancellation (respects user intent, no retry, no extra rollback).

use thiserror::Error;

/// Behavioral class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Critical,
    Cancelled,
}

/// Kernel error type.
#[derive(Error, Debug)]
pub enum CoreError {
    // ── transient ────────────────────────────────────────────────────
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    // ── permanent ────────────────────────────────────────────────────
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent '{0}' is disabled by project configuration")]
    AgentDisabled(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("step budget of {0} exhausted")]
    StepBudgetExceeded(u32),

    #[error("chain depth {0} exceeds the maximum of {1}")]
    ChainTooDeep(usize, usize),

    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("{0}")]
    Execution(String),

    // ── critical ─────────────────────────────────────────────────────
    #[error("checkpoint failure: {0}")]
    Checkpoint(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    // ── cancellation ─────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    // ── conversions ──────────────────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::UpstreamRateLimited(_) => {
                ErrorClass::Transient
            }
            Self::Checkpoint(_) | Self::Persistence(_) => ErrorClass::Critical,
            Self::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Concise description plus a suggested recovery, for end users.
    /// Internal detail stays on the diagnostic channel.
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::Transient => {
                format!("{self}. This is usually temporary; try again in a moment.")
            }
            ErrorClass::Permanent => format!("{self}. Adjust the request or configuration."),
            ErrorClass::Critical => {
                format!("{self}. Changes were rolled back; check the logs for details.")
            }
            ErrorClass::Cancelled => "The operation was cancelled.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

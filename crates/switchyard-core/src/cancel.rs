//! Cooperative cancellation signal threaded through every operation.

use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};

/// One-shot cancellation signal.
///
/// Monotone: once cancelled it never becomes active again, and
/// cancelling twice is a no-op. Suspending operations check
/// [`CancelToken::ensure_active`] between suspension points and return
/// [`CoreError::Cancelled`] without further side effects.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Bail out if cancellation was requested.
    pub fn ensure_active(&self) -> Result<()> {
        if self.inner.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled; used inside `select!` around
    /// long suspensions (subshell waits, transport reads).
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Child token: cancelled when this one is, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

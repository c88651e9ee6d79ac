//! Host output stream contract and the capture decorator.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Where rendered output goes.
///
/// The host supplies the real implementation (chat panel, terminal, ...).
/// The kernel only ever writes through this trait.
#[async_trait]
pub trait OutputStream: Send + Sync {
    /// Append rendered markdown to the response body.
    async fn emit_markdown(&self, text: &str);
    /// Transient progress line (not part of the response body).
    async fn emit_status(&self, text: &str);
    /// User-visible error line.
    async fn emit_error(&self, text: &str);
}

/// Discards everything.
pub struct NullStream;

#[async_trait]
impl OutputStream for NullStream {
    async fn emit_markdown(&self, _text: &str) {}
    async fn emit_status(&self, _text: &str) {}
    async fn emit_error(&self, _text: &str) {}
}

/// Collects everything in memory; the host-less stand-in used by tests.
#[derive(Default)]
pub struct BufferStream {
    markdown: Mutex<String>,
    errors: Mutex<Vec<String>>,
}

impl BufferStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn markdown(&self) -> String {
        self.markdown.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

#[async_trait]
impl OutputStream for BufferStream {
    async fn emit_markdown(&self, text: &str) {
        self.markdown.lock().push_str(text);
    }

    async fn emit_status(&self, _text: &str) {}

    async fn emit_error(&self, text: &str) {
        self.errors.lock().push(text.to_string());
    }
}

/// Decorator that forwards to the real stream while accumulating the
/// markdown body, so the dispatcher can cache and remember what the user
/// saw. Status and error lines pass through untouched.
pub struct CaptureStream {
    inner: Arc<dyn OutputStream>,
    buffer: Mutex<String>,
}

impl CaptureStream {
    pub fn wrap(inner: Arc<dyn OutputStream>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            buffer: Mutex::new(String::new()),
        })
    }

    /// Everything emitted as markdown so far.
    pub fn captured(&self) -> String {
        self.buffer.lock().clone()
    }
}

#[async_trait]
impl OutputStream for CaptureStream {
    async fn emit_markdown(&self, text: &str) {
        self.buffer.lock().push_str(text);
        self.inner.emit_markdown(text).await;
    }

    async fn emit_status(&self, text: &str) {
        self.inner.emit_status(text).await;
    }

    async fn emit_error(&self, text: &str) {
        self.inner.emit_error(text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_forwards_and_accumulates() {
        let target = BufferStream::new();
        let capture = CaptureStream::wrap(target.clone());

        capture.emit_markdown("hello ").await;
        capture.emit_markdown("world").await;
        capture.emit_status("working").await;

        assert_eq!(capture.captured(), "hello world");
        assert_eq!(target.markdown(), "hello world");
    }

    #[tokio::test]
    async fn test_nested_capture() {
        let target = BufferStream::new();
        let outer = CaptureStream::wrap(target.clone());
        let inner = CaptureStream::wrap(outer.clone());

        inner.emit_markdown("x").await;

        assert_eq!(inner.captured(), "x");
        assert_eq!(outer.captured(), "x");
        assert_eq!(target.markdown(), "x");
    }
}

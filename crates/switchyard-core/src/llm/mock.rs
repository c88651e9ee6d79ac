//! Scripted transport for tests and offline development.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::{CoreError, Result};

use super::{CompletionRequest, CompletionResponse, LanguageModel, TokenUsage};

/// Replays queued replies in order; once the queue is empty it echoes the
/// last user message. Records every request it sees so tests can assert
/// on prompts and selected models.
#[derive(Default)]
pub struct MockModel {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn enqueue_error(&self, error: CoreError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(
        &self,
        request: &CompletionRequest,
        token: &CancelToken,
    ) -> Result<CompletionResponse> {
        token.ensure_active()?;
        self.requests.lock().push(request.clone());

        let scripted = self.replies.lock().pop_front();
        let content = match scripted {
            Some(reply) => reply?,
            None => request
                .messages
                .iter()
                .rev()
                .find(|message| message.role == super::Role::User)
                .map(|message| message.content.clone())
                .unwrap_or_default(),
        };

        Ok(CompletionResponse {
            content,
            usage: Some(TokenUsage::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let model = MockModel::new();
        model.enqueue_reply("scripted");

        let request =
            CompletionRequest::new("m", vec![Message::user("fallback")]);
        let token = CancelToken::new();

        let first = model.complete(&request, &token).await.unwrap();
        assert_eq!(first.content, "scripted");

        let second = model.complete(&request, &token).await.unwrap();
        assert_eq!(second.content, "fallback");

        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_error_propagates() {
        let model = MockModel::new();
        model.enqueue_error(CoreError::Transport("connection reset".into()));

        let request = CompletionRequest::new("m", vec![Message::user("hi")]);
        let result = model.complete(&request, &CancelToken::new()).await;
        assert!(matches!(result, Err(CoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_respects_cancellation() {
        let model = MockModel::new();
        let token = CancelToken::new();
        token.cancel();

        let request = CompletionRequest::new("m", vec![Message::user("hi")]);
        let result = model.complete(&request, &token).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(model.requests().is_empty());
    }
}

//! Send helper shared by LLM-backed agents.

use std::sync::Arc;

use tracing::debug;

use crate::agent::AgentContext;
use crate::error::Result;
use crate::llm::{CompletionRequest, LanguageModel, Message};
use crate::model_select::ModelSelector;

/// Builds the message list, resolves the model through the selector, and
/// streams the reply to the caller's output stream.
///
/// Model selection lives here rather than in the dispatcher so that a
/// delegated agent always runs on its own preferred model.
pub struct PromptRunner {
    transport: Arc<dyn LanguageModel>,
    selector: Arc<ModelSelector>,
}

impl PromptRunner {
    pub fn new(transport: Arc<dyn LanguageModel>, selector: Arc<ModelSelector>) -> Self {
        Self {
            transport,
            selector,
        }
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    /// Full conversational send: system prompt, enriched context, history
    /// tail, then the user prompt. The reply streams to `ctx.stream` and
    /// is returned.
    pub async fn send(
        &self,
        agent_id: &str,
        category: Option<&str>,
        system_prompt: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let model =
            self.selector
                .select(agent_id, category, ctx.request.model.as_deref());
        let options = self.selector.options_for(agent_id);

        let mut messages = Vec::new();
        let mut system = system_prompt.to_string();
        if let Some(context) = &ctx.enriched_context {
            system.push_str("\n\n");
            system.push_str(context);
        }
        messages.push(Message::system(system));

        for turn in &ctx.history {
            let message = match turn.role {
                switchyard_models::TurnRole::User => Message::user(&turn.content),
                switchyard_models::TurnRole::Assistant => {
                    Message::assistant(&turn.content)
                }
            };
            messages.push(message);
        }
        messages.push(Message::user(&ctx.request.prompt));

        let mut request = CompletionRequest::new(model.clone(), messages);
        if let Some(max_tokens) = options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            request = request.with_temperature(temperature);
        }

        debug!(agent_id, model = %model, "sending completion request");
        let response = self.transport.complete(&request, &ctx.token).await?;
        ctx.stream.emit_markdown(&response.content).await;
        Ok(response.content)
    }

    /// One-shot question with no conversation state and no streaming;
    /// used by the router and collaboration synthesis.
    pub async fn ask(
        &self,
        agent_id: &str,
        prompt: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let model = self.selector.select(agent_id, None, None);
        let request = CompletionRequest::new(model, vec![Message::user(prompt)]);
        let response = self.transport.complete(&request, &ctx.token).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::llm::MockModel;
    use crate::stream::BufferStream;
    use switchyard_models::{ConversationTurn, DispatchRequest};

    fn runner_with(model: Arc<MockModel>) -> PromptRunner {
        let selector = Arc::new(ModelSelector::new("m-default"));
        selector.set_preference("docs", "m-docs");
        PromptRunner::new(model, selector)
    }

    #[tokio::test]
    async fn test_send_streams_reply_and_uses_preferred_model() {
        let model = Arc::new(MockModel::new());
        model.enqueue_reply("the answer");
        let runner = runner_with(model.clone());

        let stream = BufferStream::new();
        let ctx = AgentContext::new(
            DispatchRequest::new("question"),
            stream.clone(),
            CancelToken::new(),
        );

        let reply = runner.send("docs", None, "You answer.", &ctx).await.unwrap();
        assert_eq!(reply, "the answer");
        assert_eq!(stream.markdown(), "the answer");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "m-docs");
    }

    #[tokio::test]
    async fn test_send_folds_context_and_history_into_messages() {
        let model = Arc::new(MockModel::new());
        let runner = runner_with(model.clone());

        let ctx = AgentContext::new(
            DispatchRequest::new("latest question"),
            BufferStream::new(),
            CancelToken::new(),
        )
        .with_history(vec![
            ConversationTurn::user("earlier question"),
            ConversationTurn::assistant("earlier answer"),
        ])
        .with_enriched_context("## Workspace\nrepo facts");

        runner.send("docs", None, "System.", &ctx).await.unwrap();

        let request = &model.requests()[0];
        assert_eq!(request.messages.len(), 4);
        assert!(request.messages[0].content.contains("repo facts"));
        assert_eq!(request.messages[1].content, "earlier question");
        assert_eq!(request.messages[3].content, "latest question");
    }
}

//! The agent contract and per-request context.

mod prompt_runner;

pub use prompt_runner::PromptRunner;

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_models::{ConversationTurn, DispatchRequest};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exec::AutonomousExecutor;
use crate::stream::OutputStream;
use switchyard_models::AgentResult;

/// A specialist request handler.
///
/// Identity is immutable for the agent's lifetime in the registry; the
/// slash-command alias equals `id()`. Agents that perform file or shell
/// side effects return `true` from `is_autonomous` and always run under a
/// guardrail checkpoint.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable kebab-case id, unique within the registry.
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn description(&self) -> &str;

    fn is_autonomous(&self) -> bool {
        false
    }

    /// Optional category key consulted by the model selector.
    fn category(&self) -> Option<&str> {
        None
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentResult>;
}

/// Everything an agent may look at while handling one request.
///
/// The context is immutable from the agent's point of view; enrichment
/// happens only in the dispatcher, and delegation derives a fresh context
/// instead of mutating this one.
#[derive(Clone)]
pub struct AgentContext {
    pub request: DispatchRequest,
    pub history: Vec<ConversationTurn>,
    pub stream: Arc<dyn OutputStream>,
    pub token: CancelToken,
    /// Workspace, memory, and conversation context prepared by the
    /// dispatcher.
    pub enriched_context: Option<String>,
    /// Bounded file/shell operations, attached by the dispatcher for
    /// autonomous agents; `None` for everyone else.
    pub executor: Option<Arc<AutonomousExecutor>>,
}

impl AgentContext {
    pub fn new(
        request: DispatchRequest,
        stream: Arc<dyn OutputStream>,
        token: CancelToken,
    ) -> Self {
        Self {
            request,
            history: Vec::new(),
            stream,
            token,
            enriched_context: None,
            executor: None,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_enriched_context(mut self, context: impl Into<String>) -> Self {
        self.enriched_context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<AutonomousExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Derived context for delegation: a different stream and an optional
    /// read-only prompt override. History, token, and enrichment carry
    /// over unchanged.
    pub fn derived(
        &self,
        stream: Arc<dyn OutputStream>,
        prompt_override: Option<&str>,
    ) -> Self {
        let mut derived = self.clone();
        derived.stream = stream;
        if let Some(prompt) = prompt_override {
            derived.request.prompt = prompt.to_string();
        }
        derived
    }
}

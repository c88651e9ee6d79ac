//! Ordered hooks wrapping every agent invocation.

mod rate_limit;
mod timing;
mod usage;

pub use rate_limit::RateLimitMiddleware;
pub use timing::TimingMiddleware;
pub use usage::UsageMiddleware;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use switchyard_models::AgentResult;
use tracing::warn;

use crate::agent::{Agent, AgentContext};
use crate::error::{CoreError, Result};

/// Decision returned by a `before` hook.
pub enum Verdict {
    Continue,
    /// Short-circuit: skip remaining `before` hooks and the agent; the
    /// carried metadata is folded into the synthesized result.
    Skip(Map<String, Value>),
}

/// Per-invocation scratch shared by all hooks of one request (timing
/// start, accumulated metadata).
#[derive(Default)]
pub struct HookScope {
    pub values: Map<String, Value>,
}

/// A cross-cutting hook. Hooks run in priority order (ascending, ties by
/// registration order); each invocation is isolated so one misbehaving
/// hook never corrupts the pipeline or its siblings.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32;

    async fn before(&self, _ctx: &AgentContext, _scope: &mut HookScope) -> Result<Verdict> {
        Ok(Verdict::Continue)
    }

    async fn after(
        &self,
        _ctx: &AgentContext,
        _result: &mut AgentResult,
        _scope: &mut HookScope,
    ) -> Result<()> {
        Ok(())
    }

    /// Inspect a handler failure; returning a result substitutes it for
    /// the error. Later hooks still run for telemetry either way.
    async fn on_error(
        &self,
        _ctx: &AgentContext,
        _error: &CoreError,
        _scope: &mut HookScope,
    ) -> Result<Option<AgentResult>> {
        Ok(None)
    }
}

/// Executes agents inside the ordered hook chain.
pub struct MiddlewarePipeline {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self {
            middlewares: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn clear(&self) {
        self.middlewares.write().clear();
    }

    pub fn len(&self) -> usize {
        self.middlewares.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.read().is_empty()
    }

    /// Snapshot in execution order. Sorting is stable, so equal
    /// priorities keep their registration order.
    fn ordered(&self) -> Vec<Arc<dyn Middleware>> {
        let mut hooks = self.middlewares.read().clone();
        hooks.sort_by_key(|middleware| middleware.priority());
        hooks
    }

    /// Run `agent.handle` wrapped in the hook chain.
    ///
    /// Order: every `before` in priority order (first `Skip` wins and the
    /// agent never runs), the handler, then every `after` regardless of
    /// sibling failures. On handler error every `on_error` runs; the
    /// first substitute result is returned, otherwise the error
    /// propagates.
    pub async fn execute(
        &self,
        agent: &dyn Agent,
        ctx: &AgentContext,
    ) -> Result<AgentResult> {
        let hooks = self.ordered();
        let mut scope = HookScope::default();

        for hook in &hooks {
            match hook.before(ctx, &mut scope).await {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Skip(metadata)) => {
                    let mut result = AgentResult::empty();
                    result.metadata = scope.values.clone();
                    result.metadata.extend(metadata);
                    return Ok(result);
                }
                Err(error) => {
                    warn!(
                        middleware = hook.name(),
                        error = %error,
                        "before hook failed; continuing"
                    );
                }
            }
        }

        match agent.handle(ctx).await {
            Ok(mut result) => {
                for hook in &hooks {
                    if let Err(error) = hook.after(ctx, &mut result, &mut scope).await {
                        warn!(
                            middleware = hook.name(),
                            error = %error,
                            "after hook failed; continuing"
                        );
                    }
                }
                Ok(result)
            }
            Err(handler_error) => {
                let mut substitute: Option<AgentResult> = None;
                for hook in &hooks {
                    match hook.on_error(ctx, &handler_error, &mut scope).await {
                        Ok(Some(result)) => {
                            if substitute.is_none() {
                                substitute = Some(result);
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!(
                                middleware = hook.name(),
                                error = %error,
                                "on_error hook failed; continuing"
                            );
                        }
                    }
                }
                match substitute {
                    Some(result) => Ok(result),
                    None => Err(handler_error),
                }
            }
        }
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::stream::BufferStream;
    use parking_lot::Mutex;
    use serde_json::json;
    use switchyard_models::DispatchRequest;

    struct OkAgent;

    #[async_trait]
    impl Agent for OkAgent {
        fn id(&self) -> &str {
            "ok"
        }
        fn display_name(&self) -> &str {
            "Ok"
        }
        fn description(&self) -> &str {
            "succeeds"
        }
        async fn handle(&self, _ctx: &AgentContext) -> Result<AgentResult> {
            Ok(AgentResult::empty())
        }
    }

    struct FailAgent;

    #[async_trait]
    impl Agent for FailAgent {
        fn id(&self) -> &str {
            "fail"
        }
        fn display_name(&self) -> &str {
            "Fail"
        }
        fn description(&self) -> &str {
            "fails"
        }
        async fn handle(&self, _ctx: &AgentContext) -> Result<AgentResult> {
            Err(CoreError::Execution("handler down".to_string()))
        }
    }

    /// Records which hooks fired, in order.
    struct Probe {
        name: String,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
        skip: bool,
        fail_before: bool,
        substitute: bool,
    }

    impl Probe {
        fn new(name: &str, priority: i32, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                priority,
                log,
                skip: false,
                fail_before: false,
                substitute: false,
            }
        }
    }

    #[async_trait]
    impl Middleware for Probe {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }

        async fn before(&self, _ctx: &AgentContext, _scope: &mut HookScope) -> Result<Verdict> {
            self.log.lock().push(format!("{}:before", self.name));
            if self.fail_before {
                return Err(CoreError::Execution("hook broke".to_string()));
            }
            if self.skip {
                let mut metadata = Map::new();
                metadata.insert("skipped".to_string(), json!(true));
                return Ok(Verdict::Skip(metadata));
            }
            Ok(Verdict::Continue)
        }

        async fn after(
            &self,
            _ctx: &AgentContext,
            _result: &mut AgentResult,
            _scope: &mut HookScope,
        ) -> Result<()> {
            self.log.lock().push(format!("{}:after", self.name));
            Ok(())
        }

        async fn on_error(
            &self,
            _ctx: &AgentContext,
            _error: &CoreError,
            _scope: &mut HookScope,
        ) -> Result<Option<AgentResult>> {
            self.log.lock().push(format!("{}:on_error", self.name));
            if self.substitute {
                return Ok(Some(
                    AgentResult::empty().with_metadata("recovered", json!(true)),
                ));
            }
            Ok(None)
        }
    }

    fn ctx() -> AgentContext {
        AgentContext::new(
            DispatchRequest::new("p"),
            BufferStream::new(),
            CancelToken::new(),
        )
    }

    #[tokio::test]
    async fn test_hooks_run_in_priority_order_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.register(Arc::new(Probe::new("late", 30, log.clone())));
        pipeline.register(Arc::new(Probe::new("early", 10, log.clone())));
        pipeline.register(Arc::new(Probe::new("tie-a", 20, log.clone())));
        pipeline.register(Arc::new(Probe::new("tie-b", 20, log.clone())));

        pipeline.execute(&OkAgent, &ctx()).await.unwrap();

        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec![
                "early:before",
                "tie-a:before",
                "tie-b:before",
                "late:before",
                "early:after",
                "tie-a:after",
                "tie-b:after",
                "late:after",
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_short_circuits_remaining_before_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        let mut skipper = Probe::new("skipper", 10, log.clone());
        skipper.skip = true;
        pipeline.register(Arc::new(skipper));
        pipeline.register(Arc::new(Probe::new("never", 20, log.clone())));

        let result = pipeline.execute(&OkAgent, &ctx()).await.unwrap();
        assert_eq!(result.metadata.get("skipped"), Some(&json!(true)));

        let entries = log.lock().clone();
        assert_eq!(entries, vec!["skipper:before"]);
    }

    #[tokio::test]
    async fn test_throwing_before_hook_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        let mut broken = Probe::new("broken", 10, log.clone());
        broken.fail_before = true;
        pipeline.register(Arc::new(broken));
        pipeline.register(Arc::new(Probe::new("healthy", 20, log.clone())));

        pipeline.execute(&OkAgent, &ctx()).await.unwrap();

        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec![
                "broken:before",
                "healthy:before",
                "broken:after",
                "healthy:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_on_error_substitute_wins_but_later_hooks_still_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        let mut recoverer = Probe::new("recoverer", 10, log.clone());
        recoverer.substitute = true;
        pipeline.register(Arc::new(recoverer));
        pipeline.register(Arc::new(Probe::new("telemetry", 20, log.clone())));

        let result = pipeline.execute(&FailAgent, &ctx()).await.unwrap();
        assert_eq!(result.metadata.get("recovered"), Some(&json!(true)));

        let entries = log.lock().clone();
        assert!(entries.contains(&"telemetry:on_error".to_string()));
    }

    #[tokio::test]
    async fn test_error_propagates_when_no_substitute() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.register(Arc::new(Probe::new(
            "observer",
            10,
            Arc::new(Mutex::new(Vec::new())),
        )));

        let result = pipeline.execute(&FailAgent, &ctx()).await;
        assert!(matches!(result, Err(CoreError::Execution(_))));
    }

    #[tokio::test]
    async fn test_clear_empties_pipeline() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.register(Arc::new(Probe::new(
            "x",
            10,
            Arc::new(Mutex::new(Vec::new())),
        )));
        assert_eq!(pipeline.len(), 1);
        pipeline.clear();
        assert!(pipeline.is_empty());
    }
}

//! Wall-clock timing around each invocation.

use async_trait::async_trait;
use serde_json::json;
use switchyard_models::{now_ms, AgentResult};

use crate::agent::AgentContext;
use crate::error::Result;

use super::{HookScope, Middleware, Verdict};

pub const TIMING_PRIORITY: i32 = 20;

const STARTED_KEY: &str = "timing.started_ms";

/// Records start/end around the handler and exposes `elapsedMs` on the
/// result metadata. The dispatcher creates the context only after any
/// confirmation dialog has resolved, so dialog time never lands here.
pub struct TimingMiddleware;

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    fn priority(&self) -> i32 {
        TIMING_PRIORITY
    }

    async fn before(&self, _ctx: &AgentContext, scope: &mut HookScope) -> Result<Verdict> {
        scope.values.insert(STARTED_KEY.to_string(), json!(now_ms()));
        Ok(Verdict::Continue)
    }

    async fn after(
        &self,
        _ctx: &AgentContext,
        result: &mut AgentResult,
        scope: &mut HookScope,
    ) -> Result<()> {
        if let Some(started) = scope.values.get(STARTED_KEY).and_then(|v| v.as_i64()) {
            let elapsed = now_ms().saturating_sub(started).max(0);
            result
                .metadata
                .insert("elapsedMs".to_string(), json!(elapsed));
        }
        Ok(())
    }
}

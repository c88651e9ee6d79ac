//! Per-agent invocation counters.

use async_trait::async_trait;
use dashmap::DashMap;
use switchyard_models::AgentResult;

use crate::agent::AgentContext;
use crate::error::Result;

use super::{HookScope, Middleware};

pub const USAGE_PRIORITY: i32 = 30;

/// Counts completed invocations per agent. Keyed by the command the
/// request carried, falling back to a catch-all bucket for routed
/// requests.
#[derive(Default)]
pub struct UsageMiddleware {
    counters: DashMap<String, u64>,
}

impl UsageMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counters.get(key).map(|entry| *entry).unwrap_or(0)
    }

    pub fn totals(&self) -> Vec<(String, u64)> {
        let mut totals: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        totals.sort();
        totals
    }
}

#[async_trait]
impl Middleware for UsageMiddleware {
    fn name(&self) -> &str {
        "usage"
    }

    fn priority(&self) -> i32 {
        USAGE_PRIORITY
    }

    async fn after(
        &self,
        ctx: &AgentContext,
        _result: &mut AgentResult,
        _scope: &mut HookScope,
    ) -> Result<()> {
        let key = ctx
            .request
            .command
            .clone()
            .unwrap_or_else(|| "(routed)".to_string());
        *self.counters.entry(key).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::stream::BufferStream;
    use switchyard_models::DispatchRequest;

    #[tokio::test]
    async fn test_counts_per_command() {
        let usage = UsageMiddleware::new();
        let mut scope = HookScope::default();
        let mut result = AgentResult::empty();

        let ctx = AgentContext::new(
            DispatchRequest::new("p").with_command("docs"),
            BufferStream::new(),
            CancelToken::new(),
        );
        usage.after(&ctx, &mut result, &mut scope).await.unwrap();
        usage.after(&ctx, &mut result, &mut scope).await.unwrap();

        let routed = AgentContext::new(
            DispatchRequest::new("p"),
            BufferStream::new(),
            CancelToken::new(),
        );
        usage.after(&routed, &mut result, &mut scope).await.unwrap();

        assert_eq!(usage.count("docs"), 2);
        assert_eq!(usage.count("(routed)"), 1);
        assert_eq!(usage.totals().len(), 2);
    }
}

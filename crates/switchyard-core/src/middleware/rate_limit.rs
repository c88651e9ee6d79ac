//! Sliding-window request throttle.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::agent::AgentContext;
use crate::error::Result;

use super::{HookScope, Middleware, Verdict};

pub const RATE_LIMIT_PRIORITY: i32 = 10;

struct WindowState {
    limit: u32,
    hits: VecDeque<Instant>,
}

/// Admits at most `limit` invocations per rolling 60-second window.
///
/// The window is process-global: concurrent requests observe the same
/// hit list. Over the limit, the request short-circuits with a
/// user-visible `throttled` marker instead of reaching the agent.
pub struct RateLimitMiddleware {
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimitMiddleware {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            window: Duration::from_secs(60),
            state: Mutex::new(WindowState {
                limit: limit_per_minute,
                hits: VecDeque::new(),
            }),
        }
    }

    pub fn set_limit(&self, limit_per_minute: u32) {
        self.state.lock().limit = limit_per_minute;
    }

    /// Prune the window, then admit or refuse.
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        while let Some(front) = state.hits.front() {
            if now.duration_since(*front) > self.window {
                state.hits.pop_front();
            } else {
                break;
            }
        }

        if state.hits.len() as u32 >= state.limit {
            return false;
        }

        state.hits.push_back(now);
        true
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn priority(&self) -> i32 {
        RATE_LIMIT_PRIORITY
    }

    async fn before(&self, ctx: &AgentContext, _scope: &mut HookScope) -> Result<Verdict> {
        if self.allow() {
            return Ok(Verdict::Continue);
        }

        debug!(prompt_len = ctx.request.prompt.len(), "request throttled");
        let mut metadata = Map::new();
        metadata.insert("throttled".to_string(), json!(true));
        metadata.insert(
            "message".to_string(),
            Value::String(
                "Too many requests this minute. Wait a moment and try again.".to_string(),
            ),
        );
        Ok(Verdict::Skip(metadata))
    }
}

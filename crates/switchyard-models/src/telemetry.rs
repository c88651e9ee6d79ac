//! Daily usage counters and routing hints.

use serde::{Deserialize, Serialize};

/// Per-day, per-agent invocation counters persisted under `telemetry.daily`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyUsage {
    /// Day in `YYYY-MM-DD`.
    pub date: String,
    pub agent_id: String,
    pub invocations: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

impl DailyUsage {
    pub fn new(date: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            agent_id: agent_id.into(),
            invocations: 0,
            failures: 0,
            avg_latency_ms: 0.0,
        }
    }

    /// Fold one finished invocation into the running averages.
    pub fn record(&mut self, latency_ms: u64, failed: bool) {
        let total = self.avg_latency_ms * self.invocations as f64 + latency_ms as f64;
        self.invocations += 1;
        if failed {
            self.failures += 1;
        }
        self.avg_latency_ms = total / self.invocations as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            return 1.0;
        }
        (self.invocations - self.failures) as f64 / self.invocations as f64
    }
}

/// Per-agent summary handed to the smart router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteHint {
    pub agent_id: String,
    /// 0.0 ..= 1.0
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

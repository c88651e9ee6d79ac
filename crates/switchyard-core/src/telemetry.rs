//! Per-day invocation counters feeding the smart router.

use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_models::{DailyUsage, RouteHint};
use switchyard_storage::{keys, KvStore};
use tracing::warn;

/// Aggregates invocation counts, failures, and latency per agent per
/// day, durable under `telemetry.daily`.
pub struct UsageLedger {
    rows: Mutex<Vec<DailyUsage>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl UsageLedger {
    pub fn new(kv: Option<Arc<dyn KvStore>>) -> Self {
        let ledger = Self {
            rows: Mutex::new(Vec::new()),
            kv,
        };
        ledger.load();
        ledger
    }

    pub fn record(&self, agent_id: &str, latency_ms: u64, failed: bool) {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        {
            let mut rows = self.rows.lock();
            let row = match rows
                .iter_mut()
                .find(|row| row.date == today && row.agent_id == agent_id)
            {
                Some(row) => row,
                None => {
                    rows.push(DailyUsage::new(&today, agent_id));
                    rows.last_mut().expect("row just pushed")
                }
            };
            row.record(latency_ms, failed);
        }
        self.persist();
    }

    pub fn rows(&self) -> Vec<DailyUsage> {
        self.rows.lock().clone()
    }

    /// Per-agent aggregate across all recorded days, weighted by
    /// invocation count.
    pub fn route_hints(&self) -> Vec<RouteHint> {
        struct Totals {
            invocations: u64,
            failures: u64,
            latency_sum: f64,
        }

        let rows = self.rows.lock();
        let mut totals: std::collections::BTreeMap<String, Totals> =
            std::collections::BTreeMap::new();
        for row in rows.iter() {
            let entry = totals.entry(row.agent_id.clone()).or_insert(Totals {
                invocations: 0,
                failures: 0,
                latency_sum: 0.0,
            });
            entry.invocations += row.invocations;
            entry.failures += row.failures;
            entry.latency_sum += row.avg_latency_ms * row.invocations as f64;
        }

        totals
            .into_iter()
            .map(|(agent_id, totals)| {
                let (success_rate, avg_latency_ms) = if totals.invocations == 0 {
                    (1.0, 0.0)
                } else {
                    (
                        (totals.invocations - totals.failures) as f64
                            / totals.invocations as f64,
                        totals.latency_sum / totals.invocations as f64,
                    )
                };
                RouteHint {
                    agent_id,
                    success_rate,
                    avg_latency_ms,
                }
            })
            .collect()
    }

    pub fn clear(&self) {
        self.rows.lock().clear();
        self.persist();
    }

    fn load(&self) {
        let Some(kv) = &self.kv else { return };
        match kv.get(keys::TELEMETRY_DAILY) {
            Ok(Some(payload)) => match serde_json::from_str::<Vec<DailyUsage>>(&payload) {
                Ok(rows) => *self.rows.lock() = rows,
                Err(error) => warn!(error = %error, "persisted telemetry is corrupt"),
            },
            Ok(None) => {}
            Err(error) => warn!(error = %error, "failed to read persisted telemetry"),
        }
    }

    fn persist(&self) {
        let Some(kv) = &self.kv else { return };
        let rows = self.rows.lock().clone();
        match serde_json::to_string(&rows) {
            Ok(payload) => {
                if let Err(error) = kv.set(keys::TELEMETRY_DAILY, &payload) {
                    warn!(error = %error, "failed to persist telemetry");
                }
            }
            Err(error) => warn!(error = %error, "failed to serialize telemetry"),
        }
    }
}

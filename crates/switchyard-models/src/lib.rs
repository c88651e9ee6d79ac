//! Data model for the Switchyard dispatch runtime.
//!
//! Plain serde types shared by the storage and core crates: requests and
//! results, cache entries, memory records, checkpoints, workflow
//! definitions, telemetry rows, plugin specs, and configuration.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod memory;
pub mod plugin;
pub mod request;
pub mod result;
pub mod telemetry;
pub mod workflow;

pub use cache::{CacheEntry, CacheStats};
pub use checkpoint::{Checkpoint, CheckpointStatus, FileSnapshot};
pub use config::{
    EventRule, GuardrailConfig, HostSettings, MemoryConfig, ProjectConfig,
};
pub use conversation::{ConversationTurn, TurnRole};
pub use memory::{MemoryKind, MemoryRecord, MemoryStats, RecallFilter};
pub use plugin::{PluginAgentSpec, PluginSpecError};
pub use request::{DispatchRequest, Reference};
pub use result::{AgentResult, Suggestion};
pub use telemetry::{DailyUsage, RouteHint};
pub use workflow::{
    FailurePolicy, RetryPolicy, StepCondition, WorkflowDefinition, WorkflowStep,
};

/// Current timestamp in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

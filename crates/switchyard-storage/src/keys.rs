//! Well-known persistence keys shared across the runtime.

/// Response cache: `[key, CacheEntry]` pairs.
pub const RESPONSE_CACHE: &str = "responseCache";

/// Ordered conversation history.
pub const CONVERSATIONS: &str = "conversations";

/// Active profile id.
pub const ACTIVE_PROFILE: &str = "profiles.active";

/// Per-day usage counters.
pub const TELEMETRY_DAILY: &str = "telemetry.daily";

const MEMORY_PREFIX: &str = "memory.";

/// Memory records for one agent.
pub fn memory(agent_id: &str) -> String {
    format!("{MEMORY_PREFIX}{agent_id}")
}

/// Prefix matching every agent's memory key.
pub fn memory_prefix() -> &'static str {
    MEMORY_PREFIX
}

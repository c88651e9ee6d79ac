//! Project configuration (`agentrc.json`) and host settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowDefinition;

/// A host event wired to an agent reaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRule {
    /// Event name (e.g. `file-saved`, `diagnostics-changed`).
    pub event: String,
    /// Optional glob restricting which resources trigger the rule.
    #[serde(default)]
    pub pattern: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// `memory` block of the project file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    pub enabled: bool,
    #[serde(default)]
    pub max_age_ms: Option<i64>,
    #[serde(default)]
    pub max_count: Option<usize>,
}

/// `guardrails` block of the project file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,
    #[serde(default)]
    pub dry_run_default: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            confirm_destructive: true,
            dry_run_default: false,
        }
    }
}

/// Project-local configuration, `<project>/agentrc.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub disabled_agents: Vec<String>,
    /// Extra prompt text appended to an agent's workspace context.
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    #[serde(default)]
    pub event_rules: Vec<EventRule>,
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    #[serde(default)]
    pub guardrails: Option<GuardrailConfig>,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowDefinition>,
    /// Agent id or category -> preferred model id.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

/// Host-level settings, flat keys, effective immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    pub rate_limit_per_minute: u32,
    pub guardrails_enabled: bool,
    pub guardrails_dry_run: bool,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_ttl_ms: i64,
    pub memory_max_count: usize,
    pub memory_prune_after_days: u32,
    pub autonomous_max_steps: u32,
    pub autonomous_confirm_before_apply: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 30,
            guardrails_enabled: true,
            guardrails_dry_run: false,
            cache_enabled: true,
            cache_max_entries: 200,
            cache_ttl_ms: 600_000,
            memory_max_count: 500,
            memory_prune_after_days: 30,
            autonomous_max_steps: 10,
            autonomous_confirm_before_apply: true,
        }
    }
}

impl HostSettings {
    pub fn memory_max_age_ms(&self) -> i64 {
        i64::from(self.memory_prune_after_days) * 86_400_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = HostSettings::default();
        assert_eq!(settings.rate_limit_per_minute, 30);
        assert_eq!(settings.cache_max_entries, 200);
        assert_eq!(settings.cache_ttl_ms, 600_000);
        assert_eq!(settings.memory_max_count, 500);
        assert_eq!(settings.autonomous_max_steps, 10);
        assert!(settings.autonomous_confirm_before_apply);
        assert_eq!(settings.memory_max_age_ms(), 30 * 86_400_000);
    }

    #[test]
    fn test_project_config_parses_partial_file() {
        let config: ProjectConfig = serde_json::from_str(
            r#"{
                "defaultAgent": "code",
                "disabledAgents": ["legacy"],
                "models": {"code": "m-large"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_agent.as_deref(), Some("code"));
        assert_eq!(config.disabled_agents, vec!["legacy"]);
        assert_eq!(config.models.get("code").map(String::as_str), Some("m-large"));
        assert!(config.workflows.is_empty());
        assert!(config.memory.is_none());
    }

    #[test]
    fn test_guardrail_config_defaults() {
        let config: GuardrailConfig = serde_json::from_str("{}").unwrap();
        assert!(config.confirm_destructive);
        assert!(!config.dry_run_default);
    }
}

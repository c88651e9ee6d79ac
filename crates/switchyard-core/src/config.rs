//! Project configuration loading and event-rule matching.

use std::path::Path;

use parking_lot::RwLock;
use switchyard_models::{EventRule, ProjectConfig};
use tracing::debug;

use crate::error::{CoreError, Result};

/// File name looked up in the project root.
pub const PROJECT_CONFIG_FILE: &str = "agentrc.json";

/// Read and parse `<project>/agentrc.json`. A missing file yields the
/// default (empty) configuration; a malformed file is an error the host
/// surfaces as a non-blocking notification.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(PROJECT_CONFIG_FILE);
    if !path.exists() {
        debug!(path = %path.display(), "no project configuration; using defaults");
        return Ok(ProjectConfig::default());
    }

    let raw = std::fs::read_to_string(&path)?;
    let config: ProjectConfig = serde_json::from_str(&raw).map_err(|error| {
        CoreError::Execution(format!(
            "invalid {PROJECT_CONFIG_FILE}: {error}"
        ))
    })?;
    Ok(config)
}

/// Event rules registered from project configuration, matched by event
/// name and optional resource glob.
pub struct EventRuleBook {
    rules: RwLock<Vec<EventRule>>,
}

impl EventRuleBook {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn replace(&self, rules: Vec<EventRule>) {
        *self.rules.write() = rules;
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Rules firing for an event, optionally filtered by resource path.
    pub fn matching(&self, event: &str, resource: Option<&str>) -> Vec<EventRule> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.event == event)
            .filter(|rule| match (&rule.pattern, resource) {
                (Some(pattern), Some(resource)) => glob_match::glob_match(pattern, resource),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect()
    }
}

impl Default for EventRuleBook {
    fn default() -> Self {
        Self::new()
    }
}

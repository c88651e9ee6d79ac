//! Plugin agent definitions loaded from JSON files.
//!
//! Unknown fields are ignored on purpose so newer plugin files keep
//! loading on older hosts; everything else is validated before the agent
//! can be registered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a plugin file was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginSpecError {
    #[error("plugin id must be non-empty kebab-case ([a-z0-9-]), got '{0}'")]
    InvalidId(String),
    #[error("plugin '{0}' is missing a display name")]
    MissingName(String),
    #[error("plugin '{0}' is missing a description")]
    MissingDescription(String),
    #[error("plugin '{0}' is missing a system prompt")]
    MissingSystemPrompt(String),
    #[error("plugin '{0}' delegate '{1}' is not kebab-case")]
    InvalidDelegate(String, String),
}

/// One plugin-defined agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginAgentSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub autonomous: bool,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared delegation targets. Shape-checked at load time but not
    /// enforced at dispatch.
    #[serde(default)]
    pub delegates: Vec<String>,
    /// User-defined prompt variables; built-ins win on collision.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

pub(crate) fn is_kebab_case(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl PluginAgentSpec {
    /// Validate everything that must hold before registration.
    pub fn validate(&self) -> Result<(), PluginSpecError> {
        if !is_kebab_case(&self.id) {
            return Err(PluginSpecError::InvalidId(self.id.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(PluginSpecError::MissingName(self.id.clone()));
        }
        if self.description.trim().is_empty() {
            return Err(PluginSpecError::MissingDescription(self.id.clone()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(PluginSpecError::MissingSystemPrompt(self.id.clone()));
        }
        for delegate in &self.delegates {
            if !is_kebab_case(delegate) {
                return Err(PluginSpecError::InvalidDelegate(
                    self.id.clone(),
                    delegate.clone(),
                ));
            }
        }
        Ok(())
    }
}

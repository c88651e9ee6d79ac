//! Per-agent model preference resolution.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Tuning knobs resolved alongside the model id.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Maps agent ids (or agent categories) to preferred models.
///
/// Resolution order: agent-specific preference, then category preference,
/// then whatever the request asked for, then the configured default.
/// Agents consult the selector from inside their send helpers, so a
/// delegated agent always runs on its own preferred model.
pub struct ModelSelector {
    preferences: RwLock<HashMap<String, String>>,
    options: RwLock<HashMap<String, ModelOptions>>,
    default_model: RwLock<String>,
}

impl ModelSelector {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            preferences: RwLock::new(HashMap::new()),
            options: RwLock::new(HashMap::new()),
            default_model: RwLock::new(default_model.into()),
        }
    }

    pub fn set_default_model(&self, model: impl Into<String>) {
        *self.default_model.write() = model.into();
    }

    pub fn default_model(&self) -> String {
        self.default_model.read().clone()
    }

    /// Install a preference for an agent id or category key.
    pub fn set_preference(&self, key: impl Into<String>, model: impl Into<String>) {
        self.preferences.write().insert(key.into(), model.into());
    }

    /// Replace all preferences (configuration reload).
    pub fn replace_preferences(&self, preferences: HashMap<String, String>) {
        *self.preferences.write() = preferences;
    }

    pub fn set_options(&self, key: impl Into<String>, options: ModelOptions) {
        self.options.write().insert(key.into(), options);
    }

    pub fn options_for(&self, agent_id: &str) -> ModelOptions {
        self.options
            .read()
            .get(agent_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn select(
        &self,
        agent_id: &str,
        category: Option<&str>,
        requested: Option<&str>,
    ) -> String {
        let preferences = self.preferences.read();
        if let Some(model) = preferences.get(agent_id) {
            return model.clone();
        }
        if let Some(category) = category {
            if let Some(model) = preferences.get(category) {
                return model.clone();
            }
        }
        if let Some(requested) = requested {
            return requested.to_string();
        }
        self.default_model.read().clone()
    }
}

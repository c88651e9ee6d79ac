//! Agent handler result and follow-up suggestions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A follow-up action offered to the user after a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub title: String,
    /// Prompt submitted when the user picks the suggestion.
    pub prompt: String,
}

impl Suggestion {
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
        }
    }
}

/// What an agent hands back from `handle`.
///
/// The rendered text itself travels over the output stream; the result
/// carries structured metadata and follow-ups. Two metadata keys have
/// runtime meaning: `filesAffected` (paths the guardrails fold into the
/// active checkpoint) and `remember` (`false` opts out of memory
/// persistence).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentResult {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub follow_ups: Vec<Suggestion>,
}

impl AgentResult {
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_follow_up(mut self, suggestion: Suggestion) -> Self {
        self.follow_ups.push(suggestion);
        self
    }

    /// Paths reported under the `filesAffected` metadata key.
    pub fn files_affected(&self) -> Vec<String> {
        self.metadata
            .get("filesAffected")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the response may be written to the memory store.
    /// Defaults to true; only an explicit `remember: false` opts out.
    pub fn should_remember(&self) -> bool {
        self.metadata
            .get("remember")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

//! Inbound request shape handed to the dispatcher by the host.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTurn;

/// A piece of host-supplied reference material attached to a request
/// (an open file, a selection, a pasted snippet).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reference {
    /// Short label shown to the user (file name, "selection", ...).
    pub label: String,
    /// The referenced text.
    pub content: String,
}

impl Reference {
    pub fn new(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
        }
    }
}

/// One chat-style request from the host.
///
/// The command, when present, is the slash-command token without the
/// leading slash (`"code"`, `"workflow-release"`, `"collab-vote"`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchRequest {
    pub prompt: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Conversation turns the host already holds for this thread.
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Model id requested by the user, if any.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the host wants incremental output.
    #[serde(default)]
    pub stream: bool,
}

impl DispatchRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }
}

//! Declarative workflow definitions.
//!
//! Workflows load from project configuration, so every part of a step is
//! data: conditions are a small declarative enum evaluated against prior
//! step outputs rather than host-language closures.

use serde::{Deserialize, Serialize};

/// Fixed-backoff retry policy for one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

/// What to do when a step has exhausted its retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
}

/// Predicate over previously completed steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// Run unconditionally.
    #[default]
    Always,
    /// Run only if the named step completed without error.
    StepSucceeded { step: String },
    /// Run only if the named step's output contains the needle.
    OutputContains { step: String, needle: String },
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    pub agent_id: String,
    pub prompt: String,
    /// Prefix this step's prompt with all prior successful outputs.
    #[serde(default)]
    pub pipe_output: bool,
    /// Steps sharing a group value run concurrently; the group completes
    /// before any later step starts.
    #[serde(default)]
    pub parallel_group: Option<u32>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub condition: StepCondition,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl WorkflowStep {
    pub fn new(
        name: impl Into<String>,
        agent_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            pipe_output: false,
            parallel_group: None,
            retry: None,
            condition: StepCondition::Always,
            on_failure: FailurePolicy::Abort,
        }
    }

    #[must_use]
    pub fn piped(mut self) -> Self {
        self.pipe_output = true;
        self
    }

    #[must_use]
    pub fn in_group(mut self, group: u32) -> Self {
        self.parallel_group = Some(group);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            attempts,
            backoff_ms,
        });
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.on_failure = FailurePolicy::Continue;
        self
    }
}

/// A named multi-step pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_defaults() {
        let step = WorkflowStep::new("draft", "writer", "write it");
        assert!(!step.pipe_output);
        assert!(step.parallel_group.is_none());
        assert!(step.retry.is_none());
        assert_eq!(step.condition, StepCondition::Always);
        assert_eq!(step.on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn test_definition_round_trip() {
        let definition = WorkflowDefinition::new(
            "release",
            vec![
                WorkflowStep::new("draft", "writer", "write notes").in_group(1),
                WorkflowStep::new("check", "reviewer", "review notes")
                    .in_group(1)
                    .with_retry(2, 50),
                WorkflowStep::new("publish", "publisher", "publish").piped(),
            ],
        );

        let json = serde_json::to_string(&definition).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, definition);
    }

    #[test]
    fn test_condition_deserializes_from_config_shape() {
        let condition: StepCondition = serde_json::from_str(
            r#"{"type":"output_contains","step":"check","needle":"LGTM"}"#,
        )
        .unwrap();
        assert_eq!(
            condition,
            StepCondition::OutputContains {
                step: "check".to_string(),
                needle: "LGTM".to_string()
            }
        );
    }
}

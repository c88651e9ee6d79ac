//! Declarative multi-step workflow execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use switchyard_models::{
    FailurePolicy, StepCondition, WorkflowDefinition, WorkflowStep,
};
use tracing::{debug, warn};

use crate::agent::AgentContext;
use crate::cancel::CancelToken;
use crate::error::{CoreError, Result};
use crate::registry::{AgentRegistry, PIPE_SEPARATOR};

/// How one step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    /// Condition was false; counts as success with empty output.
    Skipped,
}

/// Result of one executed (or skipped) step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: String,
    pub agent_id: String,
    pub output: String,
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

/// Registers and runs workflow definitions.
///
/// Execution follows the declarative plan exactly: serial steps in
/// order, contiguous steps sharing a `parallel_group` started together
/// and awaited together, with group *n* complete before anything in
/// group *n+1* starts.
pub struct WorkflowEngine {
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
    registry: Arc<AgentRegistry>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            registry,
        }
    }

    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        self.definitions
            .write()
            .insert(definition.name.clone(), definition);
    }

    pub fn get_workflow(&self, name: &str) -> Option<WorkflowDefinition> {
        self.definitions.read().get(name).cloned()
    }

    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove_workflow(&self, name: &str) -> bool {
        self.definitions.write().remove(name).is_some()
    }

    pub fn clear_workflows(&self) {
        self.definitions.write().clear();
    }

    pub async fn run(&self, name: &str, ctx: &AgentContext) -> Result<Vec<StepOutcome>> {
        let definition = self
            .get_workflow(name)
            .ok_or_else(|| CoreError::UnknownWorkflow(name.to_string()))?;
        debug!(workflow = name, steps = definition.steps.len(), "running workflow");

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(definition.steps.len());
        for unit in partition(definition.steps) {
            ctx.token.ensure_active()?;

            let unit_outcomes = if unit.len() == 1 {
                let step = &unit[0];
                vec![self.run_step(step, &outcomes, ctx).await]
            } else {
                // Whole group starts together and is awaited together.
                let snapshot = outcomes.clone();
                join_all(
                    unit.iter()
                        .map(|step| self.run_step(step, &snapshot, ctx)),
                )
                .await
            };

            for (step, outcome) in unit.iter().zip(unit_outcomes) {
                let abort = matches!(outcome.status, StepStatus::Failed(_))
                    && step.on_failure == FailurePolicy::Abort;
                outcomes.push(outcome);
                if abort {
                    let failed = &outcomes[outcomes.len() - 1];
                    let reason = match &failed.status {
                        StepStatus::Failed(reason) => reason.clone(),
                        _ => String::new(),
                    };
                    warn!(workflow = name, step = %failed.step, "workflow aborted");
                    return Err(CoreError::Execution(format!(
                        "workflow '{name}' aborted at step '{}': {reason}",
                        failed.step
                    )));
                }
            }
        }

        Ok(outcomes)
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        prior: &[StepOutcome],
        ctx: &AgentContext,
    ) -> StepOutcome {
        if !condition_holds(&step.condition, prior) {
            debug!(step = %step.name, "condition false; skipping step");
            return StepOutcome {
                step: step.name.clone(),
                agent_id: step.agent_id.clone(),
                output: String::new(),
                status: StepStatus::Skipped,
            };
        }

        let prompt = if step.pipe_output {
            let piped: Vec<&str> = prior
                .iter()
                .filter(|outcome| {
                    outcome.status == StepStatus::Succeeded && !outcome.output.is_empty()
                })
                .map(|outcome| outcome.output.as_str())
                .collect();
            if piped.is_empty() {
                step.prompt.clone()
            } else {
                format!("{}{}{}", piped.join("\n\n"), PIPE_SEPARATOR, step.prompt)
            }
        } else {
            step.prompt.clone()
        };

        let attempts = step.retry.map(|retry| retry.attempts.max(1)).unwrap_or(1);
        let backoff = step
            .retry
            .map(|retry| Duration::from_millis(retry.backoff_ms))
            .unwrap_or_default();

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if let Err(error) = ctx.token.ensure_active() {
                last_error = error.to_string();
                break;
            }

            match self
                .registry
                .delegate(&step.agent_id, ctx, Some(&prompt))
                .await
            {
                Ok(delegation) => {
                    return StepOutcome {
                        step: step.name.clone(),
                        agent_id: step.agent_id.clone(),
                        output: delegation.captured_text,
                        status: StepStatus::Succeeded,
                    };
                }
                Err(error) => {
                    last_error = error.to_string();
                    if attempt < attempts {
                        debug!(
                            step = %step.name,
                            attempt,
                            error = %last_error,
                            "step failed; retrying after backoff"
                        );
                        sleep_respecting_cancel(backoff, &ctx.token).await;
                    }
                }
            }
        }

        StepOutcome {
            step: step.name.clone(),
            agent_id: step.agent_id.clone(),
            output: String::new(),
            status: StepStatus::Failed(last_error),
        }
    }
}

/// Split the step list into execution units: single serial steps, or
/// contiguous runs sharing a parallel group value.
fn partition(steps: Vec<WorkflowStep>) -> Vec<Vec<WorkflowStep>> {
    let mut units: Vec<Vec<WorkflowStep>> = Vec::new();
    for step in steps {
        let joins_previous = match (&step.parallel_group, units.last()) {
            (Some(group), Some(last)) => last[0].parallel_group == Some(*group),
            _ => false,
        };
        if joins_previous {
            if let Some(last) = units.last_mut() {
                last.push(step);
            }
        } else {
            units.push(vec![step]);
        }
    }
    units
}

fn condition_holds(condition: &StepCondition, prior: &[StepOutcome]) -> bool {
    match condition {
        StepCondition::Always => true,
        StepCondition::StepSucceeded { step } => prior
            .iter()
            .any(|outcome| outcome.step == *step && outcome.status == StepStatus::Succeeded),
        StepCondition::OutputContains { step, needle } => prior.iter().any(|outcome| {
            outcome.step == *step
                && outcome.status == StepStatus::Succeeded
                && outcome.output.contains(needle)
        }),
    }
}

async fn sleep_respecting_cancel(duration: Duration, token: &CancelToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::stream::BufferStream;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use switchyard_models::{now_ms, AgentResult, DispatchRequest};

    struct ScriptedAgent {
        id: String,
        reply: String,
        failures_before_success: Mutex<u32>,
        events: Option<Arc<Mutex<Vec<(String, i64, i64)>>>>,
    }

    impl ScriptedAgent {
        fn ok(id: &str, reply: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                id: id.to_string(),
                reply: reply.to_string(),
                failures_before_success: Mutex::new(0),
                events: None,
            })
        }

        fn flaky(id: &str, reply: &str, failures: u32) -> Arc<dyn Agent> {
            Arc::new(Self {
                id: id.to_string(),
                reply: reply.to_string(),
                failures_before_success: Mutex::new(failures),
                events: None,
            })
        }

        fn timed(id: &str, events: Arc<Mutex<Vec<(String, i64, i64)>>>) -> Arc<dyn Agent> {
            Arc::new(Self {
                id: id.to_string(),
                reply: "done".to_string(),
                failures_before_success: Mutex::new(0),
                events: Some(events),
            })
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn display_name(&self) -> &str {
            &self.id
        }
        fn description(&self) -> &str {
            "scripted"
        }
        async fn handle(&self, ctx: &AgentContext) -> crate::error::Result<AgentResult> {
            {
                let mut failures = self.failures_before_success.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(CoreError::Execution("scripted failure".to_string()));
                }
            }
            let started = now_ms();
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(events) = &self.events {
                events.lock().push((self.id.clone(), started, now_ms()));
            }
            ctx.stream.emit_markdown(&self.reply).await;
            Ok(AgentResult::empty())
        }
    }

    fn engine_with(agents: Vec<Arc<dyn Agent>>) -> WorkflowEngine {
        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register(agent);
        }
        WorkflowEngine::new(registry)
    }

    fn ctx() -> AgentContext {
        AgentContext::new(
            DispatchRequest::new("go"),
            BufferStream::new(),
            CancelToken::new(),
        )
    }

    #[test]
    fn test_definition_registration_round_trip() {
        let engine = engine_with(vec![]);
        let definition = WorkflowDefinition::new(
            "release",
            vec![WorkflowStep::new("draft", "writer", "write")],
        );

        engine.register_workflow(definition.clone());
        assert_eq!(engine.get_workflow("release"), Some(definition));
        assert_eq!(engine.list_workflows(), vec!["release"]);

        assert!(engine.remove_workflow("release"));
        assert!(engine.get_workflow("release").is_none());
        assert!(!engine.remove_workflow("release"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_errors() {
        let engine = engine_with(vec![]);
        let result = engine.run("ghost", &ctx()).await;
        assert!(matches!(result, Err(CoreError::UnknownWorkflow(_))));
    }

    #[tokio::test]
    async fn test_serial_steps_pipe_outputs_forward() {
        let engine = engine_with(vec![
            ScriptedAgent::ok("writer", "draft text"),
            ScriptedAgent::ok("editor", "polished"),
        ]);
        engine.register_workflow(WorkflowDefinition::new(
            "publish",
            vec![
                WorkflowStep::new("draft", "writer", "write it"),
                WorkflowStep::new("edit", "editor", "edit it").piped(),
            ],
        ));

        let outcomes = engine.run("publish", &ctx()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(StepOutcome::succeeded));
        assert_eq!(outcomes[0].output, "draft text");
    }

    #[tokio::test]
    async fn test_parallel_group_completes_before_next_group() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = engine_with(vec![
            ScriptedAgent::timed("a", events.clone()),
            ScriptedAgent::timed("b", events.clone()),
            ScriptedAgent::timed("c", events.clone()),
        ]);
        engine.register_workflow(WorkflowDefinition::new(
            "fan",
            vec![
                WorkflowStep::new("one", "a", "p").in_group(1),
                WorkflowStep::new("two", "b", "p").in_group(1),
                WorkflowStep::new("three", "c", "p").in_group(2),
            ],
        ));

        let outcomes = engine.run("fan", &ctx()).await.unwrap();
        assert_eq!(outcomes.len(), 3);

        let log = events.lock();
        let group_one_max_end = log
            .iter()
            .filter(|(id, _, _)| id == "a" || id == "b")
            .map(|(_, _, end)| *end)
            .max()
            .unwrap();
        let group_two_start = log
            .iter()
            .find(|(id, _, _)| id == "c")
            .map(|(_, start, _)| *start)
            .unwrap();
        assert!(group_two_start >= group_one_max_end);
    }

    #[tokio::test]
    async fn test_retry_recovers_flaky_step() {
        let engine = engine_with(vec![ScriptedAgent::flaky("flaky", "finally", 2)]);
        engine.register_workflow(WorkflowDefinition::new(
            "retry",
            vec![WorkflowStep::new("attempt", "flaky", "p").with_retry(3, 5)],
        ));

        let outcomes = engine.run("retry", &ctx()).await.unwrap();
        assert_eq!(outcomes[0].status, StepStatus::Succeeded);
        assert_eq!(outcomes[0].output, "finally");
    }

    #[tokio::test]
    async fn test_exhausted_retries_abort_by_default() {
        let engine = engine_with(vec![ScriptedAgent::flaky("flaky", "never", 10)]);
        engine.register_workflow(WorkflowDefinition::new(
            "retry",
            vec![
                WorkflowStep::new("attempt", "flaky", "p").with_retry(2, 1),
                WorkflowStep::new("after", "flaky", "p"),
            ],
        ));

        let result = engine.run("retry", &ctx()).await;
        assert!(matches!(result, Err(CoreError::Execution(_))));
    }

    #[tokio::test]
    async fn test_continue_policy_carries_on_past_failure() {
        let engine = engine_with(vec![
            ScriptedAgent::flaky("broken", "never", 10),
            ScriptedAgent::ok("closer", "done"),
        ]);
        engine.register_workflow(WorkflowDefinition::new(
            "tolerant",
            vec![
                WorkflowStep::new("try", "broken", "p").continue_on_failure(),
                WorkflowStep::new("finish", "closer", "p"),
            ],
        ));

        let outcomes = engine.run("tolerant", &ctx()).await.unwrap();
        assert!(matches!(outcomes[0].status, StepStatus::Failed(_)));
        assert_eq!(outcomes[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_false_condition_skips_step_as_success() {
        let engine = engine_with(vec![
            ScriptedAgent::ok("writer", "no marker here"),
            ScriptedAgent::ok("publisher", "published"),
        ]);
        engine.register_workflow(WorkflowDefinition::new(
            "conditional",
            vec![
                WorkflowStep::new("draft", "writer", "p"),
                WorkflowStep::new("publish", "publisher", "p").with_condition(
                    StepCondition::OutputContains {
                        step: "draft".to_string(),
                        needle: "APPROVED".to_string(),
                    },
                ),
            ],
        ));

        let outcomes = engine.run("conditional", &ctx()).await.unwrap();
        assert_eq!(outcomes[1].status, StepStatus::Skipped);
        assert_eq!(outcomes[1].output, "");
        assert!(outcomes[1].succeeded());
    }

    #[tokio::test]
    async fn test_condition_on_succeeded_step_runs() {
        let engine = engine_with(vec![
            ScriptedAgent::ok("writer", "text"),
            ScriptedAgent::ok("publisher", "published"),
        ]);
        engine.register_workflow(WorkflowDefinition::new(
            "gated",
            vec![
                WorkflowStep::new("draft", "writer", "p"),
                WorkflowStep::new("publish", "publisher", "p").with_condition(
                    StepCondition::StepSucceeded {
                        step: "draft".to_string(),
                    },
                ),
            ],
        ));

        let outcomes = engine.run("gated", &ctx()).await.unwrap();
        assert_eq!(outcomes[1].status, StepStatus::Succeeded);
    }

    #[test]
    fn test_partition_groups_contiguous_steps() {
        let steps = vec![
            WorkflowStep::new("s1", "a", "p"),
            WorkflowStep::new("g1a", "a", "p").in_group(1),
            WorkflowStep::new("g1b", "a", "p").in_group(1),
            WorkflowStep::new("g2a", "a", "p").in_group(2),
            WorkflowStep::new("s2", "a", "p"),
        ];

        let units = partition(steps);
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].len(), 1);
        assert_eq!(units[1].len(), 2);
        assert_eq!(units[2].len(), 1);
        assert_eq!(units[3].len(), 1);
    }
}

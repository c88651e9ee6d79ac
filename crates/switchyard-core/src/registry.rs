//! Agent registration and routing.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use switchyard_models::{AgentResult, RouteHint};
use tracing::{debug, warn};

use crate::agent::{Agent, AgentContext};
use crate::cancel::CancelToken;
use crate::error::{CoreError, Result};
use crate::llm::{CompletionRequest, LanguageModel, Message};
use crate::stream::CaptureStream;

/// Appended between a prior step's output and the next step's prompt.
pub const PIPE_SEPARATOR: &str = "\n\n---\n\n";

/// Hard cap on sequential chain length.
pub const MAX_CHAIN_DEPTH: usize = 20;

/// Inputs for [`AgentRegistry::smart_route`].
#[derive(Default)]
pub struct SmartRouteOptions {
    /// Restrict candidates to this profile when non-empty.
    pub profile_agents: Vec<String>,
    /// Per-agent success-rate/latency hints from telemetry.
    pub hints: Vec<RouteHint>,
}

/// Result of one delegated invocation.
pub struct Delegation {
    pub result: AgentResult,
    pub captured_text: String,
}

/// One unit of work for [`AgentRegistry::parallel`].
#[derive(Debug, Clone)]
pub struct ParallelTask {
    pub agent_id: String,
    /// Prompt override; the context prompt is used when absent.
    pub prompt: Option<String>,
}

/// Per-task outcome of a parallel run. Errors are data, never panics or
/// propagated failures.
pub struct ParallelOutcome {
    pub agent_id: String,
    pub result: Option<AgentResult>,
    pub text: String,
    pub error: Option<String>,
}

/// One step of a sequential chain.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub agent_id: String,
    pub prompt: String,
    /// Append the previous step's captured output to this prompt.
    pub pipe_output: bool,
}

/// Outcome of one chain step.
pub struct ChainOutcome {
    pub agent_id: String,
    pub result: AgentResult,
    pub text: String,
}

/// The process-global agent registry.
///
/// Registration order is preserved: the first agent ever registered
/// becomes the default, and when the default is unregistered the earliest
/// remaining registration takes over (stable across calls).
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn Agent>>>,
    default_id: RwLock<Option<String>>,
    router: RwLock<Option<Arc<dyn LanguageModel>>>,
    router_model: RwLock<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            default_id: RwLock::new(None),
            router: RwLock::new(None),
            router_model: RwLock::new("default".to_string()),
        }
    }

    /// Attach the transport used by `smart_route`.
    pub fn set_router(&self, model: Arc<dyn LanguageModel>, model_id: impl Into<String>) {
        *self.router.write() = Some(model);
        *self.router_model.write() = model_id.into();
    }

    /// Register by id. Re-registering an existing id replaces the agent
    /// in place (plugin hot-reload); the first registration becomes the
    /// default.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.id().to_string();
        let mut agents = self.agents.write();
        if let Some(slot) = agents.iter_mut().find(|existing| existing.id() == id) {
            *slot = agent;
        } else {
            agents.push(agent);
        }
        drop(agents);

        let mut default_id = self.default_id.write();
        if default_id.is_none() {
            debug!(agent_id = %id, "first registration becomes default");
            *default_id = Some(id);
        }
    }

    /// Remove by id. Returns whether anything was removed. If the default
    /// goes away, the earliest remaining registration becomes the new
    /// default.
    pub fn unregister(&self, id: &str) -> bool {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|agent| agent.id() != id);
        let removed = agents.len() != before;

        if removed {
            let mut default_id = self.default_id.write();
            if default_id.as_deref() == Some(id) {
                *default_id = agents.first().map(|agent| agent.id().to_string());
            }
        }
        removed
    }

    pub fn set_default(&self, id: &str) -> Result<()> {
        if self.get(id).is_none() {
            return Err(CoreError::UnknownAgent(id.to_string()));
        }
        *self.default_id.write() = Some(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .iter()
            .find(|agent| agent.id() == id)
            .cloned()
    }

    pub fn default_agent(&self) -> Option<Arc<dyn Agent>> {
        let default_id = self.default_id.read().clone()?;
        self.get(&default_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents
            .read()
            .iter()
            .map(|agent| agent.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Static resolution: slash command by id (unknown command falls back
    /// to the default), else the first live profile agent, else the
    /// default.
    pub fn resolve(
        &self,
        ctx: &AgentContext,
        profile_agents: Option<&[String]>,
    ) -> Option<Arc<dyn Agent>> {
        if let Some(command) = &ctx.request.command {
            return self.get(command).or_else(|| self.default_agent());
        }

        if let Some(profile) = profile_agents {
            if let Some(agent) = profile.iter().find_map(|id| self.get(id)) {
                return Some(agent);
            }
        }

        self.default_agent()
    }

    /// LLM-assisted routing over agent descriptions.
    ///
    /// The router model sees only ids and descriptions, never the user's
    /// code; its reply is sanitized and validated against the registry and
    /// is never executed. Any failure falls back to the default agent.
    pub async fn smart_route(
        &self,
        ctx: &AgentContext,
        options: &SmartRouteOptions,
    ) -> Result<Arc<dyn Agent>> {
        let fallback = || {
            self.default_agent()
                .ok_or_else(|| CoreError::UnknownAgent("no agents registered".to_string()))
        };

        let candidates: Vec<Arc<dyn Agent>> = {
            let agents = self.agents.read();
            agents
                .iter()
                .filter(|agent| {
                    options.profile_agents.is_empty()
                        || options
                            .profile_agents
                            .iter()
                            .any(|id| id == agent.id())
                })
                .cloned()
                .collect()
        };

        let Some(router) = self.router.read().clone() else {
            return fallback();
        };
        if candidates.is_empty() {
            return fallback();
        }

        let prompt = Self::router_prompt(&ctx.request.prompt, &candidates, &options.hints);
        let request = CompletionRequest::new(self.router_model.read().clone(), vec![
            Message::user(prompt),
        ]);

        let reply = match router.complete(&request, &ctx.token).await {
            Ok(response) => response.content,
            Err(error) => {
                warn!(error = %error, "router transport failed, using default agent");
                return fallback();
            }
        };

        let chosen = sanitize_agent_id(&reply);
        match candidates.iter().find(|agent| agent.id() == chosen) {
            Some(agent) => {
                debug!(agent_id = %chosen, "smart route selected agent");
                Ok(agent.clone())
            }
            None => {
                debug!(reply = %chosen, "router reply did not match any agent");
                fallback()
            }
        }
    }

    fn router_prompt(
        user_prompt: &str,
        candidates: &[Arc<dyn Agent>],
        hints: &[RouteHint],
    ) -> String {
        let mut prompt = String::from(
            "Pick the single best handler for the request below. \
             Reply with exactly one id token and nothing else.\n\nHandlers:\n",
        );
        for agent in candidates {
            prompt.push_str(&format!("- {}: {}", agent.id(), agent.description()));
            if let Some(hint) = hints.iter().find(|hint| hint.agent_id == agent.id()) {
                prompt.push_str(&format!(
                    " (success {:.0}%, avg {:.0}ms)",
                    hint.success_rate * 100.0,
                    hint.avg_latency_ms
                ));
            }
            prompt.push('\n');
        }
        prompt.push_str("\nRequest:\n");
        prompt.push_str(user_prompt);
        prompt
    }

    /// Invoke another agent with its output siphoned into a buffer while
    /// still reaching the original stream.
    pub async fn delegate(
        &self,
        target_id: &str,
        ctx: &AgentContext,
        override_prompt: Option<&str>,
    ) -> Result<Delegation> {
        let agent = self
            .get(target_id)
            .ok_or_else(|| CoreError::UnknownAgent(target_id.to_string()))?;

        let capture = CaptureStream::wrap(ctx.stream.clone());
        let derived = ctx.derived(capture.clone(), override_prompt);
        let result = agent.handle(&derived).await?;

        Ok(Delegation {
            result,
            captured_text: capture.captured(),
        })
    }

    /// Run tasks concurrently under one cancel token. Per-task errors are
    /// captured, never propagated; outputs preserve task order.
    pub async fn parallel(
        &self,
        tasks: Vec<ParallelTask>,
        ctx: &AgentContext,
    ) -> Vec<ParallelOutcome> {
        let shared_token = ctx.token.child();

        let futures = tasks.into_iter().map(|task| {
            let token = shared_token.clone();
            async move {
                let mut task_ctx = ctx.clone();
                task_ctx.token = token;
                match self
                    .delegate(&task.agent_id, &task_ctx, task.prompt.as_deref())
                    .await
                {
                    Ok(delegation) => ParallelOutcome {
                        agent_id: task.agent_id,
                        result: Some(delegation.result),
                        text: delegation.captured_text,
                        error: None,
                    },
                    Err(error) => ParallelOutcome {
                        agent_id: task.agent_id,
                        result: None,
                        text: String::new(),
                        error: Some(error.to_string()),
                    },
                }
            }
        });

        join_all(futures).await
    }

    /// Sequential chain. When a step pipes, the previous step's captured
    /// text is appended to its prompt behind [`PIPE_SEPARATOR`].
    pub async fn chain(
        &self,
        steps: Vec<ChainStep>,
        ctx: &AgentContext,
    ) -> Result<Vec<ChainOutcome>> {
        if steps.len() > MAX_CHAIN_DEPTH {
            return Err(CoreError::ChainTooDeep(steps.len(), MAX_CHAIN_DEPTH));
        }

        let mut outcomes: Vec<ChainOutcome> = Vec::with_capacity(steps.len());
        for step in steps {
            ctx.token.ensure_active()?;

            let prompt = if step.pipe_output {
                match outcomes.last() {
                    Some(previous) => {
                        format!("{}{}{}", step.prompt, PIPE_SEPARATOR, previous.text)
                    }
                    None => step.prompt.clone(),
                }
            } else {
                step.prompt.clone()
            };

            let delegation = self.delegate(&step.agent_id, ctx, Some(&prompt)).await?;
            outcomes.push(ChainOutcome {
                agent_id: step.agent_id,
                result: delegation.result,
                text: delegation.captured_text,
            });
        }
        Ok(outcomes)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, `[a-z0-9-]` only. Router replies pass through this before
/// the lookup.
fn sanitize_agent_id(reply: &str) -> String {
    reply
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

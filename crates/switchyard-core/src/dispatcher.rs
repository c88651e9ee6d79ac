//! The request handler gluing every component together.
//!
//! One dispatcher owns the process-global state: registry, pipeline,
//! cache, memory, guardrails, workflows, conversation log, telemetry,
//! and profiles. Components are constructed here at boot and passed by
//! reference; nothing reaches for globals.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use switchyard_models::{
    now_ms, AgentResult, ConversationTurn, HostSettings, MemoryKind, ProjectConfig,
};
use switchyard_storage::KvStore;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentContext, PromptRunner};
use crate::cache::{CacheConfig, CacheLookup, ResponseCache};
use crate::cancel::CancelToken;
use crate::collab::{CollabCoordinator, CollabMode};
use crate::config::EventRuleBook;
use crate::conversation::ConversationLog;
use crate::error::{CoreError, Result};
use crate::exec::AutonomousExecutor;
use crate::guardrails::{AutoApprove, CheckpointStore, ConfirmationGate};
use crate::llm::LanguageModel;
use crate::memory::MemoryStore;
use crate::middleware::{
    Middleware, MiddlewarePipeline, RateLimitMiddleware, TimingMiddleware, UsageMiddleware,
};
use crate::model_select::ModelSelector;
use crate::registry::{AgentRegistry, SmartRouteOptions};
use crate::stream::{CaptureStream, OutputStream};
use crate::workflow::WorkflowEngine;

/// Responses shorter than this are not worth remembering.
const MIN_REMEMBER_CHARS: usize = 100;

/// Conversation tail folded into the enriched context.
const HISTORY_TAIL_TURNS: usize = 10;
const HISTORY_TAIL_CHARS: usize = 4_000;

/// Memory context budget per request.
const MEMORY_CONTEXT_CHARS: usize = 2_000;

/// Administrative host commands with no request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// Roll back the most recent committed checkpoint.
    Undo,
    ClearCache,
    ClearMemory,
    Health,
}

/// What one dispatch produced.
pub struct DispatchOutcome {
    /// The agent that handled the request; `None` for workflow and
    /// collaboration commands.
    pub agent_id: Option<String>,
    /// Captured response body.
    pub text: String,
    pub result: Option<AgentResult>,
    pub from_cache: bool,
}

/// Everything needed to boot a dispatcher.
pub struct DispatcherConfig {
    pub workspace_root: PathBuf,
    pub kv: Option<Arc<dyn KvStore>>,
    pub transport: Arc<dyn LanguageModel>,
    pub default_model: String,
    pub settings: HostSettings,
}

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    pipeline: Arc<MiddlewarePipeline>,
    cache: Arc<ResponseCache>,
    memory: Arc<MemoryStore>,
    guardrails: Arc<CheckpointStore>,
    workflows: Arc<WorkflowEngine>,
    collab: Arc<CollabCoordinator>,
    conversations: Arc<ConversationLog>,
    telemetry: Arc<crate::telemetry::UsageLedger>,
    profiles: Arc<crate::profiles::ProfileRegistry>,
    selector: Arc<ModelSelector>,
    runner: Arc<PromptRunner>,
    event_rules: Arc<EventRuleBook>,
    rate_limiter: Arc<RateLimitMiddleware>,
    usage: Arc<UsageMiddleware>,
    gate: RwLock<Arc<dyn ConfirmationGate>>,
    settings: RwLock<HostSettings>,
    disabled: RwLock<HashSet<String>>,
    workspace_prompts: RwLock<BTreeMap<String, String>>,
    /// Host-provided workspace snapshot (git diff, diagnostics,
    /// selection), refreshed by the host between requests.
    workspace_context: RwLock<Option<String>>,
    user_middlewares: Mutex<Vec<Arc<dyn Middleware>>>,
    /// Workflow names owned by project configuration, so a config reload
    /// can unregister the ones that disappeared.
    config_workflows: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let settings = config.settings;

        let registry = Arc::new(AgentRegistry::new());
        registry.set_router(config.transport.clone(), config.default_model.clone());

        let selector = Arc::new(ModelSelector::new(config.default_model));
        let runner = Arc::new(PromptRunner::new(config.transport, selector.clone()));

        let cache = Arc::new(ResponseCache::new(
            CacheConfig {
                enabled: settings.cache_enabled,
                max_entries: settings.cache_max_entries,
                ttl_ms: settings.cache_ttl_ms,
            },
            config.kv.clone(),
        ));
        let memory = Arc::new(MemoryStore::new(config.kv.clone()));
        let conversations = Arc::new(ConversationLog::new(config.kv.clone()));
        let telemetry = Arc::new(crate::telemetry::UsageLedger::new(config.kv.clone()));
        let profiles = Arc::new(crate::profiles::ProfileRegistry::new(config.kv));

        let guardrails = Arc::new(CheckpointStore::new(config.workspace_root));
        guardrails.set_enabled(settings.guardrails_enabled);
        guardrails.set_dry_run(settings.guardrails_dry_run);
        guardrails.set_confirm_destructive(settings.autonomous_confirm_before_apply);

        let workflows = Arc::new(WorkflowEngine::new(registry.clone()));
        let collab = Arc::new(CollabCoordinator::new(registry.clone(), runner.clone()));

        let rate_limiter = Arc::new(RateLimitMiddleware::new(settings.rate_limit_per_minute));
        let usage = Arc::new(UsageMiddleware::new());
        let pipeline = Arc::new(MiddlewarePipeline::new());

        let dispatcher = Self {
            registry,
            pipeline,
            cache,
            memory,
            guardrails,
            workflows,
            collab,
            conversations,
            telemetry,
            profiles,
            selector,
            runner,
            event_rules: Arc::new(EventRuleBook::new()),
            rate_limiter,
            usage,
            gate: RwLock::new(Arc::new(AutoApprove)),
            settings: RwLock::new(settings),
            disabled: RwLock::new(HashSet::new()),
            workspace_prompts: RwLock::new(BTreeMap::new()),
            workspace_context: RwLock::new(None),
            user_middlewares: Mutex::new(Vec::new()),
            config_workflows: Mutex::new(HashSet::new()),
        };
        dispatcher.rebuild_pipeline();
        dispatcher
    }

    // ── component access ─────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn guardrails(&self) -> &Arc<CheckpointStore> {
        &self.guardrails
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    pub fn collab(&self) -> &Arc<CollabCoordinator> {
        &self.collab
    }

    pub fn conversations(&self) -> &Arc<ConversationLog> {
        &self.conversations
    }

    pub fn telemetry(&self) -> &Arc<crate::telemetry::UsageLedger> {
        &self.telemetry
    }

    pub fn profiles(&self) -> &Arc<crate::profiles::ProfileRegistry> {
        &self.profiles
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    pub fn runner(&self) -> &Arc<PromptRunner> {
        &self.runner
    }

    pub fn event_rules(&self) -> &Arc<EventRuleBook> {
        &self.event_rules
    }

    pub fn usage(&self) -> &Arc<UsageMiddleware> {
        &self.usage
    }

    pub fn set_confirmation_gate(&self, gate: Arc<dyn ConfirmationGate>) {
        *self.gate.write() = gate;
    }

    /// The host refreshes this between requests (git diff, diagnostics,
    /// selection).
    pub fn set_workspace_context(&self, context: Option<String>) {
        *self.workspace_context.write() = context;
    }

    // ── middleware management ────────────────────────────────────────

    /// Add a host middleware. Survives settings-driven pipeline
    /// rebuilds.
    pub fn register_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.user_middlewares.lock().push(middleware.clone());
        self.pipeline.register(middleware);
    }

    fn rebuild_pipeline(&self) {
        self.pipeline.clear();
        self.pipeline.register(self.rate_limiter.clone());
        self.pipeline.register(Arc::new(TimingMiddleware));
        self.pipeline.register(self.usage.clone());
        for middleware in self.user_middlewares.lock().iter() {
            self.pipeline.register(middleware.clone());
        }
    }

    // ── configuration ────────────────────────────────────────────────

    /// Apply host settings; effective immediately.
    pub fn apply_settings(&self, settings: HostSettings) {
        self.rate_limiter.set_limit(settings.rate_limit_per_minute);
        self.rebuild_pipeline();

        self.guardrails.set_enabled(settings.guardrails_enabled);
        self.guardrails.set_dry_run(settings.guardrails_dry_run);
        self.guardrails
            .set_confirm_destructive(settings.autonomous_confirm_before_apply);

        self.cache.configure(CacheConfig {
            enabled: settings.cache_enabled,
            max_entries: settings.cache_max_entries,
            ttl_ms: settings.cache_ttl_ms,
        });

        self.memory.prune(
            Some(settings.memory_max_age_ms()),
            Some(settings.memory_max_count),
        );

        *self.settings.write() = settings;
    }

    /// Apply project configuration (`agentrc.json`).
    pub fn apply_project_config(&self, config: &ProjectConfig) {
        if let Some(default_agent) = &config.default_agent {
            if let Err(error) = self.registry.set_default(default_agent) {
                warn!(agent_id = %default_agent, error = %error, "configured default agent is unknown");
            }
        }

        *self.disabled.write() = config.disabled_agents.iter().cloned().collect();
        *self.workspace_prompts.write() = config.prompts.clone();
        self.event_rules.replace(config.event_rules.clone());

        if let Some(memory) = &config.memory {
            if memory.enabled {
                self.memory.prune(memory.max_age_ms, memory.max_count);
            }
        }

        if let Some(guardrails) = &config.guardrails {
            self.guardrails
                .set_confirm_destructive(guardrails.confirm_destructive);
            self.guardrails.set_dry_run(guardrails.dry_run_default);
        }

        // Workflows removed from the file are unregistered; everything
        // else is (re)registered.
        {
            let mut owned = self.config_workflows.lock();
            for stale in owned.iter() {
                if !config.workflows.contains_key(stale) {
                    self.workflows.remove_workflow(stale);
                }
            }
            owned.clear();
            for (name, definition) in &config.workflows {
                let mut definition = definition.clone();
                definition.name = name.clone();
                self.workflows.register_workflow(definition);
                owned.insert(name.clone());
            }
        }

        self.selector.replace_preferences(
            config
                .models
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        info!("project configuration applied");
    }

    // ── administrative commands ──────────────────────────────────────

    pub async fn admin(&self, action: AdminAction) -> Result<String> {
        match action {
            AdminAction::Undo => match self.guardrails.latest_committed() {
                Some(checkpoint_id) => {
                    self.guardrails.rollback(&checkpoint_id)?;
                    Ok("Rolled back the most recent change set.".to_string())
                }
                None => Ok("Nothing to undo.".to_string()),
            },
            AdminAction::ClearCache => {
                self.cache.clear();
                Ok("Response cache cleared.".to_string())
            }
            AdminAction::ClearMemory => {
                self.memory.clear();
                Ok("Agent memory cleared.".to_string())
            }
            AdminAction::Health => {
                let cache_stats = self.cache.stats();
                let memory_stats = self.memory.stats();
                Ok(format!(
                    "agents: {}, middlewares: {}, workflows: {}, cache: {} entries \
                     ({:.0}% hit rate), memory: {} records",
                    self.registry.len(),
                    self.pipeline.len(),
                    self.workflows.list_workflows().len(),
                    cache_stats.size,
                    cache_stats.hit_rate_percent,
                    memory_stats.total_records,
                ))
            }
        }
    }

    // ── the request timeline ─────────────────────────────────────────

    pub async fn dispatch(
        &self,
        request: switchyard_models::DispatchRequest,
        stream: Arc<dyn OutputStream>,
        token: CancelToken,
    ) -> Result<DispatchOutcome> {
        // Persist the user turn first; even failed requests are part of
        // the conversation.
        self.conversations
            .append(ConversationTurn::user(&request.prompt));

        // Workflow and collaboration commands bypass agent resolution.
        if let Some(command) = request.command.clone() {
            if command == "workflow-run" {
                return self.list_workflows_command(&stream).await;
            }
            if let Some(name) = command.strip_prefix("workflow-") {
                return self
                    .workflow_command(name, request, stream, token)
                    .await;
            }
            if let Some(mode) = CollabMode::from_command(&command) {
                return self.collab_command(mode, request, stream, token).await;
            }
        }

        // Resolve the agent: command, profile, default, then the smart
        // router.
        let profile_agents = self.profiles.active_agents();
        let resolve_ctx = AgentContext::new(request.clone(), stream.clone(), token.clone());
        let agent = match self
            .registry
            .resolve(&resolve_ctx, profile_agents.as_deref())
        {
            Some(agent) => agent,
            None if request.command.is_none() => {
                let options = SmartRouteOptions {
                    profile_agents: profile_agents.clone().unwrap_or_default(),
                    hints: self.telemetry.route_hints(),
                };
                self.registry.smart_route(&resolve_ctx, &options).await?
            }
            None => {
                return Err(CoreError::UnknownAgent(
                    request.command.clone().unwrap_or_default(),
                ))
            }
        };
        let agent_id = agent.id().to_string();

        if self.disabled.read().contains(&agent_id) {
            let message = format!(
                "Agent '{agent_id}' is disabled by project configuration. \
                 Enable it in agentrc.json to use it."
            );
            stream.emit_error(&message).await;
            return Err(CoreError::AgentDisabled(agent_id));
        }

        // Cache consultation.
        let model_id =
            self.selector
                .select(&agent_id, agent.category(), request.model.as_deref());
        let cache_key = ResponseCache::make_key(
            &request.prompt,
            request.command.as_deref(),
            &agent_id,
            Some(&model_id),
        );
        if let CacheLookup::Found(cached) = self.cache.lookup(&cache_key) {
            debug!(agent_id = %agent_id, "serving cached response");
            stream.emit_markdown(&cached).await;
            self.conversations
                .append(ConversationTurn::assistant(&cached));
            return Ok(DispatchOutcome {
                agent_id: Some(agent_id),
                text: cached,
                result: None,
                from_cache: true,
            });
        }

        // Guardrail checkpoint for autonomous handling.
        let checkpoint_id = if agent.is_autonomous() && self.guardrails.is_enabled() {
            Some(self.guardrails.create_checkpoint(&agent_id)?)
        } else {
            None
        };

        // Destructive-op confirmation happens before the clock starts,
        // so dialog time never counts toward timing metrics.
        if checkpoint_id.is_some() && self.settings.read().autonomous_confirm_before_apply {
            let gate = self.gate.read().clone();
            let approved = gate
                .confirm(&format!(
                    "Agent '{agent_id}' wants to modify files in the workspace."
                ))
                .await;
            if !approved {
                if let Some(checkpoint_id) = &checkpoint_id {
                    let _ = self.guardrails.rollback(checkpoint_id);
                }
                stream.emit_status("Change declined; nothing was modified.").await;
                return Err(CoreError::Cancelled);
            }
        }

        // Context enrichment and capture wrapping; timing starts inside
        // the pipeline from here on.
        let capture = CaptureStream::wrap(stream.clone());
        let enriched = self.enrich_context(&agent_id, &request);
        let mut ctx = AgentContext::new(request.clone(), capture.clone(), token.clone())
            .with_history(self.conversations.tail(HISTORY_TAIL_TURNS, HISTORY_TAIL_CHARS));
        if !enriched.is_empty() {
            ctx = ctx.with_enriched_context(enriched);
        }
        if let Some(checkpoint_id) = &checkpoint_id {
            let settings = self.settings.read();
            let mut executor = AutonomousExecutor::new(
                self.guardrails.root().clone(),
                token.clone(),
                settings.autonomous_max_steps,
            )
            .with_checkpoint(self.guardrails.clone(), checkpoint_id.clone());
            if self.guardrails.is_dry_run() {
                executor = executor.with_dry_run(capture.clone());
            }
            ctx = ctx.with_executor(Arc::new(executor));
        }

        let started = now_ms();
        match self.pipeline.execute(agent.as_ref(), &ctx).await {
            Ok(result) => {
                let latency = (now_ms() - started).max(0) as u64;
                let captured = capture.captured();

                if let Some(checkpoint_id) = &checkpoint_id {
                    let files = result.files_affected();
                    if !files.is_empty() {
                        self.guardrails.mark_created(checkpoint_id, &files)?;
                    }
                    self.guardrails.commit(checkpoint_id)?;
                }

                self.telemetry.record(&agent_id, latency, false);

                if !captured.is_empty() {
                    self.cache
                        .set(&cache_key, &captured, &agent_id, Some(&model_id));
                }

                if result.should_remember() && captured.len() >= MIN_REMEMBER_CHARS {
                    let summary: String = captured.chars().take(500).collect();
                    self.memory.remember(
                        &agent_id,
                        &summary,
                        vec!["conversation".to_string()],
                        MemoryKind::Context,
                    );
                }

                self.conversations
                    .append(ConversationTurn::assistant(&captured));

                Ok(DispatchOutcome {
                    agent_id: Some(agent_id),
                    text: captured,
                    result: Some(result),
                    from_cache: false,
                })
            }
            Err(error) => {
                let latency = (now_ms() - started).max(0) as u64;
                self.telemetry.record(&agent_id, latency, true);

                if let Some(checkpoint_id) = &checkpoint_id {
                    if let Err(rollback_error) = self.guardrails.rollback(checkpoint_id) {
                        warn!(error = %rollback_error, "rollback after failure did not complete");
                    }
                }

                stream.emit_error(&error.user_message()).await;
                warn!(agent_id = %agent_id, error = %error, "agent invocation failed");
                Err(error)
            }
        }
    }

    async fn list_workflows_command(
        &self,
        stream: &Arc<dyn OutputStream>,
    ) -> Result<DispatchOutcome> {
        let names = self.workflows.list_workflows();
        let rendered = if names.is_empty() {
            "No workflows are registered.".to_string()
        } else {
            let mut rendered = String::from("Available workflows:\n");
            for name in &names {
                rendered.push_str(&format!("- `workflow-{name}`\n"));
            }
            rendered
        };
        stream.emit_markdown(&rendered).await;
        self.conversations
            .append(ConversationTurn::assistant(&rendered));
        Ok(DispatchOutcome {
            agent_id: None,
            text: rendered,
            result: None,
            from_cache: false,
        })
    }

    async fn workflow_command(
        &self,
        name: &str,
        request: switchyard_models::DispatchRequest,
        stream: Arc<dyn OutputStream>,
        token: CancelToken,
    ) -> Result<DispatchOutcome> {
        let capture = CaptureStream::wrap(stream.clone());
        let ctx = AgentContext::new(request, capture.clone(), token)
            .with_history(self.conversations.tail(HISTORY_TAIL_TURNS, HISTORY_TAIL_CHARS));

        let outcomes = self.workflows.run(name, &ctx).await?;
        debug!(workflow = name, steps = outcomes.len(), "workflow finished");

        let text = capture.captured();
        self.conversations
            .append(ConversationTurn::assistant(&text));
        Ok(DispatchOutcome {
            agent_id: None,
            text,
            result: None,
            from_cache: false,
        })
    }

    async fn collab_command(
        &self,
        mode: CollabMode,
        request: switchyard_models::DispatchRequest,
        stream: Arc<dyn OutputStream>,
        token: CancelToken,
    ) -> Result<DispatchOutcome> {
        let (roster, question) = CollabCoordinator::parse_roster(&request.prompt)?;

        let capture = CaptureStream::wrap(stream.clone());
        let ctx = AgentContext::new(request, capture.clone(), token)
            .with_history(self.conversations.tail(HISTORY_TAIL_TURNS, HISTORY_TAIL_CHARS));

        let rendered = self.collab.run(mode, &roster, &question, &ctx).await?;
        self.conversations
            .append(ConversationTurn::assistant(&rendered));
        Ok(DispatchOutcome {
            agent_id: None,
            text: rendered,
            result: None,
            from_cache: false,
        })
    }

    /// Memory, conversation, and workspace context assembled for the
    /// agent. Sections are omitted when empty.
    fn enrich_context(
        &self,
        agent_id: &str,
        request: &switchyard_models::DispatchRequest,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        let memory = self
            .memory
            .build_context_window(agent_id, MEMORY_CONTEXT_CHARS);
        if !memory.is_empty() {
            sections.push(format!("## Remembered\n{memory}"));
        }

        let mut workspace = String::new();
        if let Some(context) = self.workspace_context.read().as_deref() {
            workspace.push_str(context);
            workspace.push('\n');
        }
        if let Some(prompt) = self.workspace_prompts.read().get(agent_id) {
            workspace.push_str(prompt);
            workspace.push('\n');
        }
        if !workspace.is_empty() {
            sections.push(format!("## Workspace\n{workspace}"));
        }

        if !request.references.is_empty() {
            let mut references = String::from("## References\n");
            for reference in &request.references {
                references.push_str(&format!(
                    "### {}\n{}\n",
                    reference.label, reference.content
                ));
            }
            sections.push(references);
        }

        sections.join("\n")
    }
}

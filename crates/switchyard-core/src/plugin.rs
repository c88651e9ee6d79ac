//! Plugin-defined agents and the hot-reload loader entry points.
//!
//! The filesystem watcher is the host's; it calls `plugin_changed` /
//! `plugin_removed` with file contents and ids. Everything here is
//! validation, substitution, and registry bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_models::{AgentResult, PluginAgentSpec};
use tracing::{info, warn};

use crate::agent::{Agent, AgentContext, PromptRunner};
use crate::error::{CoreError, Result};
use crate::registry::AgentRegistry;
use crate::template::render_single_pass;

/// Workspace facts substituted into plugin system prompts.
#[derive(Debug, Clone, Default)]
pub struct PluginEnvironment {
    pub workspace_root: String,
    pub language: String,
}

/// An agent backed by a plugin definition: one system prompt sent
/// through the shared prompt runner.
pub struct PluginAgent {
    spec: PluginAgentSpec,
    system_prompt: String,
    runner: Arc<PromptRunner>,
}

impl PluginAgent {
    pub fn new(
        spec: PluginAgentSpec,
        environment: &PluginEnvironment,
        runner: Arc<PromptRunner>,
    ) -> Self {
        let system_prompt = substitute_prompt(&spec, environment);
        Self {
            spec,
            system_prompt,
            runner,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl Agent for PluginAgent {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn display_name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn is_autonomous(&self) -> bool {
        self.spec.autonomous
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentResult> {
        self.runner
            .send(&self.spec.id, None, &self.system_prompt, ctx)
            .await?;
        Ok(AgentResult::empty())
    }
}

/// Built-in variables substitute before user variables: a user-defined
/// `{{workspaceRoot}}` can never shadow the real workspace root. One
/// merged single-pass render gives exactly that precedence.
fn substitute_prompt(spec: &PluginAgentSpec, environment: &PluginEnvironment) -> String {
    let mut replacements: HashMap<String, String> = spec
        .variables
        .iter()
        .map(|(key, value)| (format!("{{{{{key}}}}}"), value.clone()))
        .collect();

    replacements.insert(
        "{{workspaceRoot}}".to_string(),
        environment.workspace_root.clone(),
    );
    replacements.insert("{{language}}".to_string(), environment.language.clone());
    replacements.insert(
        "{{date}}".to_string(),
        chrono::Utc::now().format("%Y-%m-%d").to_string(),
    );

    render_single_pass(&spec.system_prompt, &replacements)
}

/// Validates plugin JSON and swaps agents in the registry.
pub struct PluginLoader {
    registry: Arc<AgentRegistry>,
    runner: Arc<PromptRunner>,
    environment: PluginEnvironment,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<AgentRegistry>,
        runner: Arc<PromptRunner>,
        environment: PluginEnvironment,
    ) -> Self {
        Self {
            registry,
            runner,
            environment,
        }
    }

    /// Parse and validate a plugin file. Malformed input is a permanent,
    /// user-visible error; the plugin is never executed.
    pub fn load_spec(&self, json: &str) -> Result<PluginAgentSpec> {
        let spec: PluginAgentSpec = serde_json::from_str(json)
            .map_err(|error| CoreError::InvalidPlugin(error.to_string()))?;
        spec.validate()
            .map_err(|error| CoreError::InvalidPlugin(error.to_string()))?;
        Ok(spec)
    }

    /// A plugin file appeared or changed: validate, unregister any old
    /// agent with the same id, register the replacement. Returns the
    /// agent id.
    pub fn plugin_changed(&self, json: &str) -> Result<String> {
        let spec = match self.load_spec(json) {
            Ok(spec) => spec,
            Err(error) => {
                warn!(error = %error, "rejected plugin definition");
                return Err(error);
            }
        };

        let id = spec.id.clone();
        let agent = Arc::new(PluginAgent::new(
            spec,
            &self.environment,
            self.runner.clone(),
        ));
        // register() replaces in place, which keeps the transition atomic
        // from the registry's point of view.
        self.registry.register(agent);
        info!(agent_id = %id, "plugin agent registered");
        Ok(id)
    }

    /// A plugin file disappeared.
    pub fn plugin_removed(&self, id: &str) -> bool {
        let removed = self.registry.unregister(id);
        if removed {
            info!(agent_id = id, "plugin agent unregistered");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::llm::MockModel;
    use crate::model_select::ModelSelector;
    use crate::stream::BufferStream;
    use switchyard_models::DispatchRequest;

    fn loader() -> (PluginLoader, Arc<AgentRegistry>, Arc<MockModel>) {
        let registry = Arc::new(AgentRegistry::new());
        let model = Arc::new(MockModel::new());
        let runner = Arc::new(PromptRunner::new(
            model.clone(),
            Arc::new(ModelSelector::new("m-default")),
        ));
        let environment = PluginEnvironment {
            workspace_root: "/work/project".to_string(),
            language: "rust".to_string(),
        };
        (
            PluginLoader::new(registry.clone(), runner, environment),
            registry,
            model,
        )
    }

    const PLUGIN_JSON: &str = r#"{
        "id": "release-notes",
        "name": "Release Notes",
        "description": "Drafts release notes",
        "systemPrompt": "Work in {{workspaceRoot}} using {{language}}. Style: {{style}}.",
        "variables": {"style": "terse", "workspaceRoot": "/tmp/evil"}
    }"#;

    #[test]
    fn test_plugin_changed_registers_agent() {
        let (loader, registry, _) = loader();
        let id = loader.plugin_changed(PLUGIN_JSON).unwrap();
        assert_eq!(id, "release-notes");
        assert!(registry.get("release-notes").is_some());
    }

    #[test]
    fn test_builtins_beat_user_variables() {
        let (loader, registry, _) = loader();
        loader.plugin_changed(PLUGIN_JSON).unwrap();

        let agent = registry.get("release-notes").unwrap();
        // Downcast through a fresh construction to inspect the prompt.
        let spec = loader.load_spec(PLUGIN_JSON).unwrap();
        let plugin = PluginAgent::new(
            spec,
            &PluginEnvironment {
                workspace_root: "/work/project".to_string(),
                language: "rust".to_string(),
            },
            Arc::new(PromptRunner::new(
                Arc::new(MockModel::new()),
                Arc::new(ModelSelector::new("m")),
            )),
        );
        assert!(plugin.system_prompt().contains("/work/project"));
        assert!(!plugin.system_prompt().contains("/tmp/evil"));
        assert!(plugin.system_prompt().contains("Style: terse"));
        assert_eq!(agent.description(), "Drafts release notes");
    }

    #[test]
    fn test_malformed_plugin_is_rejected() {
        let (loader, registry, _) = loader();

        let bad_json = loader.plugin_changed("{not json");
        assert!(matches!(bad_json, Err(CoreError::InvalidPlugin(_))));

        let bad_id = loader.plugin_changed(
            r#"{"id": "Bad Id", "name": "x", "description": "d", "systemPrompt": "p"}"#,
        );
        assert!(matches!(bad_id, Err(CoreError::InvalidPlugin(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reload_replaces_and_removal_unregisters() {
        let (loader, registry, _) = loader();
        loader.plugin_changed(PLUGIN_JSON).unwrap();

        let updated = PLUGIN_JSON.replace("Drafts release notes", "Writes changelogs");
        loader.plugin_changed(&updated).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("release-notes").unwrap().description(),
            "Writes changelogs"
        );

        assert!(loader.plugin_removed("release-notes"));
        assert!(!loader.plugin_removed("release-notes"));
        assert!(registry.get("release-notes").is_none());
    }

    #[tokio::test]
    async fn test_plugin_agent_streams_through_runner() {
        let (loader, registry, model) = loader();
        loader.plugin_changed(PLUGIN_JSON).unwrap();
        model.enqueue_reply("drafted notes");

        let stream = BufferStream::new();
        let ctx = AgentContext::new(
            DispatchRequest::new("draft them"),
            stream.clone(),
            CancelToken::new(),
        );

        let agent = registry.get("release-notes").unwrap();
        agent.handle(&ctx).await.unwrap();
        assert_eq!(stream.markdown(), "drafted notes");

        // The system prompt the transport saw carries the substitution.
        let request = &model.requests()[0];
        assert!(request.messages[0].content.contains("/work/project"));
    }
}

//! Multi-agent collaboration: vote, debate, consensus, review.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::agent::{AgentContext, PromptRunner};
use crate::error::{CoreError, Result};
use crate::registry::{AgentRegistry, ParallelTask};

/// Collaboration styles, one per `collab-*` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollabMode {
    Vote,
    Debate,
    Consensus,
    Review,
}

impl CollabMode {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "collab-vote" => Some(Self::Vote),
            "collab-debate" => Some(Self::Debate),
            "collab-consensus" => Some(Self::Consensus),
            "collab-review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// Tunables the host may override. The consensus synthesis prompt is
/// deliberately configuration, not a constant.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    pub synthesis_prompt: String,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            synthesis_prompt: "Synthesize one consensus answer from the responses \
                               below. Keep points of agreement, resolve conflicts, \
                               and note any open disagreement."
                .to_string(),
        }
    }
}

/// Runs a panel of agents against one question.
pub struct CollabCoordinator {
    registry: Arc<AgentRegistry>,
    runner: Arc<PromptRunner>,
    config: RwLock<CollabConfig>,
}

impl CollabCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, runner: Arc<PromptRunner>) -> Self {
        Self {
            registry,
            runner,
            config: RwLock::new(CollabConfig::default()),
        }
    }

    pub fn configure(&self, config: CollabConfig) {
        *self.config.write() = config;
    }

    /// Split `"agent-a,agent-b question text"` into roster and question.
    pub fn parse_roster(prompt: &str) -> Result<(Vec<String>, String)> {
        let trimmed = prompt.trim();
        let (roster_part, question) = match trimmed.split_once(char::is_whitespace) {
            Some((roster, question)) => (roster, question.trim().to_string()),
            None => (trimmed, String::new()),
        };

        if !roster_part.contains(',') {
            return Err(CoreError::Execution(
                "collaboration commands expect a comma-separated agent list, \
                 e.g. `code,docs How should we version this?`"
                    .to_string(),
            ));
        }

        let roster: Vec<String> = roster_part
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if roster.len() < 2 {
            return Err(CoreError::Execution(
                "collaboration needs at least two agents".to_string(),
            ));
        }

        Ok((roster, question))
    }

    pub async fn run(
        &self,
        mode: CollabMode,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        for id in agent_ids {
            if self.registry.get(id).is_none() {
                return Err(CoreError::UnknownAgent(id.clone()));
            }
        }
        debug!(?mode, agents = agent_ids.len(), "collaboration starting");

        match mode {
            CollabMode::Vote => self.vote(agent_ids, question, ctx).await,
            CollabMode::Debate => self.debate(agent_ids, question, ctx).await,
            CollabMode::Consensus => self.consensus(agent_ids, question, ctx).await,
            CollabMode::Review => self.review(agent_ids, question, ctx).await,
        }
    }

    /// Each agent answers independently; the most common first token of
    /// the answers wins, ties going to the earlier agent.
    async fn vote(
        &self,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let answers = self.gather(agent_ids, question, ctx).await;

        let mut tally: Vec<(String, usize)> = Vec::new();
        for (_, answer) in &answers {
            let token = first_token(answer);
            if token.is_empty() {
                continue;
            }
            match tally.iter_mut().find(|(candidate, _)| *candidate == token) {
                Some((_, count)) => *count += 1,
                None => tally.push((token, 1)),
            }
        }
        let winner = tally
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(token, _)| token.clone())
            .unwrap_or_default();

        let mut rendered = String::from("## Vote\n");
        for (agent_id, answer) in &answers {
            rendered.push_str(&format!("- **{agent_id}**: {}\n", first_token(answer)));
        }
        rendered.push_str(&format!("\n**Winner:** {winner}\n"));
        ctx.stream.emit_markdown(&rendered).await;
        Ok(rendered)
    }

    /// Two rounds: independent answers, then each agent revises with the
    /// other positions in view.
    async fn debate(
        &self,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let opening = self.gather(agent_ids, question, ctx).await;

        let mut rebuttal_tasks = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let others: String = opening
                .iter()
                .filter(|(other, _)| other != agent_id)
                .map(|(other, answer)| format!("### {other}\n{answer}\n"))
                .collect();
            rebuttal_tasks.push(ParallelTask {
                agent_id: agent_id.clone(),
                prompt: Some(format!(
                    "{question}\n\nOther positions so far:\n{others}\nRevise or defend \
                     your position in light of these."
                )),
            });
        }
        let rebuttals = self.registry.parallel(rebuttal_tasks, ctx).await;

        let mut rendered = String::from("## Debate\n\n### Opening positions\n");
        for (agent_id, answer) in &opening {
            rendered.push_str(&format!("**{agent_id}**: {answer}\n\n"));
        }
        rendered.push_str("### After rebuttal\n");
        for outcome in &rebuttals {
            let text = outcome
                .error
                .as_ref()
                .map(|error| format!("(failed: {error})"))
                .unwrap_or_else(|| outcome.text.clone());
            rendered.push_str(&format!("**{}**: {text}\n\n", outcome.agent_id));
        }
        ctx.stream.emit_markdown(&rendered).await;
        Ok(rendered)
    }

    /// Independent answers synthesized into one by the model.
    async fn consensus(
        &self,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let answers = self.gather(agent_ids, question, ctx).await;

        let synthesis_prompt = {
            let config = self.config.read();
            let mut prompt = format!("{}\n\nQuestion: {question}\n", config.synthesis_prompt);
            for (agent_id, answer) in &answers {
                prompt.push_str(&format!("\n### {agent_id}\n{answer}\n"));
            }
            prompt
        };

        let synthesized = self
            .runner
            .ask(agent_ids.first().map(String::as_str).unwrap_or(""), &synthesis_prompt, ctx)
            .await?;
        let rendered = format!("## Consensus\n{synthesized}\n");
        ctx.stream.emit_markdown(&rendered).await;
        Ok(rendered)
    }

    /// First agent produces; the rest critique its output.
    async fn review(
        &self,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Result<String> {
        let (author, critics) = agent_ids
            .split_first()
            .ok_or_else(|| CoreError::Execution("empty collaboration roster".to_string()))?;

        let authored = self.registry.delegate(author, ctx, Some(question)).await?;

        let critique_tasks = critics
            .iter()
            .map(|critic| ParallelTask {
                agent_id: critic.clone(),
                prompt: Some(format!(
                    "Review the following response to \"{question}\" and point out \
                     problems and improvements:\n\n{}",
                    authored.captured_text
                )),
            })
            .collect();
        let critiques = self.registry.parallel(critique_tasks, ctx).await;

        let mut rendered = format!(
            "## Review\n\n### {author}\n{}\n\n### Critiques\n",
            authored.captured_text
        );
        for outcome in &critiques {
            let text = outcome
                .error
                .as_ref()
                .map(|error| format!("(failed: {error})"))
                .unwrap_or_else(|| outcome.text.clone());
            rendered.push_str(&format!("**{}**: {text}\n\n", outcome.agent_id));
        }
        ctx.stream.emit_markdown(&rendered).await;
        Ok(rendered)
    }

    /// One round of independent answers, task order preserved, failures
    /// rendered inline.
    async fn gather(
        &self,
        agent_ids: &[String],
        question: &str,
        ctx: &AgentContext,
    ) -> Vec<(String, String)> {
        let tasks = agent_ids
            .iter()
            .map(|agent_id| ParallelTask {
                agent_id: agent_id.clone(),
                prompt: Some(question.to_string()),
            })
            .collect();

        self.registry
            .parallel(tasks, ctx)
            .await
            .into_iter()
            .map(|outcome| {
                let text = outcome
                    .error
                    .map(|error| format!("(failed: {error})"))
                    .unwrap_or(outcome.text);
                (outcome.agent_id, text)
            })
            .collect()
    }
}

fn first_token(answer: &str) -> String {
    answer
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

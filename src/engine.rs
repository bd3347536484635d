//! Minimal execution engine.
//!
//! One step picks the agent's most urgent runnable task, asks the model to do
//! it, and records the answer. A task the model cannot finish (or a failed
//! call) becomes a dependency and blocks the agent until a human resolves it.

use crate::actions::AgentFlow;
use crate::cache::Mutation;
use crate::error::{ActionError, ActionResult};
use crate::lifecycle::agent_can_run;
use crate::llm::{Completion, LlmMessage, LlmProvider, ProviderKind, complete_normalized, extract_json};
use crate::types::{Agent, AgentStatus, LogLevel, Task};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

const EXECUTOR_SYSTEM_PROMPT: &str = "You are an autonomous agent working through a task list. \
Do the task you are given. If you cannot finish it without a person (approval, payment, \
credentials, a decision only the owner can make), say so. Respond with JSON: \
{\"status\": \"completed\" | \"needs_input\", \"result\": \"...\", \"reason\": \"...\"}";

/// Completed results included in the prompt, most recent last.
const MAX_CONTEXT_RESULTS: usize = 10;

/// The model's verdict on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReply {
    Completed { result: String },
    NeedsInput { reason: String },
}

/// Parse the model's answer. Content that is not the expected JSON is taken
/// as the task's result.
pub fn parse_step_reply(content: &str) -> StepReply {
    let Some(Value::Object(obj)) = extract_json(content) else {
        return StepReply::Completed {
            result: content.trim().to_string(),
        };
    };
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    match text("status").as_deref() {
        Some("needs_input") => StepReply::NeedsInput {
            reason: text("reason")
                .or_else(|| text("result"))
                .unwrap_or_else(|| "Agent needs input".to_string()),
        },
        Some(_) => StepReply::Completed {
            result: text("result").unwrap_or_default(),
        },
        None => StepReply::Completed {
            result: content.trim().to_string(),
        },
    }
}

/// What a single step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// A task was finished.
    Completed { task_id: String, title: String },
    /// The model asked for a human; the task is now a dependency.
    NeedsInput { task_id: String, reason: String },
    /// The model call failed; the task is now a dependency.
    Failed {
        task_id: String,
        provider: String,
        error: String,
    },
    /// Another runner claimed the task between selection and start.
    AlreadyClaimed { task_id: String },
    /// Nothing runnable, but dependencies are open or work is still running.
    Idle { remaining: i64, in_progress: i64 },
    /// Nothing runnable and nothing blocking: the agent is done.
    Finished,
    /// The agent is not active.
    NotActive { status: AgentStatus },
}

impl StepOutcome {
    /// Whether the run loop should go on after this step.
    pub fn should_continue(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }
}

/// Result of a bounded run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub steps: Vec<StepOutcome>,
    /// True when the loop stopped at the iteration cap.
    pub hit_iteration_cap: bool,
}

/// Build the user prompt for one task.
pub fn build_task_prompt(agent: &Agent, task: &Task, completed: &[(String, String)]) -> String {
    let mut prompt = String::new();
    if let Some(ref goal) = agent.goal {
        prompt.push_str(&format!("Goal: {}\n\n", goal));
    }

    let start = completed.len().saturating_sub(MAX_CONTEXT_RESULTS);
    if start < completed.len() {
        prompt.push_str("Completed so far:\n");
        for (title, result) in &completed[start..] {
            prompt.push_str(&format!("- {}: {}\n", title, result));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Current task: {}\n", task.title));
    if let Some(ref description) = task.description {
        prompt.push_str(&format!("Details: {}\n", description));
    }
    prompt
}

/// Drives agents through their task lists.
#[derive(Clone)]
pub struct Engine {
    flow: AgentFlow,
}

impl Engine {
    pub fn new(flow: AgentFlow) -> Self {
        Self { flow }
    }

    /// Run one task for the agent.
    pub async fn step(&self, agent_id: &str, llm: &dyn LlmProvider) -> ActionResult<StepOutcome> {
        let db = &self.flow.db;
        let agent = db
            .get_agent(agent_id)?
            .ok_or_else(|| ActionError::agent_not_found(agent_id))?;
        if !agent_can_run(agent.status) {
            debug!(agent_id, status = agent.status.as_str(), "Agent not active, skipping step");
            return Ok(StepOutcome::NotActive {
                status: agent.status,
            });
        }
        let log = self.flow.logger.for_agent(&agent.id);

        let Some(task) = db.next_runnable_task(&agent.id)? else {
            return self.finish_if_unblocked(&agent);
        };

        if !db.start_task(&task.id)? {
            debug!(agent_id, task_id = %task.id, "Task claimed by another runner");
            return Ok(StepOutcome::AlreadyClaimed { task_id: task.id });
        }
        let task_log = log.for_task(&task.id);
        task_log.info(&format!("Working on: {}", task.title));

        let completed = db.completed_results_for_agent(&agent.id)?;
        let kind =
            ProviderKind::from_str(&agent.provider).unwrap_or(self.flow.config.engine.default_provider);
        let mut config = self.flow.config.engine.llm_config(kind, agent.model.as_deref());
        config.system_prompt = Some(EXECUTOR_SYSTEM_PROMPT.to_string());
        let messages = [LlmMessage::user(build_task_prompt(&agent, &task, &completed))];

        let response = match complete_normalized(llm, &messages, &config).await {
            Completion::Ok(response) => response,
            Completion::Failed(failure) => {
                db.convert_to_dependency(
                    &task.id,
                    &format!("LLM call failed ({}): {}", failure.provider, failure.error),
                )?;
                task_log.log_with_data(
                    LogLevel::Error,
                    &format!("LLM call failed on \"{}\": {}", task.title, failure.error),
                    json!({ "provider": failure.provider, "error": failure.error }),
                );
                self.flow.effects.notify(format!(
                    "Agent \"{}\" is blocked: \"{}\" failed ({})",
                    agent.name, task.title, failure.error
                ));
                self.blocked(&agent);
                return Ok(StepOutcome::Failed {
                    task_id: task.id,
                    provider: failure.provider,
                    error: failure.error,
                });
            }
        };

        match parse_step_reply(&response.content) {
            StepReply::Completed { result } => {
                db.record_task_result(&task.id, &result)?;
                task_log.log_with_data(
                    LogLevel::Success,
                    &format!("Task completed: {}", task.title),
                    json!({
                        "input_tokens": response.usage.input_tokens,
                        "output_tokens": response.usage.output_tokens,
                        "model": response.model,
                    }),
                );
                self.flow.invalidate(&[Mutation::TaskChanged {
                    agent_id: agent.id.clone(),
                }]);
                Ok(StepOutcome::Completed {
                    task_id: task.id,
                    title: task.title,
                })
            }
            StepReply::NeedsInput { reason } => {
                db.convert_to_dependency(&task.id, &reason)?;
                task_log.log_with_data(
                    LogLevel::Warning,
                    &format!("Needs input: {}", task.title),
                    json!({ "blocked_reason": reason }),
                );
                self.flow.effects.notify(format!(
                    "Agent \"{}\" needs your input on \"{}\": {}",
                    agent.name, task.title, reason
                ));
                self.blocked(&agent);
                Ok(StepOutcome::NeedsInput {
                    task_id: task.id,
                    reason,
                })
            }
        }
    }

    /// Step repeatedly until the agent stops making progress or the
    /// iteration cap is reached.
    pub async fn run(&self, agent_id: &str, llm: &dyn LlmProvider) -> ActionResult<RunSummary> {
        let engine = &self.flow.config.engine;
        let max = engine.max_iterations;
        let delay = engine.iteration_delay();

        let mut summary = RunSummary {
            iterations: 0,
            steps: Vec::new(),
            hit_iteration_cap: false,
        };

        while summary.iterations < max {
            if summary.iterations > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = self.step(agent_id, llm).await?;
            summary.iterations += 1;
            let keep_going = outcome.should_continue();
            summary.steps.push(outcome);
            if !keep_going {
                return Ok(summary);
            }
        }

        summary.hit_iteration_cap = true;
        self.flow
            .logger
            .for_agent(agent_id)
            .warning(&format!("Stopped after {} iterations", max));
        Ok(summary)
    }

    fn finish_if_unblocked(&self, agent: &Agent) -> ActionResult<StepOutcome> {
        let remaining = self.flow.db.count_blocking_dependencies(&agent.id)?;
        let in_progress = self.flow.db.count_unfinished_work(&agent.id)?;
        if remaining > 0 || in_progress > 0 {
            return Ok(StepOutcome::Idle {
                remaining,
                in_progress,
            });
        }

        self.flow
            .db
            .set_agent_status(&agent.id, AgentStatus::Completed)?;
        self.flow
            .logger
            .for_agent(&agent.id)
            .milestone(&format!("All tasks complete for {}", agent.name));
        self.flow
            .effects
            .notify(format!("Agent \"{}\" finished all its tasks", agent.name));
        self.flow.invalidate(&[Mutation::AgentChanged {
            agent_id: agent.id.clone(),
        }]);
        Ok(StepOutcome::Finished)
    }

    fn blocked(&self, agent: &Agent) {
        self.flow.invalidate(&[Mutation::DependencyChanged {
            agent_id: agent.id.clone(),
        }]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_completed_json() {
        let reply = parse_step_reply(r#"{"status": "completed", "result": "Drafted 3 headlines"}"#);
        assert_eq!(
            reply,
            StepReply::Completed {
                result: "Drafted 3 headlines".into()
            }
        );
    }

    #[test]
    fn reply_needs_input_prefers_reason() {
        let reply = parse_step_reply(
            "```json\n{\"status\": \"needs_input\", \"reason\": \"Need the card number\"}\n```",
        );
        assert_eq!(
            reply,
            StepReply::NeedsInput {
                reason: "Need the card number".into()
            }
        );
    }

    #[test]
    fn reply_plain_text_is_the_result() {
        let reply = parse_step_reply("  Here are three taglines.  ");
        assert_eq!(
            reply,
            StepReply::Completed {
                result: "Here are three taglines.".into()
            }
        );
    }

    #[test]
    fn prompt_caps_context_results() {
        let agent = Agent {
            id: "a".into(),
            owner_id: "u".into(),
            name: "Launch".into(),
            goal: Some("Ship the site".into()),
            status: AgentStatus::Active,
            provider: "openai".into(),
            model: None,
            restart: None,
            created_at: 0,
            updated_at: 0,
        };
        let task = Task {
            id: "t".into(),
            agent_id: "a".into(),
            title: "Write FAQ".into(),
            description: Some("Five questions".into()),
            status: crate::types::TaskStatus::InProgress,
            priority: crate::types::Priority::Medium,
            origin: crate::types::TaskOrigin::Agent,
            lifecycle: crate::types::TaskLifecycle::AgentWork,
            result: None,
            settings: Default::default(),
            created_at: 0,
            updated_at: 0,
        };
        let completed: Vec<(String, String)> = (0..15)
            .map(|i| (format!("task {}", i), format!("result {}", i)))
            .collect();

        let prompt = build_task_prompt(&agent, &task, &completed);
        assert!(prompt.starts_with("Goal: Ship the site"));
        assert!(!prompt.contains("task 4:"));
        assert!(prompt.contains("task 5: result 5"));
        assert!(prompt.contains("task 14: result 14"));
        assert!(prompt.contains("Current task: Write FAQ"));
    }
}

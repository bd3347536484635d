//! LLM task generator.
//!
//! Asks the agent's model to break its goal into tasks. Items the model
//! flags as needing a human become blocking dependencies.

use crate::actions::AgentFlow;
use crate::cache::Mutation;
use crate::error::{ActionError, ActionResult};
use crate::llm::{Completion, LlmMessage, LlmProvider, ProviderKind, complete_normalized, extract_json};
use crate::types::{Agent, DependencyInput, LogLevel, NewTask, Task, TaskOrigin, parse_priority};
use serde_json::{Value, json};

/// Upper bound on tasks taken from a single plan.
pub const MAX_PLANNED_TASKS: usize = 20;

const PLANNER_SYSTEM_PROMPT: &str = "You are a project planner for an autonomous agent. \
Break the goal into concrete, ordered tasks. Mark a task requires_human_input when only \
a person can do it (approvals, payments, signatures, credentials, physical actions) and \
say why in blocked_reason. Respond with JSON only.";

/// User prompt for planning `agent`'s goal.
pub fn build_plan_prompt(agent: &Agent) -> String {
    let goal = agent.goal.as_deref().unwrap_or(&agent.name);
    format!(
        "Goal: {}\n\n\
         Return an object of the form:\n\
         {{\"tasks\": [{{\"title\": \"...\", \"description\": \"...\", \
         \"priority\": \"low|medium|high|urgent\", \"requires_human_input\": false, \
         \"blocked_reason\": null}}]}}\n\
         Use at most {} tasks.",
        goal, MAX_PLANNED_TASKS
    )
}

/// Turn model output into task inputs.
///
/// Accepts `{"tasks": [...]}` or a bare array. Items without a title are
/// skipped. Returns `None` when nothing usable is found.
pub fn parse_plan(content: &str) -> Option<Vec<NewTask>> {
    let value = extract_json(content)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let tasks: Vec<NewTask> = items
        .iter()
        .filter_map(plan_item)
        .take(MAX_PLANNED_TASKS)
        .collect();
    (!tasks.is_empty()).then_some(tasks)
}

fn plan_item(item: &Value) -> Option<NewTask> {
    let title = item.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let requires_human = item
        .get("requires_human_input")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let dependency = requires_human.then(|| DependencyInput {
        blocked_reason: text("blocked_reason").or_else(|| Some("Requires human input".into())),
    });

    Some(NewTask {
        title: title.to_string(),
        description: text("description"),
        priority: text("priority").map(|p| parse_priority(&p)).unwrap_or_default(),
        origin: TaskOrigin::Agent,
        dependency,
    })
}

/// Plan `agent`'s goal with `llm` and store the resulting tasks.
pub async fn generate_tasks(
    flow: &AgentFlow,
    agent: &Agent,
    llm: &dyn LlmProvider,
) -> ActionResult<Vec<Task>> {
    let log = flow.logger.for_agent(&agent.id);
    let kind = ProviderKind::from_str(&agent.provider).unwrap_or(flow.config.engine.default_provider);
    let mut config = flow.config.engine.llm_config(kind, agent.model.as_deref());
    config.system_prompt = Some(PLANNER_SYSTEM_PROMPT.to_string());

    log.info("Generating task plan");
    let messages = [LlmMessage::user(build_plan_prompt(agent))];
    let response = match complete_normalized(llm, &messages, &config).await {
        Completion::Ok(response) => response,
        Completion::Failed(failure) => {
            log.log_with_data(
                LogLevel::Error,
                &format!("Planning failed: {}", failure.error),
                json!({ "provider": failure.provider, "error": failure.error }),
            );
            return Err(ActionError::upstream(format!(
                "{}: {}",
                failure.provider, failure.error
            )));
        }
    };

    let inputs = parse_plan(&response.content).ok_or_else(|| {
        log.error("Planner returned no usable tasks");
        ActionError::upstream("Planner returned no usable tasks")
    })?;

    let tasks = flow.db.create_tasks(&agent.id, inputs)?;
    let dependencies = tasks.iter().filter(|t| t.is_blocking()).count();

    log.log_with_data(
        LogLevel::Milestone,
        &format!("Generated {} tasks", tasks.len()),
        json!({
            "tasks": tasks.len(),
            "dependencies": dependencies,
            "input_tokens": response.usage.input_tokens,
            "output_tokens": response.usage.output_tokens,
        }),
    );
    let mut text = format!("Agent \"{}\" planned {} tasks", agent.name, tasks.len());
    if dependencies > 0 {
        text.push_str(&format!(", {} need your input", dependencies));
    }
    flow.effects.notify(text);

    flow.invalidate(&[
        Mutation::DependencyChanged {
            agent_id: agent.id.clone(),
        },
        Mutation::AgentChanged {
            agent_id: agent.id.clone(),
        },
    ]);

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    #[test]
    fn parse_plan_object_and_dependencies() {
        let content = r#"Here is the plan:
```json
{"tasks": [
  {"title": "Draft landing page", "priority": "high"},
  {"title": "Approve budget", "requires_human_input": true, "blocked_reason": "Needs sign-off"},
  {"title": "   "}
]}
```"#;
        let tasks = parse_plan(content).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, Priority::High);
        assert!(tasks[0].dependency.is_none());
        assert_eq!(
            tasks[1].dependency.as_ref().unwrap().blocked_reason.as_deref(),
            Some("Needs sign-off")
        );
    }

    #[test]
    fn parse_plan_bare_array_defaults() {
        let tasks = parse_plan(r#"[{"title": "Research", "priority": "whenever"}]"#).unwrap();
        assert_eq!(tasks[0].priority, Priority::Medium);
        assert_eq!(tasks[0].origin, TaskOrigin::Agent);
    }

    #[test]
    fn parse_plan_rejects_empty_or_prose() {
        assert!(parse_plan(r#"{"tasks": []}"#).is_none());
        assert!(parse_plan("I could not come up with a plan.").is_none());
        assert!(parse_plan(r#"{"steps": [{"title": "x"}]}"#).is_none());
    }

    #[test]
    fn human_input_without_reason_gets_default() {
        let tasks = parse_plan(r#"[{"title": "Sign lease", "requires_human_input": true}]"#).unwrap();
        assert_eq!(
            tasks[0].dependency.as_ref().unwrap().blocked_reason.as_deref(),
            Some("Requires human input")
        );
    }
}

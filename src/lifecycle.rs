//! Task lifecycle transition rules.
//!
//! Pure functions: they inspect a task (and its agent) and describe the
//! change to make. Persisting the change is the database layer's job.

use crate::error::{ActionError, ActionResult};
use crate::types::{Agent, AgentStatus, Task, TaskLifecycle, TaskStatus};

/// The new status/lifecycle pair for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransition {
    pub task_id: String,
    pub status: TaskStatus,
    pub lifecycle: TaskLifecycle,
}

/// Outcome of the restart check for one agent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestartDecision {
    /// No blocking dependencies remain; the agent goes back to `active`.
    Restart { reason: String },
    /// At least one dependency still blocks the agent.
    StayBlocked { remaining: i64 },
}

/// Outcome reported to callers of the completion flow.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestartOutcome {
    Restarted { reason: String },
    StillBlocked { remaining: i64 },
    /// The check failed; the completion itself still stands.
    Failed { error: String },
}

impl From<RestartDecision> for RestartOutcome {
    fn from(decision: RestartDecision) -> Self {
        match decision {
            RestartDecision::Restart { reason } => RestartOutcome::Restarted { reason },
            RestartDecision::StayBlocked { remaining } => {
                RestartOutcome::StillBlocked { remaining }
            }
        }
    }
}

/// Reject callers that do not own the agent behind a task.
pub fn ensure_task_owner(agent: &Agent, task: &Task, caller: &str) -> ActionResult<()> {
    if agent.owner_id != caller {
        return Err(ActionError::unauthorized_task(&task.id));
    }
    Ok(())
}

/// Reject callers that do not own the agent.
pub fn ensure_agent_owner(agent: &Agent, caller: &str) -> ActionResult<()> {
    if agent.owner_id != caller {
        return Err(ActionError::unauthorized_agent());
    }
    Ok(())
}

/// Dependency -> workspace.
///
/// Only a pending dependency can be promoted. The blocked reason is dropped.
pub fn promote_to_workspace(task: &Task, caller: &str, now: i64) -> ActionResult<TaskTransition> {
    match task.lifecycle {
        TaskLifecycle::Dependency { .. } => Ok(TaskTransition {
            task_id: task.id.clone(),
            status: TaskStatus::InProgress,
            lifecycle: TaskLifecycle::Workspace {
                moved_at: now,
                moved_by: caller.to_string(),
            },
        }),
        TaskLifecycle::Workspace { .. } => Err(ActionError::invalid_state(
            "Task is already in the workspace",
        )
        .with_task(&task.id)),
        TaskLifecycle::History { .. } => Err(ActionError::invalid_state(
            "Task is already completed",
        )
        .with_task(&task.id)),
        TaskLifecycle::AgentWork => Err(ActionError::invalid_state(
            "Only dependencies can be moved to tasks",
        )
        .with_task(&task.id)),
    }
}

/// Any phase -> history.
///
/// Re-completing a task in history re-stamps the terminal fields.
pub fn complete_to_history(
    task: &Task,
    caller: &str,
    notes: Option<String>,
    now: i64,
) -> TaskTransition {
    let moved_at = match task.lifecycle {
        TaskLifecycle::Workspace { moved_at, .. } => Some(moved_at),
        TaskLifecycle::History { moved_at, .. } => moved_at,
        _ => None,
    };
    let completion_notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    TaskTransition {
        task_id: task.id.clone(),
        status: TaskStatus::Done,
        lifecycle: TaskLifecycle::History {
            completed_at: now,
            completed_by: caller.to_string(),
            completion_notes,
            moved_at,
        },
    }
}

/// Decide whether an agent may resume given its count of blocking dependencies.
pub fn restart_decision(blocking_dependencies: i64) -> RestartDecision {
    if blocking_dependencies == 0 {
        RestartDecision::Restart {
            reason: "All dependencies resolved".to_string(),
        }
    } else {
        RestartDecision::StayBlocked {
            remaining: blocking_dependencies,
        }
    }
}

/// Whether the execution engine may run an agent in this status.
pub fn agent_can_run(status: AgentStatus) -> bool {
    status == AgentStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TaskSettings;
    use crate::types::{Priority, TaskOrigin};

    fn task(lifecycle: TaskLifecycle, status: TaskStatus) -> Task {
        Task {
            id: "task-a".into(),
            agent_id: "agent-x".into(),
            title: "Sign contract".into(),
            description: None,
            status,
            priority: Priority::High,
            origin: TaskOrigin::Agent,
            lifecycle,
            result: None,
            settings: TaskSettings::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn agent(owner: &str) -> Agent {
        Agent {
            id: "agent-x".into(),
            owner_id: owner.into(),
            name: "X".into(),
            goal: None,
            status: AgentStatus::Blocked,
            provider: "openai".into(),
            model: None,
            restart: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn blocked_dependency() -> Task {
        task(
            TaskLifecycle::Dependency {
                blocked_reason: Some("needs approval".into()),
            },
            TaskStatus::Blocked,
        )
    }

    #[test]
    fn promote_dependency_to_workspace() {
        let t = promote_to_workspace(&blocked_dependency(), "user-u", 100).unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(
            t.lifecycle,
            TaskLifecycle::Workspace {
                moved_at: 100,
                moved_by: "user-u".into()
            }
        );
    }

    #[test]
    fn promote_rejects_non_dependency() {
        let err = promote_to_workspace(&task(TaskLifecycle::AgentWork, TaskStatus::Todo), "u", 1)
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidState);
        assert_eq!(err.task_id.as_deref(), Some("task-a"));
    }

    #[test]
    fn complete_keeps_workspace_moved_at() {
        let ws = task(
            TaskLifecycle::Workspace {
                moved_at: 50,
                moved_by: "u".into(),
            },
            TaskStatus::InProgress,
        );
        let t = complete_to_history(&ws, "u", Some("approved via email".into()), 80);
        assert_eq!(t.status, TaskStatus::Done);
        match t.lifecycle {
            TaskLifecycle::History {
                completed_at,
                completion_notes,
                moved_at,
                ..
            } => {
                assert_eq!(completed_at, 80);
                assert_eq!(completion_notes.as_deref(), Some("approved via email"));
                assert_eq!(moved_at, Some(50));
            }
            other => panic!("unexpected lifecycle {:?}", other),
        }
    }

    #[test]
    fn complete_is_reapplicable() {
        let first = complete_to_history(&blocked_dependency(), "u", None, 10);
        let mut done = blocked_dependency();
        done.status = first.status;
        done.lifecycle = first.lifecycle;

        let second = complete_to_history(&done, "u", None, 20);
        assert_eq!(second.status, TaskStatus::Done);
        assert!(matches!(
            second.lifecycle,
            TaskLifecycle::History { completed_at: 20, .. }
        ));
    }

    #[test]
    fn blank_notes_are_dropped() {
        let t = complete_to_history(&blocked_dependency(), "u", Some("   ".into()), 1);
        assert!(matches!(
            t.lifecycle,
            TaskLifecycle::History {
                completion_notes: None,
                ..
            }
        ));
    }

    #[test]
    fn restart_only_when_no_blockers() {
        assert!(matches!(restart_decision(0), RestartDecision::Restart { .. }));
        assert_eq!(
            restart_decision(2),
            RestartDecision::StayBlocked { remaining: 2 }
        );
    }

    #[test]
    fn ownership_guard() {
        let t = blocked_dependency();
        assert!(ensure_task_owner(&agent("user-u"), &t, "user-u").is_ok());
        let err = ensure_task_owner(&agent("user-u"), &t, "user-v").unwrap_err();
        assert_eq!(err.message, "Unauthorized to modify this task");
    }
}

//! Task lifecycle actions: promote, complete, restart check, settings patch.

use super::{AgentFlow, require_caller};
use crate::cache::Mutation;
use crate::db::now_ms;
use crate::error::{ActionError, ActionResult};
use crate::lifecycle::{
    RestartOutcome, complete_to_history, ensure_task_owner, promote_to_workspace,
};
use crate::settings::TaskSettingsPatch;
use crate::types::{Agent, LogLevel, NewTask, TaskOrigin, TaskView};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Result of completing a task.
#[derive(Debug, Serialize)]
pub struct CompletionOutcome {
    pub task: TaskView,
    pub restart: RestartOutcome,
}

impl AgentFlow {
    /// Dependency -> workspace.
    pub fn move_to_tasks(&self, caller: &str, task_id: &str) -> ActionResult<TaskView> {
        let caller = require_caller(caller)?;
        let (task, agent) = self.task_and_agent(task_id)?;
        ensure_task_owner(&agent, &task, caller)?;

        let transition = promote_to_workspace(&task, caller, now_ms())?;
        let task = self
            .db
            .apply_transition(&transition)
            .map_err(|e| ActionError::from(e).with_task(task_id))?;

        self.logger
            .for_agent(&agent.id)
            .for_task(&task.id)
            .log_with_data(
                LogLevel::Info,
                &format!("Task moved to workspace: {}", task.title),
                json!({ "moved_by": caller }),
            );
        self.effects
            .notify(format!("Task \"{}\" moved to your workspace", task.title));
        self.invalidate(&[Mutation::DependencyChanged {
            agent_id: agent.id.clone(),
        }]);

        Ok(task.into())
    }

    /// Any phase -> history, then the restart check for the owning agent.
    ///
    /// The task write and the restart check commit together. A failing
    /// restart check is reported in the outcome and never fails the call.
    pub fn complete_task_and_move_to_history(
        &self,
        caller: &str,
        task_id: &str,
        notes: Option<String>,
    ) -> ActionResult<CompletionOutcome> {
        let caller = require_caller(caller)?;
        let (task, agent) = self.task_and_agent(task_id)?;
        ensure_task_owner(&agent, &task, caller)?;

        let transition = complete_to_history(&task, caller, notes, now_ms());
        let (task, restart) = self
            .db
            .complete_task_and_restart(&transition, &agent.id)
            .map_err(|e| ActionError::from(e).with_task(task_id))?;

        let log = self.logger.for_agent(&agent.id);
        log.for_task(&task.id).log_with_data(
            LogLevel::Success,
            &format!("Task completed: {}", task.title),
            json!({ "completed_by": caller }),
        );
        self.report_restart(&agent, &restart);

        self.effects.notify(format!(
            "Task \"{}\" completed for agent \"{}\"",
            task.title, agent.name
        ));
        self.invalidate(&[Mutation::Completed {
            agent_id: agent.id.clone(),
        }]);

        Ok(CompletionOutcome {
            task: task.into(),
            restart,
        })
    }

    /// Manually replay the restart check for an agent.
    pub fn check_agent_restart(&self, caller: &str, agent_id: &str) -> ActionResult<RestartOutcome> {
        let caller = require_caller(caller)?;
        let agent = self.owned_agent(caller, agent_id)?;

        let outcome = match self.db.restart_agent_if_unblocked(&agent.id) {
            Ok(decision) => RestartOutcome::from(decision),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Restart check failed");
                RestartOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.report_restart(&agent, &outcome);
        if matches!(outcome, RestartOutcome::Restarted { .. }) {
            self.invalidate(&[Mutation::AgentChanged {
                agent_id: agent.id.clone(),
            }]);
        }
        Ok(outcome)
    }

    /// Audit the restart check's outcome.
    fn report_restart(&self, agent: &Agent, outcome: &RestartOutcome) {
        match outcome {
            RestartOutcome::Restarted { reason } => {
                self.logger.for_agent(&agent.id).log_with_data(
                    LogLevel::Milestone,
                    &format!("Agent auto-restarted: {}", reason),
                    json!({ "auto_restarted": true, "restart_reason": reason }),
                );
            }
            RestartOutcome::StillBlocked { remaining } => {
                debug!(agent_id = %agent.id, remaining, "Agent still blocked");
            }
            RestartOutcome::Failed { error } => {
                self.logger
                    .for_agent(&agent.id)
                    .error(&format!("Restart check failed: {}", error));
            }
        }
    }

    /// Merge submitted form fields into a task's settings.
    pub fn update_task_metadata(
        &self,
        caller: &str,
        task_id: &str,
        fields: &Map<String, Value>,
    ) -> ActionResult<TaskView> {
        let caller = require_caller(caller)?;
        let (task, agent) = self.task_and_agent(task_id)?;
        ensure_task_owner(&agent, &task, caller)?;

        let patch = TaskSettingsPatch::from_fields(fields).map_err(|e| e.with_task(task_id))?;
        if patch.is_empty() {
            return Ok(task.into());
        }

        let task = self
            .db
            .update_task_settings(task_id, patch)
            .map_err(|e| ActionError::from(e).with_task(task_id))?;

        self.logger
            .for_agent(&agent.id)
            .for_task(&task.id)
            .info(&format!("Task settings updated: {}", task.title));
        self.invalidate(&[Mutation::TaskChanged {
            agent_id: agent.id.clone(),
        }]);

        Ok(task.into())
    }

    /// A task entered by the user. As a dependency it also blocks the agent.
    pub fn create_user_task(
        &self,
        caller: &str,
        agent_id: &str,
        mut input: NewTask,
    ) -> ActionResult<TaskView> {
        let caller = require_caller(caller)?;
        let agent = self.owned_agent(caller, agent_id)?;
        if input.title.trim().is_empty() {
            return Err(ActionError::missing_field("title"));
        }
        input.origin = TaskOrigin::User;

        let task = self.db.create_task(&agent.id, input)?;

        let log = self.logger.for_agent(&agent.id).for_task(&task.id);
        let mutation = if task.is_blocking() {
            log.warning(&format!("Dependency added: {}", task.title));
            Mutation::DependencyChanged {
                agent_id: agent.id.clone(),
            }
        } else {
            log.info(&format!("Task added: {}", task.title));
            Mutation::TaskChanged {
                agent_id: agent.id.clone(),
            }
        };
        self.invalidate(&[
            mutation,
            Mutation::AgentChanged {
                agent_id: agent.id.clone(),
            },
        ]);

        Ok(task.into())
    }
}

//! Task CRUD and lifecycle writes.

use super::agents::{get_agent_internal, restart_if_unblocked_internal, set_agent_status_internal};
use super::{Database, bad_column, now_ms};
use crate::lifecycle::{RestartOutcome, TaskTransition};
use crate::settings::{TaskSettings, TaskSettingsPatch};
use crate::types::{
    Agent, AgentStatus, NewTask, Priority, Task, TaskLifecycle, TaskOrigin, TaskStatus,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};
use tracing::warn;
use uuid::Uuid;

/// SQL expression ranking `t.priority`, higher is more important.
pub(crate) const PRIORITY_RANK: &str = "CASE t.priority
    WHEN 'urgent' THEN 3
    WHEN 'high' THEN 2
    WHEN 'medium' THEN 1
    ELSE 0 END";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get("status")?;
    let priority_str: String = row.get("priority")?;
    let origin_str: String = row.get("origin")?;
    let lifecycle_tag: String = row.get("lifecycle")?;
    let settings_json: String = row.get("settings")?;

    let status =
        TaskStatus::from_str(&status_str).ok_or_else(|| bad_column("status", &status_str))?;
    let lifecycle = parse_lifecycle(row, &lifecycle_tag)?;
    if !lifecycle.allows_status(status) {
        return Err(bad_column(
            "status",
            &format!("{} (lifecycle {})", status_str, lifecycle_tag),
        ));
    }

    Ok(Task {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status,
        priority: Priority::from_str(&priority_str)
            .ok_or_else(|| bad_column("priority", &priority_str))?,
        origin: TaskOrigin::from_str(&origin_str)
            .ok_or_else(|| bad_column("origin", &origin_str))?,
        lifecycle,
        result: row.get("result")?,
        settings: serde_json::from_str(&settings_json)
            .map_err(|_| bad_column("settings", &settings_json))?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_lifecycle(row: &Row, tag: &str) -> rusqlite::Result<TaskLifecycle> {
    let missing = |column: &str| bad_column(column, &format!("NULL for lifecycle {}", tag));

    match tag {
        "agent_work" => Ok(TaskLifecycle::AgentWork),
        "dependency" => Ok(TaskLifecycle::Dependency {
            blocked_reason: row.get("blocked_reason")?,
        }),
        "workspace" => Ok(TaskLifecycle::Workspace {
            moved_at: row
                .get::<_, Option<i64>>("moved_at")?
                .ok_or_else(|| missing("moved_at"))?,
            moved_by: row
                .get::<_, Option<String>>("moved_by")?
                .ok_or_else(|| missing("moved_by"))?,
        }),
        "history" => Ok(TaskLifecycle::History {
            completed_at: row
                .get::<_, Option<i64>>("completed_at")?
                .ok_or_else(|| missing("completed_at"))?,
            completed_by: row
                .get::<_, Option<String>>("completed_by")?
                .ok_or_else(|| missing("completed_by"))?,
            completion_notes: row.get("completion_notes")?,
            moved_at: row.get("moved_at")?,
        }),
        other => Err(bad_column("lifecycle", other)),
    }
}

/// Column values for a lifecycle, in the order
/// (blocked_reason, moved_at, moved_by, completed_at, completed_by, completion_notes).
#[allow(clippy::type_complexity)]
fn lifecycle_columns(
    lifecycle: &TaskLifecycle,
) -> (
    Option<&str>,
    Option<i64>,
    Option<&str>,
    Option<i64>,
    Option<&str>,
    Option<&str>,
) {
    match lifecycle {
        TaskLifecycle::AgentWork => (None, None, None, None, None, None),
        TaskLifecycle::Dependency { blocked_reason } => {
            (blocked_reason.as_deref(), None, None, None, None, None)
        }
        TaskLifecycle::Workspace { moved_at, moved_by } => {
            (None, Some(*moved_at), Some(moved_by.as_str()), None, None, None)
        }
        TaskLifecycle::History {
            completed_at,
            completed_by,
            completion_notes,
            moved_at,
        } => (
            None,
            *moved_at,
            None,
            Some(*completed_at),
            Some(completed_by.as_str()),
            completion_notes.as_deref(),
        ),
    }
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    match stmt.query_row(params![task_id], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a status/lifecycle pair. Columns of other phases are cleared.
fn write_transition(conn: &Connection, transition: &TaskTransition) -> Result<()> {
    if !transition.lifecycle.allows_status(transition.status) {
        return Err(anyhow!(
            "status {} is not valid for lifecycle {}",
            transition.status.as_str(),
            transition.lifecycle.tag()
        ));
    }

    let (blocked_reason, moved_at, moved_by, completed_at, completed_by, notes) =
        lifecycle_columns(&transition.lifecycle);

    let updated = conn.execute(
        "UPDATE tasks SET
            status = ?1, lifecycle = ?2, blocked_reason = ?3,
            moved_at = ?4, moved_by = ?5,
            completed_at = ?6, completed_by = ?7, completion_notes = ?8,
            updated_at = ?9
         WHERE id = ?10",
        params![
            transition.status.as_str(),
            transition.lifecycle.tag(),
            blocked_reason,
            moved_at,
            moved_by,
            completed_at,
            completed_by,
            notes,
            now_ms(),
            transition.task_id,
        ],
    )?;

    if updated == 0 {
        return Err(anyhow!("Task {} not found", transition.task_id));
    }
    Ok(())
}

fn insert_task(conn: &Connection, agent_id: &str, input: &NewTask, now: i64) -> Result<Task> {
    let id = Uuid::now_v7().to_string();
    let (lifecycle, status) = match input.dependency {
        Some(ref dep) => (
            TaskLifecycle::Dependency {
                blocked_reason: dep.blocked_reason.clone(),
            },
            TaskStatus::Blocked,
        ),
        None => (TaskLifecycle::AgentWork, TaskStatus::Todo),
    };
    let (blocked_reason, ..) = lifecycle_columns(&lifecycle);
    let settings = TaskSettings::default();

    conn.execute(
        "INSERT INTO tasks (
            id, agent_id, title, description, status, priority, origin, lifecycle,
            blocked_reason, settings, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            &id,
            agent_id,
            input.title.trim(),
            input.description,
            status.as_str(),
            input.priority.as_str(),
            input.origin.as_str(),
            lifecycle.tag(),
            blocked_reason,
            serde_json::to_string(&settings)?,
            now,
        ],
    )?;

    Ok(Task {
        id,
        agent_id: agent_id.to_string(),
        title: input.title.trim().to_string(),
        description: input.description.clone(),
        status,
        priority: input.priority,
        origin: input.origin,
        lifecycle,
        result: None,
        settings,
        created_at: now,
        updated_at: now,
    })
}

impl Database {
    /// Create a task for an agent.
    ///
    /// A task created as a dependency also blocks its agent.
    pub fn create_task(&self, agent_id: &str, input: NewTask) -> Result<Task> {
        if input.title.trim().is_empty() {
            return Err(anyhow!("Task title cannot be empty"));
        }
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = insert_task(&tx, agent_id, &input, now)?;
            if task.is_blocking() {
                set_agent_status_internal(&tx, agent_id, AgentStatus::Blocked)?;
            }
            tx.commit()?;
            Ok(task)
        })
    }

    /// Create several tasks at once (planner output).
    ///
    /// Returns the created tasks in input order. The agent is blocked if any
    /// of them is a dependency.
    pub fn create_tasks(&self, agent_id: &str, inputs: Vec<NewTask>) -> Result<Vec<Task>> {
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut created = Vec::with_capacity(inputs.len());
            for input in &inputs {
                if input.title.trim().is_empty() {
                    continue;
                }
                created.push(insert_task(&tx, agent_id, input, now)?);
            }
            if created.iter().any(Task::is_blocking) {
                set_agent_status_internal(&tx, agent_id, AgentStatus::Blocked)?;
            }
            tx.commit()?;
            Ok(created)
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task together with the agent that owns it.
    pub fn get_task_with_agent(&self, task_id: &str) -> Result<Option<(Task, Agent)>> {
        self.with_conn(|conn| {
            let Some(task) = get_task_internal(conn, task_id)? else {
                return Ok(None);
            };
            let agent = get_agent_internal(conn, &task.agent_id)?
                .ok_or_else(|| anyhow!("Task {} references missing agent {}", task.id, task.agent_id))?;
            Ok(Some((task, agent)))
        })
    }

    /// List an agent's tasks, most important first.
    pub fn list_tasks_for_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT t.* FROM tasks t WHERE t.agent_id = ?1
                 ORDER BY {} DESC, t.created_at ASC, t.id ASC",
                PRIORITY_RANK
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params![agent_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// The task the execution engine should run next, if any.
    pub fn next_runnable_task(&self, agent_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT t.* FROM tasks t
                 WHERE t.agent_id = ?1 AND t.lifecycle = 'agent_work' AND t.status = 'todo'
                 ORDER BY {} DESC, t.created_at ASC, t.id ASC
                 LIMIT 1",
                PRIORITY_RANK
            );
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(params![agent_id], parse_task_row) {
                Ok(task) => Ok(Some(task)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Results of an agent's completed work, oldest first.
    pub fn completed_results_for_agent(&self, agent_id: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT title, result FROM tasks
                 WHERE agent_id = ?1 AND status = 'done' AND result IS NOT NULL
                 ORDER BY updated_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![agent_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Apply a lifecycle transition and return the updated task.
    pub fn apply_transition(&self, transition: &TaskTransition) -> Result<Task> {
        self.with_conn(|conn| {
            write_transition(conn, transition)?;
            get_task_internal(conn, &transition.task_id)?
                .ok_or_else(|| anyhow!("Task {} not found", transition.task_id))
        })
    }

    /// Complete a task and run the restart check for its agent in one transaction.
    ///
    /// The restart check runs in a savepoint: if it fails, only its own writes
    /// are rolled back and the completion still commits.
    pub fn complete_task_and_restart(
        &self,
        transition: &TaskTransition,
        agent_id: &str,
    ) -> Result<(Task, RestartOutcome)> {
        self.with_conn_mut(|conn| {
            let mut tx = conn.transaction()?;
            write_transition(&tx, transition)?;

            let outcome = {
                let sp = tx.savepoint()?;
                match restart_if_unblocked_internal(&sp, agent_id) {
                    Ok(decision) => {
                        sp.commit()?;
                        RestartOutcome::from(decision)
                    }
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "Restart check failed");
                        // Dropping the savepoint rolls it back.
                        RestartOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            let task = get_task_internal(&tx, &transition.task_id)?
                .ok_or_else(|| anyhow!("Task {} not found", transition.task_id))?;
            tx.commit()?;
            Ok((task, outcome))
        })
    }

    /// Merge a settings patch into a task.
    pub fn update_task_settings(&self, task_id: &str, patch: TaskSettingsPatch) -> Result<Task> {
        self.with_conn(|conn| {
            let mut task =
                get_task_internal(conn, task_id)?.ok_or_else(|| anyhow!("Task not found"))?;
            task.settings.apply(patch);
            let now = now_ms();

            conn.execute(
                "UPDATE tasks SET settings = ?1, updated_at = ?2 WHERE id = ?3",
                params![serde_json::to_string(&task.settings)?, now, task_id],
            )?;
            task.updated_at = now;
            Ok(task)
        })
    }

    /// Claim a `todo` agent-work task by moving it to `in_progress`.
    ///
    /// Returns false when the task is no longer `todo` agent work, i.e.
    /// another runner claimed it first.
    pub fn start_task(&self, task_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET status = 'in_progress', updated_at = ?1
                 WHERE id = ?2 AND lifecycle = 'agent_work' AND status = 'todo'",
                params![now_ms(), task_id],
            )?;
            Ok(updated == 1)
        })
    }

    /// Agent work that is queued or being executed.
    pub fn count_unfinished_work(&self, agent_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE agent_id = ?1 AND lifecycle = 'agent_work'
                   AND status IN ('todo', 'in_progress')",
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Store the engine's result and mark the task done.
    pub fn record_task_result(&self, task_id: &str, result: &str) -> Result<Task> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET status = 'done', result = ?1, updated_at = ?2
                 WHERE id = ?3 AND lifecycle = 'agent_work'",
                params![result, now_ms(), task_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("Task {} is not runnable agent work", task_id));
            }
            get_task_internal(conn, task_id)?.ok_or_else(|| anyhow!("Task {} not found", task_id))
        })
    }

    /// Turn a task into a blocking dependency and block its agent.
    pub fn convert_to_dependency(&self, task_id: &str, reason: &str) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task =
                get_task_internal(&tx, task_id)?.ok_or_else(|| anyhow!("Task not found"))?;

            write_transition(
                &tx,
                &TaskTransition {
                    task_id: task.id.clone(),
                    status: TaskStatus::Blocked,
                    lifecycle: TaskLifecycle::Dependency {
                        blocked_reason: Some(reason.to_string()),
                    },
                },
            )?;
            set_agent_status_internal(&tx, &task.agent_id, AgentStatus::Blocked)?;

            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| anyhow!("Task {} not found", task_id))?;
            tx.commit()?;
            Ok(task)
        })
    }
}

//! Read-only queries behind the dashboard, dependencies, workspace and history views.

use super::Database;
use super::agents::count_agents_by_status_internal;
use super::tasks::{PRIORITY_RANK, parse_task_row};
use crate::types::{DashboardSummary, Task};
use anyhow::Result;
use rusqlite::{Connection, params};

/// Tasks of every agent owned by `owner_id` matching `filter`.
fn owner_tasks(conn: &Connection, owner_id: &str, filter: &str, order: &str) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT t.* FROM tasks t
         JOIN agents a ON a.id = t.agent_id
         WHERE a.owner_id = ?1 AND {}
         ORDER BY {}",
        filter, order
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![owner_id], parse_task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

impl Database {
    /// Agent counts by status plus task counts per lifecycle phase.
    pub fn dashboard_summary(&self, owner_id: &str) -> Result<DashboardSummary> {
        self.with_conn(|conn| {
            let mut summary = DashboardSummary {
                agents_by_status: count_agents_by_status_internal(conn, owner_id)?,
                ..Default::default()
            };

            let mut stmt = conn.prepare(
                "SELECT t.lifecycle, COUNT(*) FROM tasks t
                 JOIN agents a ON a.id = t.agent_id
                 WHERE a.owner_id = ?1 AND t.lifecycle <> 'agent_work'
                 GROUP BY t.lifecycle",
            )?;
            let rows = stmt.query_map(params![owner_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (phase, count) = row?;
                match phase.as_str() {
                    "dependency" => summary.pending_dependencies = count,
                    "workspace" => summary.workspace_tasks = count,
                    "history" => summary.history_tasks = count,
                    _ => {}
                }
            }

            Ok(summary)
        })
    }

    /// Pending dependencies across the owner's agents, most urgent first.
    pub fn list_dependencies_for_owner(&self, owner_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            owner_tasks(
                conn,
                owner_id,
                "t.lifecycle = 'dependency'",
                &format!("{} DESC, t.created_at ASC", PRIORITY_RANK),
            )
        })
    }

    /// Tasks the owner has taken over, most recently moved first.
    pub fn list_workspace_for_owner(&self, owner_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            owner_tasks(
                conn,
                owner_id,
                "t.lifecycle = 'workspace'",
                "t.moved_at DESC, t.id ASC",
            )
        })
    }

    /// Completed history, most recently completed first.
    pub fn list_history_for_owner(&self, owner_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            owner_tasks(
                conn,
                owner_id,
                "t.lifecycle = 'history'",
                "t.completed_at DESC, t.id ASC",
            )
        })
    }
}

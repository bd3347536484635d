//! Agent audit log storage.

use super::{Database, bad_column, now_ms};
use crate::types::{AgentLog, LogLevel, NewAgentLog};
use anyhow::Result;
use rusqlite::{Connection, Row, params};

/// Default number of rows returned by `list_agent_logs`.
pub const DEFAULT_LOG_LIMIT: usize = 100;

fn parse_log_row(row: &Row) -> rusqlite::Result<AgentLog> {
    let level: String = row.get("level")?;
    let data: Option<String> = row.get("data")?;

    Ok(AgentLog {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        task_id: row.get("task_id")?,
        level: LogLevel::from_str(&level).ok_or_else(|| bad_column("level", &level))?,
        message: row.get("message")?,
        data: data.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn append_agent_log_internal(conn: &Connection, entry: &NewAgentLog) -> Result<i64> {
    let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO agent_logs (agent_id, task_id, level, message, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.agent_id,
            entry.task_id,
            entry.level.as_str(),
            entry.message,
            data,
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Append an audit row. Returns its id.
    pub fn append_agent_log(&self, entry: &NewAgentLog) -> Result<i64> {
        self.with_conn(|conn| append_agent_log_internal(conn, entry))
    }

    /// Audit rows for an agent, newest first.
    pub fn list_agent_logs(&self, agent_id: &str, limit: Option<usize>) -> Result<Vec<AgentLog>> {
        let limit = i64::try_from(limit.unwrap_or(DEFAULT_LOG_LIMIT)).unwrap_or(i64::MAX);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agent_logs WHERE agent_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let logs = stmt
                .query_map(params![agent_id, limit], parse_log_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(logs)
        })
    }
}

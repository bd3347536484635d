//! Agent CRUD and the restart check.

use super::{Database, bad_column, now_ms};
use crate::lifecycle::{RestartDecision, restart_decision};
use crate::types::{Agent, AgentStatus, RestartRecord};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum length for agent names.
pub const MAX_AGENT_NAME_LEN: usize = 120;

pub fn parse_agent_row(row: &Row) -> rusqlite::Result<Agent> {
    let status: String = row.get("status")?;
    let auto_restarted: bool = row.get("auto_restarted")?;
    let restart_reason: Option<String> = row.get("restart_reason")?;
    let restarted_at: Option<i64> = row.get("restarted_at")?;

    let restart = match (auto_restarted, restart_reason, restarted_at) {
        (true, Some(restart_reason), Some(restarted_at)) => Some(RestartRecord {
            auto_restarted,
            restart_reason,
            restarted_at,
        }),
        _ => None,
    };

    Ok(Agent {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        name: row.get("name")?,
        goal: row.get("goal")?,
        status: AgentStatus::from_str(&status).ok_or_else(|| bad_column("status", &status))?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        restart,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get an agent using an existing connection (avoids deadlock).
pub(crate) fn get_agent_internal(conn: &Connection, agent_id: &str) -> Result<Option<Agent>> {
    let mut stmt = conn.prepare("SELECT * FROM agents WHERE id = ?1")?;

    match stmt.query_row(params![agent_id], parse_agent_row) {
        Ok(agent) => Ok(Some(agent)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn set_agent_status_internal(
    conn: &Connection,
    agent_id: &str,
    status: AgentStatus,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_ms(), agent_id],
    )?;
    if updated == 0 {
        return Err(anyhow!("Agent {} not found", agent_id));
    }
    Ok(())
}

pub(crate) fn count_agents_by_status_internal(
    conn: &Connection,
    owner_id: &str,
) -> Result<HashMap<String, i64>> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM agents WHERE owner_id = ?1 GROUP BY status")?;
    let counts = stmt
        .query_map(params![owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<String, i64>>>()?;
    Ok(counts)
}

/// Count tasks that currently keep the agent from running.
pub(crate) fn count_blocking_internal(conn: &Connection, agent_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks
         WHERE agent_id = ?1 AND lifecycle = 'dependency' AND status IN ('blocked', 'todo')",
        params![agent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// The restart check against an existing connection.
///
/// Flips the agent to `active` and stamps the restart record when no
/// blocking dependencies remain; otherwise writes nothing.
pub(crate) fn restart_if_unblocked_internal(
    conn: &Connection,
    agent_id: &str,
) -> Result<RestartDecision> {
    let blocking = count_blocking_internal(conn, agent_id)?;
    let decision = restart_decision(blocking);

    if let RestartDecision::Restart { ref reason } = decision {
        let now = now_ms();
        let updated = conn.execute(
            "UPDATE agents
             SET status = 'active', auto_restarted = 1, restart_reason = ?1,
                 restarted_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![reason, now, agent_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("Agent {} not found", agent_id));
        }
    }

    Ok(decision)
}

impl Database {
    /// Create a new agent owned by `owner_id`.
    pub fn create_agent(
        &self,
        owner_id: &str,
        name: &str,
        goal: Option<String>,
        provider: &str,
        model: Option<String>,
    ) -> Result<Agent> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Agent name cannot be empty"));
        }
        if name.len() > MAX_AGENT_NAME_LEN {
            return Err(anyhow!(
                "Agent name must be at most {} characters, got {}",
                MAX_AGENT_NAME_LEN,
                name.len()
            ));
        }

        let id = Uuid::now_v7().to_string();
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (id, owner_id, name, goal, status, provider, model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?7)",
                params![&id, owner_id, name, goal, provider, model, now],
            )?;

            Ok(Agent {
                id,
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                goal,
                status: AgentStatus::Active,
                provider: provider.to_string(),
                model,
                restart: None,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get an agent by ID.
    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.with_conn(|conn| get_agent_internal(conn, agent_id))
    }

    /// List an owner's agents, newest first.
    pub fn list_agents_for_owner(&self, owner_id: &str) -> Result<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agents WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let agents = stmt
                .query_map(params![owner_id], parse_agent_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(agents)
        })
    }

    /// Set an agent's status.
    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        self.with_conn(|conn| set_agent_status_internal(conn, agent_id, status))
    }

    /// Agent counts keyed by status string.
    pub fn count_agents_by_status(&self, owner_id: &str) -> Result<HashMap<String, i64>> {
        self.with_conn(|conn| count_agents_by_status_internal(conn, owner_id))
    }

    /// Number of dependencies still blocking an agent.
    pub fn count_blocking_dependencies(&self, agent_id: &str) -> Result<i64> {
        self.with_conn(|conn| count_blocking_internal(conn, agent_id))
    }

    /// Run the restart check for an agent on its own.
    pub fn restart_agent_if_unblocked(&self, agent_id: &str) -> Result<RestartDecision> {
        self.with_conn(|conn| restart_if_unblocked_internal(conn, agent_id))
    }
}

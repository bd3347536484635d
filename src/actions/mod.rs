//! User-facing actions.
//!
//! Every action takes the caller's identity, checks ownership, performs the
//! state change, and hands its side effects (audit rows, notifications,
//! cache invalidation) to the effects queue and view cache. Side effects
//! never decide the outcome of an action.

mod agents;
mod keys;
mod tasks;

pub use agents::{AgentPage, NewAgent};
pub use tasks::CompletionOutcome;

use crate::cache::{Mutation, ViewCache};
use crate::config::Config;
use crate::db::Database;
use crate::effects::EffectSender;
use crate::error::{ActionError, ActionResult};
use crate::lifecycle::ensure_agent_owner;
use crate::logging::{AgentLogger, LogLevelFilter};
use crate::types::{Agent, Task};
use crate::vault::Vault;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Shared handles every action needs.
#[derive(Clone)]
pub struct AgentFlow {
    pub db: Database,
    pub config: Arc<Config>,
    pub effects: EffectSender,
    pub cache: Arc<ViewCache>,
    pub logger: AgentLogger,
    /// `None` when no encryption key is configured.
    pub vault: Option<Arc<Vault>>,
}

impl AgentFlow {
    pub fn new(
        db: Database,
        config: Config,
        effects: EffectSender,
        vault: Option<Vault>,
    ) -> Self {
        let filter = Arc::new(LogLevelFilter::new(config.audit.min_level));
        let logger = AgentLogger::new()
            .with_effects(effects.clone())
            .with_level_filter(filter);

        Self {
            db,
            config: Arc::new(config),
            effects,
            cache: Arc::new(ViewCache::new()),
            logger,
            vault: vault.map(Arc::new),
        }
    }

    /// Drop cached views made stale by `mutations`.
    pub fn invalidate(&self, mutations: &[Mutation]) {
        self.cache.apply(mutations);
    }

    /// Serve a read view from cache, building and storing it on a miss.
    pub fn cached_view<T, F>(&self, caller: &str, path: &str, build: F) -> ActionResult<Value>
    where
        T: Serialize,
        F: FnOnce() -> ActionResult<T>,
    {
        let caller = require_caller(caller)?;
        if let Some(view) = self.cache.get(caller, path) {
            return Ok(view);
        }
        let generation = self.cache.generation();
        let view = serde_json::to_value(build()?).map_err(ActionError::internal)?;
        self.cache.insert_if_current(caller, path, view.clone(), generation);
        Ok(view)
    }

    /// Load an agent the caller owns.
    pub(crate) fn owned_agent(&self, caller: &str, agent_id: &str) -> ActionResult<Agent> {
        if agent_id.trim().is_empty() {
            return Err(ActionError::missing_field("agent_id"));
        }
        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or_else(|| ActionError::agent_not_found(agent_id))?;
        ensure_agent_owner(&agent, caller)?;
        Ok(agent)
    }

    /// Load a task and its agent, without the ownership check.
    pub(crate) fn task_and_agent(&self, task_id: &str) -> ActionResult<(Task, Agent)> {
        if task_id.trim().is_empty() {
            return Err(ActionError::missing_field("task_id"));
        }
        self.db
            .get_task_with_agent(task_id)
            .map_err(|e| ActionError::from(e).with_task(task_id))?
            .ok_or_else(|| ActionError::task_not_found(task_id))
    }
}

/// Reject anonymous callers.
pub fn require_caller(caller: &str) -> ActionResult<&str> {
    let caller = caller.trim();
    if caller.is_empty() {
        return Err(ActionError::unauthenticated());
    }
    Ok(caller)
}

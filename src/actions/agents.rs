//! Agent creation and the read views.

use super::{AgentFlow, require_caller};
use crate::cache::{Mutation, agent_path};
use crate::error::{ActionError, ActionResult};
use crate::llm::ProviderKind;
use crate::types::{Agent, AgentLog, Task, TaskView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logs shown on the agent page.
const AGENT_PAGE_LOGS: usize = 20;

/// Request body for creating an agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub goal: Option<String>,
    /// Provider name; the configured default when absent.
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// The cached part of the agent page. Logs are attached per request.
#[derive(Debug, Serialize)]
pub struct AgentPage {
    pub agent: Agent,
    pub tasks: Vec<TaskView>,
    pub blocking_dependencies: i64,
}

fn views(tasks: Vec<Task>) -> Vec<TaskView> {
    tasks.into_iter().map(TaskView::from).collect()
}

impl AgentFlow {
    pub fn create_agent(&self, caller: &str, input: NewAgent) -> ActionResult<Agent> {
        let caller = require_caller(caller)?;
        if input.name.trim().is_empty() {
            return Err(ActionError::missing_field("name"));
        }

        let provider = match input.provider.as_deref().map(str::trim) {
            None | Some("") => self.config.engine.default_provider,
            Some(name) => ProviderKind::from_str(name).ok_or_else(|| {
                let allowed: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                ActionError::invalid_value(
                    "provider",
                    &format!("Unknown provider '{}'. Allowed: {}", name, allowed.join(", ")),
                )
            })?,
        };
        let goal = input.goal.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());
        let model = input.model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());

        let agent = self
            .db
            .create_agent(caller, &input.name, goal, provider.as_str(), model)
            .map_err(|e| ActionError::invalid_value("name", &e.to_string()))?;

        self.logger
            .for_agent(&agent.id)
            .info(&format!("Agent created: {}", agent.name));
        self.invalidate(&[Mutation::AgentChanged {
            agent_id: agent.id.clone(),
        }]);

        Ok(agent)
    }

    pub fn list_agents(&self, caller: &str) -> ActionResult<Vec<Agent>> {
        let caller = require_caller(caller)?;
        Ok(self.db.list_agents_for_owner(caller)?)
    }

    pub fn dashboard(&self, caller: &str) -> ActionResult<Value> {
        self.cached_view(caller, "/dashboard", || {
            Ok(self.db.dashboard_summary(caller.trim())?)
        })
    }

    pub fn list_dependencies(&self, caller: &str) -> ActionResult<Value> {
        self.cached_view(caller, "/dependencies", || {
            Ok(views(self.db.list_dependencies_for_owner(caller.trim())?))
        })
    }

    pub fn list_workspace(&self, caller: &str) -> ActionResult<Vec<TaskView>> {
        let caller = require_caller(caller)?;
        Ok(views(self.db.list_workspace_for_owner(caller)?))
    }

    pub fn list_history(&self, caller: &str) -> ActionResult<Vec<TaskView>> {
        let caller = require_caller(caller)?;
        Ok(views(self.db.list_history_for_owner(caller)?))
    }

    /// The agent, its tasks, and its most recent audit rows.
    ///
    /// Audit rows land after the mutation that caused them, so they are read
    /// fresh on every request and only the rest of the page is cached.
    pub fn agent_page(&self, caller: &str, agent_id: &str) -> ActionResult<Value> {
        let owner = require_caller(caller)?;
        let agent = self.owned_agent(owner, agent_id)?;
        let id = agent.id.clone();

        let mut page = self.cached_view(owner, &agent_path(&id), || {
            let tasks = self.db.list_tasks_for_agent(&agent.id)?;
            let blocking_dependencies = tasks.iter().filter(|t| t.is_blocking()).count() as i64;
            Ok(AgentPage {
                tasks: views(tasks),
                blocking_dependencies,
                agent,
            })
        })?;

        let logs = self.db.list_agent_logs(&id, Some(AGENT_PAGE_LOGS))?;
        if let Value::Object(ref mut fields) = page {
            fields.insert(
                "logs".to_string(),
                serde_json::to_value(logs).map_err(ActionError::internal)?,
            );
        }
        Ok(page)
    }

    pub fn agent_logs(
        &self,
        caller: &str,
        agent_id: &str,
        limit: Option<usize>,
    ) -> ActionResult<Vec<AgentLog>> {
        let caller = require_caller(caller)?;
        let agent = self.owned_agent(caller, agent_id)?;
        Ok(self.db.list_agent_logs(&agent.id, limit)?)
    }
}

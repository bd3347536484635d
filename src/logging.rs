//! Unified agent logging.
//!
//! One logger, two backends:
//! - tracing (stderr/stdout/file), always
//! - the agent's audit log, via the effects queue, when bound to an agent and
//!   the level passes the filter

use crate::effects::EffectSender;
use crate::types::{LogLevel, NewAgentLog};
use serde_json::Value;
use std::sync::Arc;
use tracing::Level;

/// Minimum level for audit persistence, fixed at startup from config.
///
/// Ranked 0=Debug, 1=Info, 2=Success, 3=Warning, 4=Error, 5=Milestone.
pub struct LogLevelFilter(u8);

impl LogLevelFilter {
    pub fn new(level: LogLevel) -> Self {
        Self(level_to_u8(level))
    }

    /// Check if a message at the given level should be persisted.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level_to_u8(level) >= self.0
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Success => 2,
        LogLevel::Warning => 3,
        LogLevel::Error => 4,
        LogLevel::Milestone => 5,
    }
}

/// Map an audit level onto tracing. Success and milestone are notable, not
/// problems, so they trace at INFO.
pub fn log_level_to_tracing(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info | LogLevel::Success | LogLevel::Milestone => Level::INFO,
        LogLevel::Warning => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Logger that writes to tracing and, when bound, to an agent's audit log.
#[derive(Clone)]
pub struct AgentLogger {
    effects: Option<EffectSender>,
    level_filter: Arc<LogLevelFilter>,
    agent_id: Option<String>,
    task_id: Option<String>,
}

impl AgentLogger {
    pub fn new() -> Self {
        Self {
            effects: None,
            level_filter: Arc::new(LogLevelFilter::default()),
            agent_id: None,
            task_id: None,
        }
    }

    /// Enable audit persistence through the effects queue.
    pub fn with_effects(mut self, effects: EffectSender) -> Self {
        self.effects = Some(effects);
        self
    }

    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// A copy of this logger bound to an agent.
    pub fn for_agent(&self, agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            task_id: None,
            ..self.clone()
        }
    }

    /// A copy of this logger bound to a task of the current agent.
    pub fn for_task(&self, task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..self.clone()
        }
    }

    /// Log a message to all configured backends.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        let agent = self.agent_id.as_deref().unwrap_or("-");
        let task = self.task_id.as_deref().unwrap_or("-");
        let kind = level.as_str();

        // 1. tracing
        match log_level_to_tracing(level) {
            Level::ERROR => tracing::error!(agent_id = %agent, task_id = %task, level = kind, "{}", message),
            Level::WARN => tracing::warn!(agent_id = %agent, task_id = %task, level = kind, "{}", message),
            Level::INFO => tracing::info!(agent_id = %agent, task_id = %task, level = kind, "{}", message),
            _ => tracing::debug!(agent_id = %agent, task_id = %task, level = kind, "{}", message),
        }

        // 2. audit log
        let (Some(effects), Some(agent_id)) = (&self.effects, &self.agent_id) else {
            return;
        };
        if !self.level_filter.should_log(level) {
            return;
        }
        let mut entry = NewAgentLog::new(agent_id.clone(), level, message);
        if let Some(ref task_id) = self.task_id {
            entry = entry.with_task(task_id.clone());
        }
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        effects.audit(entry);
    }

    pub fn log_with_data(&self, level: LogLevel, message: &str, data: Value) {
        self.log(level, message, Some(data));
    }

    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg, None);
    }

    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg, None);
    }

    pub fn success(&self, msg: &str) {
        self.log(LogLevel::Success, msg, None);
    }

    pub fn warning(&self, msg: &str) {
        self.log(LogLevel::Warning, msg, None);
    }

    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg, None);
    }

    pub fn milestone(&self, msg: &str) {
        self.log(LogLevel::Milestone, msg, None);
    }
}

impl Default for AgentLogger {
    fn default() -> Self {
        Self::new()
    }
}

//! Core types for AgentFlow.

use crate::settings::TaskSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status column of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

/// Task priority. Ordered so that `Urgent` compares greatest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// Parse a priority string leniently.
/// Returns `Medium` for unrecognized values (LLM output is not always tidy).
pub fn parse_priority(s: &str) -> Priority {
    Priority::from_str(s.trim()).unwrap_or_default()
}

/// Status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    Blocked,
    Paused,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "blocked" => Some(AgentStatus::Blocked),
            "paused" => Some(AgentStatus::Paused),
            "completed" => Some(AgentStatus::Completed),
            "error" => Some(AgentStatus::Error),
            _ => None,
        }
    }
}

/// Who created a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Generated by the LLM planner or the execution engine.
    #[default]
    Agent,
    /// Entered by the user through a form.
    User,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOrigin::Agent => "agent",
            TaskOrigin::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(TaskOrigin::Agent),
            "user" => Some(TaskOrigin::User),
            _ => None,
        }
    }
}

/// Where a task sits in the dependency lifecycle.
///
/// Each variant carries only the fields that are meaningful for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskLifecycle {
    /// Ordinary work item the execution engine may pick up.
    AgentWork,
    /// The owning agent cannot proceed until a human resolves this task.
    Dependency { blocked_reason: Option<String> },
    /// Taken over by the user and being worked on.
    Workspace { moved_at: i64, moved_by: String },
    /// Completed and archived.
    History {
        completed_at: i64,
        completed_by: String,
        completion_notes: Option<String>,
        /// Set when the task passed through the workspace first.
        moved_at: Option<i64>,
    },
}

impl TaskLifecycle {
    /// Storage tag for the `lifecycle` column.
    pub fn tag(&self) -> &'static str {
        match self {
            TaskLifecycle::AgentWork => "agent_work",
            TaskLifecycle::Dependency { .. } => "dependency",
            TaskLifecycle::Workspace { .. } => "workspace",
            TaskLifecycle::History { .. } => "history",
        }
    }

    /// Whether `status` is a legal companion for this lifecycle phase.
    pub fn allows_status(&self, status: TaskStatus) -> bool {
        match self {
            TaskLifecycle::AgentWork => true,
            TaskLifecycle::Dependency { .. } => {
                matches!(status, TaskStatus::Todo | TaskStatus::Blocked)
            }
            TaskLifecycle::Workspace { .. } => status == TaskStatus::InProgress,
            TaskLifecycle::History { .. } => status == TaskStatus::Done,
        }
    }
}

/// A task owned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub origin: TaskOrigin,
    pub lifecycle: TaskLifecycle,
    pub result: Option<String>,
    pub settings: TaskSettings,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// True while the task blocks its agent, and again once it is archived
    /// in history (a resolved dependency).
    pub fn is_dependency(&self) -> bool {
        matches!(
            self.lifecycle,
            TaskLifecycle::Dependency { .. } | TaskLifecycle::History { .. }
        )
    }

    /// True only while the task actually blocks its agent.
    pub fn is_blocking(&self) -> bool {
        matches!(self.lifecycle, TaskLifecycle::Dependency { .. })
            && matches!(self.status, TaskStatus::Todo | TaskStatus::Blocked)
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        match &self.lifecycle {
            TaskLifecycle::Dependency { blocked_reason } => blocked_reason.as_deref(),
            _ => None,
        }
    }

    /// `user_working`, `completed`, or `None`.
    pub fn workflow_status(&self) -> Option<&'static str> {
        match self.lifecycle {
            TaskLifecycle::Workspace { .. } => Some("user_working"),
            TaskLifecycle::History { .. } => Some("completed"),
            _ => None,
        }
    }

    pub fn in_history(&self) -> bool {
        matches!(self.lifecycle, TaskLifecycle::History { .. })
    }

    pub fn moved_to_tasks(&self) -> bool {
        matches!(self.lifecycle, TaskLifecycle::Workspace { .. })
    }
}

/// API representation of a task: the task plus its derived lifecycle flags.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub is_dependency: bool,
    pub blocked_reason: Option<String>,
    pub workflow_status: Option<&'static str>,
    pub moved_to_tasks: bool,
    pub in_history: bool,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            is_dependency: task.is_dependency(),
            blocked_reason: task.blocked_reason().map(String::from),
            workflow_status: task.workflow_status(),
            moved_to_tasks: task.moved_to_tasks(),
            in_history: task.in_history(),
            task,
        }
    }
}

/// Record stamped on an agent by the restart check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub auto_restarted: bool,
    pub restart_reason: String,
    pub restarted_at: i64,
}

/// An agent: a goal, an owner, and a list of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub goal: Option<String>,
    pub status: AgentStatus,
    /// LLM vendor used for planning and execution.
    pub provider: String,
    pub model: Option<String>,
    pub restart: Option<RestartRecord>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Audit log severity. Ordered from least to most significant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Milestone,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Milestone => "milestone",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "success" => Some(LogLevel::Success),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "milestone" => Some(LogLevel::Milestone),
            _ => None,
        }
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLog {
    pub id: i64,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_at: i64,
}

/// An audit row waiting to be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgentLog {
    pub agent_id: String,
    pub task_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl NewAgentLog {
    pub fn new(agent_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: None,
            level,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub origin: TaskOrigin,
    /// Create the task as a blocking dependency with this reason.
    #[serde(default)]
    pub dependency: Option<DependencyInput>,
}

/// Dependency details for a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyInput {
    pub blocked_reason: Option<String>,
}

/// Counts shown on the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub agents_by_status: HashMap<String, i64>,
    pub pending_dependencies: i64,
    pub workspace_tasks: i64,
    pub history_tasks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(lifecycle: TaskLifecycle, status: TaskStatus) -> Task {
        Task {
            id: "t1".into(),
            agent_id: "a1".into(),
            title: "Approve budget".into(),
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

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_parse_priority_defaults_to_medium() {
        assert_eq!(parse_priority("URGENT"), Priority::Urgent);
        assert_eq!(parse_priority(" low "), Priority::Low);
        assert_eq!(parse_priority("whenever"), Priority::Medium);
    }

    #[test]
    fn test_status_str_roundtrip() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Done,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("pending"), None);
    }

    #[test]
    fn test_lifecycle_allows_status() {
        let dep = TaskLifecycle::Dependency {
            blocked_reason: None,
        };
        assert!(dep.allows_status(TaskStatus::Todo));
        assert!(dep.allows_status(TaskStatus::Blocked));
        assert!(!dep.allows_status(TaskStatus::Done));

        let ws = TaskLifecycle::Workspace {
            moved_at: 1,
            moved_by: "u".into(),
        };
        assert!(ws.allows_status(TaskStatus::InProgress));
        assert!(!ws.allows_status(TaskStatus::Todo));
    }

    #[test]
    fn test_derived_flags() {
        let pending = task_with(
            TaskLifecycle::Dependency {
                blocked_reason: Some("needs approval".into()),
            },
            TaskStatus::Blocked,
        );
        assert!(pending.is_dependency());
        assert!(pending.is_blocking());
        assert_eq!(pending.blocked_reason(), Some("needs approval"));
        assert_eq!(pending.workflow_status(), None);

        let archived = task_with(
            TaskLifecycle::History {
                completed_at: 5,
                completed_by: "u".into(),
                completion_notes: None,
                moved_at: None,
            },
            TaskStatus::Done,
        );
        assert!(archived.is_dependency());
        assert!(!archived.is_blocking());
        assert!(archived.in_history());
        assert_eq!(archived.workflow_status(), Some("completed"));
    }

    #[test]
    fn test_task_view_serializes_flags() {
        let task = task_with(
            TaskLifecycle::Workspace {
                moved_at: 10,
                moved_by: "user-1".into(),
            },
            TaskStatus::InProgress,
        );
        let json = serde_json::to_value(TaskView::from(task)).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["is_dependency"], false);
        assert_eq!(json["workflow_status"], "user_working");
        assert_eq!(json["lifecycle"]["phase"], "workspace");
        assert_eq!(json["lifecycle"]["moved_by"], "user-1");
    }
}

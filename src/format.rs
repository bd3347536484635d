//! Output formatting utilities for markdown and JSON.

use crate::types::{Agent, Task, TaskLifecycle, TaskView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output format for CLI listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Format a single task as a markdown bullet block.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("### {}\n", task.title));
    md.push_str(&format!("- **id**: `{}`\n", task.id));
    md.push_str(&format!("- **status**: {}\n", task.status.as_str()));
    md.push_str(&format!("- **priority**: {}\n", task.priority.as_str()));

    match &task.lifecycle {
        TaskLifecycle::AgentWork => {}
        TaskLifecycle::Dependency { blocked_reason } => {
            md.push_str("- **dependency**: waiting on you\n");
            if let Some(reason) = blocked_reason {
                md.push_str(&format!("- **blocked_reason**: {}\n", reason));
            }
        }
        TaskLifecycle::Workspace { moved_by, .. } => {
            md.push_str(&format!("- **workspace**: taken by {}\n", moved_by));
        }
        TaskLifecycle::History {
            completed_by,
            completion_notes,
            ..
        } => {
            md.push_str(&format!("- **completed_by**: {}\n", completed_by));
            if let Some(notes) = completion_notes {
                md.push_str(&format!("- **notes**: {}\n", notes));
            }
        }
    }

    if let Some(hours) = task.settings.estimated_hours {
        md.push_str(&format!("- **estimated_hours**: {}\n", hours));
    }
    if !task.settings.tags.is_empty() {
        md.push_str(&format!("- **tags**: {}\n", task.settings.tags.join(", ")));
    }

    if let Some(ref desc) = task.description {
        md.push('\n');
        md.push_str(desc);
        md.push('\n');
    }
    if let Some(ref result) = task.result {
        md.push_str("\n**Result**\n\n");
        md.push_str(result);
        md.push('\n');
    }

    md
}

/// Format an agent and its tasks, grouped by lifecycle phase.
pub fn format_agent_tasks_markdown(agent: &Agent, tasks: &[Task]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {} ({})\n\n", agent.name, agent.status.as_str()));
    if let Some(ref goal) = agent.goal {
        md.push_str(&format!("> {}\n\n", goal));
    }

    let sections: [(&str, fn(&TaskLifecycle) -> bool); 4] = [
        ("Dependencies", |l: &TaskLifecycle| matches!(l, TaskLifecycle::Dependency { .. })),
        ("Agent work", |l: &TaskLifecycle| matches!(l, TaskLifecycle::AgentWork)),
        ("Workspace", |l: &TaskLifecycle| matches!(l, TaskLifecycle::Workspace { .. })),
        ("History", |l: &TaskLifecycle| matches!(l, TaskLifecycle::History { .. })),
    ];

    for (heading, belongs) in sections {
        let group: Vec<&Task> = tasks.iter().filter(|t| belongs(&t.lifecycle)).collect();
        if group.is_empty() {
            continue;
        }
        md.push_str(&format!("## {} ({})\n\n", heading, group.len()));
        for task in group {
            md.push_str(&format_task_markdown(task));
            md.push('\n');
        }
    }

    if tasks.is_empty() {
        md.push_str("_No tasks yet._\n");
    }

    md
}

/// JSON listing of tasks with their derived lifecycle flags.
pub fn tasks_to_json(tasks: &[Task]) -> Value {
    let views: Vec<TaskView> = tasks.iter().cloned().map(TaskView::from).collect();
    serde_json::to_value(views).unwrap_or(Value::Array(Vec::new()))
}

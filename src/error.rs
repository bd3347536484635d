//! Structured error types for action responses.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,
    InvalidState,

    // Identity errors
    Unauthenticated,
    Unauthorized,

    // Not found errors
    AgentNotFound,
    TaskNotFound,

    // Upstream errors
    ProviderNotConfigured,
    UpstreamError,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Structured error returned by actions.
#[derive(Debug, Serialize)]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Task the failing action was about, for log correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            task_id: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "Not authenticated")
    }

    pub fn unauthorized_task(task_id: &str) -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized to modify this task").with_task(task_id)
    }

    pub fn unauthorized_agent() -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized to access this agent")
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(
            ErrorCode::AgentNotFound,
            format!("Agent not found: {}", agent_id),
        )
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", task_id))
            .with_task(task_id)
    }

    pub fn provider_not_configured(provider: &str) -> Self {
        Self::new(
            ErrorCode::ProviderNotConfigured,
            format!("No API key configured for provider '{}'", provider),
        )
    }

    pub fn upstream(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UpstreamError, err.to_string())
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

// Database-layer code returns anyhow; an ActionError raised inside it survives the trip.
impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ActionError>() {
            Ok(action_err) => action_err,
            Err(err) => {
                if err.downcast_ref::<rusqlite::Error>().is_some() {
                    ActionError::database(err)
                } else {
                    ActionError::internal(err)
                }
            }
        }
    }
}

/// Result type for actions.
pub type ActionResult<T> = std::result::Result<T, ActionError>;

//! Route handlers, the caller extractor, and error responses.

use super::AppState;
use crate::actions::NewAgent;
use crate::error::{ActionError, ErrorCode};
use crate::planner::generate_tasks;
use crate::types::NewTask;
use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{error, info};

/// Header carrying the authenticated user's id.
pub const CALLER_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An action error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ActionError);

impl From<ActionError> for ApiError {
    fn from(err: ActionError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.code {
            ErrorCode::MissingRequiredField | ErrorCode::InvalidFieldValue => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::AgentNotFound | ErrorCode::TaskNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidState => StatusCode::CONFLICT,
            ErrorCode::ProviderNotConfigured => StatusCode::PRECONDITION_FAILED,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = ?self.0.code, task_id = ?self.0.task_id, "{}", self.0.message);
        }
        let body = json!({
            "success": false,
            "error": self.0.message,
            "code": self.0.code,
            "field": self.0.field,
            "task_id": self.0.task_id,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Parse an optional JSON body. An empty body yields the default.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ActionError::invalid_value("body", &format!("Invalid JSON body: {}", e)).into())
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The authenticated caller, from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or_else(|| ApiError(ActionError::unauthenticated()))
    }
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub(super) async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(super) async fn api_root() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "dashboard": "/api/dashboard",
            "dependencies": "/api/dependencies",
            "workspace": "/api/workspace",
            "history": "/api/history",
            "agents": "/api/agents",
            "tasks": "/api/tasks/{id}/{move-to-tasks|complete|metadata}",
            "keys": "/api/keys",
        }
    }))
}

// ---------------------------------------------------------------------------
// Read views
// ---------------------------------------------------------------------------

pub(super) async fn dashboard(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.flow.dashboard(&caller)?))
}

pub(super) async fn dependencies(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.flow.list_dependencies(&caller)?))
}

pub(super) async fn workspace(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.list_workspace(&caller)?))
}

pub(super) async fn history(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.list_history(&caller)?))
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub(super) async fn list_agents(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.list_agents(&caller)?))
}

pub(super) async fn create_agent(
    State(state): State<AppState>,
    Caller(caller): Caller,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let input: NewAgent = optional_body(&body)?;
    let agent = state.flow.create_agent(&caller, input)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub(super) async fn agent_page(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.flow.agent_page(&caller, &agent_id)?))
}

#[derive(Debug, Deserialize)]
pub(super) struct LogsQuery {
    limit: Option<usize>,
}

pub(super) async fn agent_logs(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.agent_logs(&caller, &agent_id, query.limit)?))
}

pub(super) async fn plan_agent(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let agent = state.flow.owned_agent(&caller, &agent_id)?;
    let llm = state.provider_for(&agent)?;
    let tasks = generate_tasks(&state.flow, &agent, llm.as_ref()).await?;
    let tasks: Vec<_> = tasks.into_iter().map(crate::types::TaskView::from).collect();
    Ok((StatusCode::CREATED, Json(json!({ "tasks": tasks }))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum RunMode {
    #[default]
    Step,
    Continuous,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RunRequest {
    #[serde(default)]
    mode: RunMode,
}

pub(super) async fn run_agent(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: RunRequest = optional_body(&body)?;
    let agent = state.flow.owned_agent(&caller, &agent_id)?;
    let llm = state.provider_for(&agent)?;

    match request.mode {
        RunMode::Step => {
            let outcome = state.engine.step(&agent.id, llm.as_ref()).await?;
            Ok(Json(outcome).into_response())
        }
        RunMode::Continuous => {
            let engine = state.engine.clone();
            let id = agent.id.clone();
            tokio::spawn(async move {
                match engine.run(&id, llm.as_ref()).await {
                    Ok(summary) => info!(
                        agent_id = %id,
                        iterations = summary.iterations,
                        hit_cap = summary.hit_iteration_cap,
                        "Continuous run finished"
                    ),
                    Err(e) => error!(agent_id = %id, error = %e, "Continuous run failed"),
                }
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "started": true, "agent_id": agent.id })),
            )
                .into_response())
        }
    }
}

pub(super) async fn restart_check(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.check_agent_restart(&caller, &agent_id)?))
}

pub(super) async fn create_task(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let input: NewTask = optional_body(&body)?;
    let task = state.flow.create_user_task(&caller, &agent_id, input)?;
    Ok((StatusCode::CREATED, Json(task)))
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

pub(super) async fn move_to_tasks(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.flow.move_to_tasks(&caller, &task_id)?))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CompleteRequest {
    notes: Option<String>,
}

pub(super) async fn complete_task(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(task_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: CompleteRequest = optional_body(&body)?;
    Ok(Json(state.flow.complete_task_and_move_to_history(
        &caller,
        &task_id,
        request.notes,
    )?))
}

pub(super) async fn update_metadata(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(task_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let fields: Map<String, Value> = optional_body(&body)?;
    Ok(Json(state.flow.update_task_metadata(&caller, &task_id, &fields)?))
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

pub(super) async fn list_keys(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<impl IntoResponse> {
    let providers = state.flow.list_api_keys(&caller)?;
    Ok(Json(json!({ "providers": providers })))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct StoreKeyRequest {
    #[serde(default)]
    api_key: String,
}

pub(super) async fn store_key(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(provider): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: StoreKeyRequest = optional_body(&body)?;
    state.flow.store_api_key(&caller, &provider, &request.api_key)?;
    Ok(Json(json!({ "success": true, "provider": provider })))
}

pub(super) async fn delete_key(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(provider): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.flow.delete_api_key(&caller, &provider)?;
    Ok(Json(json!({ "deleted": deleted })))
}

//! HTTP API.
//!
//! A JSON API over the actions layer. The caller's identity comes from the
//! `x-user-id` header set by the upstream auth proxy.

mod handlers;

pub use handlers::{ApiError, CALLER_HEADER, Caller};

use crate::actions::AgentFlow;
use crate::engine::Engine;
use crate::error::ActionResult;
use crate::llm::LlmProvider;
use crate::types::Agent;
use axum::{
    Router,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub flow: AgentFlow,
    pub engine: Engine,
    /// Serve every agent with this provider instead of the owner's stored key.
    provider_override: Option<Arc<dyn LlmProvider>>,
}

impl AppState {
    pub fn new(flow: AgentFlow) -> Self {
        Self {
            engine: Engine::new(flow.clone()),
            flow,
            provider_override: None,
        }
    }

    /// Use one provider for every agent (local gateways, tests).
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    fn provider_for(&self, agent: &Agent) -> ActionResult<Arc<dyn LlmProvider>> {
        match self.provider_override {
            Some(ref provider) => Ok(Arc::clone(provider)),
            None => self.flow.provider_for_agent(agent),
        }
    }
}

/// Build the router with every API route.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", get(handlers::api_root))
        .route("/api/health", get(handlers::health))
        // Read views
        .route("/api/dashboard", get(handlers::dashboard))
        .route("/api/dependencies", get(handlers::dependencies))
        .route("/api/workspace", get(handlers::workspace))
        .route("/api/history", get(handlers::history))
        // Agents
        .route(
            "/api/agents",
            get(handlers::list_agents).post(handlers::create_agent),
        )
        .route("/api/agents/{agent_id}", get(handlers::agent_page))
        .route("/api/agents/{agent_id}/logs", get(handlers::agent_logs))
        .route("/api/agents/{agent_id}/plan", post(handlers::plan_agent))
        .route("/api/agents/{agent_id}/run", post(handlers::run_agent))
        .route(
            "/api/agents/{agent_id}/restart-check",
            post(handlers::restart_check),
        )
        .route("/api/agents/{agent_id}/tasks", post(handlers::create_task))
        // Task lifecycle
        .route(
            "/api/tasks/{task_id}/move-to-tasks",
            post(handlers::move_to_tasks),
        )
        .route("/api/tasks/{task_id}/complete", post(handlers::complete_task))
        .route("/api/tasks/{task_id}/metadata", post(handlers::update_metadata))
        // API keys
        .route("/api/keys", get(handlers::list_keys))
        .route(
            "/api/keys/{provider}",
            put(handlers::store_key).delete(handlers::delete_key),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the returned sender fires (or is dropped).
pub async fn start_server(
    state: AppState,
    addr: &str,
) -> anyhow::Result<(oneshot::Sender<()>, SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    info!("AgentFlow API listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok((shutdown_tx, bound_addr, handle))
}

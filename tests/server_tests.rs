//! HTTP API tests, driven through the router without binding a socket.

use agentflow::actions::AgentFlow;
use agentflow::config::Config;
use agentflow::db::Database;
use agentflow::effects::spawn_effect_worker;
use agentflow::llm::MockProvider;
use agentflow::notify::RecordingNotifier;
use agentflow::server::{AppState, CALLER_HEADER, build_router};
use agentflow::vault::Vault;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const OWNER: &str = "user-u";
const STRANGER: &str = "user-v";

fn setup_flow(vault: Option<Vault>) -> AgentFlow {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let (effects, _worker) = spawn_effect_worker(db.clone(), Arc::new(RecordingNotifier::new()));
    let mut config = Config::default();
    config.engine.iteration_delay_ms = 0;
    AgentFlow::new(db, config, effects, vault)
}

fn app(llm: MockProvider) -> Router {
    build_router(AppState::new(setup_flow(None)).with_provider(Arc::new(llm)))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    caller: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header(CALLER_HEADER, caller);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_agent(app: &Router) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/agents",
        Some(OWNER),
        Some(json!({"name": "Launch", "goal": "Ship it"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_dependency(app: &Router, agent_id: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        &format!("/api/agents/{}/tasks", agent_id),
        Some(OWNER),
        Some(json!({
            "title": "Approve budget",
            "dependency": {"blocked_reason": "needs approval"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["is_dependency"], true);
    body["id"].as_str().unwrap().to_string()
}

mod meta_tests {
    use super::*;

    #[tokio::test]
    async fn health_needs_no_caller() {
        let app = app(MockProvider::new());
        let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn missing_caller_is_unauthenticated() {
        let app = app(MockProvider::new());
        let (status, body) = send(&app, Method::GET, "/api/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn invalid_json_is_bad_request() {
        let app = app(MockProvider::new());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/agents")
            .header(CALLER_HEADER, OWNER)
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn promote_then_complete_restarts_agent() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;
        let task_id = create_dependency(&app, &agent_id).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/move-to-tasks", task_id),
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["is_dependency"], false);
        assert_eq!(body["workflow_status"], "user_working");
        assert!(body["blocked_reason"].is_null());

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/complete", task_id),
            Some(OWNER),
            Some(json!({"notes": "approved via email"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["status"], "done");
        assert_eq!(body["task"]["in_history"], true);
        assert_eq!(body["task"]["lifecycle"]["completion_notes"], "approved via email");
        assert_eq!(body["restart"]["outcome"], "restarted");

        let (_, page) = send(
            &app,
            Method::GET,
            &format!("/api/agents/{}", agent_id),
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(page["agent"]["status"], "active");
        assert_eq!(page["blocking_dependencies"], 0);
    }

    #[tokio::test]
    async fn non_owner_gets_forbidden_with_error_body() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;
        let task_id = create_dependency(&app, &agent_id).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/move-to-tasks", task_id),
            Some(STRANGER),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Unauthorized to modify this task");
        assert_eq!(body["task_id"], task_id.as_str());

        let (_, deps) = send(&app, Method::GET, "/api/dependencies", Some(OWNER), None).await;
        assert_eq!(deps[0]["status"], "blocked");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let app = app(MockProvider::new());
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/tasks/nope/complete",
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn promoting_twice_conflicts() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;
        let task_id = create_dependency(&app, &agent_id).await;
        let uri = format!("/api/tasks/{}/move-to-tasks", task_id);

        send(&app, Method::POST, &uri, Some(OWNER), None).await;
        let (status, body) = send(&app, Method::POST, &uri, Some(OWNER), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_STATE");
    }

    #[tokio::test]
    async fn metadata_patch_merges_and_rejects_unknown_keys() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;
        let task_id = create_dependency(&app, &agent_id).await;
        let uri = format!("/api/tasks/{}/metadata", task_id);

        let (status, body) = send(
            &app,
            Method::POST,
            &uri,
            Some(OWNER),
            Some(json!({"user_notes": "x", "estimated_hours": "4"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["user_notes"], "x");
        assert_eq!(body["settings"]["estimated_hours"].as_f64(), Some(4.0));

        let (status, body) = send(
            &app,
            Method::POST,
            &uri,
            Some(OWNER),
            Some(json!({"status": "done"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "status");
    }
}

mod engine_tests {
    use super::*;

    #[tokio::test]
    async fn plan_then_step() {
        let llm = MockProvider::new()
            .with_content(r#"{"tasks": [{"title": "Draft copy", "priority": "high"}]}"#)
            .with_content(r#"{"status": "completed", "result": "Copy drafted"}"#);
        let app = app(llm);
        let agent_id = create_agent(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/agents/{}/plan", agent_id),
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["tasks"][0]["title"], "Draft copy");

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/agents/{}/run", agent_id),
            Some(OWNER),
            Some(json!({"mode": "step"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["title"], "Draft copy");
    }

    #[tokio::test]
    async fn bad_plan_is_bad_gateway() {
        let app = app(MockProvider::new().with_content("no plan today"));
        let agent_id = create_agent(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/agents/{}/plan", agent_id),
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn continuous_run_is_accepted() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/agents/{}/run", agent_id),
            Some(OWNER),
            Some(json!({"mode": "continuous"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["started"], true);
        assert_eq!(body["agent_id"], agent_id.as_str());
    }

    #[tokio::test]
    async fn restart_check_reports_outcome() {
        let app = app(MockProvider::new());
        let agent_id = create_agent(&app).await;
        create_dependency(&app, &agent_id).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/agents/{}/restart-check", agent_id),
            Some(OWNER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "still_blocked");
        assert_eq!(body["remaining"], 1);
    }
}

mod key_tests {
    use super::*;

    #[tokio::test]
    async fn storing_without_vault_is_precondition_failed() {
        let app = app(MockProvider::new());
        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/keys/openai",
            Some(OWNER),
            Some(json!({"api_key": "sk-test"})),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["code"], "PROVIDER_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn keys_round_trip_without_exposing_secrets() {
        let vault = Vault::from_bytes(&[7u8; 32]).unwrap();
        let flow = setup_flow(Some(vault));
        let app = build_router(AppState::new(flow.clone()));

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/keys/anthropic",
            Some(OWNER),
            Some(json!({"api_key": "sk-ant-secret"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/api/keys", Some(OWNER), None).await;
        assert_eq!(body, json!({"providers": ["anthropic"]}));
        let stored = flow
            .db
            .get_api_key_ciphertext(OWNER, "anthropic")
            .unwrap()
            .unwrap();
        assert!(!stored.contains("sk-ant-secret"));

        let (_, body) = send(&app, Method::DELETE, "/api/keys/anthropic", Some(OWNER), None).await;
        assert_eq!(body["deleted"], true);
        let (_, body) = send(&app, Method::DELETE, "/api/keys/anthropic", Some(OWNER), None).await;
        assert_eq!(body["deleted"], false);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let app = app(MockProvider::new());
        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/keys/skynet",
            Some(OWNER),
            Some(json!({"api_key": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "provider");
    }
}

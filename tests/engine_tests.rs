//! Execution engine and planner tests against a scripted provider.

use agentflow::actions::{AgentFlow, NewAgent};
use agentflow::config::Config;
use agentflow::db::Database;
use agentflow::effects::spawn_effect_worker;
use agentflow::engine::{Engine, StepOutcome};
use agentflow::error::ErrorCode;
use agentflow::llm::{LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, MockProvider};
use agentflow::notify::RecordingNotifier;
use agentflow::planner::generate_tasks;
use agentflow::types::{Agent, AgentStatus, LogLevel, NewTask, Priority, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;

const OWNER: &str = "user-u";

fn setup_with(max_iterations: u32) -> (AgentFlow, Arc<RecordingNotifier>) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let notifier = Arc::new(RecordingNotifier::new());
    let (effects, _worker) = spawn_effect_worker(db.clone(), notifier.clone());

    let mut config = Config::default();
    config.engine.iteration_delay_ms = 0;
    config.engine.max_iterations = max_iterations;
    (AgentFlow::new(db, config, effects, None), notifier)
}

fn setup() -> (AgentFlow, Arc<RecordingNotifier>) {
    setup_with(10)
}

fn create_agent(flow: &AgentFlow) -> Agent {
    flow.create_agent(
        OWNER,
        NewAgent {
            name: "Launch".to_string(),
            goal: Some("Ship the landing page".to_string()),
            ..Default::default()
        },
    )
    .expect("Failed to create agent")
}

fn add_work(flow: &AgentFlow, agent: &Agent, title: &str, priority: Priority) {
    flow.db
        .create_task(
            &agent.id,
            NewTask {
                title: title.to_string(),
                priority,
                ..Default::default()
            },
        )
        .expect("Failed to create task");
}

/// Holds every call inside `complete` until the test releases it.
struct GatedProvider {
    inner: MockProvider,
    entered: Notify,
    release: Notify,
}

impl GatedProvider {
    fn new() -> Self {
        Self {
            inner: MockProvider::new(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.complete(messages, config).await
    }
}

mod step_tests {
    use super::*;

    #[tokio::test]
    async fn runs_most_urgent_task_first() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Write footer", Priority::Low);
        add_work(&flow, &agent, "Write headline", Priority::Urgent);
        let llm = MockProvider::new()
            .with_content(r#"{"status": "completed", "result": "Ship faster"}"#);

        let outcome = Engine::new(flow.clone()).step(&agent.id, &llm).await.unwrap();

        match outcome {
            StepOutcome::Completed { ref title, .. } => assert_eq!(title, "Write headline"),
            other => panic!("unexpected outcome {:?}", other),
        }
        let tasks = flow.db.list_tasks_for_agent(&agent.id).unwrap();
        let headline = tasks.iter().find(|t| t.title == "Write headline").unwrap();
        assert_eq!(headline.status, TaskStatus::Done);
        assert_eq!(headline.result.as_deref(), Some("Ship faster"));

        let requests = llm.captured_requests();
        assert_eq!(requests.len(), 1);
        let (messages, config) = &requests[0];
        assert!(messages[0].content.contains("Current task: Write headline"));
        assert!(messages[0].content.contains("Goal: Ship the landing page"));
        assert!(config.system_prompt.is_some());
    }

    #[tokio::test]
    async fn llm_error_turns_task_into_dependency() {
        let (flow, notifier) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Buy domain", Priority::High);
        let llm = MockProvider::new().with_error(LlmError::Timeout);

        let outcome = Engine::new(flow.clone()).step(&agent.id, &llm).await.unwrap();

        let task_id = match outcome {
            StepOutcome::Failed {
                task_id,
                provider,
                error,
            } => {
                assert_eq!(provider, "mock");
                assert_eq!(error, "request timed out");
                task_id
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        let task = flow.db.get_task(&task_id).unwrap().unwrap();
        assert!(task.is_blocking());
        assert_eq!(
            task.blocked_reason(),
            Some("LLM call failed (mock): request timed out")
        );
        let agent = flow.db.get_agent(&agent.id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Blocked);

        flow.effects.flush().await;
        assert!(notifier.sent().iter().any(|m| m.contains("Buy domain")));
        let logs = flow.db.list_agent_logs(&agent.id, None).unwrap();
        let failure = logs.iter().find(|l| l.level == LogLevel::Error).unwrap();
        assert_eq!(failure.data.as_ref().unwrap()["provider"], "mock");
    }

    #[tokio::test]
    async fn needs_input_blocks_agent_until_resolved() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Pay invoice", Priority::High);
        let llm = MockProvider::new().with_content(
            r#"{"status": "needs_input", "reason": "Need the company card"}"#,
        );
        let engine = Engine::new(flow.clone());

        let outcome = engine.step(&agent.id, &llm).await.unwrap();
        let task_id = match outcome {
            StepOutcome::NeedsInput { task_id, reason } => {
                assert_eq!(reason, "Need the company card");
                task_id
            }
            other => panic!("unexpected outcome {:?}", other),
        };

        // A blocked agent is skipped.
        let outcome = engine.step(&agent.id, &llm).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::NotActive {
                status: AgentStatus::Blocked
            }
        );

        let done = flow
            .complete_task_and_move_to_history(OWNER, &task_id, Some("paid".into()))
            .unwrap();
        assert!(done.task.in_history);
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Active
        );
    }

    #[tokio::test]
    async fn empty_agent_with_no_blockers_finishes() {
        let (flow, notifier) = setup();
        let agent = create_agent(&flow);
        let llm = MockProvider::new();

        let outcome = Engine::new(flow.clone()).step(&agent.id, &llm).await.unwrap();

        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Completed
        );
        assert!(llm.captured_requests().is_empty());
        flow.effects.flush().await;
        assert!(notifier.sent().iter().any(|m| m.contains("finished")));
    }

    #[tokio::test]
    async fn task_left_in_progress_keeps_agent_active() {
        let (flow, notifier) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Deploy", Priority::High);
        let task = flow.db.next_runnable_task(&agent.id).unwrap().unwrap();
        assert!(flow.db.start_task(&task.id).unwrap());

        let outcome = Engine::new(flow.clone())
            .step(&agent.id, &MockProvider::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Idle {
                remaining: 0,
                in_progress: 1
            }
        );
        assert!(!outcome.should_continue());
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Active
        );
        flow.effects.flush().await;
        assert!(!notifier.sent().iter().any(|m| m.contains("finished")));
    }

    #[tokio::test]
    async fn concurrent_step_does_not_finish_running_agent() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Write copy", Priority::High);
        let engine = Engine::new(flow.clone());
        let gated = Arc::new(GatedProvider::new());

        let first = tokio::spawn({
            let engine = engine.clone();
            let gated = gated.clone();
            let agent_id = agent.id.clone();
            async move { engine.step(&agent_id, gated.as_ref()).await }
        });
        gated.entered.notified().await;

        let second = engine.step(&agent.id, &MockProvider::new()).await.unwrap();
        assert_eq!(
            second,
            StepOutcome::Idle {
                remaining: 0,
                in_progress: 1
            }
        );
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Active
        );

        gated.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, StepOutcome::Completed { ref title, .. } if title == "Write copy"));

        let last = engine.step(&agent.id, &MockProvider::new()).await.unwrap();
        assert_eq!(last, StepOutcome::Finished);
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let (flow, _) = setup();
        let err = Engine::new(flow)
            .step("missing", &MockProvider::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentNotFound);
    }
}

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn run_stops_at_iteration_cap() {
        let (flow, _) = setup_with(2);
        let agent = create_agent(&flow);
        for i in 0..4 {
            add_work(&flow, &agent, &format!("Task {}", i), Priority::Medium);
        }

        let summary = Engine::new(flow.clone())
            .run(&agent.id, &MockProvider::new())
            .await
            .unwrap();

        assert_eq!(summary.iterations, 2);
        assert!(summary.hit_iteration_cap);
        assert_eq!(
            flow.db.completed_results_for_agent(&agent.id).unwrap().len(),
            2
        );
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Active
        );
    }

    #[tokio::test]
    async fn run_works_through_list_then_finishes() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "One", Priority::High);
        add_work(&flow, &agent, "Two", Priority::Low);

        let summary = Engine::new(flow.clone())
            .run(&agent.id, &MockProvider::new())
            .await
            .unwrap();

        assert_eq!(summary.iterations, 3);
        assert!(!summary.hit_iteration_cap);
        assert_eq!(summary.steps.last(), Some(&StepOutcome::Finished));
    }

    #[tokio::test]
    async fn run_stops_when_a_task_needs_input() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        add_work(&flow, &agent, "Draft", Priority::High);
        add_work(&flow, &agent, "Sign lease", Priority::Medium);
        add_work(&flow, &agent, "Announce", Priority::Low);
        let llm = MockProvider::new()
            .with_content("Drafted.")
            .with_content(r#"{"status": "needs_input", "reason": "Signature required"}"#);

        let summary = Engine::new(flow.clone()).run(&agent.id, &llm).await.unwrap();

        assert_eq!(summary.iterations, 2);
        assert!(matches!(
            summary.steps.last(),
            Some(StepOutcome::NeedsInput { .. })
        ));
        assert_eq!(flow.db.count_blocking_dependencies(&agent.id).unwrap(), 1);
    }
}

mod planner_tests {
    use super::*;

    #[tokio::test]
    async fn plan_creates_tasks_and_dependencies() {
        let (flow, notifier) = setup();
        let agent = create_agent(&flow);
        let llm = MockProvider::new().with_content(
            r#"{"tasks": [
                {"title": "Draft copy", "priority": "high"},
                {"title": "Approve spend", "requires_human_input": true}
            ]}"#,
        );

        let tasks = generate_tasks(&flow, &agent, &llm).await.unwrap();

        assert_eq!(tasks.len(), 2);
        assert!(!tasks[0].is_blocking());
        assert!(tasks[1].is_blocking());
        assert_eq!(tasks[1].blocked_reason(), Some("Requires human input"));
        assert_eq!(
            flow.db.get_agent(&agent.id).unwrap().unwrap().status,
            AgentStatus::Blocked
        );

        flow.effects.flush().await;
        assert!(notifier.sent().iter().any(|m| m.contains("planned 2 tasks")));
        let logs = flow.db.list_agent_logs(&agent.id, None).unwrap();
        assert!(
            logs.iter()
                .any(|l| l.level == LogLevel::Milestone && l.message == "Generated 2 tasks")
        );
    }

    #[tokio::test]
    async fn unusable_plan_is_an_upstream_error() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        let llm = MockProvider::new().with_content("I would rather not.");

        let err = generate_tasks(&flow, &agent, &llm).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::UpstreamError);
        assert!(flow.db.list_tasks_for_agent(&agent.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_an_upstream_error() {
        let (flow, _) = setup();
        let agent = create_agent(&flow);
        let llm = MockProvider::new().with_error(LlmError::ApiError {
            status: 500,
            message: "overloaded".into(),
        });

        let err = generate_tasks(&flow, &agent, &llm).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamError);
        assert!(err.message.starts_with("mock: "));
        assert!(err.message.contains("overloaded"));
    }
}

use crate::api::*;
use crate::config::{AgentTemplate, BusConfig, CaptainConfig, PresenceConfig, ServerConfig, SupervisorConfig};
use crate::event_bus::EventBus;
use crate::models::{Task, TaskStatus};
use crate::pane::LocalPaneController;
use crate::presence::PresenceEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

const TEST_API_KEY: &str = "test-secret-key-1234567890123456789012345678901234567890";

fn test_config(data_dir: std::path::PathBuf) -> Config {
    let mut templates = HashMap::new();
    templates.insert(
        "worker".to_string(),
        AgentTemplate {
            role: "worker".to_string(),
            model: "claude-sonnet-4".to_string(),
            color: "blue".to_string(),
            command: "sh".to_string(),
            args: vec![],
            system_prompt_file: None,
        },
    );
    templates.insert(
        "captain".to_string(),
        AgentTemplate {
            role: "captain".to_string(),
            model: "claude-opus-4".to_string(),
            color: "gold".to_string(),
            command: "sh".to_string(),
            args: vec![],
            system_prompt_file: None,
        },
    );
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir,
            api_key: Some(TEST_API_KEY.to_string()),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        presence: PresenceConfig { sweep_interval_secs: 60, stale_threshold_secs: 120 },
        supervisor: SupervisorConfig { force_kill_deadline_secs: 60 },
        captain: CaptainConfig {
            template_name: "captain".to_string(),
            crash_loop_window_secs: 60,
            crash_loop_budget: 3,
            crash_loop_stability_secs: 300,
        },
        bus: BusConfig { event_queue_capacity: 100, activity_ring_size: 50, stop_approval_timeout_secs: 5 },
        templates,
    }
}

async fn test_app_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path().to_path_buf()));
    let store = Arc::new(StateStore::new(dir.path()).await.unwrap());
    let event_bus: SharedEventBus = Arc::new(EventBus::new(config.bus.event_queue_capacity));
    let pane_controller: SharedPaneController = Arc::new(LocalPaneController::new());
    let monitor = Arc::new(Monitor::new());
    let tasks = Arc::new(TasksEngine::new(
        store.clone(),
        event_bus.clone(),
        std::time::Duration::from_secs(config.bus.stop_approval_timeout_secs),
    ));
    let spawner = Arc::new(Spawner::new(config.clone(), store.clone(), pane_controller.clone(), event_bus.clone()));
    let presence = Arc::new(PresenceEngine::new(
        store.clone(),
        pane_controller.clone(),
        monitor.clone(),
        std::time::Duration::from_secs(config.presence.sweep_interval_secs),
        config.presence.stale_threshold_secs,
    ));
    let dashboard = Arc::new(DashboardBroadcast::new(64));
    let bus = Arc::new(Bus::new(store.clone(), event_bus.clone(), tasks.clone(), presence.clone(), monitor.clone(), config.bus.activity_ring_size));
    let captain = Arc::new(CaptainSupervisor::new(config.clone(), store.clone(), pane_controller.clone(), spawner.clone(), monitor.clone()));
    let validator = Arc::new(TaskContentValidator::new().unwrap());

    let state = AppState {
        config,
        store,
        event_bus,
        tasks,
        spawner,
        pane_controller,
        monitor,
        dashboard,
        bus,
        captain,
        validator,
    };
    (state, dir)
}

async fn spawn_test_server(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ApiServer::new(state).build_router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    format!("http://{addr}")
}

#[tokio::test]
async fn authentication_gates_protected_routes() {
    let (state, _dir) = test_app_state().await;
    let base_url = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base_url}/api/state")).send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client.get(format!("{base_url}/api/state")).header("x-api-key", TEST_API_KEY).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let response = client.get(format!("{base_url}/api/state")).header("x-api-key", "wrong-key").send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base_url}/api/state"))
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn healthz_requires_no_auth() {
    let (state, _dir) = test_app_state().await;
    let base_url = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base_url}/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn create_task_validation() {
    let (state, _dir) = test_app_state().await;
    let base_url = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/api/tasks"))
        .header("x-api-key", TEST_API_KEY)
        .json(&serde_json::json!({
            "title": "<script>alert('xss')</script>",
            "description": "ignored",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{base_url}/api/tasks"))
        .header("x-api-key", TEST_API_KEY)
        .json(&serde_json::json!({
            "title": "Add a hello world endpoint",
            "description": "Expose GET /hello returning a greeting",
            "priority": 2,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let task: Task = response.json().await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 2);
}

#[tokio::test]
async fn cors_headers_present_for_configured_origin() {
    let (state, _dir) = test_app_state().await;
    let base_url = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/healthz"))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn spawn_and_stop_agent_round_trip() {
    let (state, _dir) = test_app_state().await;
    let base_url = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/api/agents/spawn"))
        .header("x-api-key", TEST_API_KEY)
        .json(&serde_json::json!({ "config_name": "worker", "project_path": "." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let spawned: serde_json::Value = response.json().await.unwrap();
    let agent_id = spawned["agent_id"].as_str().unwrap().to_string();

    let response = client
        .get(format!("{base_url}/api/agents/{agent_id}"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{base_url}/api/agents/{agent_id}/stop"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{base_url}/api/agents/{agent_id}"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

//! HTTP surface: the coordination bus's SSE/POST endpoints, the
//! spawn/stop/task/stop-request REST API, the dashboard websocket, and an
//! unauthenticated liveness probe.

use crate::auth::{auth_middleware, create_auth_state};
use crate::bus::{sse_stream, Bus, JsonRpcRequest};
use crate::captain::CaptainSupervisor;
use crate::config::Config;
use crate::dashboard::DashboardBroadcast;
use crate::event_bus::SharedEventBus;
use crate::models::{Task, TaskSource, TaskStatus};
use crate::monitoring::Monitor;
use crate::pane::SharedPaneController;
use crate::rate_limit::{rate_limit_middleware, RateLimitConfig};
use crate::spawner::Spawner;
use crate::store::StateStore;
use crate::tasks::TasksEngine;
use crate::validation::TaskContentValidator;
use crate::{FleetError, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const SERVICE_NAME: &str = "fleetbridge";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = match &self {
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::Validation(_) | FleetError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            FleetError::SessionInvalid | FleetError::Unauthorized => StatusCode::UNAUTHORIZED,
            FleetError::Conflict(_) => StatusCode::CONFLICT,
            FleetError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FleetError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub event_bus: SharedEventBus,
    pub tasks: Arc<TasksEngine>,
    pub spawner: Arc<Spawner>,
    pub pane_controller: SharedPaneController,
    pub monitor: Arc<Monitor>,
    pub dashboard: Arc<DashboardBroadcast>,
    pub bus: Arc<Bus>,
    pub captain: Arc<CaptainSupervisor>,
    pub validator: Arc<TaskContentValidator>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.state.config.server.clone());
        let rate_limit_state = Arc::new(RateLimitConfig::new());

        let cors = build_cors(&self.state.config.server.allowed_origins);

        Router::new()
            .route("/healthz", get(health_check))
            .route("/mcp/sse", get(mcp_sse))
            .route("/mcp/messages/", post(mcp_messages))
            .route("/api/agents/spawn", post(spawn_agent))
            .route("/api/agents/{id}/stop", post(stop_agent))
            .route("/api/agents/{id}/graceful-stop", post(graceful_stop_agent))
            .route("/api/agents/{id}", get(get_agent))
            .route("/api/state", get(get_state))
            .route("/api/tasks", post(create_task).get(list_tasks))
            .route("/api/tasks/{id}", patch(patch_task).delete(delete_task))
            .route("/api/stop-requests/{id}/respond", post(respond_stop_request))
            .route("/ws", get(dashboard_ws))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors)
                    .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware)),
            )
    }

    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.state.config.server.host, self.state.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| FleetError::Config(format!("failed to bind {addr}: {e}")))?;
        info!(addr, "FleetBridge API listening");
        axum::serve(listener, self.build_router()).await.map_err(|e| FleetError::Internal(e.into()))?;
        Ok(())
    }
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { service: SERVICE_NAME, version: SERVICE_VERSION })
}

// -- MCP coordination bus -----------------------------------------------

#[derive(Debug, Deserialize)]
struct SseParams {
    agent_id: Option<String>,
}

async fn mcp_sse(State(state): State<AppState>, Query(params): Query<SseParams>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let agent_id = params
        .agent_id
        .or_else(|| headers.get("x-agent-id").and_then(|v| v.to_str().ok()).map(str::to_string))
        .ok_or_else(|| FleetError::Validation("agent_id query param or X-Agent-ID header is required".to_string()))?;

    state.store.get_agent(&agent_id).await.ok_or_else(|| FleetError::NotFound(format!("agent {agent_id}")))?;

    let session_id = state.bus.open_session(&agent_id).await;
    Ok(sse_stream(state.bus.clone(), agent_id, session_id))
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: uuid::Uuid,
}

async fn mcp_messages(State(state): State<AppState>, Query(params): Query<SessionParams>, Json(request): Json<JsonRpcRequest>) -> Result<StatusCode> {
    let bus = state.bus.clone();
    let session_id = params.session_id;
    // Validate the session synchronously so an unknown/stale session_id gets
    // a 401 on the POST itself, before the tool call runs in the background.
    bus.agent_for_session(session_id).await?;

    tokio::spawn(async move {
        let response = bus.handle_request(session_id, request).await;
        if response.error.is_some() {
            tracing::debug!(?response.error, "mcp tool call returned an error");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

// -- agent lifecycle ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpawnAgentRequest {
    config_name: String,
    project_path: String,
}

#[derive(Debug, Serialize)]
struct SpawnAgentResponse {
    agent_id: String,
    pid: Option<u32>,
}

async fn spawn_agent(State(state): State<AppState>, Json(request): Json<SpawnAgentRequest>) -> Result<Json<SpawnAgentResponse>> {
    let agent = state.spawner.spawn_agent(&request.config_name, &request.project_path).await?;
    Ok(Json(SpawnAgentResponse { agent_id: agent.id, pid: agent.pid }))
}

async fn stop_agent(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let agent = state.store.get_agent(&id).await.ok_or_else(|| FleetError::NotFound(format!("agent {id}")))?;
    if let Some(pane_id) = &agent.pane_id {
        state.pane_controller.kill_pane(pane_id).await.ok();
    }
    state.spawner.cleanup_agent_files(&id).await?;
    state.store.remove_agent(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn graceful_stop_agent(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.spawner.stop_agent(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_agent(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<crate::models::Agent>> {
    state.store.get_agent(&id).await.map(Json).ok_or_else(|| FleetError::NotFound(format!("agent {id}")))
}

async fn get_state(State(state): State<AppState>) -> Json<crate::store::StateSnapshot> {
    Json(state.store.snapshot().await)
}

// -- tasks -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    title: String,
    description: String,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    source: Option<TaskSource>,
}

fn default_priority() -> u8 {
    4
}

async fn create_task(State(state): State<AppState>, Json(request): Json<CreateTaskRequest>) -> Result<Json<Task>> {
    let title = state.validator.validate_and_sanitize_task_content(&request.title)?;
    let description = state.validator.validate_and_sanitize_task_content(&request.description)?;
    let task = Task::new(title, description, request.priority, request.source.unwrap_or(TaskSource::Dashboard));
    let created = state.tasks.create_task(task).await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
struct ListTasksParams {
    status: Option<String>,
}

async fn list_tasks(State(state): State<AppState>, Query(params): Query<ListTasksParams>) -> Result<Json<Vec<Task>>> {
    let tasks = match params.status.as_deref() {
        Some(status) => {
            let status = parse_task_status(status)?;
            state.store.list_tasks_by_status(status).await?
        }
        None => state.store.list_tasks().await?,
    };
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
struct PatchTaskRequest {
    status: Option<String>,
    assigned_to: Option<String>,
    note: Option<String>,
}

async fn patch_task(State(state): State<AppState>, Path(id): Path<String>, Json(request): Json<PatchTaskRequest>) -> Result<Json<Task>> {
    if let Some(agent_id) = request.assigned_to {
        return Ok(Json(state.tasks.assign_task(&id, &agent_id).await?));
    }
    let status = request.status.ok_or_else(|| FleetError::Validation("patch requires status or assigned_to".to_string()))?;
    let status = parse_task_status(&status)?;
    Ok(Json(state.tasks.transition_status(&id, status, request.note).await?))
}

async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.store.delete_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_task_status(raw: &str) -> Result<TaskStatus> {
    use TaskStatus::*;
    Ok(match raw {
        "pending" => Pending,
        "assigned" => Assigned,
        "in_progress" => InProgress,
        "review" => Review,
        "changes_requested" => ChangesRequested,
        "approved" => Approved,
        "merged" => Merged,
        "blocked" => Blocked,
        other => return Err(FleetError::Validation(format!("unknown task status {other}"))),
    })
}

// -- stop requests ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RespondStopRequest {
    approved: bool,
    message: Option<String>,
}

async fn respond_stop_request(State(state): State<AppState>, Path(id): Path<String>, Json(request): Json<RespondStopRequest>) -> Result<Json<crate::models::StopRequest>> {
    let resolved = state.tasks.respond_to_stop_request(&id, request.approved, request.message).await?;
    Ok(Json(resolved))
}

// -- dashboard --------------------------------------------------------------

async fn dashboard_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move { state.dashboard.serve(socket).await })
}

#[cfg(test)]
mod tests;

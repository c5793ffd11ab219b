//! Coordination bus (C5): the MCP-style JSON-RPC-over-SSE wire protocol
//! agents speak to the core. Each agent opens one SSE stream
//! (`GET /mcp/sse?agent_id=`) and gets back an `endpoint` event naming a
//! session-scoped POST URL; JSON-RPC requests go to that POST endpoint and
//! their responses (and all other pushed events) arrive as `message`
//! events on the SSE stream.

use crate::event_bus::SharedEventBus;
use crate::models::{Event, EventPriority, EventTarget, EventType};
use crate::monitoring::Monitor;
use crate::presence::PresenceEngine;
use crate::store::StateStore;
use crate::tasks::TasksEngine;
use crate::{FleetError, Result};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: serde_json::Value, error: &FleetError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error.json_rpc_code(),
                message: error.to_string(),
            }),
        }
    }
}

/// Maps session ids (minted per SSE connection) to the agent id they speak
/// for. A reconnect atomically replaces the previous session for that
/// agent, invalidating its old session id.
struct SessionTable {
    session_to_agent: HashMap<Uuid, String>,
    agent_to_session: HashMap<String, Uuid>,
}

impl SessionTable {
    fn new() -> Self {
        Self {
            session_to_agent: HashMap::new(),
            agent_to_session: HashMap::new(),
        }
    }

    fn open(&mut self, agent_id: &str) -> Uuid {
        if let Some(old) = self.agent_to_session.remove(agent_id) {
            self.session_to_agent.remove(&old);
        }
        let session_id = Uuid::new_v4();
        self.session_to_agent.insert(session_id, agent_id.to_string());
        self.agent_to_session.insert(agent_id.to_string(), session_id);
        session_id
    }

    fn agent_for(&self, session_id: Uuid) -> Option<String> {
        self.session_to_agent.get(&session_id).cloned()
    }

    fn close(&mut self, session_id: Uuid) {
        if let Some(agent_id) = self.session_to_agent.remove(&session_id) {
            self.agent_to_session.remove(&agent_id);
        }
    }
}

pub struct Bus {
    store: Arc<StateStore>,
    event_bus: SharedEventBus,
    tasks: Arc<TasksEngine>,
    presence: Arc<PresenceEngine>,
    monitor: Arc<Monitor>,
    sessions: RwLock<SessionTable>,
    activity_ring_size: usize,
}

impl Bus {
    pub fn new(store: Arc<StateStore>, event_bus: SharedEventBus, tasks: Arc<TasksEngine>, presence: Arc<PresenceEngine>, monitor: Arc<Monitor>, activity_ring_size: usize) -> Self {
        Self {
            store,
            event_bus,
            tasks,
            presence,
            monitor,
            sessions: RwLock::new(SessionTable::new()),
            activity_ring_size,
        }
    }

    /// Opens a new SSE session for `agent_id`, returning the session id to
    /// embed in the `endpoint` event.
    pub async fn open_session(&self, agent_id: &str) -> Uuid {
        self.presence.mark_connected(agent_id).await;
        self.sessions.write().await.open(agent_id)
    }

    pub async fn close_session(&self, session_id: Uuid) {
        let agent_id = self.sessions.write().await.agent_for(session_id);
        self.sessions.write().await.close(session_id);
        if let Some(agent_id) = agent_id {
            self.presence.mark_disconnected(&agent_id).await;
        }
    }

    pub async fn agent_for_session(&self, session_id: Uuid) -> Result<String> {
        self.sessions.read().await.agent_for(session_id).ok_or(FleetError::SessionInvalid)
    }

    /// Dispatches one JSON-RPC request on behalf of `session_id`, bumping
    /// presence and returning the response to be delivered over SSE.
    /// Dispatches the request and pushes the JSON-RPC response back to the
    /// agent's own SSE stream as a `message` event, since the POST endpoint
    /// itself only ever returns 202. Also returns the response directly for
    /// callers (tests) that don't go through SSE.
    pub async fn handle_request(&self, session_id: Uuid, request: JsonRpcRequest) -> JsonRpcResponse {
        let agent_id = match self.agent_for_session(session_id).await {
            Ok(id) => id,
            Err(e) => return JsonRpcResponse::err(request.id, &e),
        };
        self.presence.heartbeat(&agent_id).await;

        let response = match self.dispatch_tool(&agent_id, &request.method, request.params).await {
            Ok(result) => JsonRpcResponse::ok(request.id, result),
            Err(e) => JsonRpcResponse::err(request.id, &e),
        };

        if let Ok(payload) = serde_json::to_value(&response) {
            let event = Event::new(EventType::Message, "bus", EventTarget::Agent(agent_id), EventPriority::High, payload);
            if let Err(e) = self.event_bus.publish(event).await {
                warn!("failed to deliver JSON-RPC response over SSE: {e}");
            }
        }

        response
    }

    async fn dispatch_tool(&self, agent_id: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        match method {
            "register_agent" => self.tool_register_agent(agent_id, params).await,
            "report_status" => self.tool_report_status(agent_id, params).await,
            "report_metrics" => self.tool_report_metrics(agent_id, params).await,
            "log_activity" => self.tool_log_activity(agent_id, params).await,
            "signal_captain" => self.tool_signal_captain(agent_id, params).await,
            "request_stop_approval" => self.tool_request_stop_approval(agent_id, params).await,
            "request_human_input" => self.tool_request_human_input(agent_id, params).await,
            "send_to_agent" => self.tool_send_to_agent(agent_id, params).await,
            "wait_for_events" => self.tool_wait_for_events(agent_id, params).await,
            "submit_recon_report" => self.tool_submit_recon_report(agent_id, params).await,
            other => Err(FleetError::NotFound(format!("unknown tool {other}"))),
        }
    }

    async fn tool_register_agent(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let role = params.get("role").and_then(|v| v.as_str()).map(str::to_string);
        self.store
            .update_agent(agent_id, |a| {
                if let Some(role) = role {
                    a.role = role;
                }
                a.status = crate::models::AgentStatus::Connected;
            })
            .await?;
        Ok(serde_json::json!({ "registered": true }))
    }

    async fn tool_report_status(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let status_str = params.get("status").and_then(|v| v.as_str()).unwrap_or("idle");
        let status = parse_status(status_str)?;
        let task_id = params.get("task_id").and_then(|v| v.as_str()).map(str::to_string);
        self.store
            .update_agent(agent_id, |a| {
                a.status = status;
                a.current_task_id = task_id;
            })
            .await?;
        Ok(serde_json::json!({ "ack": true }))
    }

    async fn tool_report_metrics(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(tokens) = params.get("tokens").and_then(|v| v.as_u64()) {
            self.monitor.record_tokens(agent_id, tokens).await;
        }
        if params.get("task_failed").and_then(|v| v.as_bool()).unwrap_or(false) {
            self.monitor.record_task_failed(agent_id).await;
        }
        if params.get("task_completed").and_then(|v| v.as_bool()).unwrap_or(false) {
            self.monitor.record_task_completed(agent_id).await;
        }
        Ok(serde_json::json!({ "ack": true }))
    }

    async fn tool_log_activity(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FleetError::Validation("log_activity requires a message".to_string()))?
            .to_string();
        let capacity = self.activity_ring_size;
        self.store.update_agent(agent_id, |a| a.push_activity(message, capacity)).await?;
        Ok(serde_json::json!({ "ack": true }))
    }

    async fn tool_signal_captain(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let event = Event::new(
            EventType::Message,
            agent_id,
            EventTarget::Agent("captain".to_string()),
            EventPriority::High,
            params,
        );
        self.event_bus.publish(event).await?;
        Ok(serde_json::json!({ "sent": true }))
    }

    async fn tool_request_stop_approval(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let reason = params
            .get("reason")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FleetError::Validation("request_stop_approval requires a reason".to_string()))?
            .to_string();
        let context = params.get("context").and_then(|v| v.as_str()).map(str::to_string);
        let work_completed = params.get("work_completed").and_then(|v| v.as_str()).map(str::to_string);
        let resolved = self.tasks.request_stop_approval(agent_id, reason, context, work_completed).await?;
        Ok(serde_json::to_value(resolved)?)
    }

    async fn tool_request_human_input(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let event = Event::new(EventType::Message, agent_id, EventTarget::Broadcast, EventPriority::High, params);
        self.event_bus.publish(event).await?;
        Ok(serde_json::json!({ "sent": true }))
    }

    async fn tool_send_to_agent(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let target = params
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FleetError::Validation("send_to_agent requires a target".to_string()))?;
        if target == agent_id {
            return Err(FleetError::Validation("send_to_agent cannot target the sender".to_string()));
        }
        let payload = params.get("message").cloned().unwrap_or(serde_json::json!({}));
        let event = Event::new(
            EventType::Message,
            agent_id,
            EventTarget::Agent(target.to_string()),
            EventPriority::Normal,
            payload,
        );
        self.event_bus.publish(event).await?;
        Ok(serde_json::json!({ "sent": true }))
    }

    /// `{timeout_seconds?: number, event_types?: string[]}` -> long-poll for
    /// exactly one matching event: `{status: "event_received", event}` or
    /// `{status: "timeout"}` once `timeout_seconds` (default 30, clamped to
    /// [1, 300]) elapses with nothing matching.
    async fn tool_wait_for_events(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let timeout_secs = params
            .get("timeout_seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or(crate::constants::DEFAULT_WAIT_FOR_EVENTS_TIMEOUT_SECS as i64)
            .clamp(
                crate::constants::MIN_WAIT_FOR_EVENTS_TIMEOUT_SECS as i64,
                crate::constants::MAX_WAIT_FOR_EVENTS_TIMEOUT_SECS as i64,
            ) as u64;

        let event_types = match params.get("event_types") {
            Some(serde_json::Value::Array(items)) => {
                let mut types = Vec::with_capacity(items.len());
                for item in items {
                    let raw = item
                        .as_str()
                        .ok_or_else(|| FleetError::Validation("event_types must be strings".to_string()))?;
                    types.push(parse_event_type(raw)?);
                }
                Some(types)
            }
            _ => None,
        };

        if let Some(event) = self.event_bus.take_next_matching(agent_id, event_types.as_deref()).await {
            return Ok(serde_json::json!({ "status": "event_received", "event": event }));
        }

        let mut notify = self.event_bus.notifications();
        let event_bus = self.event_bus.clone();
        let agent_id = agent_id.to_string();
        let wait = async move {
            loop {
                match notify.recv().await {
                    Ok(id) if id == agent_id => {
                        if let Some(event) = event_bus.take_next_matching(&agent_id, event_types.as_deref()).await {
                            return event;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(event) = event_bus.take_next_matching(&agent_id, event_types.as_deref()).await {
                            return event;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
                }
            }
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), wait).await {
            Ok(event) => Ok(serde_json::json!({ "status": "event_received", "event": event })),
            Err(_) => Ok(serde_json::json!({ "status": "timeout" })),
        }
    }

    async fn tool_submit_recon_report(&self, agent_id: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let summary = params.to_string();
        let capacity = self.activity_ring_size;
        self.store
            .update_agent(agent_id, |a| a.push_activity(format!("recon_report: {summary}"), capacity))
            .await?;
        Ok(serde_json::json!({ "ack": true }))
    }
}

fn parse_event_type(raw: &str) -> Result<EventType> {
    Ok(match raw {
        "message" => EventType::Message,
        "task" => EventType::Task,
        "alert" => EventType::Alert,
        "status" => EventType::Status,
        "shutdown" => EventType::Shutdown,
        "stop_approval" => EventType::StopApproval,
        other => return Err(FleetError::Validation(format!("unknown event type {other}"))),
    })
}

fn parse_status(raw: &str) -> Result<crate::models::AgentStatus> {
    use crate::models::AgentStatus::*;
    Ok(match raw {
        "starting" => Starting,
        "connected" => Connected,
        "working" => Working,
        "idle" => Idle,
        "blocked" => Blocked,
        "stopping" => Stopping,
        "disconnected" => Disconnected,
        "error" => Error,
        "dead" => Dead,
        other => return Err(FleetError::Validation(format!("unknown agent status {other}"))),
    })
}

struct SseState {
    sent_endpoint: bool,
    agent_id: String,
    session_id: Uuid,
    event_bus: SharedEventBus,
    notify: broadcast::Receiver<String>,
    pending: VecDeque<Event>,
    ping: tokio::time::Interval,
}

/// Builds the per-connection SSE stream: an `endpoint` event naming the
/// POST-back URL, followed by `message` events for queued activity and
/// `ping` events every `SSE_PING_INTERVAL_SECS`.
pub fn sse_stream(bus: Arc<Bus>, agent_id: String, session_id: Uuid) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let notify = bus.event_bus.notifications();
    let mut ping = tokio::time::interval(Duration::from_secs(crate::constants::SSE_PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let state = SseState {
        sent_endpoint: false,
        agent_id,
        session_id,
        event_bus: bus.event_bus.clone(),
        notify,
        pending: VecDeque::new(),
        ping,
    };

    let stream = stream::unfold(state, |mut state| async move {
        if !state.sent_endpoint {
            state.sent_endpoint = true;
            let data = format!("/mcp/messages/?session_id={}", state.session_id);
            return Some((Ok(SseEvent::default().event("endpoint").data(data)), state));
        }

        if let Some(event) = state.pending.pop_front() {
            let data = serde_json::to_string(&event).unwrap_or_default();
            return Some((Ok(SseEvent::default().event("message").data(data)), state));
        }

        loop {
            tokio::select! {
                _ = state.ping.tick() => {
                    let data = serde_json::json!({ "time": chrono::Utc::now().timestamp() }).to_string();
                    return Some((Ok(SseEvent::default().event("ping").data(data)), state));
                }
                received = state.notify.recv() => {
                    match received {
                        Ok(agent_id) if agent_id == state.agent_id => {
                            let mut drained = state.event_bus.drain(&state.agent_id).await;
                            if drained.is_empty() {
                                continue;
                            }
                            let first = drained.remove(0);
                            state.pending.extend(drained);
                            let data = serde_json::to_string(&first).unwrap_or_default();
                            return Some((Ok(SseEvent::default().event("message").data(data)), state));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::pane::LocalPaneController;

    async fn test_bus() -> (Arc<Bus>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).await.unwrap());
        let event_bus: SharedEventBus = Arc::new(EventBus::new(10));
        let tasks = Arc::new(TasksEngine::new(store.clone(), event_bus.clone(), Duration::from_millis(200)));
        let pane_controller: crate::pane::SharedPaneController = Arc::new(LocalPaneController::new());
        let monitor = Arc::new(Monitor::new());
        let presence = Arc::new(PresenceEngine::new(store.clone(), pane_controller, monitor.clone(), Duration::from_secs(60), 120));

        let agent = crate::models::Agent::new("worker-1".into(), "worker".into(), "worker".into(), "m".into(), "c".into(), "/tmp".into());
        store.add_agent(agent).await.unwrap();

        (Arc::new(Bus::new(store, event_bus, tasks, presence, monitor, 50)), dir)
    }

    #[tokio::test]
    async fn open_session_then_reconnect_invalidates_old_session() {
        let (bus, _dir) = test_bus().await;
        let first = bus.open_session("worker-1").await;
        let second = bus.open_session("worker-1").await;

        assert!(bus.agent_for_session(first).await.is_err());
        assert_eq!(bus.agent_for_session(second).await.unwrap(), "worker-1");
    }

    #[tokio::test]
    async fn unknown_session_rejected() {
        let (bus, _dir) = test_bus().await;
        let response = bus
            .handle_request(Uuid::new_v4(), JsonRpcRequest { jsonrpc: "2.0".into(), id: serde_json::json!(1), method: "report_status".into(), params: serde_json::json!({}) })
            .await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn report_status_updates_agent() {
        let (bus, _dir) = test_bus().await;
        let session_id = bus.open_session("worker-1").await;
        let response = bus
            .handle_request(
                session_id,
                JsonRpcRequest {
                    jsonrpc: "2.0".into(),
                    id: serde_json::json!(1),
                    method: "report_status".into(),
                    params: serde_json::json!({ "status": "working", "task_id": "t-1" }),
                },
            )
            .await;
        assert!(response.result.is_some());
        let agent = bus.store.get_agent("worker-1").await.unwrap();
        assert_eq!(agent.status, crate::models::AgentStatus::Working);
        assert_eq!(agent.current_task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn wait_for_events_returns_already_queued_event_immediately() {
        let (bus, _dir) = test_bus().await;
        let session_id = bus.open_session("worker-1").await;
        bus.event_bus
            .publish(Event::new(EventType::Task, "tester", EventTarget::Agent("worker-1".into()), EventPriority::Normal, serde_json::json!({"n": 1})))
            .await
            .unwrap();

        let response = bus
            .handle_request(session_id, JsonRpcRequest { jsonrpc: "2.0".into(), id: serde_json::json!(1), method: "wait_for_events".into(), params: serde_json::json!({}) })
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["status"], "event_received");
        assert_eq!(result["event"]["payload"]["n"], 1);
    }

    #[tokio::test]
    async fn wait_for_events_honors_event_types_filter() {
        let (bus, _dir) = test_bus().await;
        let session_id = bus.open_session("worker-1").await;
        bus.event_bus
            .publish(Event::new(EventType::Task, "tester", EventTarget::Agent("worker-1".into()), EventPriority::Normal, serde_json::json!({})))
            .await
            .unwrap();

        let response = bus
            .handle_request(
                session_id,
                JsonRpcRequest {
                    jsonrpc: "2.0".into(),
                    id: serde_json::json!(1),
                    method: "wait_for_events".into(),
                    params: serde_json::json!({ "timeout_seconds": 1, "event_types": ["alert"] }),
                },
            )
            .await;

        assert_eq!(response.result.unwrap()["status"], "timeout");
        let remaining = bus.event_bus.drain("worker-1").await;
        assert!(remaining.iter().any(|e| e.event_type == EventType::Task));
    }

    #[tokio::test]
    async fn wait_for_events_unblocks_on_later_publish() {
        let (bus, _dir) = test_bus().await;
        let session_id = bus.open_session("worker-1").await;

        let publisher = bus.event_bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher
                .publish(Event::new(EventType::Alert, "tester", EventTarget::Agent("worker-1".into()), EventPriority::High, serde_json::json!({})))
                .await
                .unwrap();
        });

        let response = bus
            .handle_request(
                session_id,
                JsonRpcRequest { jsonrpc: "2.0".into(), id: serde_json::json!(1), method: "wait_for_events".into(), params: serde_json::json!({ "timeout_seconds": 5 }) },
            )
            .await;

        assert_eq!(response.result.unwrap()["status"], "event_received");
    }

    #[tokio::test]
    async fn unknown_tool_returns_not_found_error() {
        let (bus, _dir) = test_bus().await;
        let session_id = bus.open_session("worker-1").await;
        let response = bus
            .handle_request(
                session_id,
                JsonRpcRequest { jsonrpc: "2.0".into(), id: serde_json::json!(1), method: "nonexistent_tool".into(), params: serde_json::json!({}) },
            )
            .await;
        assert!(response.error.is_some());
    }
}

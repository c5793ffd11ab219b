use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A long-running, interactive AI coding agent attached to a terminal pane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub config_name: String,
    pub role: String,
    pub model: String,
    pub color: String,
    pub project_path: String,
    pub pid: Option<u32>,
    pub pane_id: Option<String>,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub spawned_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    pub shutdown_requested: bool,
    pub shutdown_requested_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Bounded ring of recent free-text activity entries (log_activity tool).
    pub activity_log: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

/// Lifecycle states an agent moves through from spawn to reap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Connected,
    Working,
    Idle,
    Blocked,
    Stopping,
    Disconnected,
    Error,
    Dead,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Agent {
    pub fn new(id: String, config_name: String, role: String, model: String, color: String, project_path: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            config_name,
            role,
            model,
            color,
            project_path,
            pid: None,
            pane_id: None,
            status: AgentStatus::Starting,
            current_task_id: None,
            spawned_at: now,
            last_seen_at: now,
            shutdown_requested: false,
            shutdown_requested_at: None,
            activity_log: Vec::new(),
        }
    }

    pub fn push_activity(&mut self, message: String, capacity: usize) {
        self.activity_log.push(ActivityEntry {
            at: chrono::Utc::now(),
            message,
        });
        if self.activity_log.len() > capacity {
            let excess = self.activity_log.len() - capacity;
            self.activity_log.drain(0..excess);
        }
    }
}

/// A unit of work routed to an agent via the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    /// 1 (highest) through 7 (lowest).
    pub priority: u8,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub repo: Option<String>,
    pub assigned_to: Option<String>,
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    pub requirements: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Review,
    ChangesRequested,
    Approved,
    Merged,
    Blocked,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Captain,
    Dashboard,
    Cli,
    File,
}

impl Task {
    pub fn new(title: String, description: String, priority: u8, source: TaskSource) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            description,
            priority: priority.clamp(1, 7),
            status: TaskStatus::Pending,
            source,
            repo: None,
            assigned_to: None,
            branch: None,
            pr_url: None,
            requirements: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Allowed status transitions, enforced by the task engine.
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Pending, Assigned)
                | (Pending, Blocked)
                | (Assigned, InProgress)
                | (Assigned, Pending)
                | (Assigned, Blocked)
                | (InProgress, Review)
                | (InProgress, Blocked)
                | (InProgress, Assigned)
                | (Review, ChangesRequested)
                | (Review, Approved)
                | (ChangesRequested, InProgress)
                | (ChangesRequested, Blocked)
                | (Approved, Merged)
                | (Blocked, Pending)
                | (Blocked, Assigned)
                | (Blocked, InProgress)
        )
    }
}

/// A bus message routed between agents, the Captain, and the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub source: String,
    pub target: EventTarget,
    pub priority: EventPriority,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    Agent(String),
    Broadcast,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Task,
    Alert,
    Status,
    Shutdown,
    StopApproval,
}

/// Delivery priority used by the event bus's backpressure policy.
/// Ordinal value increases as priority decreases; the bus drops the
/// highest-ordinal (lowest-priority) event first when a queue is full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, target: EventTarget, priority: EventPriority, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source: source.into(),
            target,
            priority,
            payload,
            created_at: chrono::Utc::now(),
        }
    }
}

/// A blocking stop/shutdown handshake between an agent and its approver
/// (Captain or a human via the dashboard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub id: Uuid,
    pub agent_id: String,
    pub reason: String,
    pub context: Option<String>,
    pub work_completed: Option<String>,
    pub state: StopRequestState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub responded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub response_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StopRequestState {
    Pending,
    Approved,
    Denied,
    TimedOut,
}

impl StopRequest {
    pub fn new(agent_id: String, reason: String, context: Option<String>, work_completed: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            reason,
            context,
            work_completed,
            state: StopRequestState::Pending,
            created_at: chrono::Utc::now(),
            responded_at: None,
            response_message: None,
        }
    }
}

/// Presence bookkeeping entry for the stale-detection sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub agent_id: String,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    pub silent_but_alive_alerted: bool,
}

/// Pane/process ownership linkage tracked by the process supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ownership {
    pub agent_id: String,
    pub pane_id: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub message: String,
    pub source: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

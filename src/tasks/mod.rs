//! Task queue & assignment engine (C7): a priority-ordered backlog with
//! strict status transitions and the stop-approval handshake.

use crate::event_bus::SharedEventBus;
use crate::models::{Event, EventPriority, EventTarget, EventType, StopRequest, StopRequestState, Task, TaskStatus};
use crate::store::StateStore;
use crate::{FleetError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

pub struct TasksEngine {
    store: Arc<StateStore>,
    event_bus: SharedEventBus,
    stop_approval_timeout: Duration,
    stop_resolved: Arc<Notify>,
}

impl TasksEngine {
    pub fn new(store: Arc<StateStore>, event_bus: SharedEventBus, stop_approval_timeout: Duration) -> Self {
        Self {
            store,
            event_bus,
            stop_approval_timeout,
            stop_resolved: Arc::new(Notify::new()),
        }
    }

    pub async fn create_task(&self, task: Task) -> Result<Task> {
        self.store.save_task(&task).await?;
        self.store.record_history(&task.id, task.status, task.status, Some("created".to_string())).await?;
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.store.get_task(id).await?.ok_or_else(|| FleetError::NotFound(format!("task {id}")))
    }

    /// Highest-priority pending task first, FIFO among equal priorities.
    pub async fn next_pending_task(&self) -> Result<Option<Task>> {
        let mut pending = self.store.list_tasks_by_status(TaskStatus::Pending).await?;
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(pending.into_iter().next())
    }

    pub async fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        self.transition(&mut task, TaskStatus::Assigned, None).await?;
        task.assigned_to = Some(agent_id.to_string());
        self.store.save_task(&task).await?;

        let event = Event::new(
            EventType::Task,
            "task-engine",
            EventTarget::Agent(agent_id.to_string()),
            EventPriority::High,
            serde_json::to_value(&task)?,
        );
        self.event_bus.publish(event).await?;
        Ok(task)
    }

    pub async fn transition_status(&self, task_id: &str, to: TaskStatus, note: Option<String>) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        self.transition(&mut task, to, note).await?;
        self.store.save_task(&task).await?;
        Ok(task)
    }

    async fn transition(&self, task: &mut Task, to: TaskStatus, note: Option<String>) -> Result<()> {
        let from = task.status;
        if from == to {
            return Ok(());
        }
        if !Task::can_transition(from, to) {
            return Err(FleetError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        task.status = to;
        task.updated_at = chrono::Utc::now();
        match to {
            TaskStatus::InProgress if task.started_at.is_none() => task.started_at = Some(task.updated_at),
            TaskStatus::Merged => task.completed_at = Some(task.updated_at),
            _ => {}
        }
        self.store.record_history(&task.id, from, to, note).await?;
        info!(task_id = %task.id, ?from, ?to, "task status transition");
        Ok(())
    }

    // -- stop-approval protocol -----------------------------------------

    /// Opens a stop-approval request for `agent_id`, publishes it to the
    /// Captain and dashboard, and blocks (bounded by the configured
    /// timeout) until a human or the Captain resolves it.
    pub async fn request_stop_approval(
        &self,
        agent_id: &str,
        reason: String,
        context: Option<String>,
        work_completed: Option<String>,
    ) -> Result<StopRequest> {
        let request = StopRequest::new(agent_id.to_string(), reason, context, work_completed);
        self.store.add_stop_request(request.clone()).await?;

        let event = Event::new(
            EventType::StopApproval,
            agent_id,
            EventTarget::Broadcast,
            EventPriority::High,
            serde_json::to_value(&request)?,
        );
        self.event_bus.publish(event).await?;

        let request_id = request.id.to_string();
        let deadline = tokio::time::Instant::now() + self.stop_approval_timeout;
        loop {
            let current = self
                .store
                .get_stop_request(&request_id)
                .await
                .ok_or_else(|| FleetError::NotFound(format!("stop request {request_id}")))?;
            if current.state != StopRequestState::Pending {
                return Ok(current);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(agent_id, request_id, "stop approval timed out");
                return self.store.resolve_stop_request(&request_id, StopRequestState::TimedOut, None).await;
            }
            tokio::select! {
                _ = self.stop_resolved.notified() => continue,
                _ = tokio::time::sleep(remaining.min(Duration::from_secs(1))) => continue,
            }
        }
    }

    pub async fn respond_to_stop_request(&self, request_id: &str, approve: bool, message: Option<String>) -> Result<StopRequest> {
        let state = if approve { StopRequestState::Approved } else { StopRequestState::Denied };
        let resolved = self.store.resolve_stop_request(request_id, state, message).await?;
        self.stop_resolved.notify_waiters();
        Ok(resolved)
    }

    pub async fn list_pending_stop_requests(&self) -> Vec<StopRequest> {
        self.store.list_pending_stop_requests().await
    }
}

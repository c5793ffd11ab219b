//! Presence & stale-detection engine (C6): tracks per-agent last-seen-at
//! timestamps and periodically sweeps for agents that have gone quiet.

use crate::models::{Alert, AlertSeverity, AgentStatus};
use crate::monitoring::Monitor;
use crate::pane::SharedPaneController;
use crate::store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct PresenceEngine {
    store: Arc<StateStore>,
    pane_controller: SharedPaneController,
    monitor: Arc<Monitor>,
    sweep_interval: Duration,
    stale_threshold: chrono::Duration,
}

impl PresenceEngine {
    pub fn new(store: Arc<StateStore>, pane_controller: SharedPaneController, monitor: Arc<Monitor>, sweep_interval: Duration, stale_threshold_secs: u64) -> Self {
        Self {
            store,
            pane_controller,
            monitor,
            sweep_interval,
            stale_threshold: chrono::Duration::seconds(stale_threshold_secs as i64),
        }
    }

    /// Bumps an agent's last-seen-at timestamp; called on every tool call
    /// and SSE reconnect.
    pub async fn heartbeat(&self, agent_id: &str) {
        let _ = self
            .store
            .update_agent(agent_id, |a| a.last_seen_at = chrono::Utc::now())
            .await;
    }

    pub async fn mark_connected(&self, agent_id: &str) {
        let _ = self
            .store
            .update_agent(agent_id, |a| {
                a.status = AgentStatus::Connected;
                a.last_seen_at = chrono::Utc::now();
            })
            .await;
    }

    pub async fn mark_disconnected(&self, agent_id: &str) {
        let _ = self
            .store
            .update_agent(agent_id, |a| a.status = AgentStatus::Disconnected)
            .await;
    }

    /// Runs the sweeper loop forever; spawn with `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let agents = self.store.list_agents().await;
        let now = chrono::Utc::now();
        let panes = self.pane_controller.list_panes().await;
        let mut reaped = 0usize;

        for agent in agents {
            if agent.status == AgentStatus::Dead {
                continue;
            }
            if agent.shutdown_requested {
                // C4 owns the kill-deadline/reap path for an explicit stop request.
                continue;
            }
            if now - agent.last_seen_at <= self.stale_threshold {
                continue;
            }

            let pane_alive = agent
                .pane_id
                .as_ref()
                .map(|pane_id| panes.iter().any(|p| &p.pane_id == pane_id))
                .unwrap_or(false);

            if pane_alive {
                warn!(agent_id = %agent.id, "agent silent but pane still alive");
                self.store
                    .push_alert(Alert {
                        id: uuid::Uuid::new_v4(),
                        severity: AlertSeverity::Warning,
                        message: format!("agent {} has not checked in but its pane is still running", agent.id),
                        source: "presence".to_string(),
                        created_at: now,
                    })
                    .await;
            } else {
                info!(agent_id = %agent.id, "reaping stale agent, pane gone");
                let _ = self.store.update_agent(&agent.id, |a| a.status = AgentStatus::Dead).await;
                reaped += 1;
            }
        }

        self.monitor.record_presence_sweep(reaped);
    }
}

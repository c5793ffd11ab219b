//! Orchestration-health metrics: per-agent counters, queue depth, presence
//! sweep counts, and Captain crash-loop trips. Exposed read-only to the
//! dashboard snapshot and the `/api/state` endpoint.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Cumulative, per-agent counters reported via `report_metrics`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AgentCounters {
    pub tokens_reported: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// A point-in-time read of every counter this module tracks.
#[derive(Debug, Serialize)]
pub struct MonitoringSnapshot {
    pub agent_counters: HashMap<String, AgentCounters>,
    pub presence_sweeps: u64,
    pub stale_agents_reaped: u64,
    pub captain_respawns: u64,
    pub captain_crash_loop_trips: u64,
}

/// All counters are monotonic; nothing here resets except on process restart.
pub struct Monitor {
    agent_counters: RwLock<HashMap<String, AgentCounters>>,
    presence_sweeps: AtomicU64,
    stale_agents_reaped: AtomicU64,
    captain_respawns: AtomicU64,
    captain_crash_loop_trips: AtomicU64,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            agent_counters: RwLock::new(HashMap::new()),
            presence_sweeps: AtomicU64::new(0),
            stale_agents_reaped: AtomicU64::new(0),
            captain_respawns: AtomicU64::new(0),
            captain_crash_loop_trips: AtomicU64::new(0),
        }
    }

    pub async fn record_tokens(&self, agent_id: &str, tokens: u64) {
        let mut counters = self.agent_counters.write().await;
        counters.entry(agent_id.to_string()).or_default().tokens_reported += tokens;
    }

    pub async fn record_task_completed(&self, agent_id: &str) {
        let mut counters = self.agent_counters.write().await;
        counters.entry(agent_id.to_string()).or_default().tasks_completed += 1;
    }

    pub async fn record_task_failed(&self, agent_id: &str) {
        let mut counters = self.agent_counters.write().await;
        counters.entry(agent_id.to_string()).or_default().tasks_failed += 1;
    }

    /// Called once per sweep, regardless of how many agents it reaped.
    pub fn record_presence_sweep(&self, stale_reaped: usize) {
        self.presence_sweeps.fetch_add(1, Ordering::Relaxed);
        self.stale_agents_reaped.fetch_add(stale_reaped as u64, Ordering::Relaxed);
    }

    /// A clean-exit relaunch and a crash-triggered relaunch both count here.
    pub fn record_captain_respawn(&self) {
        self.captain_respawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captain_crash_loop_trip(&self) {
        self.captain_crash_loop_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> MonitoringSnapshot {
        MonitoringSnapshot {
            agent_counters: self.agent_counters.read().await.clone(),
            presence_sweeps: self.presence_sweeps.load(Ordering::Relaxed),
            stale_agents_reaped: self.stale_agents_reaped.load(Ordering::Relaxed),
            captain_respawns: self.captain_respawns.load(Ordering::Relaxed),
            captain_crash_loop_trips: self.captain_crash_loop_trips.load(Ordering::Relaxed),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

//! Captain supervisor (C8): launches and watches the single Captain
//! process, distinguishing a deliberate shutdown (exit 0) from a crash
//! (nonzero exit) and guarding against crash loops.

use crate::config::Config;
use crate::monitoring::Monitor;
use crate::pane::SharedPaneController;
use crate::spawner::Spawner;
use crate::store::StateStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

/// Fires when the Captain exits cleanly, signalling the rest of the system
/// to shut down gracefully, or when the crash-loop budget is exhausted.
pub struct CaptainSupervisor {
    config: Arc<Config>,
    store: Arc<StateStore>,
    pane_controller: SharedPaneController,
    spawner: Arc<Spawner>,
    monitor: Arc<Monitor>,
    respawn_times: Mutex<VecDeque<chrono::DateTime<chrono::Utc>>>,
    pub shutdown_requested: Arc<Notify>,
    pub halted: Arc<Notify>,
}

impl CaptainSupervisor {
    pub fn new(config: Arc<Config>, store: Arc<StateStore>, pane_controller: SharedPaneController, spawner: Arc<Spawner>, monitor: Arc<Monitor>) -> Self {
        Self {
            config,
            store,
            pane_controller,
            spawner,
            monitor,
            respawn_times: Mutex::new(VecDeque::new()),
            shutdown_requested: Arc::new(Notify::new()),
            halted: Arc::new(Notify::new()),
        }
    }

    /// Runs the launch/watch/respawn loop forever. Intended to be spawned
    /// as a background task; signals `shutdown_requested` or `halted`
    /// (terminal states) rather than returning.
    pub async fn run(self: Arc<Self>, project_path: String) {
        loop {
            let agent = match self.spawner.spawn_agent(&self.config.captain.template_name, &project_path).await {
                Ok(agent) => agent,
                Err(e) => {
                    error!("failed to spawn Captain: {e}");
                    self.halted.notify_waiters();
                    return;
                }
            };

            let pane_id = match &agent.pane_id {
                Some(id) => id.clone(),
                None => {
                    error!("Captain spawned without a pane id");
                    self.halted.notify_waiters();
                    return;
                }
            };

            info!(agent_id = %agent.id, "Captain launched");
            let exit_code = match self.pane_controller.wait(&pane_id).await {
                Ok(code) => code,
                Err(e) => {
                    warn!("failed waiting on Captain pane: {e}");
                    -1
                }
            };

            if exit_code == 0 {
                info!("Captain exited cleanly, shutting down the system");
                self.shutdown_requested.notify_waiters();
                return;
            }

            warn!(exit_code, "Captain exited unexpectedly");
            self.monitor.record_captain_respawn();

            if self.crash_loop_tripped().await {
                error!("Captain crash-loop budget exhausted, halting respawns");
                self.store
                    .push_alert(crate::models::Alert {
                        id: uuid::Uuid::new_v4(),
                        severity: crate::models::AlertSeverity::Critical,
                        message: "Captain crash-loop budget exhausted".to_string(),
                        source: "captain-supervisor".to_string(),
                        created_at: chrono::Utc::now(),
                    })
                    .await;
                self.monitor.record_captain_crash_loop_trip();
                self.halted.notify_waiters();
                return;
            }

            info!("respawning Captain");
        }
    }

    /// Returns true once respawns within the rolling crash-loop window
    /// reach the configured budget. The window resets once the gap since
    /// the last respawn exceeds the stability period.
    async fn crash_loop_tripped(&self) -> bool {
        let mut times = self.respawn_times.lock().await;
        let now = chrono::Utc::now();
        let window = chrono::Duration::seconds(self.config.captain.crash_loop_window_secs as i64);
        let stability = chrono::Duration::seconds(self.config.captain.crash_loop_stability_secs as i64);

        if let Some(last) = times.back() {
            if now - *last > stability {
                times.clear();
            }
        }

        times.push_back(now);
        while let Some(front) = times.front() {
            if now - *front > window {
                times.pop_front();
            } else {
                break;
            }
        }

        times.len() as u32 > self.config.captain.crash_loop_budget
    }
}

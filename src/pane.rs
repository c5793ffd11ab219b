//! Pane controller (C3): the narrow interface the process supervisor uses
//! to create, title, list, and kill the terminal panes agents run inside.
//!
//! The orchestration core never talks to a terminal multiplexer directly;
//! it only depends on this trait, so a different pane backend (tmux, a
//! native terminal emulator, a container runtime) can be swapped in without
//! touching the supervisor or spawner.

use crate::{FleetError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaneInfo {
    pub pane_id: String,
    pub title: String,
    pub pid: Option<u32>,
}

#[async_trait]
pub trait PaneController: Send + Sync {
    async fn create_pane(&self, title: &str, command: &str, args: &[String], cwd: &str) -> Result<PaneInfo>;
    async fn kill_pane(&self, pane_id: &str) -> Result<()>;
    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<()>;
    async fn list_panes(&self) -> Vec<PaneInfo>;
    /// Blocks until the pane's process exits and returns its exit code.
    /// Used by the Captain supervisor to decide between a graceful
    /// shutdown (exit 0) and a crash-loop-guarded respawn (nonzero).
    async fn wait(&self, pane_id: &str) -> Result<i32>;
}

struct ManagedPane {
    info: PaneInfo,
    child: Child,
}

/// Spawns each pane as a plain child process. This stands in for a real
/// terminal-multiplexer-backed pane controller; the supervisor only ever
/// sees the `PaneController` trait above.
pub struct LocalPaneController {
    panes: Mutex<HashMap<String, ManagedPane>>,
}

impl LocalPaneController {
    pub fn new() -> Self {
        Self {
            panes: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalPaneController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaneController for LocalPaneController {
    async fn create_pane(&self, title: &str, command: &str, args: &[String], cwd: &str) -> Result<PaneInfo> {
        let pane_id = uuid::Uuid::new_v4().to_string();
        let child = tokio::process::Command::new(command)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::Unavailable(format!("failed to spawn pane process: {e}")))?;

        let pid = child.id();
        let info = PaneInfo {
            pane_id: pane_id.clone(),
            title: title.to_string(),
            pid,
        };
        info!(pane_id = %pane_id, pid = ?pid, "created pane");

        self.panes.lock().await.insert(pane_id, ManagedPane { info: info.clone(), child });
        Ok(info)
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<()> {
        let mut panes = self.panes.lock().await;
        match panes.remove(pane_id) {
            Some(mut managed) => {
                if let Err(e) = managed.child.kill().await {
                    warn!(pane_id, "failed to kill pane process: {e}");
                }
                Ok(())
            }
            None => Err(FleetError::NotFound(format!("pane {pane_id}"))),
        }
    }

    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<()> {
        let mut panes = self.panes.lock().await;
        let managed = panes.get_mut(pane_id).ok_or_else(|| FleetError::NotFound(format!("pane {pane_id}")))?;
        managed.info.title = title.to_string();
        Ok(())
    }

    async fn list_panes(&self) -> Vec<PaneInfo> {
        self.panes.lock().await.values().map(|m| m.info.clone()).collect()
    }

    async fn wait(&self, pane_id: &str) -> Result<i32> {
        let mut managed = {
            let mut panes = self.panes.lock().await;
            panes.remove(pane_id).ok_or_else(|| FleetError::NotFound(format!("pane {pane_id}")))?
        };
        let status = managed
            .child
            .wait()
            .await
            .map_err(|e| FleetError::Unavailable(format!("failed waiting on pane process: {e}")))?;
        Ok(status.code().unwrap_or(-1))
    }
}

pub type SharedPaneController = Arc<dyn PaneController>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_list_and_kill_pane() {
        let controller = LocalPaneController::new();
        let info = controller
            .create_pane("test-pane", "sleep", &["5".to_string()], ".")
            .await
            .unwrap();
        assert_eq!(controller.list_panes().await.len(), 1);

        controller.set_pane_title(&info.pane_id, "renamed").await.unwrap();
        assert_eq!(controller.list_panes().await[0].title, "renamed");

        controller.kill_pane(&info.pane_id).await.unwrap();
        assert_eq!(controller.list_panes().await.len(), 0);
    }

    #[tokio::test]
    async fn kill_unknown_pane_returns_not_found() {
        let controller = LocalPaneController::new();
        let result = controller.kill_pane("nonexistent").await;
        assert!(matches!(result, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn wait_returns_exit_code() {
        let controller = LocalPaneController::new();
        let info = controller
            .create_pane("test-pane", "sh", &["-c".to_string(), "exit 3".to_string()], ".")
            .await
            .unwrap();
        let code = controller.wait(&info.pane_id).await.unwrap();
        assert_eq!(code, 3);
        assert_eq!(controller.list_panes().await.len(), 0);
    }
}

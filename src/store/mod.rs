//! Crash-safe state store (C1): in-memory state mirrored to `state.json`
//! (atomic tempfile + rename, debounced) plus a `memory.db` sqlite database
//! holding tasks, task history, and allocation counters.

use crate::models::{Agent, Alert, StopRequest, StopRequestState, Task, TaskStatus};
use crate::{FleetError, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct StateInner {
    agents: HashMap<String, Agent>,
    stop_requests: HashMap<String, StopRequest>,
    alerts: Vec<Alert>,
    agent_counters: HashMap<String, u64>,
}

/// Dashboard-visible snapshot of the orchestration state.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub agents: Vec<Agent>,
    pub stop_requests: Vec<StopRequest>,
    pub alerts: Vec<Alert>,
}

pub struct StateStore {
    inner: Arc<RwLock<StateInner>>,
    state_path: PathBuf,
    save_lock: Arc<Mutex<()>>,
    db: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let state_path = data_dir.join("state.json");

        let inner = if state_path.exists() {
            let raw = tokio::fs::read_to_string(&state_path).await?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("state.json at {:?} is corrupt ({e}), starting fresh", state_path);
                StateInner::default()
            })
        } else {
            StateInner::default()
        };

        let db_path = data_dir.join("memory.db");
        let db = Connection::open(db_path).map_err(|e| FleetError::Storage(e.to_string()))?;
        init_schema(&db)?;

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            state_path,
            save_lock: Arc::new(Mutex::new(())),
            db: Arc::new(Mutex::new(db)),
        })
    }

    // -- agents --------------------------------------------------------

    pub async fn add_agent(&self, agent: Agent) -> Result<()> {
        {
            let mut state = self.inner.write().await;
            state.agents.insert(agent.id.clone(), agent);
        }
        self.save_debounced().await;
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> Option<Agent> {
        self.inner.read().await.agents.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.inner.read().await.agents.values().cloned().collect()
    }

    pub async fn update_agent<F>(&self, id: &str, f: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let updated = {
            let mut state = self.inner.write().await;
            let agent = state
                .agents
                .get_mut(id)
                .ok_or_else(|| FleetError::NotFound(format!("agent {id}")))?;
            f(agent);
            agent.clone()
        };
        self.save_debounced().await;
        Ok(updated)
    }

    pub async fn remove_agent(&self, id: &str) -> Result<()> {
        {
            let mut state = self.inner.write().await;
            state
                .agents
                .remove(id)
                .ok_or_else(|| FleetError::NotFound(format!("agent {id}")))?;
        }
        self.save_debounced().await;
        Ok(())
    }

    pub async fn request_agent_shutdown(&self, id: &str) -> Result<Agent> {
        self.update_agent(id, |agent| {
            agent.shutdown_requested = true;
            agent.shutdown_requested_at = Some(Utc::now());
        })
        .await
    }

    /// Atomically allocates the next sequence number for a given agent
    /// config name (e.g. "worker" -> 1, 2, 3, ...), used to mint agent ids.
    pub async fn get_next_agent_number(&self, config_name: &str) -> u64 {
        let next = {
            let mut state = self.inner.write().await;
            let counter = state.agent_counters.entry(config_name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.save_debounced().await;
        next
    }

    // -- stop requests ---------------------------------------------------

    pub async fn add_stop_request(&self, request: StopRequest) -> Result<()> {
        {
            let mut state = self.inner.write().await;
            if let Some(existing) = state
                .stop_requests
                .values()
                .find(|r| r.agent_id == request.agent_id && r.state == StopRequestState::Pending)
            {
                return Err(FleetError::Conflict(format!(
                    "stop request {} already pending for agent {}",
                    existing.id, request.agent_id
                )));
            }
            state.stop_requests.insert(request.id.to_string(), request);
        }
        self.save_debounced().await;
        Ok(())
    }

    pub async fn get_stop_request(&self, id: &str) -> Option<StopRequest> {
        self.inner.read().await.stop_requests.get(id).cloned()
    }

    pub async fn resolve_stop_request(&self, id: &str, state: StopRequestState, message: Option<String>) -> Result<StopRequest> {
        let resolved = {
            let mut inner = self.inner.write().await;
            let request = inner
                .stop_requests
                .get_mut(id)
                .ok_or_else(|| FleetError::NotFound(format!("stop request {id}")))?;
            request.state = state;
            request.responded_at = Some(Utc::now());
            request.response_message = message;
            request.clone()
        };
        self.save_debounced().await;
        Ok(resolved)
    }

    pub async fn list_pending_stop_requests(&self) -> Vec<StopRequest> {
        self.inner
            .read()
            .await
            .stop_requests
            .values()
            .filter(|r| r.state == StopRequestState::Pending)
            .cloned()
            .collect()
    }

    // -- alerts ------------------------------------------------------------

    pub async fn push_alert(&self, alert: Alert) {
        {
            let mut state = self.inner.write().await;
            state.alerts.push(alert);
            let len = state.alerts.len();
            if len > 500 {
                let excess = len - 500;
                state.alerts.drain(0..excess);
            }
        }
        self.save_debounced().await;
    }

    pub async fn list_alerts(&self) -> Vec<Alert> {
        self.inner.read().await.alerts.clone()
    }

    // -- tasks (memory.db) ---------------------------------------------------

    pub async fn save_task(&self, task: &Task) -> Result<()> {
        let db = self.db.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.blocking_lock();
            conn.execute(
                "INSERT INTO tasks (id, data, status, priority, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, status = excluded.status, priority = excluded.priority",
                rusqlite::params![
                    task.id,
                    serde_json::to_string(&task).map_err(FleetError::from)?,
                    format!("{:?}", task.status),
                    task.priority,
                    task.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| FleetError::Storage(e.to_string()))?;
            Ok::<(), FleetError>(())
        })
        .await
        .map_err(|e| FleetError::Internal(e.into()))??;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT data FROM tasks WHERE id = ?1")
                .map_err(|e| FleetError::Storage(e.to_string()))?;
            let row: rusqlite::Result<String> = stmt.query_row([&id], |r| r.get(0));
            match row {
                Ok(data) => Ok(Some(serde_json::from_str::<Task>(&data)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(FleetError::Storage(e.to_string())),
            }
        })
        .await
        .map_err(|e| FleetError::Internal(e.into()))?
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.blocking_lock();
            conn.execute("DELETE FROM tasks WHERE id = ?1", [&id])
                .map_err(|e| FleetError::Storage(e.to_string()))?;
            Ok::<(), FleetError>(())
        })
        .await
        .map_err(|e| FleetError::Internal(e.into()))??;
        Ok(())
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT data FROM tasks ORDER BY priority ASC, created_at ASC")
                .map_err(|e| FleetError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(|e| FleetError::Storage(e.to_string()))?;
            let mut tasks = Vec::new();
            for row in rows {
                let data = row.map_err(|e| FleetError::Storage(e.to_string()))?;
                tasks.push(serde_json::from_str::<Task>(&data)?);
            }
            Ok(tasks)
        })
        .await
        .map_err(|e| FleetError::Internal(e.into()))?
    }

    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    pub async fn list_tasks_by_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.assigned_to.as_deref() == Some(agent_id))
            .collect())
    }

    pub async fn record_history(&self, task_id: &str, from: TaskStatus, to: TaskStatus, note: Option<String>) -> Result<()> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        let now = Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = db.blocking_lock();
            conn.execute(
                "INSERT INTO task_history (task_id, from_status, to_status, note, at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![task_id, format!("{from:?}"), format!("{to:?}"), note, now],
            )
            .map_err(|e| FleetError::Storage(e.to_string()))?;
            Ok::<(), FleetError>(())
        })
        .await
        .map_err(|e| FleetError::Internal(e.into()))??;
        Ok(())
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let state = self.inner.read().await;
        StateSnapshot {
            agents: state.agents.values().cloned().collect(),
            stop_requests: state.stop_requests.values().cloned().collect(),
            alerts: state.alerts.clone(),
        }
    }

    /// Schedules a write of `state.json`, coalescing bursts of mutations
    /// into a single write after `STATE_SAVE_DEBOUNCE_MS`. The actual write
    /// takes `save_lock`, never the state `RwLock`, so a slow disk can't
    /// block readers/writers of in-memory state.
    async fn save_debounced(&self) {
        let inner = self.inner.clone();
        let state_path = self.state_path.clone();
        let save_lock = self.save_lock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(crate::constants::STATE_SAVE_DEBOUNCE_MS)).await;
            let snapshot = inner.read().await.clone();
            let _guard = save_lock.lock().await;
            if let Err(e) = write_state_atomic(&state_path, &snapshot).await {
                warn!("failed to persist state.json: {e}");
            } else {
                debug!("persisted state.json");
            }
        });
    }
}

async fn write_state_atomic(path: &Path, state: &StateInner) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
         CREATE TABLE IF NOT EXISTS tasks (
             id TEXT PRIMARY KEY,
             data TEXT NOT NULL,
             status TEXT NOT NULL,
             priority INTEGER NOT NULL,
             created_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS task_history (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             task_id TEXT NOT NULL,
             from_status TEXT NOT NULL,
             to_status TEXT NOT NULL,
             note TEXT,
             at TEXT NOT NULL
         );",
    )
    .map_err(|e| FleetError::Storage(e.to_string()))?;

    let version: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .unwrap_or(0);
    if version < crate::constants::SCHEMA_VERSION {
        conn.execute("DELETE FROM schema_version", [])
            .map_err(|e| FleetError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [crate::constants::SCHEMA_VERSION],
        )
        .map_err(|e| FleetError::Storage(e.to_string()))?;
        info!("memory.db schema initialized at version {}", crate::constants::SCHEMA_VERSION);
    }
    Ok(())
}

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _check() {
    _assert_send_sync::<StateStore>();
}

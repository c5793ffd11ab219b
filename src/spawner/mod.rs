//! Process supervisor (C4): turns a template name + project path into a
//! running agent pane, and tears one down again on request.

use crate::config::Config;
use crate::event_bus::SharedEventBus;
use crate::models::{Agent, AgentStatus, Event, EventPriority, EventTarget, EventType};
use crate::pane::SharedPaneController;
use crate::store::StateStore;
use crate::{FleetError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Composes the argv used to launch an agent process from its template,
/// mirroring how a CLI wrapper builds up a command incrementally before
/// spawning it.
struct AgentCommandBuilder {
    command: String,
    args: Vec<String>,
}

impl AgentCommandBuilder {
    fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    #[allow(dead_code)]
    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args(mut self, args: &[String]) -> Self {
        self.args.extend(args.iter().cloned());
        self
    }

    fn build(self) -> (String, Vec<String>) {
        (self.command, self.args)
    }
}

pub struct Spawner {
    config: Arc<Config>,
    store: Arc<StateStore>,
    pane_controller: SharedPaneController,
    event_bus: SharedEventBus,
}

impl Spawner {
    pub fn new(config: Arc<Config>, store: Arc<StateStore>, pane_controller: SharedPaneController, event_bus: SharedEventBus) -> Self {
        Self {
            config,
            store,
            pane_controller,
            event_bus,
        }
    }

    fn mcp_config_path(&self, agent_id: &str) -> PathBuf {
        self.config.server.data_dir.join("mcp-configs").join(format!("{agent_id}.json"))
    }

    fn pid_path(&self, agent_id: &str) -> PathBuf {
        self.config.server.data_dir.join("pids").join(format!("{agent_id}.pid"))
    }

    /// Spawns a new agent from `template_name`, allocating its id, writing
    /// its per-agent MCP config, launching its pane, and registering it
    /// with the state store and event bus.
    pub async fn spawn_agent(&self, template_name: &str, project_path: &str) -> Result<Agent> {
        let template = self
            .config
            .templates
            .get(template_name)
            .ok_or_else(|| FleetError::NotFound(format!("agent template {template_name}")))?
            .clone();

        let number = self.store.get_next_agent_number(template_name).await;
        let agent_id = format!("{template_name}{number:03}");

        let mcp_config_path = self.mcp_config_path(&agent_id);
        if let Some(parent) = mcp_config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mcp_config = serde_json::json!({
            "agent_id": agent_id,
            "sse_endpoint": format!("/mcp/sse?agent_id={agent_id}"),
        });
        tokio::fs::write(&mcp_config_path, serde_json::to_vec_pretty(&mcp_config)?).await?;

        let (command, mut args) = AgentCommandBuilder::new(&template.command).args(&template.args).build();
        if let Some(prompt_file) = &template.system_prompt_file {
            args.push("--system-prompt-file".to_string());
            args.push(prompt_file.clone());
        }
        args.push("--mcp-config".to_string());
        args.push(mcp_config_path.to_string_lossy().to_string());

        let pane_info = self
            .pane_controller
            .create_pane(&agent_id, &command, &args, project_path)
            .await?;

        if let Some(pid) = pane_info.pid {
            let pid_path = self.pid_path(&agent_id);
            if let Some(parent) = pid_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&pid_path, pid.to_string()).await?;
        }

        let mut agent = Agent::new(
            agent_id.clone(),
            template_name.to_string(),
            template.role,
            template.model,
            template.color,
            project_path.to_string(),
        );
        agent.pane_id = Some(pane_info.pane_id);
        agent.pid = pane_info.pid;

        self.store.add_agent(agent.clone()).await?;
        self.event_bus.subscribe(&agent_id).await;

        info!(agent_id, "spawned agent");
        Ok(agent)
    }

    /// Requests a graceful shutdown: flags the agent, publishes a critical
    /// `Shutdown` event, and force-kills the pane if the agent hasn't
    /// disconnected within the configured deadline.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self.store.request_agent_shutdown(agent_id).await?;

        let shutdown_event = Event::new(
            EventType::Shutdown,
            "supervisor",
            EventTarget::Agent(agent_id.to_string()),
            EventPriority::Critical,
            serde_json::json!({ "reason": "stop requested" }),
        );
        self.event_bus.publish(shutdown_event).await?;

        self.store
            .update_agent(agent_id, |a| a.status = AgentStatus::Stopping)
            .await?;

        let deadline = Duration::from_secs(self.config.supervisor.force_kill_deadline_secs);
        let agent_id_owned = agent_id.to_string();
        let store = self.store.clone();
        let pane_controller = self.pane_controller.clone();
        let pane_id = agent.pane_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(current) = store.get_agent(&agent_id_owned).await {
                if current.status != AgentStatus::Disconnected && current.status != AgentStatus::Dead {
                    warn!(agent_id = %agent_id_owned, "stop deadline elapsed, force-killing pane");
                    if let Some(pane_id) = pane_id {
                        let _ = pane_controller.kill_pane(&pane_id).await;
                    }
                    let _ = store
                        .update_agent(&agent_id_owned, |a| a.status = AgentStatus::Dead)
                        .await;
                }
            }
        });

        Ok(())
    }

    /// Removes the per-agent files the supervisor created at spawn time.
    pub async fn cleanup_agent_files(&self, agent_id: &str) -> Result<()> {
        let mcp_config_path = self.mcp_config_path(agent_id);
        let pid_path = self.pid_path(agent_id);
        for path in [mcp_config_path, pid_path] {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

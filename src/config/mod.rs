use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub supervisor: SupervisorConfig,
    pub captain: CaptainConfig,
    pub bus: BusConfig,
    pub templates: HashMap<String, AgentTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub sweep_interval_secs: u64,
    pub stale_threshold_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub force_kill_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptainConfig {
    pub template_name: String,
    pub crash_loop_window_secs: u64,
    pub crash_loop_budget: u32,
    pub crash_loop_stability_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub event_queue_capacity: usize,
    pub activity_ring_size: usize,
    pub stop_approval_timeout_secs: u64,
}

/// Launch parameters for one named class of agent, read from the
/// agent-template YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub role: String,
    pub model: String,
    pub color: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub system_prompt_file: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {e}"),
        }

        let data_dir = PathBuf::from(env::var("FLEETBRIDGE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()));

        let server = ServerConfig {
            host: env::var("FLEETBRIDGE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("FLEETBRIDGE_PORT")
                .unwrap_or_else(|_| "4317".to_string())
                .parse()
                .map_err(|_| FleetError::Config("FLEETBRIDGE_PORT must be a valid port number".to_string()))?,
            data_dir: data_dir.clone(),
            api_key: env::var("FLEETBRIDGE_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            allowed_origins: env::var("FLEETBRIDGE_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let presence = PresenceConfig {
            sweep_interval_secs: parse_env_or("FLEETBRIDGE_SWEEP_INTERVAL_SECS", crate::constants::DEFAULT_SWEEP_INTERVAL_SECS)?,
            stale_threshold_secs: parse_env_or("FLEETBRIDGE_STALE_THRESHOLD_SECS", crate::constants::DEFAULT_STALE_THRESHOLD_SECS)?,
        };

        let supervisor = SupervisorConfig {
            force_kill_deadline_secs: parse_env_or(
                "FLEETBRIDGE_FORCE_KILL_DEADLINE_SECS",
                crate::constants::DEFAULT_FORCE_KILL_DEADLINE_SECS,
            )?,
        };

        let captain = CaptainConfig {
            template_name: env::var("FLEETBRIDGE_CAPTAIN_TEMPLATE").unwrap_or_else(|_| "captain".to_string()),
            crash_loop_window_secs: parse_env_or(
                "FLEETBRIDGE_CRASH_LOOP_WINDOW_SECS",
                crate::constants::DEFAULT_CRASH_LOOP_WINDOW_SECS,
            )?,
            crash_loop_budget: parse_env_or("FLEETBRIDGE_CRASH_LOOP_BUDGET", crate::constants::DEFAULT_CRASH_LOOP_BUDGET as u64)? as u32,
            crash_loop_stability_secs: parse_env_or(
                "FLEETBRIDGE_CRASH_LOOP_STABILITY_SECS",
                crate::constants::DEFAULT_CRASH_LOOP_STABILITY_SECS,
            )?,
        };

        let bus = BusConfig {
            event_queue_capacity: parse_env_or(
                "FLEETBRIDGE_EVENT_QUEUE_CAPACITY",
                crate::constants::DEFAULT_EVENT_QUEUE_CAPACITY as u64,
            )? as usize,
            activity_ring_size: parse_env_or(
                "FLEETBRIDGE_ACTIVITY_RING_SIZE",
                crate::constants::DEFAULT_ACTIVITY_RING_SIZE as u64,
            )? as usize,
            stop_approval_timeout_secs: parse_env_or(
                "FLEETBRIDGE_STOP_APPROVAL_TIMEOUT_SECS",
                crate::constants::DEFAULT_STOP_APPROVAL_TIMEOUT_SECS,
            )?,
        };

        let templates_path = env::var("FLEETBRIDGE_AGENT_TEMPLATES").unwrap_or_else(|_| "./config/agents.yaml".to_string());
        let templates = load_templates(&templates_path, &captain.template_name)?;

        Ok(Config {
            server,
            presence,
            supervisor,
            captain,
            bus,
            templates,
        })
    }
}

fn parse_env_or(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| FleetError::Config(format!("{key} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}

fn load_templates(path: &str, captain_template_name: &str) -> Result<HashMap<String, AgentTemplate>> {
    let mut templates = if std::path::Path::new(path).exists() {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| FleetError::Config(format!("failed to load agent templates from {path}: {e}")))?;
        settings
            .try_deserialize::<HashMap<String, AgentTemplate>>()
            .map_err(|e| FleetError::Config(format!("invalid agent template file {path}: {e}")))?
    } else {
        tracing::warn!("agent template file {path} not found, using built-in defaults");
        default_templates(captain_template_name)
    };

    if !templates.contains_key(captain_template_name) {
        templates.insert(captain_template_name.to_string(), default_captain_template());
    }

    Ok(templates)
}

fn default_templates(captain_template_name: &str) -> HashMap<String, AgentTemplate> {
    let mut map = HashMap::new();
    map.insert(captain_template_name.to_string(), default_captain_template());
    map.insert(
        "worker".to_string(),
        AgentTemplate {
            role: "worker".to_string(),
            model: "claude-sonnet-4".to_string(),
            color: "blue".to_string(),
            command: "claude".to_string(),
            args: vec![],
            system_prompt_file: None,
        },
    );
    map
}

fn default_captain_template() -> AgentTemplate {
    AgentTemplate {
        role: "captain".to_string(),
        model: "claude-opus-4".to_string(),
        color: "gold".to_string(),
        command: "claude".to_string(),
        args: vec![],
        system_prompt_file: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_include_captain() {
        let templates = default_templates("captain");
        assert!(templates.contains_key("captain"));
        assert!(templates.contains_key("worker"));
    }

    #[test]
    fn missing_template_file_falls_back_to_defaults() {
        let templates = load_templates("/nonexistent/path/agents.yaml", "captain").unwrap();
        assert!(templates.contains_key("captain"));
    }
}

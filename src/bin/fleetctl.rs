//! fleetctl: a thin reqwest-based CLI over the FleetBridge HTTP API, for
//! spawning agents, inspecting state, and submitting tasks from a shell.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(name = "fleetctl", about = "Command-line client for a running FleetBridge instance")]
struct Cli {
    #[arg(long, env = "FLEETBRIDGE_URL", default_value = "http://127.0.0.1:4317")]
    url: String,

    #[arg(long, env = "FLEETBRIDGE_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spawn a new agent from a named template
    Spawn {
        config_name: String,
        project_path: String,
    },
    /// Force-stop an agent immediately
    Stop { agent_id: String },
    /// Request a graceful stop, giving the agent a chance to wind down
    GracefulStop { agent_id: String },
    /// Print the full orchestration state as JSON
    State,
    /// Submit a new task
    SubmitTask {
        title: String,
        description: String,
        #[arg(long, default_value_t = 4)]
        priority: u8,
    },
    /// List tasks, optionally filtered by status
    ListTasks {
        #[arg(long)]
        status: Option<String>,
    },
    /// Approve or deny a pending stop request
    RespondStop {
        request_id: String,
        #[arg(long)]
        approve: bool,
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut request = match &cli.command {
        Command::Spawn { config_name, project_path } => client
            .post(format!("{}/api/agents/spawn", cli.url))
            .json(&json!({ "config_name": config_name, "project_path": project_path })),
        Command::Stop { agent_id } => client.post(format!("{}/api/agents/{agent_id}/stop", cli.url)),
        Command::GracefulStop { agent_id } => client.post(format!("{}/api/agents/{agent_id}/graceful-stop", cli.url)),
        Command::State => client.get(format!("{}/api/state", cli.url)),
        Command::SubmitTask { title, description, priority } => client
            .post(format!("{}/api/tasks", cli.url))
            .json(&json!({ "title": title, "description": description, "priority": priority })),
        Command::ListTasks { status } => {
            let mut req = client.get(format!("{}/api/tasks", cli.url));
            if let Some(status) = status {
                req = req.query(&[("status", status)]);
            }
            req
        }
        Command::RespondStop { request_id, approve, message } => client
            .post(format!("{}/api/stop-requests/{request_id}/respond", cli.url))
            .json(&json!({ "approved": approve, "message": message })),
    };

    if let Some(api_key) = &cli.api_key {
        request = request.header("x-api-key", api_key);
    }

    let response = request.send().await.context("request to FleetBridge failed")?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        bail!("FleetBridge returned {status}: {body}");
    }
    if !body.is_empty() {
        println!("{body}");
    }
    Ok(())
}

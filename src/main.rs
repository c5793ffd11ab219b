use anyhow::Result;
use fleetbridge::api::{ApiServer, AppState};
use fleetbridge::bus::Bus;
use fleetbridge::captain::CaptainSupervisor;
use fleetbridge::config::Config;
use fleetbridge::dashboard::DashboardBroadcast;
use fleetbridge::event_bus::{EventBus, SharedEventBus};
use fleetbridge::monitoring::Monitor;
use fleetbridge::pane::{LocalPaneController, SharedPaneController};
use fleetbridge::presence::PresenceEngine;
use fleetbridge::security::ensure_api_key_exists;
use fleetbridge::spawner::Spawner;
use fleetbridge::store::StateStore;
use fleetbridge::tasks::TasksEngine;
use fleetbridge::validation::TaskContentValidator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    info!("starting FleetBridge");

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    config.server.api_key = Some(ensure_api_key_exists(config.server.api_key.as_deref())?);

    let config = Arc::new(config);
    let project_path = std::env::current_dir()?.to_string_lossy().to_string();

    let store = Arc::new(StateStore::new(&config.server.data_dir).await?);
    let event_bus: SharedEventBus = Arc::new(EventBus::new(config.bus.event_queue_capacity));
    let pane_controller: SharedPaneController = Arc::new(LocalPaneController::new());
    let monitor = Arc::new(Monitor::new());

    let tasks = Arc::new(TasksEngine::new(
        store.clone(),
        event_bus.clone(),
        Duration::from_secs(config.bus.stop_approval_timeout_secs),
    ));
    let spawner = Arc::new(Spawner::new(config.clone(), store.clone(), pane_controller.clone(), event_bus.clone()));
    let presence = Arc::new(PresenceEngine::new(
        store.clone(),
        pane_controller.clone(),
        monitor.clone(),
        Duration::from_secs(config.presence.sweep_interval_secs),
        config.presence.stale_threshold_secs,
    ));
    let dashboard = Arc::new(DashboardBroadcast::new(256));
    let bus = Arc::new(Bus::new(
        store.clone(),
        event_bus.clone(),
        tasks.clone(),
        presence.clone(),
        monitor.clone(),
        config.bus.activity_ring_size,
    ));
    let captain = Arc::new(CaptainSupervisor::new(
        config.clone(),
        store.clone(),
        pane_controller.clone(),
        spawner.clone(),
        monitor.clone(),
    ));
    let validator = Arc::new(TaskContentValidator::new()?);

    tokio::spawn(presence.clone().run());

    let shutdown_requested = captain.shutdown_requested.clone();
    let halted = captain.halted.clone();
    let captain_handle = tokio::spawn(captain.clone().run(project_path));

    let state = AppState {
        config: config.clone(),
        store,
        event_bus,
        tasks,
        spawner,
        pane_controller,
        monitor,
        dashboard,
        bus,
        captain,
        validator,
    };
    let api_server = ApiServer::new(state);

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                error!("API server failed: {e}");
                std::process::exit(2);
            }
        }
        _ = shutdown_requested.notified() => {
            info!("Captain exited cleanly, shutting down");
        }
        _ = halted.notified() => {
            error!("Captain supervisor halted (crash-loop budget exhausted)");
            captain_handle.abort();
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    captain_handle.abort();
    Ok(())
}

//! # FleetBridge
//!
//! FleetBridge is the orchestration substrate a captain process and a fleet
//! of worker agents speak to: a crash-safe state store, a bounded per-agent
//! event bus, a pane/process supervisor, a task queue with a stop-approval
//! handshake, presence tracking, and a dashboard broadcast, all fronted by
//! an MCP-style JSON-RPC-over-SSE coordination bus and a REST API.
//!
//! ## Architecture
//!
//! - **State store**: in-memory state mirrored to `state.json`, tasks and
//!   their history in a `memory.db` sqlite database
//! - **Event bus**: bounded per-agent queues with priority-aware backpressure
//! - **Pane controller / spawner**: launches and tears down agent processes
//! - **Coordination bus**: the JSON-RPC-over-SSE wire protocol agents speak
//! - **Presence engine**: heartbeats and a stale-agent sweeper
//! - **Task queue**: priority-ordered backlog with strict status transitions
//! - **Captain supervisor**: launches and watches the Captain, with
//!   crash-loop protection
//! - **Dashboard broadcast**: best-effort websocket fan-out of state changes

/// HTTP API server and endpoints
pub mod api;
/// Authentication and authorization
pub mod auth;
/// Coordination bus: JSON-RPC-over-SSE wire protocol
pub mod bus;
/// Captain process supervision and crash-loop protection
pub mod captain;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Dashboard websocket broadcast
pub mod dashboard;
/// Bounded per-agent event bus
pub mod event_bus;
/// Core data models
pub mod models;
/// System monitoring and metrics
pub mod monitoring;
/// Terminal pane / process control
pub mod pane;
/// Presence tracking and stale-agent detection
pub mod presence;
/// Rate limiting functionality
pub mod rate_limit;
/// Security utilities and API key management
pub mod security;
/// Process supervisor: spawns and tears down agent processes
pub mod spawner;
/// Crash-safe state store
pub mod store;
/// Task queue and assignment engine
pub mod tasks;
/// Input validation and sanitization
pub mod validation;

mod error;

pub use error::{FleetError, Result};

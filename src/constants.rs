//! System-wide configuration defaults.

/// Presence sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// Silence after which an agent is marked stale.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 120;

/// Grace period between a stop request and a forced pane kill.
pub const DEFAULT_FORCE_KILL_DEADLINE_SECS: u64 = 60;
/// Bound on how long a stop-approval handshake blocks before timing out.
pub const DEFAULT_STOP_APPROVAL_TIMEOUT_SECS: u64 = 600;

/// Rolling window for the Captain crash-loop guard.
pub const DEFAULT_CRASH_LOOP_WINDOW_SECS: u64 = 60;
/// Respawns allowed inside the crash-loop window before halting.
pub const DEFAULT_CRASH_LOOP_BUDGET: u32 = 3;
/// Stability period after which the crash-loop counter resets.
pub const DEFAULT_CRASH_LOOP_STABILITY_SECS: u64 = 300;

/// Per-agent bounded event queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100;
/// Per-agent bounded activity ring size (log_activity tool).
pub const DEFAULT_ACTIVITY_RING_SIZE: usize = 50;

/// SSE keep-alive ping cadence.
pub const SSE_PING_INTERVAL_SECS: u64 = 30;

/// `wait_for_events` default/min/max long-poll timeout.
pub const DEFAULT_WAIT_FOR_EVENTS_TIMEOUT_SECS: u64 = 30;
pub const MIN_WAIT_FOR_EVENTS_TIMEOUT_SECS: u64 = 1;
pub const MAX_WAIT_FOR_EVENTS_TIMEOUT_SECS: u64 = 300;

/// Debounce window between state mutations and a state.json write.
pub const STATE_SAVE_DEBOUNCE_MS: u64 = 500;

/// Lowest (least urgent) task priority value; 1 is highest.
pub const MIN_TASK_PRIORITY: u8 = 1;
pub const MAX_TASK_PRIORITY: u8 = 7;

/// Max free-text length accepted for task/event content fields.
pub const MAX_CONTENT_LENGTH: usize = 10_000;
pub const MAX_CONTEXT_KEY_LENGTH: usize = 100;
pub const MAX_CONTEXT_VALUE_LENGTH: usize = 1_000;

/// Current memory.db schema version; bump when adding migrations.
pub const SCHEMA_VERSION: i64 = 1;

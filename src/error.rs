use thiserror::Error;

/// Convenience type alias for Results with FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for FleetBridge
///
/// Carries tagged error kinds for the orchestration substrate. Callers match
/// on the kind to decide whether to surface, retry, or map to a wire-level
/// code (JSON-RPC or HTTP).
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("queue full")]
    QueueFull { critical: bool },

    #[error("session invalid")]
    SessionInvalid,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FleetError {
    /// JSON-RPC 2.0 error code for this kind (-32700..-32000 range).
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            FleetError::Serialization(_) => -32700,
            FleetError::NotFound(_) => -32601,
            FleetError::Validation(_) | FleetError::InvalidTransition { .. } => -32602,
            FleetError::SessionInvalid => -32000,
            FleetError::Conflict(_) => -32000,
            FleetError::QueueFull { .. } => -32000,
            FleetError::Timeout { .. } => -32000,
            FleetError::Unavailable(_) => -32000,
            _ => -32603,
        }
    }
}

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request {id} ({method}) timed out after {}ms", .timeout.as_millis())]
    Timeout {
        id: u64,
        method: String,
        timeout: Duration,
    },

    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer answered with an error response.
    #[error("{message}")]
    Remote {
        code: String,
        message: String,
        details: Value,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("executable not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// Timeouts and transport failures say nothing about whether the request
    /// itself was acceptable, so retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Timeout { .. } | RpcError::Transport(_))
    }

    pub fn code(&self) -> &str {
        match self {
            RpcError::Timeout { .. } => "TIMEOUT",
            RpcError::Transport(_) | RpcError::Io(_) | RpcError::NotFound(_) => "TRANSPORT_FAILURE",
            RpcError::Remote { code, .. } => code,
            RpcError::Encode(_) => "INTERNAL_ERROR",
        }
    }

    pub fn details(&self) -> Value {
        match self {
            RpcError::Timeout { id, method, timeout } => json!({
                "reason": "timeout",
                "id": id,
                "method": method,
                "timeout_ms": timeout.as_millis() as u64,
            }),
            RpcError::Transport(_) | RpcError::Io(_) | RpcError::NotFound(_) => {
                json!({ "reason": "transport_failure" })
            }
            RpcError::Remote { details, .. } => details.clone(),
            RpcError::Encode(_) => json!({ "reason": "internal" }),
        }
    }
}

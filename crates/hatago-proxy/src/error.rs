//! Proxy error kind: registry, routing, and admission-control failures.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("upstream {0} is not registered")]
    UnknownUpstream(String),

    #[error("tool {0} is not exposed by any registered upstream")]
    UnknownTool(String),

    #[error(
        "tool name conflict: '{name}' is exposed by both {first} and {second}, and conflict resolution is 'error'"
    )]
    NameConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("upstream backend error: {0}")]
    Backend(#[from] hatago_client::BackendError),

    #[error("runner error: {0}")]
    Runner(#[from] hatago_runner::RunnerError),

    #[error("circuit open for {upstream}, retry after {retry_after_secs}s")]
    CircuitOpen { upstream: String, retry_after_secs: u64 },

    #[error("admission queue full for {0}")]
    QueueFull(String),

    #[error("queued request to {0} timed out waiting for a slot")]
    QueueTimeout(String),
}

impl ProxyError {
    pub fn rpc_code(&self) -> i64 {
        use hatago_core::error::rpc_code;
        match self {
            Self::UnknownTool(_) => rpc_code::METHOD_NOT_FOUND,
            _ => rpc_code::SERVER_ERROR,
        }
    }

    /// Seconds the caller should wait before retrying, for the errors that
    /// carry one. `None` means "not applicable" rather than "unknown" —
    /// `QueueFull`/`QueueTimeout` are momentary, not a sustained backoff.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::CircuitOpen { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

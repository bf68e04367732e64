//! Backend error kinds: Transport / Upstream / Timeout.

use hatago_core::jsonrpc::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Transport,
    Upstream,
    Timeout,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Connection/broken-pipe style failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream itself returned a JSON-RPC error; preserved verbatim.
    #[error("upstream error {}: {}", .0.code, .0.message)]
    Upstream(JsonRpcError),

    /// The call or connection attempt exceeded its configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Transport(_) => BackendErrorKind::Transport,
            Self::Upstream(_) => BackendErrorKind::Upstream,
            Self::Timeout(_) => BackendErrorKind::Timeout,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(std::time::Duration::from_secs(0))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

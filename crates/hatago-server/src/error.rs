//! Server-level error kind: failures that can occur while dispatching a
//! decoded MCP method, folding in whatever the proxy or a local tool
//! handler reported.

use thiserror::Error;

use hatago_core::error::rpc_code;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("proxy error: {0}")]
    Proxy(#[from] hatago_proxy::ProxyError),

    #[error("session error: {0}")]
    Session(#[from] hatago_core::error::SessionError),

    #[error("local tool handler failed: {0}")]
    ToolExecution(String),

    #[error("plugin '{plugin}' failed to register: {source}")]
    PluginRegistration {
        plugin: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("route for method '{0}' is already registered")]
    DuplicateRoute(String),
}

impl ServerError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) | Self::ToolNotFound(_) => rpc_code::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => rpc_code::INVALID_PARAMS,
            Self::Proxy(e) => e.rpc_code(),
            Self::Session(e) => e.rpc_code(),
            Self::ToolExecution(_) | Self::PluginRegistration { .. } | Self::DuplicateRoute(_) => {
                rpc_code::INTERNAL_ERROR
            }
        }
    }

    /// Forwarded from [`hatago_proxy::ProxyError`] when present; see its
    /// `retry_after_secs` for what this means.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Proxy(e) => e.retry_after_secs(),
            _ => None,
        }
    }
}

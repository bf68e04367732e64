//! Upstream MCP client.
//!
//! Two transport variants — HTTP/SSE and subprocess (stdio) — share one
//! narrow capability set behind the [`Backend`] trait. No inheritance
//! hierarchy: a tagged choice of concrete types, each implementing the
//! same four operations.

pub mod error;
pub mod http;
pub mod stdio;

pub use error::{BackendError, BackendErrorKind};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use hatago_core::jsonrpc::JsonRpcError;

/// A tool as reported by `tools/list`, before namespacing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteTool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Server identity returned from `initialize`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

/// Outcome of a `tools/call`: either the tool's content result, or an
/// upstream-reported JSON-RPC error, preserved verbatim.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(Value),
    Error(JsonRpcError),
}

/// Call-scoped metadata forwarded to the backend: the caller's progress
/// token, if any.
#[derive(Debug, Clone, Default)]
pub struct CallMeta {
    pub progress_token: Option<Value>,
}

/// A sink the backend publishes `notifications/progress` events to as
/// they arrive, before the final result. By construction this closure is
/// bound to the originating client request's transport stream — the
/// backend never holds a session or stream reference itself.
pub type NotificationSink = Box<dyn Fn(Value) + Send + Sync>;

/// Uniform contract every upstream variant implements.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn initialize(&self) -> Result<ServerInfo, BackendError>;

    async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<HashMap<String, Value>>,
        meta: CallMeta,
        notifications: NotificationSink,
    ) -> Result<CallOutcome, BackendError>;

    async fn close(&self) -> Result<(), BackendError>;
}

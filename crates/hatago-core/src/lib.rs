//! Core data model for the Hatago MCP gateway.
//!
//! This crate owns the pieces every other `hatago-*` crate shares: the
//! JSON-RPC 2.0 codec (`jsonrpc`), the session store (`session`), the
//! upstream/tool-catalog data model (`upstream`), the resolved configuration
//! types (`config`), and the logging/metrics sinks (`telemetry`, `metrics`).
//!
//! Nothing in this crate talks to a socket or a child process — it is the
//! vocabulary the transport, client, runner, proxy, and server crates build
//! on.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod metrics;
pub mod progress;
pub mod session;
pub mod telemetry;
pub mod upstream;

pub use error::{CodecError, SessionError};
pub use jsonrpc::{Frame, JsonRpcError, Message, RequestId};
pub use progress::ProgressToken;
pub use session::{Session, SessionId, SessionStore};

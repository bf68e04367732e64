//! Error types owned by the core crate.
//!
//! Each `hatago-*` crate defines its own `thiserror` enum for its layer and
//! converts into the next layer's with `#[from]`, mirroring the
//! protocol -> transport -> proxy chain the gateway is built from. This
//! module holds the two error kinds that belong to the core itself: the
//! JSON-RPC codec and the session store.

use thiserror::Error;

/// JSON-RPC 2.0 standard error codes, reused wherever a `hatago-*` crate
/// needs to render a `CodecError`/`SessionError`/etc. as a wire error.
pub mod rpc_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
    pub const SESSION_NOT_FOUND: i64 = -32001;
}

/// Errors raised while decoding or encoding JSON-RPC frames.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    /// The payload was not valid JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The payload was valid JSON but not a well-formed JSON-RPC message
    /// (missing `jsonrpc: "2.0"`, wrong shape, etc.).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An `initialize` batch must contain exactly one message.
    #[error("initialize request must be sent alone, got a batch of {0}")]
    InitializeNotAlone(usize),
}

impl CodecError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Parse(_) => rpc_code::PARSE_ERROR,
            Self::InvalidRequest(_) | Self::InitializeNotAlone(_) => rpc_code::INVALID_REQUEST,
        }
    }
}

/// Errors raised by the session store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// No live session exists for the given id (never created, expired, or
    /// deleted).
    #[error("session not found")]
    NotFound,

    /// `create` was called while the store was at capacity and no session
    /// was old enough to evict; the caller should retry.
    #[error("session store at capacity, no eviction candidate available")]
    AtCapacity,

    /// `rotate` was asked to move a session onto an id that already exists.
    #[error("rotation target id already in use")]
    RotationCollision,
}

impl SessionError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::NotFound => rpc_code::SESSION_NOT_FOUND,
            Self::AtCapacity | Self::RotationCollision => rpc_code::SERVER_ERROR,
        }
    }
}

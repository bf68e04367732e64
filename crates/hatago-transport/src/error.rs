//! Transport-level error kind: everything the `/mcp` endpoint contract can
//! reject a request for, each carrying both a JSON-RPC code and the HTTP
//! status it maps to.

use axum::http::StatusCode;
use thiserror::Error;

use hatago_core::error::rpc_code;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("codec error: {0}")]
    Codec(#[from] hatago_core::error::CodecError),

    #[error("session error: {0}")]
    Session(#[from] hatago_core::error::SessionError),

    #[error("Accept header must include application/json and text/event-stream")]
    UnacceptableAccept,

    #[error("Content-Type must be application/json")]
    UnsupportedContentType,

    #[error("an initialize request must be sent alone in its batch")]
    InitializeNotAlone,

    #[error("mcp-session-id header is required for this request")]
    MissingSessionHeader,

    #[error("a standalone server-push stream is already open for this session")]
    DuplicateStandaloneStream,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("request timed out")]
    Timeout,

    #[error("gateway is draining and not admitting new requests")]
    Draining,
}

impl TransportError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Codec(e) => e.rpc_code(),
            Self::Session(e) => e.rpc_code(),
            Self::UnacceptableAccept
            | Self::UnsupportedContentType
            | Self::InitializeNotAlone
            | Self::MissingSessionHeader => rpc_code::INVALID_REQUEST,
            Self::DuplicateStandaloneStream => rpc_code::SERVER_ERROR,
            Self::MethodNotAllowed => rpc_code::INVALID_REQUEST,
            Self::Timeout => rpc_code::SERVER_ERROR,
            Self::Draining => rpc_code::SERVER_ERROR,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Codec(hatago_core::error::CodecError::Parse(_)) => StatusCode::BAD_REQUEST,
            Self::Codec(_) | Self::InitializeNotAlone => StatusCode::BAD_REQUEST,
            Self::Session(_) | Self::MissingSessionHeader => StatusCode::NOT_FOUND,
            Self::UnacceptableAccept => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::DuplicateStandaloneStream => StatusCode::CONFLICT,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

//! JSON-RPC 2.0 codec.
//!
//! Decodes a raw byte slice into one message or an ordered batch, and
//! classifies each message as a request, response, error, or notification
//! by inspecting the presence of `id` and `method`. Encoding renders a
//! message back to canonical JSON without reordering array results.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::CodecError;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request id: either a string or a number, never both, never
/// absent on a request or a non-parse-error response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// JSON-RPC error object, as embedded in an `Error` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A single parsed-and-classified JSON-RPC message.
///
/// `serde`-transparent: a `Request` and a `Response`/`Error` for the same
/// `id` are structurally distinguishable only by which of `method`/
/// `result`/`error` is present, so classification happens in [`decode`]
/// rather than through a tagged enum.
#[derive(Debug, Clone)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: RequestId,
        error: JsonRpcError,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response { id, result }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self::Error { id, error }
    }

    /// The request id this message carries, if any (requests, responses,
    /// and errors carry one; notifications do not).
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::Error { id, .. } => {
                Some(id)
            }
            Self::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } | Self::Error { .. } => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// The `params._meta.progressToken` of a request, if set.
    pub fn progress_token(&self) -> Option<Value> {
        let params = match self {
            Self::Request { params, .. } | Self::Notification { params, .. } => {
                params.as_ref()?
            }
            _ => return None,
        };
        params.get("_meta")?.get("progressToken").cloned()
    }
}

/// Wire representation of a single message, used only inside `encode`/
/// `decode` so the public `Message` enum can stay free of serde noise.
#[derive(Debug, Deserialize, Serialize)]
struct WireMessage {
    jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RawId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// `id` as it appears on the wire: present-and-non-null, or absent/null.
#[derive(Debug, Clone)]
struct RawId(RequestId);

impl Serialize for RawId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for RawId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        RequestId::deserialize(d).map(RawId)
    }
}

fn classify(wire: WireMessage) -> Result<Message, CodecError> {
    if wire.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
        return Err(CodecError::InvalidRequest(
            "missing or invalid jsonrpc version".to_string(),
        ));
    }

    match (wire.id, wire.method, wire.result, wire.error) {
        (Some(id), Some(method), None, None) => Ok(Message::Request {
            id: id.0,
            method,
            params: wire.params,
        }),
        (None, Some(method), None, None) => Ok(Message::Notification {
            method,
            params: wire.params,
        }),
        (Some(id), None, Some(result), None) => Ok(Message::Response { id: id.0, result }),
        (Some(id), None, None, Some(error)) => Ok(Message::Error { id: id.0, error }),
        _ => Err(CodecError::InvalidRequest(
            "message is neither a request, response, error, nor notification".to_string(),
        )),
    }
}

/// One message, or an ordered batch of them.
#[derive(Debug, Clone)]
pub enum Frame {
    Single(Message),
    Batch(Vec<Message>),
}

impl Frame {
    /// Flatten into an owned vector, preserving order.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Single(m) => vec![m],
            Self::Batch(ms) => ms,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(ms) => ms.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a raw HTTP body into a [`Frame`].
///
/// Rejects malformed JSON with [`CodecError::Parse`] (`-32700`) and
/// structurally-invalid messages with [`CodecError::InvalidRequest`]
/// (`-32600`).
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Array(items) => {
            let mut messages = Vec::with_capacity(items.len());
            for item in items {
                let wire: WireMessage = serde_json::from_value(item)?;
                messages.push(classify(wire)?);
            }
            Ok(Frame::Batch(messages))
        }
        other => {
            let wire: WireMessage = serde_json::from_value(other)?;
            Ok(Frame::Single(classify(wire)?))
        }
    }
}

/// Render a single [`Message`] back to canonical JSON. Field order within
/// an object is not guaranteed to match the original; array contents
/// (e.g. a tool result's content list) are never reordered because they are
/// carried as opaque `Value`s end to end.
pub fn encode(message: &Message) -> Value {
    let wire = match message {
        Message::Request { id, method, params } => WireMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(RawId(id.clone())),
            method: Some(method.clone()),
            params: params.clone(),
            result: None,
            error: None,
        },
        Message::Response { id, result } => WireMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(RawId(id.clone())),
            method: None,
            params: None,
            result: Some(result.clone()),
            error: None,
        },
        Message::Error { id, error } => WireMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(RawId(id.clone())),
            method: None,
            params: None,
            result: None,
            error: Some(error.clone()),
        },
        Message::Notification { method, params } => WireMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: None,
            method: Some(method.clone()),
            params: params.clone(),
            result: None,
            error: None,
        },
    };
    serde_json::to_value(wire).expect("WireMessage always serializes")
}

pub fn encode_bytes(message: &Message) -> Vec<u8> {
    serde_json::to_vec(&encode(message)).expect("WireMessage always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_single_request() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
        let frame = decode(body).unwrap();
        let Frame::Single(Message::Request { id, method, .. }) = frame else {
            panic!("expected a single request");
        };
        assert_eq!(id, RequestId::Number(1));
        assert_eq!(method, "tools/list");
    }

    #[test]
    fn decodes_batch_preserving_order() {
        let body = br#"[
            {"jsonrpc":"2.0","id":1,"method":"a"},
            {"jsonrpc":"2.0","method":"notify"},
            {"jsonrpc":"2.0","id":2,"method":"b"}
        ]"#;
        let Frame::Batch(messages) = decode(body).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].method(), Some("a"));
        assert!(!messages[1].is_request());
        assert_eq!(messages[2].method(), Some("b"));
    }

    #[test]
    fn rejects_missing_jsonrpc_version() {
        let body = br#"{"id":1,"method":"x"}"#;
        let err = decode(body).unwrap_err();
        assert_eq!(err.rpc_code(), crate::error::rpc_code::INVALID_REQUEST);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.rpc_code(), crate::error::rpc_code::PARSE_ERROR);
    }

    #[test]
    fn round_trips_response_with_array_result() {
        let msg = Message::response(
            RequestId::String("req-1".into()),
            json!({"tools": [{"name": "z"}, {"name": "a"}]}),
        );
        let encoded = encode(&msg);
        let decoded = decode(&serde_json::to_vec(&encoded).unwrap()).unwrap();
        let Frame::Single(Message::Response { result, .. }) = decoded else {
            panic!("expected a response");
        };
        // Array order must survive the round trip untouched.
        assert_eq!(
            result["tools"],
            json!([{"name": "z"}, {"name": "a"}])
        );
    }

    #[test]
    fn extracts_progress_token() {
        let msg = Message::request(
            RequestId::Number(7),
            "tools/call",
            Some(json!({"name": "x", "_meta": {"progressToken": "t1"}})),
        );
        assert_eq!(msg.progress_token(), Some(json!("t1")));
    }

    proptest::proptest! {
        #[test]
        fn decode_encode_round_trip_for_requests(
            id in proptest::num::i64::ANY,
            method in "[a-z/]{1,20}",
        ) {
            let msg = Message::request(RequestId::Number(id), method.clone(), None);
            let bytes = encode_bytes(&msg);
            let Frame::Single(Message::Request { id: id2, method: method2, .. }) = decode(&bytes).unwrap() else {
                panic!("expected a request");
            };
            proptest::prop_assert_eq!(id2, RequestId::Number(id));
            proptest::prop_assert_eq!(method2, method);
        }
    }
}

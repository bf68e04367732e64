//! HTTP/SSE upstream client variant.
//!
//! Performs an `initialize` POST up front; for `callTool`, POSTs the
//! request and, when the response is `text/event-stream`, reads SSE
//! events until the final JSON-RPC response for this call arrives,
//! publishing every intermediate `notifications/progress` to the caller's
//! sink as it goes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use hatago_core::jsonrpc::{JsonRpcError, RequestId};
use hatago_core::upstream::AuthConfig;

use crate::error::BackendError;
use crate::{Backend, CallMeta, CallOutcome, NotificationSink, RemoteTool, ServerInfo};

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub url: String,
    pub auth: Option<AuthConfig>,
    pub timeout: Duration,
}

pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        if let Some(auth) = &config.auth {
            apply_auth(&mut headers, auth)?;
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(BackendError::from)?;

        Ok(Self { client, config })
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, BackendError> {
        self.client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(BackendError::from)
    }
}

fn apply_auth(headers: &mut HeaderMap, auth: &AuthConfig) -> Result<(), BackendError> {
    match auth {
        AuthConfig::Bearer { token } => {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        AuthConfig::Basic { username, password } => {
            use base64::Engine;
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            let value = HeaderValue::from_str(&format!("Basic {encoded}"))
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        AuthConfig::Custom { headers: custom } => {
            for (k, v) in custom {
                let name = header::HeaderName::from_bytes(k.as_bytes())
                    .map_err(|e| BackendError::Transport(e.to_string()))?;
                let value =
                    HeaderValue::from_str(v).map_err(|e| BackendError::Transport(e.to_string()))?;
                headers.insert(name, value);
            }
        }
    }
    Ok(())
}

/// One `event:`/`data:` SSE frame.
struct SseFrame {
    event: String,
    data: Value,
}

/// Parse the next complete SSE frame out of a growing text buffer,
/// returning the frame plus how many leading bytes of `buffer` it consumed
/// (including the blank-line terminator) so the caller can drain them.
fn next_sse_frame(buffer: &str) -> Option<(SseFrame, usize)> {
    let split_at = buffer.find("\n\n")?;
    let frame_text = &buffer[..split_at];
    let consumed = split_at + 2;

    let mut event = "message".to_string();
    let mut data = String::new();
    for line in frame_text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim());
        }
    }
    let value: Value = serde_json::from_str(&data).unwrap_or(Value::Null);
    Some((SseFrame { event, data: value }, consumed))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn initialize(&self) -> Result<ServerInfo, BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {"protocolVersion": "2025-06-18"},
        });
        let response = self.post(body).await?;
        let value: Value = response.json().await.map_err(BackendError::from)?;
        let result = value
            .get("result")
            .ok_or_else(|| BackendError::Transport("initialize response had no result".into()))?;
        Ok(ServerInfo {
            name: result
                .pointer("/serverInfo/name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            version: result
                .pointer("/serverInfo/version")
                .and_then(Value::as_str)
                .unwrap_or("0.0.0")
                .to_string(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or("2025-06-18")
                .to_string(),
        })
    }

    async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        let response = self.post(body).await?;
        let value: Value = response.json().await.map_err(BackendError::from)?;
        let tools = value
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .into_iter()
            .filter_map(|t| {
                Some(RemoteTool {
                    name: t.get("name")?.as_str()?.to_string(),
                    title: t.get("title").and_then(Value::as_str).map(str::to_string),
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: t.get("inputSchema").cloned().unwrap_or(json!({})),
                })
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<HashMap<String, Value>>,
        meta: CallMeta,
        notifications: NotificationSink,
    ) -> Result<CallOutcome, BackendError> {
        let mut params = json!({"name": name, "arguments": arguments});
        if let Some(token) = meta.progress_token {
            params["_meta"] = json!({"progressToken": token});
        }
        let req_id = RequestId::String(uuid::Uuid::new_v4().to_string());
        let body = json!({
            "jsonrpc": "2.0",
            "id": req_id,
            "method": "tools/call",
            "params": params,
        });

        let response = self.post(body).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            self.drain_sse(response, &req_id, notifications).await
        } else {
            let value: Value = response.json().await.map_err(BackendError::from)?;
            Self::outcome_from_value(value)
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl HttpBackend {
    fn outcome_from_value(value: Value) -> Result<CallOutcome, BackendError> {
        if let Some(error) = value.get("error") {
            let error: JsonRpcError =
                serde_json::from_value(error.clone()).map_err(|e| BackendError::Transport(e.to_string()))?;
            return Ok(CallOutcome::Error(error));
        }
        let result = value
            .get("result")
            .cloned()
            .ok_or_else(|| BackendError::Transport("tools/call response had no result".into()))?;
        Ok(CallOutcome::Result(result))
    }

    async fn drain_sse(
        &self,
        response: reqwest::Response,
        req_id: &RequestId,
        notifications: NotificationSink,
    ) -> Result<CallOutcome, BackendError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(BackendError::from)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            loop {
                let Some((frame, consumed)) = next_sse_frame(&buffer) else {
                    break;
                };
                buffer.drain(..consumed);

                match frame.event.as_str() {
                    "ping" => trace!("sse keep-alive"),
                    "message" => {
                        if frame.data.get("method").and_then(Value::as_str)
                            == Some("notifications/progress")
                        {
                            notifications(frame.data);
                            continue;
                        }
                        let same_id = frame
                            .data
                            .get("id")
                            .map(|id| id == &serde_json::to_value(req_id).unwrap())
                            .unwrap_or(false);
                        if same_id {
                            return Self::outcome_from_value(frame.data);
                        }
                        debug!("ignoring sse message for unrelated request id");
                    }
                    "error" => {
                        warn!(data = ?frame.data, "upstream sent sse error event");
                    }
                    other => trace!(event = other, "unhandled sse event type"),
                }
            }
        }

        Err(BackendError::Transport(
            "sse stream closed before a final response arrived".into(),
        ))
    }
}

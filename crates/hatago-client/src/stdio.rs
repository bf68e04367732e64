//! Subprocess (stdio) upstream client variant.
//!
//! Speaks MCP over a child process' already-connected stdin/stdout — the
//! runner (`hatago-runner`) owns spawning, sandboxing, and killing the
//! child; this backend only ever sees its standard streams. Requests are
//! written as newline-delimited JSON (per the MCP stdio transport: "MUST
//! NOT contain embedded newlines") and responses/notifications are
//! demultiplexed out of a single background reader task by request id,
//! with progress notifications further demultiplexed by their
//! `progressToken`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};

use hatago_core::jsonrpc::JsonRpcError;

use crate::error::BackendError;
use crate::{Backend, CallMeta, CallOutcome, NotificationSink, RemoteTool, ServerInfo};

type PendingMap = Arc<DashMap<String, oneshot::Sender<Value>>>;
type ProgressMap = Arc<DashMap<String, NotificationSink>>;

/// A stdio backend bound to one child process' streams. Construction spawns
/// the background demultiplexer task; dropping the last clone does not stop
/// it — call [`StdioBackend::close`] (or let the runner kill the child,
/// which closes the pipes and ends the reader loop).
pub struct StdioBackend {
    writer: tokio::sync::Mutex<Box<dyn AsyncWriteLine>>,
    pending: PendingMap,
    progress: ProgressMap,
    timeout: Duration,
    reader_task: tokio::task::JoinHandle<()>,
}

/// Object-safe wrapper so `StdioBackend` doesn't need to be generic over
/// the writer's concrete type (a `ChildStdin` in production, an in-memory
/// pipe in tests).
#[async_trait]
trait AsyncWriteLine: Send {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

struct FramedLineWriter<W: AsyncWrite + Unpin + Send>(FramedWrite<W, LinesCodec>);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriteLine for FramedLineWriter<W> {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.0
            .send(line.to_string())
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }
}

impl StdioBackend {
    pub fn new<R, W>(stdout: R, stdin: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(DashMap::new());
        let progress: ProgressMap = Arc::new(DashMap::new());

        let reader_pending = pending.clone();
        let reader_progress = progress.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(error = %e, "stdio backend read error, ending demux loop");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "stdio backend received malformed json line");
                        continue;
                    }
                };
                dispatch_incoming(value, &reader_pending, &reader_progress);
            }
            debug!("stdio backend demux loop ended");
        });

        Self {
            writer: tokio::sync::Mutex::new(Box::new(FramedLineWriter(FramedWrite::new(
                stdin,
                LinesCodec::new(),
            )))),
            pending,
            progress,
            timeout,
            reader_task,
        }
    }

    async fn request(&self, id: &str, body: Value) -> Result<Value, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), tx);

        let line = serde_json::to_string(&body).expect("jsonrpc body always serializes");
        {
            let mut writer = self.writer.lock().await;
            writer.write_line(&line).await.map_err(BackendError::from)?;
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BackendError::Transport(
                "stdio backend demux loop dropped the response channel".into(),
            )),
            Err(_) => {
                self.pending.remove(id);
                Err(BackendError::Timeout(self.timeout))
            }
        }
    }
}

fn dispatch_incoming(value: Value, pending: &PendingMap, progress: &ProgressMap) {
    if value.get("method").and_then(Value::as_str) == Some("notifications/progress") {
        if let Some(token) = value.pointer("/params/progressToken") {
            let key = token.to_string();
            if let Some(sink) = progress.get(&key) {
                sink(value.clone());
            }
        }
        return;
    }

    let Some(id) = value.get("id").map(|v| v.to_string().trim_matches('"').to_string()) else {
        trace!("ignoring stdio message with no correlatable id");
        return;
    };
    if let Some((_, tx)) = pending.remove(&id) {
        let _ = tx.send(value);
    }
}

#[async_trait]
impl Backend for StdioBackend {
    async fn initialize(&self) -> Result<ServerInfo, BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "init",
            "method": "initialize",
            "params": {"protocolVersion": "2025-06-18"},
        });
        let value = self.request("init", body).await?;
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
        let body = json!({"jsonrpc": "2.0", "id": "list-tools", "method": "tools/list"});
        let value = self.request("list-tools", body).await?;
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
        let id = uuid::Uuid::new_v4().to_string();
        let mut params = json!({"name": name, "arguments": arguments});

        let progress_key = meta.progress_token.map(|token| {
            params["_meta"] = json!({"progressToken": token});
            token_key(&params["_meta"]["progressToken"])
        });
        if let Some(key) = &progress_key {
            self.progress.insert(key.clone(), notifications);
        }

        let body = json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": params});
        let result = self.request(&id, body).await;

        if let Some(key) = &progress_key {
            self.progress.remove(key);
        }

        let value = result?;
        if let Some(error) = value.get("error") {
            let error: JsonRpcError = serde_json::from_value(error.clone())
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            return Ok(CallOutcome::Error(error));
        }
        let result = value
            .get("result")
            .cloned()
            .ok_or_else(|| BackendError::Transport("tools/call response had no result".into()))?;
        Ok(CallOutcome::Result(result))
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.reader_task.abort();
        Ok(())
    }
}

fn token_key(token: &Value) -> String {
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    /// A fake upstream: reads one line, echoes back a canned response for
    /// `tools/list`, and forwards one progress notification before the
    /// final result on `tools/call`.
    fn spawn_fake_upstream(
        mut upstream_in: tokio::io::DuplexStream,
        mut upstream_out: tokio::io::DuplexStream,
    ) {
        tokio::spawn(async move {
            let mut reader = FramedRead::new(&mut upstream_in, LinesCodec::new());
            while let Some(Ok(line)) = reader.next().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["id"].clone();
                let method = req["method"].as_str().unwrap_or_default();
                match method {
                    "tools/list" => {
                        let resp = json!({
                            "jsonrpc": "2.0", "id": id,
                            "result": {"tools": [{"name": "echo", "inputSchema": {}}]}
                        });
                        let mut out = format!("{}\n", resp);
                        upstream_out.write_all(out.as_bytes()).await.unwrap();
                        out.clear();
                    }
                    "tools/call" => {
                        if let Some(token) = req.pointer("/params/_meta/progressToken") {
                            let note = json!({
                                "jsonrpc": "2.0", "method": "notifications/progress",
                                "params": {"progressToken": token, "progress": 1}
                            });
                            upstream_out
                                .write_all(format!("{}\n", note).as_bytes())
                                .await
                                .unwrap();
                        }
                        let resp = json!({
                            "jsonrpc": "2.0", "id": id,
                            "result": {"content": [{"type": "text", "text": "done"}]}
                        });
                        upstream_out
                            .write_all(format!("{}\n", resp).as_bytes())
                            .await
                            .unwrap();
                    }
                    _ => {}
                }
            }
        });
    }

    #[tokio::test]
    async fn lists_tools_over_stdio() {
        let (client_read, upstream_write) = tokio::io::duplex(4096);
        let (upstream_read, client_write) = tokio::io::duplex(4096);
        spawn_fake_upstream(upstream_read, upstream_write);

        let backend = StdioBackend::new(client_read, client_write, Duration::from_secs(2));
        let tools = backend.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn forwards_progress_before_final_result() {
        let (client_read, upstream_write) = tokio::io::duplex(4096);
        let (upstream_read, client_write) = tokio::io::duplex(4096);
        spawn_fake_upstream(upstream_read, upstream_write);

        let backend = StdioBackend::new(client_read, client_write, Duration::from_secs(2));
        let events = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let sink: NotificationSink = Box::new(move |note| {
            events_clone.try_lock().unwrap().push(note);
        });

        let meta = CallMeta {
            progress_token: Some(json!("tok-1")),
        };
        let outcome = backend
            .call_tool("echo", None, meta, sink)
            .await
            .unwrap();

        assert!(!events.lock().await.is_empty());
        match outcome {
            CallOutcome::Result(value) => {
                assert_eq!(value["content"][0]["text"], "done");
            }
            CallOutcome::Error(e) => panic!("unexpected error: {e:?}"),
        }
    }
}


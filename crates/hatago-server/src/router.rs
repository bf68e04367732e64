//! MCP method dispatch: local-first, then union with the proxy's
//! catalog, via a plain match-on-method dispatch narrowed to the methods
//! this gateway actually serves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::trace;

use async_trait::async_trait;

use hatago_client::{CallMeta, CallOutcome};
use hatago_core::jsonrpc::{JsonRpcError, Message};
use hatago_core::session::SessionId;
use hatago_proxy::{CapabilityRouter, Limiter, LimiterConfig};
use hatago_transport::NotificationSink;

use crate::error::ServerError;
use crate::registry::{CallExtra, LocalTool, LocalToolRegistry, ToolHandler};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// The union of locally registered tools and whatever the proxy has
/// aggregated from upstreams, as returned by `tools/list`.
pub struct ToolRouter {
    local: RwLock<LocalToolRegistry>,
    proxy: Arc<CapabilityRouter>,
    server_name: String,
    server_version: String,
    /// Gateway-wide admission gate: every `tools/call` passes through this
    /// before the proxy's per-upstream one. Distinct from any individual
    /// upstream's circuit breaker — this one protects the gateway itself
    /// from being overrun regardless of which upstream a call targets.
    admission: Limiter,
}

impl ToolRouter {
    pub fn new(proxy: Arc<CapabilityRouter>, server_name: String, server_version: String) -> Self {
        Self {
            local: RwLock::new(LocalToolRegistry::new()),
            proxy,
            server_name,
            server_version,
            admission: Limiter::new("gateway", LimiterConfig::default()),
        }
    }

    /// Register a locally implemented tool. Called only from plugin
    /// registration, before the gateway starts serving requests.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ServerError> {
        let name = name.into();
        self.local
            .write()
            .register(LocalTool {
                name: name.clone(),
                title,
                description,
                input_schema,
                handler,
            })
            .map_err(ServerError::DuplicateRoute)
    }

    /// Dispatch one decoded message to the right handler. Returns `None`
    /// for notifications, or for requests whose method this router
    /// doesn't recognize and which also aren't `tools/call`/`tools/list`/
    /// etc — callers map that absence of a response only for notifications;
    /// an unrecognized *request* still gets a `Method not found` response.
    pub async fn dispatch(&self, message: Message, notify: NotificationSink) -> Option<Message> {
        let Message::Request { id, method, params } = message else {
            return None;
        };

        let result = match method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(self.handle_list_tools()),
            "tools/call" => self.handle_call_tool(params, notify).await,
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "resources/list" => Ok(json!({ "resources": [] })),
            "ping" => Ok(json!({})),
            other => Err(ServerError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => Message::response(id, value),
            Err(e) => {
                let data = e
                    .retry_after_secs()
                    .map(|secs| json!({ "retryAfterSeconds": secs }));
                Message::error(
                    id,
                    JsonRpcError {
                        code: e.rpc_code(),
                        message: e.to_string(),
                        data,
                    },
                )
            }
        })
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
            "capabilities": { "tools": {} },
        })
    }

    fn handle_list_tools(&self) -> Value {
        let local = self.local.read();
        let mut tools: Vec<Value> = local
            .list()
            .map(|t| {
                json!({
                    "name": t.name,
                    "title": t.title,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();

        for entry in self.proxy.list_all_tools() {
            tools.push(json!({
                "name": entry.exposed_name,
                "title": entry.title,
                "description": entry.description,
                "inputSchema": entry.input_schema,
            }));
        }

        json!({ "tools": tools })
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
        notify: NotificationSink,
    ) -> Result<Value, ServerError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::InvalidParams("missing 'name'".to_string()))?
            .to_string();
        let arguments = params.get("arguments").cloned();
        let progress_token = params
            .get("_meta")
            .and_then(|m| m.get("progressToken"))
            .cloned();

        // Step 1: local registry. Bypasses gateway admission control —
        // locally implemented tools don't cross an upstream boundary.
        let local_handler = self.local.read().get(&name).map(|t| t.handler.clone());
        if let Some(handler) = local_handler {
            trace!(tool = name, "dispatching to local handler");
            let extra = CallExtra {
                progress_token,
                notify,
            };
            return handler
                .call(arguments, extra)
                .await
                .map(|content| json!({ "content": content }))
                .map_err(ServerError::ToolExecution);
        }

        // Step 2: admit, then route. Gateway-wide gate ahead of the
        // per-upstream one the proxy applies internally.
        let permit = self.admission.acquire(0).await.map_err(ServerError::Proxy)?;

        // Step 3: ask the router; -32601 if nobody claims the name.
        let args_map: Option<HashMap<String, Value>> = arguments.and_then(|v| match v {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        });
        let meta = CallMeta { progress_token };
        let result = self.proxy.call(&name, args_map, meta, notify).await;

        match result {
            Ok(outcome) => {
                permit.release(true);
                match outcome {
                    CallOutcome::Result(value) => Ok(json!({ "content": value })),
                    CallOutcome::Error(e) => Err(ServerError::ToolExecution(e.message)),
                }
            }
            Err(hatago_proxy::ProxyError::UnknownTool(_)) => {
                permit.release(true);
                Err(ServerError::ToolNotFound(name.clone()))
            }
            Err(other) => {
                permit.release(false);
                Err(ServerError::Proxy(other))
            }
        }
    }
}

/// Bridges the transport to dispatch: the transport knows only that
/// something can answer a [`Message`], not that it's backed by a local
/// registry plus a proxy union.
#[async_trait]
impl hatago_transport::RequestHandler for ToolRouter {
    async fn handle(
        &self,
        _session_id: SessionId,
        message: Message,
        notify: NotificationSink,
    ) -> Option<Message> {
        self.dispatch(message, notify).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hatago_core::config::NamespaceConfig;
    use hatago_core::jsonrpc::RequestId;
    use hatago_core::upstream::{ConflictResolution, NamespaceStrategy};
    use hatago_proxy::UpstreamRegistry;
    use pretty_assertions::assert_eq;

    fn empty_router() -> ToolRouter {
        let registry = Arc::new(UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        ));
        ToolRouter::new(Arc::new(CapabilityRouter::new(registry)), "hatago".into(), "0.1.0".into())
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let router = empty_router();
        let response = router
            .dispatch(
                Message::request(RequestId::Number(1), "initialize", None),
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        match response {
            Message::Response { result, .. } => {
                assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let router = empty_router();
        let response = router
            .dispatch(
                Message::request(RequestId::Number(2), "nope/whatever", None),
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        match response {
            Message::Error { error, .. } => assert_eq!(error.code, -32601),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_tool_is_dispatched_before_the_proxy() {
        let router = empty_router();
        router
            .register_tool(
                "hello_hatago",
                None,
                None,
                json!({}),
                Arc::new(|_args: Option<Value>, _extra: CallExtra| async move {
                    Ok(json!([{ "type": "text", "text": "Hello Hatago" }]))
                }),
            )
            .unwrap();

        let response = router
            .dispatch(
                Message::request(
                    RequestId::Number(3),
                    "tools/call",
                    Some(json!({ "name": "hello_hatago" })),
                ),
                Box::new(|_| {}),
            )
            .await
            .unwrap();

        match response {
            Message::Response { result, .. } => {
                assert_eq!(result["content"][0]["text"], "Hello Hatago");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_call_is_method_not_found() {
        let router = empty_router();
        let response = router
            .dispatch(
                Message::request(
                    RequestId::Number(4),
                    "tools/call",
                    Some(json!({ "name": "nothing" })),
                ),
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        match response {
            Message::Error { error, .. } => assert_eq!(error.code, -32601),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    struct FlakyBackend;

    #[async_trait::async_trait]
    impl hatago_client::Backend for FlakyBackend {
        async fn initialize(&self) -> Result<hatago_client::ServerInfo, hatago_client::BackendError> {
            Ok(hatago_client::ServerInfo {
                name: "flaky".into(),
                version: "0.0.0".into(),
                protocol_version: "2025-06-18".into(),
            })
        }

        async fn list_tools(&self) -> Result<Vec<hatago_client::RemoteTool>, hatago_client::BackendError> {
            Ok(vec![hatago_client::RemoteTool {
                name: "op".into(),
                title: None,
                description: None,
                input_schema: json!({}),
            }])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<HashMap<String, Value>>,
            _meta: CallMeta,
            _notifications: NotificationSink,
        ) -> Result<CallOutcome, hatago_client::BackendError> {
            Err(hatago_client::BackendError::Transport("down".into()))
        }

        async fn close(&self) -> Result<(), hatago_client::BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn circuit_open_error_carries_a_retry_after_hint() {
        let registry = Arc::new(UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        ));
        registry
            .register(
                hatago_core::upstream::UpstreamId("svc".into()),
                Arc::new(FlakyBackend),
                hatago_core::upstream::ToolFilter::default(),
            )
            .await
            .unwrap();
        let router = ToolRouter::new(Arc::new(CapabilityRouter::new(registry)), "hatago".into(), "0.1.0".into());

        for i in 0..10 {
            router
                .dispatch(
                    Message::request(
                        RequestId::Number(i),
                        "tools/call",
                        Some(json!({ "name": "svc:op" })),
                    ),
                    Box::new(|_| {}),
                )
                .await
                .unwrap();
        }

        let response = router
            .dispatch(
                Message::request(
                    RequestId::Number(100),
                    "tools/call",
                    Some(json!({ "name": "svc:op" })),
                ),
                Box::new(|_| {}),
            )
            .await
            .unwrap();

        match response {
            Message::Error { error, .. } => {
                assert!(error.data.unwrap()["retryAfterSeconds"].as_u64().unwrap() > 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

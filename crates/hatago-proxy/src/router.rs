//! Capability router: resolves an exposed tool name to its owning
//! upstream and forwards the call, the way a single-backend router looks
//! up its one backend — generalized here to a union of many.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use hatago_client::{CallMeta, CallOutcome, NotificationSink};
use hatago_core::upstream::ToolCatalogEntry;

use crate::error::ProxyError;
use crate::registry::UpstreamRegistry;

pub struct CapabilityRouter {
    registry: Arc<UpstreamRegistry>,
}

impl CapabilityRouter {
    pub fn new(registry: Arc<UpstreamRegistry>) -> Self {
        Self { registry }
    }

    /// The unioned, namespaced tool catalog.
    pub fn list_all_tools(&self) -> Vec<ToolCatalogEntry> {
        self.registry.catalog().entries().to_vec()
    }

    /// Resolve `exposed_name` to its owning upstream, rewrite to the
    /// original tool name, and forward the call. Progress notifications
    /// are passed through to `notifications` verbatim — it is, by
    /// construction, bound to the originating client request's transport
    /// stream.
    pub async fn call(
        &self,
        exposed_name: &str,
        arguments: Option<HashMap<String, Value>>,
        meta: CallMeta,
        notifications: NotificationSink,
    ) -> Result<CallOutcome, ProxyError> {
        let catalog = self.registry.catalog();
        let entry = catalog
            .find(exposed_name)
            .ok_or_else(|| ProxyError::UnknownTool(exposed_name.to_string()))?;

        let owner = entry.owner.clone();
        let original_name = entry.original_name.clone();
        drop(catalog);

        let handle = self
            .registry
            .get(&owner)
            .await
            .ok_or_else(|| ProxyError::UnknownUpstream(owner.0.clone()))?;

        trace!(exposed_name, original_name, owner = %owner, "routing tool call");
        let permit = handle.limiter.acquire(0).await?;
        let result = handle
            .backend
            .call_tool(&original_name, arguments, meta, notifications)
            .await;
        match result {
            Ok(outcome) => {
                // A response from the upstream, success or application-level
                // error, means the backend itself is healthy.
                permit.release(true);
                Ok(outcome)
            }
            Err(e) => {
                permit.release(false);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hatago_client::{Backend, BackendError, RemoteTool, ServerInfo};
    use hatago_core::config::NamespaceConfig;
    use hatago_core::upstream::{ConflictResolution, NamespaceStrategy, ToolFilter, UpstreamId};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct EchoBackend;

    #[async_trait]
    impl Backend for EchoBackend {
        async fn initialize(&self) -> Result<ServerInfo, BackendError> {
            Ok(ServerInfo {
                name: "echo".into(),
                version: "0.0.0".into(),
                protocol_version: "2025-06-18".into(),
            })
        }

        async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
            Ok(vec![RemoteTool {
                name: "echo".into(),
                title: None,
                description: None,
                input_schema: json!({}),
            }])
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Option<HashMap<String, Value>>,
            _meta: CallMeta,
            _notifications: NotificationSink,
        ) -> Result<CallOutcome, BackendError> {
            Ok(CallOutcome::Result(json!({"called": name})))
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn call_rewrites_exposed_name_to_original() {
        let registry = Arc::new(crate::registry::UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        ));
        registry
            .register(
                UpstreamId("svc".into()),
                Arc::new(EchoBackend),
                ToolFilter::default(),
            )
            .await
            .unwrap();

        let router = CapabilityRouter::new(registry);
        let outcome = router
            .call("svc:echo", None, CallMeta::default(), Box::new(|_| {}))
            .await
            .unwrap();

        match outcome {
            CallOutcome::Result(value) => assert_eq!(value["called"], "echo"),
            CallOutcome::Error(e) => panic!("unexpected error: {e:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let registry = Arc::new(crate::registry::UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        ));
        let router = CapabilityRouter::new(registry);
        let err = router
            .call("nope:nothing", None, CallMeta::default(), Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UnknownTool(_)));
    }

    struct FlakyBackend;

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn initialize(&self) -> Result<ServerInfo, BackendError> {
            Ok(ServerInfo {
                name: "flaky".into(),
                version: "0.0.0".into(),
                protocol_version: "2025-06-18".into(),
            })
        }

        async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
            Ok(vec![RemoteTool {
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
        ) -> Result<CallOutcome, BackendError> {
            Err(BackendError::Transport("connection reset".into()))
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_backend_failures_trip_the_upstream_circuit() {
        let registry = Arc::new(crate::registry::UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        ));
        registry
            .register(
                UpstreamId("svc".into()),
                Arc::new(FlakyBackend),
                ToolFilter::default(),
            )
            .await
            .unwrap();

        let router = CapabilityRouter::new(registry);
        for _ in 0..10 {
            let err = router
                .call("svc:op", None, CallMeta::default(), Box::new(|_| {}))
                .await
                .unwrap_err();
            assert!(matches!(err, ProxyError::Backend(_)));
        }

        let err = router
            .call("svc:op", None, CallMeta::default(), Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::CircuitOpen { .. }));
    }
}

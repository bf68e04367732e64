//! Upstream registry: owns one client per configured upstream,
//! drives startup introspection, and republishes the catalog whenever an
//! upstream's tool list changes (initial load or post-restart recovery).
//!
//! Publishes the catalog as an `arc_swap::ArcSwap` snapshot — readers
//! (`tools/list`, `tools/call` dispatch) never take a lock.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use hatago_client::Backend;
use hatago_core::config::NamespaceConfig;
use hatago_core::upstream::{
    ConflictResolution, NamespaceStrategy, ToolFilter, UpstreamId, UpstreamLifecycle,
    UpstreamState,
};

use crate::catalog::{build_catalog, ToolCatalog};
use crate::error::ProxyError;
use crate::limiter::{Limiter, LimiterConfig};

/// One registered upstream: its live client, its tool filter, its
/// observable lifecycle state (shared with the runner for subprocess
/// upstreams, owned directly here for HTTP ones), and the admission gate
/// every `call_tool` against it must pass through.
pub struct UpstreamHandle {
    pub id: UpstreamId,
    pub backend: Arc<dyn Backend>,
    pub tool_filter: ToolFilter,
    pub state: Arc<parking_lot::Mutex<UpstreamState>>,
    pub limiter: Limiter,
}

pub struct UpstreamRegistry {
    upstreams: RwLock<HashMap<UpstreamId, Arc<UpstreamHandle>>>,
    order: RwLock<Vec<UpstreamId>>,
    catalog: ArcSwap<ToolCatalog>,
    namespace_strategy: NamespaceStrategy,
    namespace: NamespaceConfig,
    conflict_resolution: ConflictResolution,
}

impl UpstreamRegistry {
    pub fn new(
        namespace_strategy: NamespaceStrategy,
        namespace: NamespaceConfig,
        conflict_resolution: ConflictResolution,
    ) -> Self {
        Self {
            upstreams: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            catalog: ArcSwap::from_pointee(ToolCatalog::default()),
            namespace_strategy,
            namespace,
            conflict_resolution,
        }
    }

    /// Register one upstream: `initialize`, `listTools`, and add it to the
    /// registry. A single upstream's startup failure must not abort the
    /// gateway — the caller logs and continues, and this
    /// upstream's tools stay absent from the catalog until `recover` is
    /// called successfully.
    pub async fn register(
        &self,
        id: UpstreamId,
        backend: Arc<dyn Backend>,
        tool_filter: ToolFilter,
    ) -> Result<(), ProxyError> {
        let state = Arc::new(parking_lot::Mutex::new(UpstreamState {
            lifecycle: UpstreamLifecycle::Starting,
            ..UpstreamState::default()
        }));

        let handle = Arc::new(UpstreamHandle {
            id: id.clone(),
            backend,
            tool_filter,
            state,
            limiter: Limiter::new(id.0.clone(), LimiterConfig::default()),
        });

        match handle.backend.initialize().await {
            Ok(server_info) => {
                info!(upstream = %id, server = %server_info.name, "upstream initialized");
            }
            Err(e) => {
                warn!(upstream = %id, error = %e, "upstream failed to initialize, continuing without it");
                handle.state.lock().lifecycle = UpstreamLifecycle::Failed;
                handle.state.lock().last_error = Some(e.to_string());
                self.upstreams.write().await.insert(id.clone(), handle);
                self.order.write().await.push(id);
                return Ok(());
            }
        }

        {
            let mut state = handle.state.lock();
            state.lifecycle = UpstreamLifecycle::Running;
            state.start_time = Some(chrono::Utc::now());
        }

        self.upstreams.write().await.insert(id.clone(), handle);
        self.order.write().await.push(id);
        self.refresh_catalog().await?;
        Ok(())
    }

    /// Re-run `listTools` for every running upstream and republish the
    /// catalog. Called after registration and after any upstream recovers
    /// from a restart.
    pub async fn refresh_catalog(&self) -> Result<(), ProxyError> {
        let upstreams = self.upstreams.read().await;
        let order = self.order.read().await;

        let mut per_upstream = Vec::new();
        for id in order.iter() {
            let Some(handle) = upstreams.get(id) else {
                continue;
            };
            if handle.state.lock().lifecycle != UpstreamLifecycle::Running {
                continue;
            }
            match handle.backend.list_tools().await {
                Ok(tools) => per_upstream.push((id.clone(), tools, handle.tool_filter.clone())),
                Err(e) => {
                    warn!(upstream = %id, error = %e, "listTools failed during catalog refresh");
                }
            }
        }

        let catalog = build_catalog(
            &per_upstream,
            self.namespace_strategy,
            &self.namespace,
            self.conflict_resolution,
        )?;
        self.catalog.store(Arc::new(catalog));
        Ok(())
    }

    /// Lock-free read of the current catalog snapshot.
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        self.catalog.load_full()
    }

    pub async fn get(&self, id: &UpstreamId) -> Option<Arc<UpstreamHandle>> {
        self.upstreams.read().await.get(id).cloned()
    }

    pub async fn mark_recovered(&self, id: &UpstreamId) -> Result<(), ProxyError> {
        let upstreams = self.upstreams.read().await;
        let handle = upstreams
            .get(id)
            .ok_or_else(|| ProxyError::UnknownUpstream(id.0.clone()))?;
        handle.state.lock().lifecycle = UpstreamLifecycle::Running;
        drop(upstreams);
        self.refresh_catalog().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hatago_client::{BackendError, CallMeta, CallOutcome, NotificationSink, RemoteTool, ServerInfo};
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubBackend {
        fail_initialize: AtomicBool,
        tool_name: &'static str,
    }

    #[async_trait]
    impl Backend for StubBackend {
        async fn initialize(&self) -> Result<ServerInfo, BackendError> {
            if self.fail_initialize.load(Ordering::SeqCst) {
                Err(BackendError::Transport("boom".into()))
            } else {
                Ok(ServerInfo {
                    name: "stub".into(),
                    version: "0.0.0".into(),
                    protocol_version: "2025-06-18".into(),
                })
            }
        }

        async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
            Ok(vec![RemoteTool {
                name: self.tool_name.to_string(),
                title: None,
                description: None,
                input_schema: json!({}),
            }])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<StdHashMap<String, serde_json::Value>>,
            _meta: CallMeta,
            _notifications: NotificationSink,
        ) -> Result<CallOutcome, BackendError> {
            Ok(CallOutcome::Result(json!({"ok": true})))
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_upstream_does_not_block_registration() {
        let registry = UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        );
        let backend = Arc::new(StubBackend {
            fail_initialize: AtomicBool::new(true),
            tool_name: "read",
        });

        registry
            .register(UpstreamId("flaky".into()), backend, ToolFilter::default())
            .await
            .unwrap();

        assert!(registry.catalog().entries().is_empty());
        let handle = registry.get(&UpstreamId("flaky".into())).await.unwrap();
        assert_eq!(handle.state.lock().lifecycle, UpstreamLifecycle::Failed);
    }

    #[tokio::test]
    async fn healthy_upstream_populates_catalog() {
        let registry = UpstreamRegistry::new(
            NamespaceStrategy::Prefix,
            NamespaceConfig::default(),
            ConflictResolution::Error,
        );
        let backend = Arc::new(StubBackend {
            fail_initialize: AtomicBool::new(false),
            tool_name: "read",
        });

        registry
            .register(UpstreamId("fs".into()), backend, ToolFilter::default())
            .await
            .unwrap();

        let catalog = registry.catalog();
        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(catalog.entries()[0].exposed_name, "fs:read");
    }
}

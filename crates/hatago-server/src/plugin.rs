//! Plugin host: a sequential loading loop that hands each plugin a
//! concrete capability struct rather than a duck-typed grab-bag, so a
//! plugin that needs an operation not on the list simply cannot express
//! it. The capability set: register tool, register HTTP route,
//! plugin-scoped session accessor, logger handle.

use std::sync::Arc;

use axum::Router;
use serde_json::Value;
use tracing::{info, Span};

use hatago_core::error::SessionError;
use hatago_core::session::{SessionId, SessionStore};

use crate::error::ServerError;
use crate::registry::ToolHandler;
use crate::router::ToolRouter;

/// Capabilities a plugin may exercise during registration. Constructed
/// fresh per plugin so `extra_routes` can be drained into the final
/// router after every plugin has run.
pub struct PluginContext {
    tools: Arc<ToolRouter>,
    sessions: Arc<SessionStore>,
    plugin_id: String,
    extra_routes: Vec<Router>,
}

impl PluginContext {
    fn new(tools: Arc<ToolRouter>, sessions: Arc<SessionStore>, plugin_id: &str) -> Self {
        Self {
            tools,
            sessions,
            plugin_id: plugin_id.to_string(),
            extra_routes: Vec::new(),
        }
    }

    pub fn register_tool(
        &self,
        name: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ServerError> {
        self.tools
            .register_tool(name, title, description, input_schema, handler)
    }

    /// Add a route outside `/mcp`, e.g.
    /// `/.well-known/oauth-protected-resource`.
    pub fn register_route(&mut self, router: Router) {
        self.extra_routes.push(router);
    }

    /// A namespaced key/value accessor for this plugin's slice of the
    /// given session.
    pub fn session_store(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut hatago_core::session::PluginStore) -> Value,
    ) -> Result<Value, SessionError> {
        self.sessions
            .with_plugin_store(session_id, &self.plugin_id, f)
    }

    /// Request that the current session be rotated onto a new id, e.g.
    /// after an authentication-elevating event.
    pub fn rotate_session(
        &self,
        old: SessionId,
        new: SessionId,
    ) -> Result<(), SessionError> {
        self.sessions.rotate(old, new)
    }

    pub fn logger(&self) -> Span {
        tracing::info_span!("plugin", id = %self.plugin_id)
    }
}

/// A plugin is a pure registration function: it may only register tools,
/// routes, and middleware, never perform I/O of its own.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn register(&self, ctx: &mut PluginContext) -> Result<(), ServerError>;
}

/// Loads every plugin sequentially, failing startup on the first error a
/// plugin returns. Returns the routers plugins asked to mount alongside
/// `/mcp`.
pub async fn load_plugins(
    plugins: &[Arc<dyn Plugin>],
    tools: Arc<ToolRouter>,
    sessions: Arc<SessionStore>,
) -> Result<Vec<Router>, ServerError> {
    let mut routes = Vec::new();
    for plugin in plugins {
        info!(plugin = plugin.name(), "loading plugin");
        let mut ctx = PluginContext::new(Arc::clone(&tools), Arc::clone(&sessions), plugin.name());
        plugin
            .register(&mut ctx)
            .await
            .map_err(|e| ServerError::PluginRegistration {
                plugin: plugin.name().to_string(),
                source: Box::new(e),
            })?;
        routes.append(&mut ctx.extra_routes);
    }
    Ok(routes)
}

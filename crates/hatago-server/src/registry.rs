//! Local tool registry: the "handlers take `(args, extra)`" half
//! of the tool surface, populated by plugins at startup. Narrowed to the
//! one capability this gateway actually needs — tool dispatch — rather
//! than a full prompts/resources/roots surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use hatago_transport::NotificationSink;

/// Per-call context handed to a local tool alongside its arguments.
pub struct CallExtra {
    pub progress_token: Option<Value>,
    pub notify: NotificationSink,
}

/// A locally registered tool. Plugins implement this to add capabilities
/// the gateway exposes itself, distinct from anything proxied to an
/// upstream.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Option<Value>, extra: CallExtra) -> Result<Value, String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Option<Value>, CallExtra) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, String>> + Send,
{
    async fn call(&self, arguments: Option<Value>, extra: CallExtra) -> Result<Value, String> {
        (self)(arguments, extra).await
    }
}

#[derive(Clone)]
pub struct LocalTool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

/// Tools registered by plugins, looked up before falling back to the
/// proxy router.
#[derive(Clone, Default)]
pub struct LocalToolRegistry {
    tools: HashMap<String, LocalTool>,
}

impl LocalToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Err` if a tool with this name is already registered —
    /// plugins are loaded sequentially at startup, so a collision is a
    /// configuration mistake, not a race.
    pub fn register(&mut self, tool: LocalTool) -> Result<(), String> {
        if self.tools.contains_key(&tool.name) {
            return Err(tool.name);
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&LocalTool> {
        self.tools.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &LocalTool> {
        self.tools.values()
    }
}

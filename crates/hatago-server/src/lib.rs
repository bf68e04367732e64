//! Local tool surface and plugin host: unions locally registered tools
//! with the proxy's aggregated catalog, dispatches inbound MCP methods,
//! and runs plugins to completion before the gateway marks itself ready.

pub mod error;
pub mod plugin;
pub mod registry;
pub mod router;

pub use error::ServerError;
pub use plugin::{load_plugins, Plugin, PluginContext};
pub use registry::{CallExtra, LocalTool, LocalToolRegistry, ToolHandler};
pub use router::ToolRouter;

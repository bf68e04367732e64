//! A trivial plugin exercising the full registration surface end to end:
//! one local tool, no routes, no middleware.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use hatago_server::{CallExtra, Plugin, PluginContext, ServerError};

pub struct HelloPlugin;

#[async_trait]
impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        "hello"
    }

    async fn register(&self, ctx: &mut PluginContext) -> Result<(), ServerError> {
        ctx.register_tool(
            "hello_hatago",
            Some("Hello Hatago".to_string()),
            Some("Returns a greeting, for smoke-testing the gateway end to end.".to_string()),
            json!({ "type": "object", "properties": {} }),
            Arc::new(|_args: Option<Value>, _extra: CallExtra| async move {
                Ok(json!([{ "type": "text", "text": "Hello Hatago" }]))
            }),
        )
    }
}

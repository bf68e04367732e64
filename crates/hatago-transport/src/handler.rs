//! The seam between the transport and whatever dispatches a decoded
//! message (the tool surface, in `hatago-server`): the transport knows
//! nothing about tool registries or upstream routing, only that something
//! can answer a [`Message`] for a given session.

use async_trait::async_trait;
use serde_json::Value;

use hatago_core::jsonrpc::Message;
use hatago_core::session::SessionId;

/// A sink the transport hands to the dispatcher for one request so that
/// any `notifications/progress` it produces mid-call gets written to the
/// same stream the final response will use. Structurally identical to
/// `hatago_client::NotificationSink` — passed straight through the proxy
/// router without rewrapping.
pub type NotificationSink = Box<dyn Fn(Value) + Send + Sync>;

/// Implemented once, by `hatago-server`, and shared across all connections.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one decoded message. Returns `Some(response_or_error)` for a
    /// request, `None` for a notification or a response/error the gateway
    /// merely ingests (no reply is ever sent for those).
    async fn handle(
        &self,
        session_id: SessionId,
        message: Message,
        notify: NotificationSink,
    ) -> Option<Message>;
}

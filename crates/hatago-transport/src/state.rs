//! Shared state behind every `/mcp` and health/metrics route.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use hatago_core::session::{SessionId, SessionStore};

use crate::handler::RequestHandler;
use crate::replay::{ReplayBuffer, DEFAULT_REPLAY_BUFFER_SIZE};

/// One event written to a live SSE stream.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Message { id: u64, data: String },
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint_path: String,
    pub keep_alive: Duration,
    pub replay_buffer_size: usize,
    /// When true, POST responses are returned as one consolidated JSON
    /// body instead of opened as an SSE stream ("JSON mode").
    pub json_mode: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/mcp".to_string(),
            keep_alive: Duration::from_secs(30),
            replay_buffer_size: DEFAULT_REPLAY_BUFFER_SIZE,
            json_mode: false,
        }
    }
}

pub struct TransportState {
    pub config: TransportConfig,
    pub sessions: Arc<SessionStore>,
    pub handler: Arc<dyn RequestHandler>,
    /// Live stream senders, present only while a GET `/mcp` connection is
    /// actually open for that session.
    standalone: DashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>,
    /// Replay buffers, keyed by session and independent of whether a
    /// stream is currently open — must outlive a disconnect so a
    /// reconnecting client's `Last-Event-Id` can still be satisfied.
    replay_buffers: DashMap<SessionId, Mutex<ReplayBuffer>>,
    draining: AtomicBool,
    ready: AtomicBool,
}

impl TransportState {
    pub fn new(
        config: TransportConfig,
        sessions: Arc<SessionStore>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            config,
            sessions,
            handler,
            standalone: DashMap::new(),
            replay_buffers: DashMap::new(),
            draining: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Called once, by the plugin host, after every plugin has finished
    /// registering: the gateway does not serve requests until all plugins
    /// have returned.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Open the standalone server-push stream for `session_id`. Returns
    /// `Err(())` if one is already open (caller maps this to 409). The
    /// session's replay buffer is created once, on first open, and then
    /// persists across however many times the stream is reopened.
    pub fn open_standalone_stream(
        &self,
        session_id: SessionId,
    ) -> Result<mpsc::UnboundedReceiver<ServerEvent>, ()> {
        if self.standalone.contains_key(&session_id) {
            return Err(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.standalone.insert(session_id, tx);
        self.replay_buffers
            .entry(session_id)
            .or_insert_with(|| Mutex::new(ReplayBuffer::new(self.config.replay_buffer_size)));
        Ok(rx)
    }

    /// Drop the live stream sender on disconnect. The replay buffer is
    /// untouched — it survives until [`Self::forget_session`] removes it.
    pub fn close_standalone_stream(&self, session_id: SessionId) {
        self.standalone.remove(&session_id);
    }

    /// Discard all per-session stream state, including the replay buffer.
    /// Called on explicit session termination (`DELETE /mcp`), not on a
    /// mere stream disconnect.
    pub fn forget_session(&self, session_id: SessionId) {
        self.standalone.remove(&session_id);
        self.replay_buffers.remove(&session_id);
    }

    /// Replay events newer than `last_event_id` from the session's
    /// persistent buffer, regardless of whether the live stream that
    /// generated them is still open.
    pub fn replay_standalone(&self, session_id: SessionId, last_event_id: u64) -> Vec<ServerEvent> {
        self.replay_buffers
            .get(&session_id)
            .map(|buffer| {
                buffer
                    .lock()
                    .replay_after(last_event_id)
                    .into_iter()
                    .map(|e| ServerEvent::Message {
                        id: e.id,
                        data: e.data,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push a server-initiated notification (no related request) to a
    /// session's standalone stream, if one is open. Returns `true` if
    /// delivered, `false` if there was nowhere to send it (dropped). Always
    /// recorded into the replay buffer first, live stream or not, so a
    /// client that reconnects afterward can still catch up.
    pub fn push_to_session(&self, session_id: SessionId, data: String) -> bool {
        let stored = self
            .replay_buffers
            .entry(session_id)
            .or_insert_with(|| Mutex::new(ReplayBuffer::new(self.config.replay_buffer_size)))
            .lock()
            .push("message", data.clone());

        let Some(tx) = self.standalone.get(&session_id) else {
            return false;
        };
        tx.send(ServerEvent::Message {
            id: stored.id,
            data,
        })
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hatago_core::jsonrpc::Message;
    use hatago_core::session::SessionStoreConfig;
    use pretty_assertions::assert_eq;

    struct NullHandler;

    #[async_trait]
    impl RequestHandler for NullHandler {
        async fn handle(
            &self,
            _session_id: SessionId,
            _message: Message,
            _notify: crate::handler::NotificationSink,
        ) -> Option<Message> {
            None
        }
    }

    fn test_state() -> TransportState {
        TransportState::new(
            TransportConfig::default(),
            Arc::new(SessionStore::new(SessionStoreConfig::default())),
            Arc::new(NullHandler),
        )
    }

    #[test]
    fn replay_buffer_survives_stream_disconnect() {
        let state = test_state();
        let session_id = SessionId::new();

        let _rx = state.open_standalone_stream(session_id).unwrap();
        state.push_to_session(session_id, "first".to_string());
        state.close_standalone_stream(session_id);

        // Reconnect: a fresh stream entry, but replay must still see the
        // event pushed before the disconnect.
        let _rx = state.open_standalone_stream(session_id).unwrap();
        let replayed = state.replay_standalone(session_id, 0);
        assert_eq!(replayed.len(), 1);
    }

    #[test]
    fn forget_session_drops_the_replay_buffer() {
        let state = test_state();
        let session_id = SessionId::new();

        let _rx = state.open_standalone_stream(session_id).unwrap();
        state.push_to_session(session_id, "first".to_string());
        state.forget_session(session_id);

        let _rx = state.open_standalone_stream(session_id).unwrap();
        let replayed = state.replay_standalone(session_id, 0);
        assert!(replayed.is_empty());
    }
}

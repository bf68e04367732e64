//! Session store.
//!
//! Sessions are looked up far more often than they are created, rotated,
//! or evicted, so the store uses a [`DashMap`] for per-entry concurrency
//! (no single global lock) and a small [`parking_lot::Mutex`]-guarded
//! recency list for LRU eviction bookkeeping — `tokio::sync::Mutex` is
//! reserved for await-spanning sections elsewhere, `parking_lot` for
//! short, non-yielding critical sections like this one.

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Per-plugin namespaced key/value storage, reachable only through
/// [`Session::plugin_store`] so two plugins can never collide on a key.
#[derive(Debug, Default, Clone)]
pub struct PluginStore {
    values: HashMap<String, Value>,
}

impl PluginStore {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// A single session's state: metadata plus one [`PluginStore`] per plugin
/// that has written to it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_access: Instant,
    pub ttl: Duration,
    plugin_stores: HashMap<String, PluginStore>,
}

impl Session {
    fn new(id: SessionId, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_access: now,
            ttl,
            plugin_stores: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.last_access.elapsed() > self.ttl
    }

    pub fn plugin_store(&self, plugin_id: &str) -> PluginStore {
        self.plugin_stores.get(plugin_id).cloned().unwrap_or_default()
    }

    pub fn set_plugin_store(&mut self, plugin_id: &str, store: PluginStore) {
        self.plugin_stores.insert(plugin_id.to_string(), store);
    }
}

/// Configuration for the session store; `max_sessions` and `min_age` give
/// the eviction policy its bounds (never evict a session younger than
/// `min_age`, so a burst of legitimate `create()` calls cannot stampede a
/// session that was just issued).
#[derive(Debug, Clone, Copy)]
pub struct SessionStoreConfig {
    pub max_sessions: usize,
    pub default_ttl: Duration,
    pub min_age_for_eviction: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            default_ttl: Duration::from_secs(30 * 60),
            min_age_for_eviction: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// An eviction event, emitted for observability whenever the cap forces a
/// session out.
#[derive(Debug, Clone, Copy)]
pub struct EvictionEvent {
    pub evicted: SessionId,
}

struct Recency {
    order: VecDeque<SessionId>,
}

impl Recency {
    fn touch(&mut self, id: SessionId) {
        self.order.retain(|existing| *existing != id);
        self.order.push_back(id);
    }

    fn remove(&mut self, id: SessionId) {
        self.order.retain(|existing| *existing != id);
    }

    fn least_recent(&self) -> Option<SessionId> {
        self.order.front().copied()
    }
}

/// The gateway's in-memory, TTL-bound session store.
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    recency: SyncMutex<Recency>,
    config: SessionStoreConfig,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            recency: SyncMutex::new(Recency {
                order: VecDeque::new(),
            }),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a new session with a fresh id. If the store is at capacity
    /// and no session is old enough to evict, returns
    /// [`SessionError::AtCapacity`] so the caller can retry.
    pub fn create(&self) -> Result<(SessionId, Option<EvictionEvent>), SessionError> {
        let mut evicted = None;
        if self.sessions.len() >= self.config.max_sessions {
            evicted = Some(self.evict_one()?);
        }

        let id = SessionId::new();
        let session = Session::new(id, self.config.default_ttl);
        self.sessions.insert(id, session);
        self.recency.lock().touch(id);
        Ok((id, evicted))
    }

    fn evict_one(&self) -> Result<EvictionEvent, SessionError> {
        let candidate = {
            let recency = self.recency.lock();
            recency.least_recent()
        }
        .ok_or(SessionError::AtCapacity)?;

        let old_enough = self
            .sessions
            .get(&candidate)
            .map(|s| s.created_at.elapsed() >= self.config.min_age_for_eviction)
            .unwrap_or(true);
        if !old_enough {
            return Err(SessionError::AtCapacity);
        }

        self.sessions.remove(&candidate);
        self.recency.lock().remove(candidate);
        Ok(EvictionEvent { evicted: candidate })
    }

    /// Look up a session, updating its last-access time on hit. Returns
    /// [`SessionError::NotFound`] if the session never existed, was
    /// deleted, or has expired (lazy expiry at lookup time).
    pub fn get(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut entry = self.sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        if entry.is_expired() {
            drop(entry);
            self.sessions.remove(&id);
            self.recency.lock().remove(id);
            return Err(SessionError::NotFound);
        }
        entry.last_access = Instant::now();
        let snapshot = entry.clone();
        drop(entry);
        self.recency.lock().touch(id);
        Ok(snapshot)
    }

    /// Run `f` against the live session's plugin store under the
    /// session's own lock slot, writing the result back. Used by
    /// [`crate::session::PluginStore`] accessors so that two writers to
    /// the same plugin/session pair serialize, while different sessions
    /// never contend.
    pub fn with_plugin_store<R>(
        &self,
        id: SessionId,
        plugin_id: &str,
        f: impl FnOnce(&mut PluginStore) -> R,
    ) -> Result<R, SessionError> {
        let mut entry = self.sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        if entry.is_expired() {
            drop(entry);
            self.sessions.remove(&id);
            return Err(SessionError::NotFound);
        }
        entry.last_access = Instant::now();
        let mut store = entry.plugin_store(plugin_id);
        let result = f(&mut store);
        entry.set_plugin_store(plugin_id, store);
        Ok(result)
    }

    /// Atomically move a session's id, preserving all plugin stores and
    /// metadata. Used on privilege elevation (e.g. completed upstream
    /// auth) to defeat session fixation.
    pub fn rotate(&self, old_id: SessionId, new_id: SessionId) -> Result<(), SessionError> {
        if self.sessions.contains_key(&new_id) {
            return Err(SessionError::RotationCollision);
        }
        let (_, mut session) = self
            .sessions
            .remove(&old_id)
            .ok_or(SessionError::NotFound)?;
        session.id = new_id;
        session.last_access = Instant::now();
        self.sessions.insert(new_id, session);

        let mut recency = self.recency.lock();
        recency.remove(old_id);
        recency.touch(new_id);
        Ok(())
    }

    /// Remove a session and free its plugin stores.
    pub fn delete(&self, id: SessionId) -> Result<(), SessionError> {
        self.sessions.remove(&id).ok_or(SessionError::NotFound)?;
        self.recency.lock().remove(id);
        Ok(())
    }

    /// Scan and remove every expired session. Intended to run on a
    /// periodic `tokio::time::interval` per `config.sweep_interval`.
    pub fn sweep(&self) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| *entry.key())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
            self.recency.lock().remove(*id);
        }
        expired
    }

    /// Spawn the periodic sweep task. Returns a handle the caller can
    /// abort on drain.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = self.sweep();
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "swept expired sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store(max: usize) -> SessionStore {
        SessionStore::new(SessionStoreConfig {
            max_sessions: max,
            default_ttl: Duration::from_secs(60),
            min_age_for_eviction: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(60),
        })
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store(10);
        let (id, _) = store.create().unwrap();
        let session = store.get(id).unwrap();
        assert_eq!(session.id, id);
    }

    #[test]
    fn get_on_unknown_id_is_not_found() {
        let store = store(10);
        let err = store.get(SessionId::new()).unwrap_err();
        assert_eq!(err, SessionError::NotFound);
    }

    #[test]
    fn rotate_preserves_plugin_store_and_invalidates_old_id() {
        let store = store(10);
        let (old_id, _) = store.create().unwrap();
        store
            .with_plugin_store(old_id, "auth", |s| {
                s.set("identity", serde_json::json!("alice"));
            })
            .unwrap();

        let new_id = SessionId::new();
        store.rotate(old_id, new_id).unwrap();

        assert_eq!(store.get(old_id).unwrap_err(), SessionError::NotFound);
        let value = store
            .with_plugin_store(new_id, "auth", |s| s.get("identity").cloned())
            .unwrap();
        assert_eq!(value, Some(serde_json::json!("alice")));
    }

    #[test]
    fn rotate_into_colliding_id_fails() {
        let store = store(10);
        let (a, _) = store.create().unwrap();
        let (b, _) = store.create().unwrap();
        assert_eq!(store.rotate(a, b).unwrap_err(), SessionError::RotationCollision);
    }

    #[test]
    fn never_exceeds_cap_and_evicts_least_recently_used() {
        let store = store(2);
        let (a, _) = store.create().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let (b, _) = store.create().unwrap();
        // touch `a` again so `b` becomes the least-recently-used.
        std::thread::sleep(Duration::from_millis(2));
        store.get(a).unwrap();

        let (c, evicted) = store.create().unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(evicted.unwrap().evicted, b);
        assert!(store.get(a).is_ok());
        assert!(store.get(c).is_ok());
        assert_eq!(store.get(b).unwrap_err(), SessionError::NotFound);
    }

    #[test]
    fn plugin_stores_do_not_cross_session_or_plugin_boundaries() {
        let store = store(10);
        let (s1, _) = store.create().unwrap();
        let (s2, _) = store.create().unwrap();

        store
            .with_plugin_store(s1, "github", |s| s.set("k", serde_json::json!(1)))
            .unwrap();
        store
            .with_plugin_store(s1, "linear", |s| s.set("k", serde_json::json!(2)))
            .unwrap();

        let github_v = store
            .with_plugin_store(s1, "github", |s| s.get("k").cloned())
            .unwrap();
        let linear_v = store
            .with_plugin_store(s1, "linear", |s| s.get("k").cloned())
            .unwrap();
        let s2_v = store
            .with_plugin_store(s2, "github", |s| s.get("k").cloned())
            .unwrap();

        assert_eq!(github_v, Some(serde_json::json!(1)));
        assert_eq!(linear_v, Some(serde_json::json!(2)));
        assert_eq!(s2_v, None);
    }

    #[test]
    fn sweep_removes_expired_sessions() {
        let store = SessionStore::new(SessionStoreConfig {
            max_sessions: 10,
            default_ttl: Duration::from_millis(1),
            min_age_for_eviction: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(60),
        });
        let (id, _) = store.create().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let expired = store.sweep();
        assert_eq!(expired, vec![id]);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_twice_is_idempotent_failure() {
        let store = store(10);
        let (id, _) = store.create().unwrap();
        store.delete(id).unwrap();
        assert_eq!(store.delete(id).unwrap_err(), SessionError::NotFound);
    }

    proptest::proptest! {
        #[test]
        fn size_never_exceeds_cap(creates in 0usize..50) {
            let store = store(5);
            for _ in 0..creates {
                store.create().unwrap();
                proptest::prop_assert!(store.len() <= 5);
            }
        }
    }
}

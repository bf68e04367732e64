//! Concurrency limiter + circuit breaker.
//!
//! A rolling-window circuit breaker (closed/open/half-open) paired with
//! an admission-control slot and a bounded priority queue. One `Limiter`
//! instance serves either the gateway-wide admission check or a single
//! upstream's, applied at the gateway middleware level and, independently,
//! per upstream.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Fraction in `[0, 1]`.
    pub failure_threshold: f64,
    pub minimum_requests: u32,
    pub cooldown: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            minimum_requests: 10,
            cooldown: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub max_concurrent: usize,
    pub queue_size: usize,
    pub timeout: Duration,
    pub circuit: CircuitBreakerConfig,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            queue_size: 64,
            timeout: Duration::from_secs(30),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimiterStats {
    pub circuit_state: CircuitState,
    pub active: usize,
    pub queued: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
}

struct Waiter {
    priority: i64,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Waiter {}
impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; for ties, the earlier (smaller) seq wins,
        // i.e. ranks as the heap's "greatest" so it's popped first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct CircuitInner {
    state: CircuitState,
    total_requests: u64,
    failed_requests: u64,
    last_failure_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_successes: u32,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            total_requests: 0,
            failed_requests: 0,
            last_failure_at: None,
            half_open_admitted: 0,
            half_open_successes: 0,
        }
    }

    fn reset_counters(&mut self) {
        self.total_requests = 0;
        self.failed_requests = 0;
        self.half_open_admitted = 0;
        self.half_open_successes = 0;
    }
}

struct State {
    active: usize,
    queue: BinaryHeap<Waiter>,
    circuit: CircuitInner,
}

struct LimiterInner {
    label: String,
    config: LimiterConfig,
    state: parking_lot::Mutex<State>,
    seq: AtomicU64,
}

/// A cheaply cloneable handle to one admission-control instance.
#[derive(Clone)]
pub struct Limiter(Arc<LimiterInner>);

/// Held for the duration of one admitted request; must be consumed with
/// [`Permit::release`] to record its outcome against the circuit breaker
/// and free its slot for the next waiter. Dropping without releasing frees
/// the slot but does not count as a success or failure.
pub struct Permit {
    limiter: Limiter,
    is_probe: bool,
    released: bool,
}

impl Permit {
    pub fn release(mut self, success: bool) {
        self.released = true;
        self.limiter.do_release(success, self.is_probe);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.released {
            self.limiter.free_slot_only(self.is_probe);
        }
    }
}

impl Limiter {
    /// `label` identifies the gate in errors and logs — an upstream id for
    /// a per-upstream limiter, or a fixed name like `"gateway"` for the
    /// gateway-wide one.
    pub fn new(label: impl Into<String>, config: LimiterConfig) -> Self {
        Self(Arc::new(LimiterInner {
            label: label.into(),
            config,
            state: parking_lot::Mutex::new(State {
                active: 0,
                queue: BinaryHeap::new(),
                circuit: CircuitInner::new(),
            }),
            seq: AtomicU64::new(0),
        }))
    }

    /// `ceil(cooldown_ms / 1000)`, the full configured cooldown regardless
    /// of how much of it has already elapsed — a client that retries
    /// exactly on schedule should see the circuit close, not find it still
    /// counting down from a stale shorter estimate.
    fn retry_after_secs(&self) -> u64 {
        self.0.config.circuit.cooldown.as_millis().div_ceil(1000) as u64
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.0.state.lock();
        LimiterStats {
            circuit_state: state.circuit.state,
            active: state.active,
            queued: state.queue.len(),
            total_requests: state.circuit.total_requests,
            failed_requests: state.circuit.failed_requests,
        }
    }

    /// Admission algorithm: `priority` ranks queued waiters when the gate
    /// is at capacity; higher admits sooner.
    pub async fn acquire(&self, priority: i64) -> Result<Permit, ProxyError> {
        enum Decision {
            Admitted { is_probe: bool },
            Queued(oneshot::Receiver<()>),
            RejectOpen(u64),
            RejectQueueFull,
        }

        let decision = {
            let mut state = self.0.state.lock();
            self.maybe_transition_half_open(&mut state.circuit);

            match state.circuit.state {
                CircuitState::Open => Decision::RejectOpen(self.retry_after_secs()),
                CircuitState::HalfOpen => {
                    if state.circuit.half_open_admitted < self.0.config.circuit.half_open_max_requests {
                        state.circuit.half_open_admitted += 1;
                        Decision::Admitted { is_probe: true }
                    } else {
                        Decision::RejectOpen(self.retry_after_secs())
                    }
                }
                CircuitState::Closed => {
                    if state.active < self.0.config.max_concurrent {
                        state.active += 1;
                        Decision::Admitted { is_probe: false }
                    } else if state.queue.len() < self.0.config.queue_size {
                        let (tx, rx) = oneshot::channel();
                        let seq = self.0.seq.fetch_add(1, AtomicOrdering::Relaxed);
                        state.queue.push(Waiter { priority, seq, tx });
                        Decision::Queued(rx)
                    } else {
                        Decision::RejectQueueFull
                    }
                }
            }
        };

        match decision {
            Decision::Admitted { is_probe } => Ok(Permit {
                limiter: self.clone(),
                is_probe,
                released: false,
            }),
            Decision::Queued(rx) => match tokio::time::timeout(self.0.config.timeout, rx).await {
                Ok(Ok(())) => Ok(Permit {
                    limiter: self.clone(),
                    is_probe: false,
                    released: false,
                }),
                Ok(Err(_)) | Err(_) => {
                    // Queue timeouts are explicitly not scored against the
                    // upstream's circuit breaker.
                    Err(ProxyError::QueueTimeout(self.0.label.clone()))
                }
            },
            Decision::RejectOpen(retry_after_secs) => Err(ProxyError::CircuitOpen {
                upstream: self.0.label.clone(),
                retry_after_secs,
            }),
            Decision::RejectQueueFull => Err(ProxyError::QueueFull(self.0.label.clone())),
        }
    }

    fn maybe_transition_half_open(&self, circuit: &mut CircuitInner) {
        if circuit.state == CircuitState::Open {
            if let Some(t) = circuit.last_failure_at {
                if t.elapsed() >= self.0.config.circuit.cooldown {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_admitted = 0;
                    circuit.half_open_successes = 0;
                }
            }
        }
    }

    fn free_slot_only(&self, is_probe: bool) {
        let mut state = self.0.state.lock();
        if is_probe {
            state.circuit.half_open_admitted = state.circuit.half_open_admitted.saturating_sub(1);
        } else {
            state.active = state.active.saturating_sub(1);
            self.promote_waiters(&mut state);
        }
    }

    fn do_release(&self, success: bool, is_probe: bool) {
        let mut state = self.0.state.lock();

        if is_probe {
            state.circuit.half_open_admitted = state.circuit.half_open_admitted.saturating_sub(1);
            if success {
                state.circuit.half_open_successes += 1;
                if state.circuit.half_open_successes >= self.0.config.circuit.half_open_max_requests
                {
                    state.circuit.state = CircuitState::Closed;
                    state.circuit.reset_counters();
                }
            } else {
                state.circuit.state = CircuitState::Open;
                state.circuit.last_failure_at = Some(Instant::now());
                state.circuit.half_open_admitted = 0;
                state.circuit.half_open_successes = 0;
            }
            return;
        }

        state.active = state.active.saturating_sub(1);
        state.circuit.total_requests += 1;
        if !success {
            state.circuit.failed_requests += 1;
            state.circuit.last_failure_at = Some(Instant::now());
        }

        if state.circuit.state == CircuitState::Closed
            && state.circuit.total_requests >= u64::from(self.0.config.circuit.minimum_requests)
            && (state.circuit.failed_requests as f64 / state.circuit.total_requests as f64)
                >= self.0.config.circuit.failure_threshold
        {
            state.circuit.state = CircuitState::Open;
            state.circuit.last_failure_at = Some(Instant::now());
        }

        self.promote_waiters(&mut state);
    }

    fn promote_waiters(&self, state: &mut State) {
        if state.circuit.state != CircuitState::Closed {
            return;
        }
        while state.active < self.0.config.max_concurrent {
            let Some(waiter) = state.queue.pop() else {
                break;
            };
            state.active += 1;
            if waiter.tx.send(()).is_err() {
                // Caller gave up (timed out or dropped); undo and try the
                // next one.
                state.active -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn admits_up_to_max_concurrent() {
        let limiter = Limiter::new("test", LimiterConfig {
            max_concurrent: 2,
            queue_size: 0,
            ..LimiterConfig::default()
        });

        let p1 = limiter.acquire(0).await.unwrap();
        let p2 = limiter.acquire(0).await.unwrap();
        let err = limiter.acquire(0).await.unwrap_err();
        assert!(matches!(err, ProxyError::QueueFull(_)));

        p1.release(true);
        p2.release(true);
        assert_eq!(limiter.stats().active, 0);
    }

    #[tokio::test]
    async fn opens_circuit_after_failure_threshold() {
        let limiter = Limiter::new("test", LimiterConfig {
            max_concurrent: 10,
            queue_size: 10,
            circuit: CircuitBreakerConfig {
                failure_threshold: 0.5,
                minimum_requests: 2,
                cooldown: Duration::from_millis(50),
                half_open_max_requests: 1,
            },
            ..LimiterConfig::default()
        });

        let p1 = limiter.acquire(0).await.unwrap();
        p1.release(false);
        let p2 = limiter.acquire(0).await.unwrap();
        p2.release(false);

        assert_eq!(limiter.stats().circuit_state, CircuitState::Open);
        let err = limiter.acquire(0).await.unwrap_err();
        assert!(matches!(err, ProxyError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn retry_after_is_the_ceiling_of_cooldown_and_does_not_decay() {
        let limiter = Limiter::new("upstream-a", LimiterConfig {
            max_concurrent: 10,
            queue_size: 10,
            circuit: CircuitBreakerConfig {
                failure_threshold: 0.5,
                minimum_requests: 1,
                cooldown: Duration::from_millis(1500),
                half_open_max_requests: 1,
            },
            ..LimiterConfig::default()
        });

        let p1 = limiter.acquire(0).await.unwrap();
        p1.release(false);
        assert_eq!(limiter.stats().circuit_state, CircuitState::Open);

        let err = limiter.acquire(0).await.unwrap_err();
        let ProxyError::CircuitOpen { upstream, retry_after_secs } = err else {
            panic!("expected CircuitOpen");
        };
        assert_eq!(upstream, "upstream-a");
        assert_eq!(retry_after_secs, 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let ProxyError::CircuitOpen { retry_after_secs, .. } = limiter.acquire(0).await.unwrap_err()
        else {
            panic!("expected CircuitOpen");
        };
        assert_eq!(retry_after_secs, 2, "retry-after must not decay as the cooldown elapses");
    }

    #[tokio::test]
    async fn half_open_closes_after_successful_probes() {
        let limiter = Limiter::new("test", LimiterConfig {
            max_concurrent: 10,
            queue_size: 10,
            circuit: CircuitBreakerConfig {
                failure_threshold: 0.1,
                minimum_requests: 1,
                cooldown: Duration::from_millis(20),
                half_open_max_requests: 2,
            },
            ..LimiterConfig::default()
        });

        let p1 = limiter.acquire(0).await.unwrap();
        p1.release(false);
        assert_eq!(limiter.stats().circuit_state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let probe1 = limiter.acquire(0).await.unwrap();
        let probe2 = limiter.acquire(0).await.unwrap();
        probe1.release(true);
        probe2.release(true);

        assert_eq!(limiter.stats().circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn queued_request_is_promoted_on_release() {
        let limiter = Limiter::new("test", LimiterConfig {
            max_concurrent: 1,
            queue_size: 1,
            ..LimiterConfig::default()
        });

        let p1 = limiter.acquire(0).await.unwrap();
        let limiter_clone = limiter.clone();
        let queued = tokio::spawn(async move { limiter_clone.acquire(5).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        p1.release(true);

        let p2 = queued.await.unwrap().unwrap();
        p2.release(true);
    }
}

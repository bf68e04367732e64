//! Upstream registry, capability router, namespace/conflict resolution, and
//! the per-upstream concurrency limiter / circuit breaker.

pub mod catalog;
pub mod error;
pub mod limiter;
pub mod registry;
pub mod router;

pub use catalog::{build_catalog, ToolCatalog};
pub use error::ProxyError;
pub use limiter::{CircuitBreakerConfig, CircuitState, Limiter, LimiterConfig, LimiterStats, Permit};
pub use registry::{UpstreamHandle, UpstreamRegistry};
pub use router::CapabilityRouter;

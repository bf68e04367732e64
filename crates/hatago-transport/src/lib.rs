//! MCP streamable HTTP transport: the `/mcp` endpoint, SSE framing, and
//! the non-MCP health/drain/metrics surface.

pub mod error;
pub mod handler;
pub mod health;
pub mod mcp;
pub mod metrics;
pub mod replay;
pub mod router;
pub mod state;

pub use error::TransportError;
pub use handler::{NotificationSink, RequestHandler};
pub use metrics::MetricsState;
pub use replay::{ReplayBuffer, StoredEvent, DEFAULT_REPLAY_BUFFER_SIZE};
pub use router::build_router;
pub use state::{ServerEvent, TransportConfig, TransportState};

//! Upstream and tool-catalog data model.
//!
//! These types are the shared vocabulary between `hatago-client` (which
//! builds a client from an [`UpstreamSpec`]), `hatago-runner` (which spawns
//! a [`SubprocessLaunchSpec`]), and `hatago-proxy` (which tracks
//! [`UpstreamState`] and assembles [`ToolCatalogEntry`] values into a
//! catalog). None of it talks to a socket or a process — that's the job of
//! the crates that consume it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Identifies one configured upstream; also the default namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpstreamId(pub String);

impl std::fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a client reaches an upstream: over HTTP/SSE, or as a locally
/// spawned subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointDescriptor {
    Http {
        url: String,
    },
    Subprocess(SubprocessLaunchSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    Bearer { token: String },
    Basic { username: String, password: String },
    Custom { headers: HashMap<String, String> },
}

/// Include/exclude glob + optional rename applied to an upstream's raw
/// tool list before namespacing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub rename: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    Never,
    Immediate,
    Backoff,
}

/// Full configuration of one upstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSpec {
    pub id: UpstreamId,
    pub endpoint: EndpointDescriptor,
    pub auth: Option<AuthConfig>,
    pub timeout: Duration,
    pub tool_filter: ToolFilter,
    pub health_check_interval: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Npx,
    PnpmDlx,
    YarnDlx,
    Bunx,
    DenoRunNpm,
}

impl Default for PackageManager {
    fn default() -> Self {
        Self::Npx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubprocessTransport {
    Stdio,
    HttpWithPort,
}

/// Resource limits applied by the runner's sandbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_seconds: u32,
    pub wall_clock_seconds: u32,
    pub open_files: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_seconds: 60,
            wall_clock_seconds: 300,
            open_files: 256,
        }
    }
}

/// Sandbox permission grants for a spawned upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub network: bool,
    pub fs_read: bool,
    pub fs_write: bool,
    pub env_access: bool,
    pub spawn_children: bool,
    pub allowed_hosts: HashSet<String>,
    pub allowed_paths: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessLaunchSpec {
    pub package_name: String,
    pub package_manager: PackageManager,
    pub version: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub transport: SubprocessTransport,
    pub limits: ResourceLimits,
    pub permissions: Permissions,
    pub restart_on_failure: bool,
    pub max_restarts: u32,
    pub stop_timeout: Duration,
}

impl Default for SubprocessLaunchSpec {
    fn default() -> Self {
        Self {
            package_name: String::new(),
            package_manager: PackageManager::Npx,
            version: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            transport: SubprocessTransport::Stdio,
            limits: ResourceLimits::default(),
            permissions: Permissions::default(),
            restart_on_failure: true,
            max_restarts: 5,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle state of a registered upstream (subprocess or HTTP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamLifecycle {
    Registered,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Observable state of an upstream, tracked by the runner/proxy registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamState {
    pub lifecycle: UpstreamLifecycle,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub stop_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for UpstreamState {
    fn default() -> Self {
        Self {
            lifecycle: UpstreamLifecycle::Registered,
            pid: None,
            last_error: None,
            restart_count: 0,
            start_time: None,
            stop_time: None,
        }
    }
}

impl UpstreamState {
    /// Valid linear transitions, plus the one cycle allowed for
    /// auto-restart: `running -> failed -> starting`.
    pub fn can_transition_to(&self, next: UpstreamLifecycle) -> bool {
        use UpstreamLifecycle::*;
        matches!(
            (&self.lifecycle, &next),
            (Registered, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Failed, Starting)
        )
    }
}

/// A tool as discovered from one upstream, before or after namespacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    pub owner: UpstreamId,
    pub original_name: String,
    pub exposed_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceStrategy {
    Prefix,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    Error,
    FirstWins,
    Rename,
}

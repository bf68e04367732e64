//! Resolved configuration value consumed by the core.
//!
//! The core never loads a file or reads an environment variable itself —
//! that is the job of an external loader (out of scope). It only owns the
//! shape of a fully-resolved [`HatagoConfig`] and its defaults, independent
//! of whatever constructs it.
//!
//! Each field below documents the environment variable name an
//! external loader is expected to map onto it, as the single source of
//! truth for that mapping; no parsing of those names happens here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::upstream::{ConflictResolution, NamespaceStrategy, SubprocessLaunchSpec, UpstreamSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Console,
    File,
}

/// Overridden by `HATAGO_LOG_LEVEL` / `HATAGO_LOG_FORMAT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            output: LogOutput::Console,
        }
    }
}

/// Overridden by `PORT`, `HOSTNAME`, `HATAGO_PORT`, `HATAGO_HOSTNAME`,
/// `HATAGO_CORS`, `HATAGO_TIMEOUT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub hostname: String,
    pub cors: bool,
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "127.0.0.1".to_string(),
            cors: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Overridden by `HATAGO_RATE_LIMIT_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_secs(60),
            max_requests: 1000,
        }
    }
}

/// Overridden by `HATAGO_REQUIRE_AUTH`, `HATAGO_ALLOWED_ORIGINS` (comma
/// separated).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub require_auth: bool,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

/// Overridden by `HATAGO_NAMESPACE_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPrefixConfig {
    pub enabled: bool,
    /// e.g. `"{server}_{index}"`.
    pub format: String,
}

impl Default for AutoPrefixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: "{server}_{index}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub separator: String,
    pub case_sensitive: bool,
    pub max_length: usize,
    pub auto_prefix: AutoPrefixConfig,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            separator: ":".to_string(),
            case_sensitive: true,
            max_length: 128,
            auto_prefix: AutoPrefixConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub servers: Vec<UpstreamSpec>,
    pub namespace_strategy: NamespaceStrategy,
    pub conflict_resolution: ConflictResolution,
    pub namespace: NamespaceConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            namespace_strategy: NamespaceStrategy::Prefix,
            conflict_resolution: ConflictResolution::Error,
            namespace: NamespaceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerDefaults {
    pub package_manager: crate::upstream::PackageManager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub servers: Vec<SubprocessLaunchSpec>,
    pub defaults: RunnerDefaults,
    pub registry: String,
    pub cache_dir: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            defaults: RunnerDefaults::default(),
            registry: "https://registry.npmjs.org".to_string(),
            cache_dir: ".hatago/cache".to_string(),
        }
    }
}

/// The fully resolved configuration value the core consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HatagoConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub proxy: ProxyConfig,
    pub runner: RunnerConfig,
}

//! Runner error kind: subprocess launch and supervision failures.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RunnerError {
    #[error("upstream spec for {0} has no package name")]
    EmptyPackageName(String),

    #[error("failed to spawn subprocess for {upstream}: {source}")]
    SpawnFailed {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("subprocess for {0} exited before startup completed")]
    ExitedDuringStartup(String),

    #[error("upstream {0} exceeded its configured max restarts and is now failed")]
    RestartsExhausted(String),

    #[error("no sandbox binary available on this platform for {0}; running unsandboxed")]
    NoSandboxAvailable(String),

    #[error("health check failed for {0}: {1}")]
    HealthCheckFailed(String, String),

    #[error("upstream {0} is not currently registered with the runner")]
    NotRegistered(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    pub fn rpc_code(&self) -> i64 {
        hatago_core::error::rpc_code::SERVER_ERROR
    }
}

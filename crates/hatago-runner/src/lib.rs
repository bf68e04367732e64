//! Runner / sandbox: lifecycle manager for locally spawned upstream
//! MCP servers.
//!
//! One [`SupervisedProcess`] per registered subprocess upstream; the
//! [`Runner`] is the map from upstream id to its supervised process plus
//! the shared defaults (sandbox availability probe, default timeouts) that
//! apply when a spec doesn't override them.

pub mod error;
pub mod launch;
pub mod process;
pub mod sandbox;

pub use error::RunnerError;
pub use launch::{build_launch_command, LaunchCommand};
pub use process::{ChildStdio, HealthProbe, SupervisedProcess};
pub use sandbox::SandboxStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use hatago_core::upstream::{SubprocessLaunchSpec, UpstreamId, UpstreamState};

/// Owns every spawned subprocess upstream. Detects sandbox binary
/// availability once at construction (the same probe every upstream's
/// [`SupervisedProcess::spawn`] reuses, rather than shelling out per
/// upstream).
pub struct Runner {
    processes: RwLock<HashMap<UpstreamId, Arc<SupervisedProcess>>>,
    firejail_present: bool,
    sandbox_exec_present: bool,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            firejail_present: sandbox::binary_on_path("firejail"),
            sandbox_exec_present: sandbox::binary_on_path("sandbox-exec"),
        }
    }

    fn sandbox_binary_present(&self) -> bool {
        if cfg!(target_os = "linux") {
            self.firejail_present
        } else if cfg!(target_os = "macos") {
            self.sandbox_exec_present
        } else {
            false
        }
    }

    /// Spawn and begin supervising one subprocess upstream, returning its
    /// initial stdio plus the channel that yields fresh stdio after every
    /// auto-restart.
    pub async fn launch(
        &self,
        id: UpstreamId,
        spec: SubprocessLaunchSpec,
    ) -> Result<(ChildStdio, mpsc::UnboundedReceiver<ChildStdio>), RunnerError> {
        let (process, stdio, restarts) =
            SupervisedProcess::spawn(id.0.clone(), spec, self.sandbox_binary_present()).await?;
        self.processes.write().await.insert(id, Arc::new(process));
        Ok((stdio, restarts))
    }

    pub async fn state(&self, id: &UpstreamId) -> Result<UpstreamState, RunnerError> {
        self.processes
            .read()
            .await
            .get(id)
            .map(|p| p.state())
            .ok_or_else(|| RunnerError::NotRegistered(id.0.clone()))
    }

    pub async fn process(&self, id: &UpstreamId) -> Option<Arc<SupervisedProcess>> {
        self.processes.read().await.get(id).cloned()
    }

    pub async fn stop(&self, id: &UpstreamId) -> Result<(), RunnerError> {
        let process = self
            .processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::NotRegistered(id.0.clone()))?;
        process.stop().await
    }

    pub async fn stop_all(&self) {
        let processes: Vec<_> = self.processes.read().await.values().cloned().collect();
        for process in processes {
            let _ = process.stop().await;
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_upstream_state_errors() {
        let runner = Runner::new();
        let err = runner.state(&UpstreamId("nope".into())).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotRegistered(id) if id == "nope"));
    }
}

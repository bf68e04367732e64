//! Spawn, supervise, health-check and stop one subprocess upstream.
//!
//! Follows the interior-mutability split `child_process.rs` documents:
//! `parking_lot::Mutex` for the lifecycle state (short, never held across
//! `.await`), `tokio::sync::Mutex` for the `Child` handle itself (crosses
//! `.await` on wait/kill). A background task observes stderr at debug and
//! drives the fixed-1s-backoff auto-restart state machine; a second,
//! caller-started task drives the periodic health check.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hatago_core::upstream::{SubprocessLaunchSpec, UpstreamLifecycle, UpstreamState};

use crate::error::RunnerError;
use crate::launch::LaunchCommand;
use crate::sandbox;

/// Standard stream handles handed to whatever client variant speaks MCP
/// over them; `None` for a transport that talks to the child over a port
/// instead (HTTP-with-port upstreams).
pub struct ChildStdio {
    pub stdout: Option<ChildStdout>,
    pub stdin: Option<ChildStdin>,
}

/// Implemented by the owner of a live client connection to this process
/// (the proxy registry, via its `Backend`) so the runner can ask "is this
/// upstream still answering?" without depending on `hatago-client`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

pub struct SupervisedProcess {
    upstream_id: String,
    spec: SubprocessLaunchSpec,
    launch: LaunchCommand,
    state: Arc<parking_lot::Mutex<UpstreamState>>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    restart_tx: mpsc::UnboundedSender<ChildStdio>,
    /// Lets `stop` interrupt the supervisor's `wait()` without fighting it
    /// for the child mutex — the supervisor never holds the lock across an
    /// indefinite await once a stop has been requested.
    stop_notify: Arc<tokio::sync::Notify>,
}

impl SupervisedProcess {
    /// Resolve the launch command, apply sandboxing, spawn the child, and
    /// start the background supervisor task. Returns the process handle,
    /// the freshly spawned child's stdio, and a channel that yields fresh
    /// stdio every time the supervisor restarts the process.
    pub async fn spawn(
        upstream_id: impl Into<String>,
        spec: SubprocessLaunchSpec,
        sandbox_binary_present: bool,
    ) -> Result<(Self, ChildStdio, mpsc::UnboundedReceiver<ChildStdio>), RunnerError> {
        let upstream_id = upstream_id.into();
        let unsandboxed = crate::launch::build_launch_command(&upstream_id, &spec)?;
        let strategy = sandbox::select_strategy(&upstream_id, sandbox_binary_present);
        let launch = sandbox::wrap_command(strategy, &spec.limits, &spec.permissions, unsandboxed);

        let state = Arc::new(parking_lot::Mutex::new(UpstreamState {
            lifecycle: UpstreamLifecycle::Starting,
            ..UpstreamState::default()
        }));
        let child = Arc::new(tokio::sync::Mutex::new(None));
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let stop_notify = Arc::new(tokio::sync::Notify::new());

        let this = Self {
            upstream_id,
            spec,
            launch,
            state,
            child,
            restart_tx,
            stop_notify,
        };

        let stdio = this.spawn_child().await?;
        this.spawn_supervisor();

        Ok((this, stdio, restart_rx))
    }

    pub fn state(&self) -> UpstreamState {
        self.state.lock().clone()
    }

    pub fn state_handle(&self) -> Arc<parking_lot::Mutex<UpstreamState>> {
        self.state.clone()
    }

    async fn spawn_child(&self) -> Result<ChildStdio, RunnerError> {
        let mut cmd = Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("MCP_SANDBOX", "true")
            .env("MCP_SERVER_ID", &self.upstream_id);

        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        info!(upstream = %self.upstream_id, program = %self.launch.program, "spawning subprocess upstream");

        let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
            upstream: self.upstream_id.clone(),
            source: e,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        if let Some(stderr) = stderr {
            let upstream_id = self.upstream_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(upstream = %upstream_id, "{line}");
                }
            });
        }

        {
            let mut state = self.state.lock();
            state.lifecycle = UpstreamLifecycle::Running;
            state.pid = pid;
            state.start_time = Some(chrono::Utc::now());
        }
        *self.child.lock().await = Some(child);

        Ok(ChildStdio { stdout, stdin })
    }

    fn spawn_supervisor(&self) {
        let upstream_id = self.upstream_id.clone();
        let spec = self.spec.clone();
        let launch = self.launch.clone();
        let state = self.state.clone();
        let child = self.child.clone();
        let restart_tx = self.restart_tx.clone();
        let stop_notify = self.stop_notify.clone();

        tokio::spawn(async move {
            loop {
                let exit_status = tokio::select! {
                    status = async {
                        let mut guard = child.lock().await;
                        match guard.as_mut() {
                            Some(c) => c.wait().await,
                            None => std::future::pending().await,
                        }
                    } => status,
                    _ = stop_notify.notified() => {
                        debug!(upstream = %upstream_id, "supervisor stopping on request");
                        return;
                    }
                };

                let non_zero = !matches!(&exit_status, Ok(status) if status.success());
                if !non_zero {
                    debug!(upstream = %upstream_id, "subprocess exited cleanly");
                    state.lock().lifecycle = UpstreamLifecycle::Stopped;
                    return;
                }

                let restart_count = state.lock().restart_count;
                if !spec.restart_on_failure || restart_count >= spec.max_restarts {
                    error!(upstream = %upstream_id, "subprocess exited and will not be restarted");
                    let mut s = state.lock();
                    s.lifecycle = UpstreamLifecycle::Failed;
                    s.last_error = Some(format!("{exit_status:?}"));
                    return;
                }

                warn!(upstream = %upstream_id, restart_count, "subprocess exited, restarting after backoff");
                tokio::time::sleep(Duration::from_secs(1)).await;

                {
                    let mut s = state.lock();
                    s.restart_count += 1;
                    s.lifecycle = UpstreamLifecycle::Starting;
                }

                match respawn(&upstream_id, &spec, &launch).await {
                    Ok((new_child, stdio)) => {
                        {
                            let mut s = state.lock();
                            s.lifecycle = UpstreamLifecycle::Running;
                            s.pid = new_child.id();
                            s.start_time = Some(chrono::Utc::now());
                        }
                        *child.lock().await = Some(new_child);
                        if restart_tx.send(stdio).is_err() {
                            debug!(upstream = %upstream_id, "no receiver left for restart stdio, stopping supervision");
                            return;
                        }
                    }
                    Err(e) => {
                        error!(upstream = %upstream_id, error = %e, "respawn failed");
                        let mut s = state.lock();
                        s.lifecycle = UpstreamLifecycle::Failed;
                        s.last_error = Some(e.to_string());
                        return;
                    }
                }
            }
        });
    }

    /// Graceful-then-forceful stop: send the platform's termination signal
    /// (`Child::start_kill`, SIGKILL on Unix via tokio), wait up to
    /// `stop_timeout`, and if still alive escalate to `Child::kill`.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        self.state.lock().lifecycle = UpstreamLifecycle::Stopping;
        self.stop_notify.notify_one();

        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            warn!(upstream = %self.upstream_id, error = %e, "failed to signal subprocess");
        }

        match tokio::time::timeout(self.spec.stop_timeout, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(upstream = %self.upstream_id, "graceful stop timed out, forcing kill");
                let _ = child.kill().await;
            }
        }

        let mut state = self.state.lock();
        state.lifecycle = UpstreamLifecycle::Stopped;
        state.stop_time = Some(chrono::Utc::now());
        Ok(())
    }

    /// Run the periodic health check loop until `stop` is called or the
    /// probe fails enough times in a row to mark the upstream failed and
    /// hand off to the restart policy.
    pub fn spawn_health_loop(
        self: Arc<Self>,
        interval: Duration,
        probe: Arc<dyn HealthProbe>,
    ) -> tokio::task::JoinHandle<()> {
        const CONSECUTIVE_FAILURES_BEFORE_RESTART: u32 = 3;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut consecutive_failures = 0u32;

            loop {
                ticker.tick().await;

                if !matches!(self.state.lock().lifecycle, UpstreamLifecycle::Running) {
                    continue;
                }

                if probe.probe().await {
                    consecutive_failures = 0;
                    continue;
                }

                consecutive_failures += 1;
                warn!(
                    upstream = %self.upstream_id,
                    consecutive_failures,
                    "health check failed"
                );
                if consecutive_failures >= CONSECUTIVE_FAILURES_BEFORE_RESTART {
                    error!(upstream = %self.upstream_id, "marking upstream failed after repeated health check failures");
                    self.state.lock().lifecycle = UpstreamLifecycle::Failed;
                    return;
                }
            }
        })
    }
}

async fn respawn(
    upstream_id: &str,
    spec: &SubprocessLaunchSpec,
    launch: &LaunchCommand,
) -> Result<(Child, ChildStdio), RunnerError> {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("MCP_SANDBOX", "true")
        .env("MCP_SERVER_ID", upstream_id);

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
        upstream: upstream_id.to_string(),
        source: e,
    })?;

    let stdout = child.stdout.take();
    let stdin = child.stdin.take();
    if let Some(stderr) = child.stderr.take() {
        let upstream_id = upstream_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(upstream = %upstream_id, "{line}");
            }
        });
    }

    Ok((child, ChildStdio { stdout, stdin }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hatago_core::upstream::{PackageManager, Permissions, ResourceLimits, SubprocessTransport};
    use std::collections::HashMap;

    fn stdio_spec(program_as_package: &str) -> SubprocessLaunchSpec {
        SubprocessLaunchSpec {
            package_name: program_as_package.to_string(),
            package_manager: PackageManager::Npx,
            version: None,
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            transport: SubprocessTransport::Stdio,
            limits: ResourceLimits::default(),
            permissions: Permissions::default(),
            restart_on_failure: false,
            max_restarts: 0,
            stop_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn reports_spawn_failure_for_nonexistent_program() {
        // `npx` likely isn't present in the minimal test sandbox; either
        // way a bad package manager binary surfaces as a typed error
        // rather than a panic.
        let spec = stdio_spec("definitely-not-a-real-package");
        let result = SupervisedProcess::spawn("test-upstream", spec, false).await;
        // Either spawn succeeds (npx present on PATH) or fails cleanly.
        if let Err(e) = result {
            assert!(matches!(e, RunnerError::SpawnFailed { .. }));
        }
    }
}

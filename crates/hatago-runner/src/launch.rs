//! Launch command construction.
//!
//! Selects the package-manager runner, appends the pinned version and
//! configured args, the way `child_process.rs`'s `start_process` builds a
//! `tokio::process::Command` from a `ChildProcessConfig` — here the
//! `program`/`args` pair is computed first, independent of spawning, so it
//! can be wrapped by a [`crate::sandbox::SandboxStrategy`] before anything
//! touches the OS.

use hatago_core::upstream::{PackageManager, SubprocessLaunchSpec};

use crate::error::RunnerError;

/// A program plus argument vector ready to hand to `tokio::process::Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the unsandboxed launch command for a subprocess upstream.
pub fn build_launch_command(
    upstream_id: &str,
    spec: &SubprocessLaunchSpec,
) -> Result<LaunchCommand, RunnerError> {
    if spec.package_name.is_empty() {
        return Err(RunnerError::EmptyPackageName(upstream_id.to_string()));
    }

    let package_ref = match &spec.version {
        Some(version) => format!("{}@{version}", spec.package_name),
        None => spec.package_name.clone(),
    };

    let (program, mut args) = match spec.package_manager {
        PackageManager::Npx => ("npx".to_string(), vec!["-y".to_string(), package_ref]),
        PackageManager::PnpmDlx => (
            "pnpm".to_string(),
            vec!["dlx".to_string(), package_ref],
        ),
        PackageManager::YarnDlx => (
            "yarn".to_string(),
            vec!["dlx".to_string(), package_ref],
        ),
        PackageManager::Bunx => ("bunx".to_string(), vec![package_ref]),
        PackageManager::DenoRunNpm => (
            "deno".to_string(),
            vec![
                "run".to_string(),
                "-A".to_string(),
                format!("npm:{package_ref}"),
            ],
        ),
    };

    args.extend(spec.args.iter().cloned());
    Ok(LaunchCommand { program, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;
    use hatago_core::upstream::{Permissions, ResourceLimits, SubprocessTransport};

    fn base_spec() -> SubprocessLaunchSpec {
        SubprocessLaunchSpec {
            package_name: "@modelcontextprotocol/server-filesystem".to_string(),
            package_manager: PackageManager::Npx,
            version: None,
            args: vec!["/tmp".to_string()],
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

    #[test]
    fn npx_with_pinned_version() {
        let mut spec = base_spec();
        spec.version = Some("1.2.3".to_string());
        let cmd = build_launch_command("fs", &spec).unwrap();
        assert_eq!(cmd.program, "npx");
        assert_eq!(
            cmd.args,
            vec![
                "-y",
                "@modelcontextprotocol/server-filesystem@1.2.3",
                "/tmp"
            ]
        );
    }

    #[test]
    fn pnpm_dlx_unpinned() {
        let mut spec = base_spec();
        spec.package_manager = PackageManager::PnpmDlx;
        let cmd = build_launch_command("fs", &spec).unwrap();
        assert_eq!(cmd.program, "pnpm");
        assert_eq!(
            cmd.args,
            vec!["dlx", "@modelcontextprotocol/server-filesystem", "/tmp"]
        );
    }

    #[test]
    fn deno_run_npm_prefixes_package_ref() {
        let mut spec = base_spec();
        spec.package_manager = PackageManager::DenoRunNpm;
        spec.version = Some("9.9.9".to_string());
        let cmd = build_launch_command("fs", &spec).unwrap();
        assert_eq!(cmd.program, "deno");
        assert_eq!(
            cmd.args,
            vec![
                "run",
                "-A",
                "npm:@modelcontextprotocol/server-filesystem@9.9.9",
                "/tmp"
            ]
        );
    }

    #[test]
    fn empty_package_name_is_rejected() {
        let mut spec = base_spec();
        spec.package_name.clear();
        let err = build_launch_command("fs", &spec).unwrap_err();
        assert!(matches!(err, RunnerError::EmptyPackageName(id) if id == "fs"));
    }
}

//! Platform sandbox selection and command wrapping.
//!
//! Linux prefers `firejail`, translating [`Permissions`] into flags;
//! macOS renders a `sandbox-exec` profile; anywhere else runs unsandboxed
//! with a warning. Detection of the sandbox binary happens once, at
//! selection time, the way `child_process.rs` resolves all of a process's
//! configuration before `spawn()` is ever called.

use std::collections::HashSet;

use hatago_core::upstream::{Permissions, ResourceLimits};
use tracing::warn;

use crate::launch::LaunchCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStrategy {
    Firejail,
    SandboxExec,
    None,
}

/// Pick the sandbox strategy available on this host. `sandbox_binary_present`
/// is injected so tests don't depend on the actual machine having (or
/// lacking) `firejail`/`sandbox-exec` installed.
pub fn select_strategy(upstream_id: &str, sandbox_binary_present: bool) -> SandboxStrategy {
    if cfg!(target_os = "linux") {
        if sandbox_binary_present {
            SandboxStrategy::Firejail
        } else {
            warn!(upstream = upstream_id, "firejail not found, running unsandboxed");
            SandboxStrategy::None
        }
    } else if cfg!(target_os = "macos") {
        if sandbox_binary_present {
            SandboxStrategy::SandboxExec
        } else {
            warn!(upstream = upstream_id, "sandbox-exec not found, running unsandboxed");
            SandboxStrategy::None
        }
    } else {
        warn!(
            upstream = upstream_id,
            "no sandbox isolation available on this platform"
        );
        SandboxStrategy::None
    }
}

/// Check whether a binary is resolvable on `PATH` (best-effort, used only
/// to decide `sandbox_binary_present`; never invoked on the happy path of
/// launching the child itself).
pub fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
        })
        .unwrap_or(false)
}

/// Wrap a [`LaunchCommand`] with the chosen sandbox strategy, producing the
/// command that is actually spawned.
pub fn wrap_command(
    strategy: SandboxStrategy,
    limits: &ResourceLimits,
    permissions: &Permissions,
    inner: LaunchCommand,
) -> LaunchCommand {
    match strategy {
        SandboxStrategy::Firejail => wrap_firejail(limits, permissions, inner),
        SandboxStrategy::SandboxExec => wrap_sandbox_exec(limits, permissions, inner),
        SandboxStrategy::None => inner,
    }
}

fn wrap_firejail(
    limits: &ResourceLimits,
    permissions: &Permissions,
    inner: LaunchCommand,
) -> LaunchCommand {
    let mut args = Vec::new();

    if !permissions.network {
        args.push("--net=none".to_string());
    }
    if !permissions.fs_write {
        args.push("--read-only=~".to_string());
    }
    for path in sorted(&permissions.allowed_paths) {
        args.push(format!("--whitelist={path}"));
    }
    args.push(format!("--rlimit-as={}M", limits.memory_mb));
    args.push(format!("--timeout={}", limits.cpu_seconds));

    args.push(inner.program);
    args.extend(inner.args);

    LaunchCommand {
        program: "firejail".to_string(),
        args,
    }
}

/// Render a `sandbox-exec` profile granting/denying the resources
/// [`Permissions`] describes, then wrap the inner command with
/// `sandbox-exec -p <profile>`.
fn wrap_sandbox_exec(
    _limits: &ResourceLimits,
    permissions: &Permissions,
    inner: LaunchCommand,
) -> LaunchCommand {
    let profile = render_sandbox_exec_profile(permissions);

    let mut args = vec!["-p".to_string(), profile, inner.program];
    args.extend(inner.args);

    LaunchCommand {
        program: "sandbox-exec".to_string(),
        args,
    }
}

fn render_sandbox_exec_profile(permissions: &Permissions) -> String {
    let mut rules = vec!["(version 1)".to_string(), "(deny default)".to_string()];

    if permissions.network {
        rules.push("(allow network*)".to_string());
    } else {
        rules.push("(deny network*)".to_string());
    }

    if permissions.fs_read {
        rules.push("(allow file-read*)".to_string());
    } else {
        rules.push("(deny file-read*)".to_string());
    }

    if permissions.fs_write {
        rules.push("(allow file-write*)".to_string());
    } else {
        rules.push("(deny file-write*)".to_string());
    }

    if permissions.spawn_children {
        rules.push("(allow process-exec*)".to_string());
        rules.push("(allow process-fork)".to_string());
    } else {
        rules.push("(deny process*)".to_string());
    }

    for path in sorted(&permissions.allowed_paths) {
        rules.push(format!(
            "(allow file-read* file-write* (subpath \"{path}\"))"
        ));
    }

    rules.join("\n")
}

fn sorted(set: &HashSet<String>) -> Vec<&String> {
    let mut items: Vec<&String> = set.iter().collect();
    items.sort();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn firejail_translates_permissions_to_flags() {
        let limits = ResourceLimits {
            memory_mb: 256,
            cpu_seconds: 30,
            ..ResourceLimits::default()
        };
        let permissions = Permissions {
            network: false,
            fs_write: false,
            allowed_paths: HashSet::from(["/tmp/work".to_string()]),
            ..Permissions::default()
        };
        let inner = LaunchCommand {
            program: "npx".to_string(),
            args: vec!["-y".to_string(), "server".to_string()],
        };

        let wrapped = wrap_firejail(&limits, &permissions, inner);
        assert_eq!(wrapped.program, "firejail");
        assert!(wrapped.args.contains(&"--net=none".to_string()));
        assert!(wrapped.args.contains(&"--read-only=~".to_string()));
        assert!(wrapped
            .args
            .contains(&"--whitelist=/tmp/work".to_string()));
        assert!(wrapped.args.contains(&"--rlimit-as=256M".to_string()));
        assert!(wrapped.args.contains(&"--timeout=30".to_string()));
        assert_eq!(wrapped.args.last(), Some(&"server".to_string()));
    }

    #[test]
    fn sandbox_exec_profile_denies_network_by_default() {
        let permissions = Permissions::default();
        let profile = render_sandbox_exec_profile(&permissions);
        assert!(profile.contains("(deny network*)"));
        assert!(profile.contains("(deny process*)"));
    }

    #[test]
    fn no_strategy_passes_command_through_unchanged() {
        let inner = LaunchCommand {
            program: "npx".to_string(),
            args: vec!["server".to_string()],
        };
        let wrapped = wrap_command(
            SandboxStrategy::None,
            &ResourceLimits::default(),
            &Permissions::default(),
            inner.clone(),
        );
        assert_eq!(wrapped, inner);
    }
}

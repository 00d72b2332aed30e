//! Host requirement checks.

use anyhow::{bail, Result};
use nix::unistd::geteuid;
use tracing::{info, warn};

use super::{StepBody, StepContext};
use crate::config::keys;
use crate::system::Invocation;

/// Binaries every later step shells out to
const REQUIRED_BINARIES: &[&str] = &["systemctl", "mount.nfs", "ip"];

/// Only needed by optional steps or alternative runtimes
const OPTIONAL_BINARIES: &[&str] = &["wg", "podman", "docker", "getenforce"];

pub struct Preflight;

impl Preflight {
    fn missing_binaries(ctx: &StepContext<'_>) -> Vec<&'static str> {
        REQUIRED_BINARIES
            .iter()
            .copied()
            .filter(|bin| !ctx.commands.binary_exists(bin))
            .collect()
    }

    fn check_runtime(ctx: &StepContext<'_>) -> Result<()> {
        let runtime = ctx.value(keys::CONTAINER_RUNTIME, "podman");
        if !ctx.commands.binary_exists(&runtime) {
            bail!("container runtime '{}' not found on PATH", runtime);
        }
        Ok(())
    }

    fn check_nfs_reachable(ctx: &StepContext<'_>, server: &str) -> Result<()> {
        let timeout = ctx.config.get_int(keys::NETWORK_TEST_TIMEOUT, 10).max(1);
        let retries = ctx.config.get_int(keys::NETWORK_TEST_RETRIES, 5).max(1);

        for attempt in 1..=retries {
            let probe = Invocation::new("ping")
                .args(["-c", "1", "-W"])
                .arg(timeout.to_string())
                .arg(server)
                .read_only();
            match ctx.commands.run(&probe) {
                Ok(out) if out.success => {
                    info!(server, attempt, "NFS server reachable");
                    return Ok(());
                }
                _ => warn!(server, attempt, retries, "NFS server did not answer"),
            }
        }
        bail!("NFS server {} unreachable after {} attempt(s)", server, retries)
    }
}

impl StepBody for Preflight {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        if !geteuid().is_root() {
            if ctx.dry_run {
                warn!("Not running as root; a live run will need root privileges");
            } else {
                bail!("homelab-setup must run as root (try sudo)");
            }
        }

        let missing = Self::missing_binaries(ctx);
        if !missing.is_empty() {
            bail!("missing required commands: {}", missing.join(", "));
        }
        for bin in OPTIONAL_BINARIES {
            if !ctx.commands.binary_exists(bin) {
                info!(binary = *bin, "Optional command not found");
            }
        }

        Self::check_runtime(ctx)?;

        if let Some(server) = ctx.config.get(keys::NFS_SERVER).filter(|s| !s.is_empty()) {
            Self::check_nfs_reachable(ctx, &server)?;
        }

        info!("Pre-flight checks passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::ConfigStore;
    use crate::error::Result as SetupResult;
    use crate::prompt::NonInteractive;
    use crate::system::{CommandExecutor, CommandOutput, LocalFileSystem};

    /// Answers `ping` successfully from the given attempt on.
    struct FlakyPing {
        succeed_from: usize,
        pings: AtomicUsize,
    }

    impl CommandExecutor for FlakyPing {
        fn run(&self, invocation: &Invocation) -> SetupResult<CommandOutput> {
            let attempt = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(invocation.program, "ping");
            if attempt >= self.succeed_from {
                Ok(CommandOutput::ok(""))
            } else {
                Ok(CommandOutput {
                    success: false,
                    exit_code: Some(1),
                    ..CommandOutput::default()
                })
            }
        }
    }

    fn probe(succeed_from: usize) -> (anyhow::Result<()>, usize) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::new(dir.path().join("homelab-setup.conf"));
        config.set(keys::NETWORK_TEST_RETRIES, "3").expect("set");
        let commands = FlakyPing {
            succeed_from,
            pings: AtomicUsize::new(0),
        };
        let ctx = StepContext {
            config: &config,
            fs: &LocalFileSystem,
            commands: &commands,
            prompter: &NonInteractive,
            dry_run: false,
        };
        let result = Preflight::check_nfs_reachable(&ctx, "nas.local");
        (result, commands.pings.load(Ordering::SeqCst))
    }

    #[test]
    fn test_nfs_probe_retries_until_answer() {
        let (result, pings) = probe(2);
        assert!(result.is_ok());
        assert_eq!(pings, 2);
    }

    #[test]
    fn test_nfs_probe_gives_up_after_retries() {
        let (result, pings) = probe(10);
        assert!(result.is_err());
        assert_eq!(pings, 3);
    }
}

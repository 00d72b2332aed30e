//! Signal handling and child process lifecycle.
//!
//! The first SIGINT/SIGTERM/SIGHUP only raises a [`CancellationToken`]; the
//! orchestrator checks it between steps, so a step that has already changed the
//! system still gets to record its marker. A second signal terminates tracked
//! children and exits with 130.
//!
//! External commands run in their own process group, so a terminal Ctrl-C is
//! not delivered to them directly, and with `PR_SET_PDEATHSIG` so they die if
//! this process does.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit code used when a second signal forces an immediate exit
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shared "stop after the current step" flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static CHILD_REGISTRY: Mutex<ChildRegistry> = Mutex::new(ChildRegistry::new());

/// PIDs of running external commands (each is also its process group id).
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: BTreeSet<u32>,
}

impl ChildRegistry {
    pub const fn new() -> Self {
        Self {
            pids: BTreeSet::new(),
        }
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "Registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "Unregistered child process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked process group, wait up to `grace_period`, then
    /// SIGKILL whatever is left.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            return;
        }
        info!(count = self.pids.len(), "Terminating child processes");

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                debug!(pid, error = %e, "Group SIGTERM failed, signalling process");
                let _ = send_signal(pid, Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                warn!(pid, "Child did not exit after SIGTERM, sending SIGKILL");
                if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }
        self.pids.clear();
    }
}

/// Run `f` with the process-wide registry locked.
pub fn with_children<R>(f: impl FnOnce(&mut ChildRegistry) -> R) -> R {
    let mut registry = CHILD_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut registry)
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive and not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Field 3 is the state; Z and X are dead for our purposes
        Ok(stat) => !matches!(stat.split_whitespace().nth(2), Some("Z" | "X")),
        Err(_) => true,
    }
}

/// Route SIGINT, SIGTERM and SIGHUP to `token`.
///
/// Call once at startup. The handler thread runs for the life of the process.
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "signal",
            };

            if token.is_cancelled() {
                warn!(signal = name, "Second signal received, exiting now");
                with_children(|children| children.terminate_all(Duration::from_secs(3)));
                std::process::exit(FORCED_EXIT_CODE);
            }

            warn!(
                signal = name,
                "Stopping after the current step finishes (send again to abort immediately)"
            );
            token.cancel();
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate children.
pub trait CommandProcessGroup {
    /// Run the child as leader of its own process group, with a parent-death
    /// signal so it cannot outlive this process.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        // (setpgid, prctl) between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::new();
        registry.register(1234);
        registry.register(5678);
        registry.register(1234);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::new();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(500));

        let status = child.wait().expect("wait");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_tolerates_dead_pids() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");

        let mut registry = ChildRegistry::new();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(100));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }
}

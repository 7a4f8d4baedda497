//! Child process lifecycle
//!
//! Package-manager children run in their own process group so that `apt-get`
//! and the `dpkg` processes it forks can be signalled together. Every child is
//! recorded in a global registry while it runs; if the tool receives SIGINT,
//! SIGTERM or SIGHUP the registered groups get SIGTERM, then SIGKILL after a
//! grace period, before the tool exits.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL on signal-driven shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Registry of running child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    terminating: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every registered group, wait up to `grace`, then SIGKILL survivors.
    /// Only the first call does anything.
    pub fn terminate_all(&mut self, grace: Duration) {
        if self.terminating {
            return;
        }
        self.terminating = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        tracing::info!("Terminating {} child process group(s)", pids.len());

        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                tracing::warn!("SIGTERM to process group {} failed: {}", pid, e);
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            tracing::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            kill_group(pid);
        }
        self.pids.clear();
    }
}

/// Signal every process in the group led by `pgid`
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// SIGKILL the group led by `pgid`, falling back to the single process
pub fn kill_group(pgid: u32) {
    if signal_group(pgid, Signal::SIGKILL).is_err() {
        let _ = signal::kill(Pid::from_raw(pgid as i32), Signal::SIGKILL);
    }
}

/// True if the PID exists and is not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state; Z and X are dead
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat.split_whitespace().nth(2) {
            return !matches!(state, "Z" | "X");
        }
    }

    true
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP that terminate registered
/// children and exit with `128 + signal`. Call once at startup.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::warn!("Received signal {}, stopping package operations", sig);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(SHUTDOWN_GRACE);
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid and prctl
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

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
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_on_empty_registry() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.terminating);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_secs(2));

        let status = child.wait().expect("wait failed");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));

        registry.register(99999);
        registry.terminate_all(Duration::from_millis(10));
        // Second call is a no-op, so the PID stays registered
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_kill_group_stops_leader() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");

        kill_group(child.id());
        let status = child.wait().expect("wait failed");
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }
}

//! Process boundary
//!
//! The supervision layer never spawns processes itself. It receives a handle
//! to an already running worker process and needs four things from it: the
//! pid, a liveness probe, a forceful kill, and a best-effort graceful stop.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

/// A running (or exited) OS process the node agent can signal.
pub trait Process: Send + Sync + fmt::Debug {
    fn id(&self) -> u32;

    fn is_alive(&self) -> bool;

    /// Forceful termination (SIGKILL on unix).
    fn kill(&self);

    /// Ask the process to shut down cleanly. Returns whether a signal was
    /// actually delivered. Platforms without signals return `false` and the
    /// caller waits out the grace period before calling [`Process::kill`].
    fn terminate(&self) -> bool {
        false
    }
}

pub type ProcessHandle = Arc<dyn Process>;

/// A process addressed by pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsProcess {
    pid: u32,
}

impl OsProcess {
    pub fn from_pid(pid: u32) -> Self {
        Self { pid }
    }

    pub fn handle(pid: u32) -> ProcessHandle {
        Arc::new(Self::from_pid(pid))
    }
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    /// Only positive pids are signalled; 0 and negative values address
    /// process groups.
    pub fn signal(pid: u32, sig: Option<Signal>) -> Result<(), Errno> {
        let pid = i32::try_from(pid)
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or(Errno::ESRCH)?;
        kill(Pid::from_raw(pid), sig)
    }

    pub fn is_alive(pid: u32) -> bool {
        // EPERM means the pid exists but belongs to someone else.
        matches!(signal(pid, None), Ok(()) | Err(Errno::EPERM))
    }

    pub fn terminate(pid: u32) -> Result<(), Errno> {
        signal(pid, Some(Signal::SIGTERM))
    }

    pub fn force_kill(pid: u32) -> Result<(), Errno> {
        signal(pid, Some(Signal::SIGKILL))
    }
}

#[cfg(unix)]
impl Process for OsProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        imp::is_alive(self.pid)
    }

    fn kill(&self) {
        match imp::force_kill(self.pid) {
            Ok(()) => debug!(pid = self.pid, "sent SIGKILL"),
            Err(nix::errno::Errno::ESRCH) => debug!(pid = self.pid, "process already gone"),
            Err(e) => warn!(pid = self.pid, "failed to SIGKILL process: {e}"),
        }
    }

    fn terminate(&self) -> bool {
        match imp::terminate(self.pid) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid = self.pid, "failed to SIGTERM process: {e}");
                false
            }
        }
    }
}

// No signal delivery here: liveness is unknown, so report alive and let the
// grace timer escalate. Forceful kill is left to the platform process API.
#[cfg(not(unix))]
impl Process for OsProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn kill(&self) {
        warn!(pid = self.pid, "forceful kill is not supported on this platform");
    }
}

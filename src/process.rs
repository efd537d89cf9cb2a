/// Process control: the handle a guard supervises and terminates.
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Whether `pid` names exactly one process. `kill(2)` treats 0 and negative
/// values (u32 above `i32::MAX` wraps negative) as group or broadcast targets.
pub fn is_valid_pid(pid: u32) -> bool {
    pid != 0 && pid <= i32::MAX as u32
}

/// A supervised process.
///
/// `terminate` is fire-and-forget: the guard never waits for or inspects the
/// outcome, so implementations log their own failures.
pub trait ProcessController: Send + Sync {
    /// Process id passed to the memory sampler.
    fn pid(&self) -> u32;

    /// Forcibly terminate the process.
    fn terminate(&self);
}

/// An operating-system process addressed by pid, killed with SIGKILL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsProcess {
    pid: u32,
    group: bool,
}

impl OsProcess {
    /// Handle for a single process.
    pub fn new(pid: u32) -> Self {
        Self { pid, group: false }
    }

    /// Handle for a process that leads its own process group. Termination
    /// signals the whole group so grandchildren go down with it.
    pub fn group_leader(pid: u32) -> Self {
        Self { pid, group: true }
    }

    /// Handle for the calling process.
    pub fn current() -> Self {
        Self::new(std::process::id())
    }

    /// Send an arbitrary signal, honouring the group setting.
    ///
    /// Fails with `ESRCH` for pids that [`is_valid_pid`] rejects.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        if !is_valid_pid(self.pid) {
            return Err(Errno::ESRCH);
        }
        let pid = Pid::from_raw(self.pid as i32);
        if self.group {
            killpg(pid, signal)
        } else {
            kill(pid, signal)
        }
    }
}

impl ProcessController for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self) {
        match self.signal(Signal::SIGKILL) {
            Ok(()) => tracing::info!(pid = self.pid, group = self.group, "sent SIGKILL"),
            Err(e) => tracing::warn!(
                pid = self.pid,
                group = self.group,
                error = %e,
                "failed to kill process"
            ),
        }
    }
}

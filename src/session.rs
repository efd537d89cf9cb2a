/// Supervised sessions: spawn a child (or attach to a pid) under a memory guard
/// and report how it ended.
use crate::config::{CommandConfig, GuardConfig};
use crate::error::GuardError;
use crate::process::{is_valid_pid, OsProcess};
use nix::sys::signal::Signal;
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Exit code reported when memguard killed the child (128 + SIGKILL).
pub const KILLED_EXIT_CODE: i32 = 137;

/// Result of a supervised child session.
#[derive(Debug)]
pub struct SessionResult {
    /// Process exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    /// The memory limit was exceeded.
    pub breached: bool,
    /// A shutdown signal ended the session.
    pub interrupted: bool,
    /// Wall-clock duration of the session.
    pub duration: Duration,
    /// Child PID (for logging/diagnostics).
    pub pid: u32,
}

impl SessionResult {
    /// Exit code memguard itself should exit with.
    pub fn shell_exit_code(&self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        match self.signal {
            Some(sig) => 128 + sig,
            None if self.breached => KILLED_EXIT_CODE,
            None => 1,
        }
    }
}

/// Result of watching an existing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchResult {
    pub breached: bool,
    pub interrupted: bool,
}

/// Errors that can occur while running a supervised session.
#[derive(Debug)]
pub enum SessionError {
    /// No program configured.
    NoProgram,
    /// The pid does not name a single process.
    InvalidPid(u32),
    /// Failed to spawn the child process.
    Spawn { source: std::io::Error },
    /// Failed while waiting on the child.
    Io { source: std::io::Error },
    /// The guard refused to start.
    Guard { source: GuardError },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoProgram => {
                write!(f, "no command to run (pass one after `--` or set command.program)")
            }
            SessionError::InvalidPid(pid) => write!(f, "invalid process id {pid}"),
            SessionError::Spawn { source } => write!(f, "failed to spawn child: {}", source),
            SessionError::Io { source } => write!(f, "I/O error during session: {}", source),
            SessionError::Guard { source } => write!(f, "failed to start memory guard: {}", source),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::NoProgram | SessionError::InvalidPid(_) => None,
            SessionError::Spawn { source } => Some(source),
            SessionError::Io { source } => Some(source),
            SessionError::Guard { source } => Some(source),
        }
    }
}

/// Spawn the configured command under a guard and wait for it to exit.
///
/// The child is spawned in its own process group (via `process_group(0)`)
/// so a breach can take down the whole group. When `shutdown` resolves first,
/// the guard is cancelled and the child receives SIGTERM.
pub async fn run_session(
    command: &CommandConfig,
    guard_config: &GuardConfig,
    limit: u64,
    shutdown: impl Future<Output = ()>,
) -> Result<SessionResult, SessionError> {
    let program = command
        .program
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(SessionError::NoProgram)?;

    tracing::info!(command = %program, args = ?command.args, "spawning child");
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(&command.args)
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SessionError::Spawn { source: e })?;

    let pid = child.id().ok_or_else(|| SessionError::Io {
        source: std::io::Error::other("child exited before it could be guarded"),
    })?;

    let process = if guard_config.kill_group {
        OsProcess::group_leader(pid)
    } else {
        OsProcess::new(pid)
    };
    let guard = guard_config.builder().process(process).build();
    guard
        .limit(limit)
        .map_err(|e| SessionError::Guard { source: e })?;
    tracing::info!(pid, guard = %guard.name(), limit, "child started under memory guard");

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = shutdown => None,
    };

    let interrupted = finished.is_none();
    let status = match finished {
        Some(status) => status,
        None => {
            tracing::info!(pid, "shutdown requested, stopping child");
            guard.cancel_wait().await;
            if let Err(e) = process.signal(Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "failed to forward SIGTERM");
            }
            child.wait().await
        }
    }
    .map_err(|e| SessionError::Io { source: e })?;

    guard.cancel_wait().await;
    let duration = start.elapsed();

    let result = SessionResult {
        exit_code: status.code(),
        signal: status.signal(),
        breached: guard.is_killed(),
        interrupted,
        duration,
        pid,
    };
    tracing::info!(
        exit_code = ?result.exit_code,
        signal = ?result.signal,
        breached = result.breached,
        duration_secs = duration.as_secs(),
        "child session completed"
    );
    Ok(result)
}

/// Guard an already-running process until it breaches or `shutdown` resolves.
///
/// A process that cannot be sampled (gone, no permission) is not a breach;
/// the guard keeps retrying until shutdown.
pub async fn watch_pid(
    pid: u32,
    guard_config: &GuardConfig,
    limit: u64,
    shutdown: impl Future<Output = ()>,
) -> Result<WatchResult, SessionError> {
    if !is_valid_pid(pid) {
        return Err(SessionError::InvalidPid(pid));
    }
    let guard = guard_config.builder().process(OsProcess::new(pid)).build();
    guard
        .limit(limit)
        .map_err(|e| SessionError::Guard { source: e })?;
    tracing::info!(pid, guard = %guard.name(), limit, "watching process");

    let mut notice = guard.killed();
    let breached = tokio::select! {
        killed = notice.wait() => killed,
        _ = shutdown => false,
    };

    guard.cancel_wait().await;
    Ok(WatchResult {
        breached,
        interrupted: !breached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    fn command(program: &str, args: &[&str]) -> CommandConfig {
        CommandConfig {
            program: Some(program.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn fast_guard() -> GuardConfig {
        GuardConfig {
            interval_ms: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_shell_exit_code() {
        let mut result = SessionResult {
            exit_code: Some(3),
            signal: None,
            breached: false,
            interrupted: false,
            duration: Duration::ZERO,
            pid: 1,
        };
        assert_eq!(result.shell_exit_code(), 3);

        result.exit_code = None;
        result.signal = Some(9);
        assert_eq!(result.shell_exit_code(), 137);

        result.signal = Some(15);
        assert_eq!(result.shell_exit_code(), 143);

        result.signal = None;
        result.breached = true;
        assert_eq!(result.shell_exit_code(), KILLED_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_child_exit_code_passes_through() {
        let result = run_session(
            &command("sh", &["-c", "exit 3"]),
            &fast_guard(),
            1 << 30,
            pending(),
        )
        .await
        .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert!(!result.breached);
        assert!(!result.interrupted);
        assert!(result.pid > 0);
    }

    #[tokio::test]
    async fn test_breach_kills_child() {
        let result = run_session(
            &command("sleep", &["30"]),
            &fast_guard(),
            1024,
            pending(),
        )
        .await
        .unwrap();

        assert!(result.breached);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal, Some(9));
        assert_eq!(result.shell_exit_code(), KILLED_EXIT_CODE);
        assert!(result.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_alert_only_lets_child_finish() {
        let guard = GuardConfig {
            interval_ms: 20,
            alert_only: true,
            ..Default::default()
        };
        let result = run_session(&command("sleep", &["0.3"]), &guard, 1024, pending())
            .await
            .unwrap();

        assert!(result.breached);
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_child() {
        let result = run_session(
            &command("sleep", &["30"]),
            &fast_guard(),
            1 << 30,
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap();

        assert!(result.interrupted);
        assert!(!result.breached);
        assert_eq!(result.signal, Some(15));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_session(&CommandConfig::default(), &fast_guard(), 1024, pending())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoProgram));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = run_session(
            &command("nonexistent-binary-xyz", &[]),
            &fast_guard(),
            1024,
            pending(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_watch_pid_breach() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let result = watch_pid(pid, &fast_guard(), 1024, pending()).await.unwrap();
        assert!(result.breached);
        assert!(!result.interrupted);

        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[tokio::test]
    async fn test_watch_pid_rejects_group_pids() {
        for pid in [0, u32::MAX] {
            let err = watch_pid(pid, &fast_guard(), 1024, pending())
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::InvalidPid(p) if p == pid));
        }
    }

    #[tokio::test]
    async fn test_watch_pid_shutdown() {
        let result = watch_pid(
            std::process::id(),
            &fast_guard(),
            1 << 40,
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert!(!result.breached);
        assert!(result.interrupted);
    }
}

//! The per-process memory guard.
//!
//! A [`Guard`] is bound to one process for its whole life. Calling
//! [`Guard::limit`] once launches a single background limiter task that samples
//! the process every interval and kills it when its PSS exceeds the limit.
//! After the limiter stops (cancelled or breached) the guard is spent; build a
//! new one to supervise again.

use crate::error::GuardError;
use crate::latch::{KillNotice, Latch};
use crate::limiter::{self, LoopExit};
use crate::process::ProcessController;
use crate::sampler::{MemorySampler, SmapsSampler};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STATS_FREQUENCY: Duration = Duration::from_secs(60);

/// Shortest sampling interval accepted; smaller values are clamped.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// State shared between guard handles and the limiter task.
///
/// Writers by role:
/// - `limit`: the start gate, once, via compare-and-swap.
/// - `running = true`: the start gate, after winning the swap.
/// - `last_sample`: the limiter task.
/// - `running = false`, `last_sample` reset, `stopped`: [`LoopExit`] only.
pub(crate) struct Shared {
    pub(crate) name: Option<String>,
    pub(crate) interval: Duration,
    pub(crate) stats_frequency: Duration,
    pub(crate) enforce: bool,
    pub(crate) sampler: Arc<dyn MemorySampler>,
    pub(crate) process: Option<Arc<dyn ProcessController>>,

    pub(crate) limit: AtomicU64,
    pub(crate) last_sample: AtomicU64,
    pub(crate) running: AtomicBool,

    /// Holds at most one pending cancellation permit.
    pub(crate) cancel: Notify,
    pub(crate) killed: Latch,
    pub(crate) stopped: Latch,
}

impl Shared {
    /// Name used in log lines: the configured name, else the pid.
    pub(crate) fn display_name(&self) -> String {
        match (&self.name, &self.process) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(process)) => process.pid().to_string(),
            _ => String::from("unbound"),
        }
    }
}

/// Configuration for a [`Guard`]. Settings are frozen by [`GuardBuilder::build`].
pub struct GuardBuilder {
    name: Option<String>,
    interval: Duration,
    stats_frequency: Duration,
    enforce: bool,
    sampler: Arc<dyn MemorySampler>,
    process: Option<Arc<dyn ProcessController>>,
}

impl Default for GuardBuilder {
    fn default() -> Self {
        Self {
            name: None,
            interval: DEFAULT_INTERVAL,
            stats_frequency: DEFAULT_STATS_FREQUENCY,
            enforce: true,
            sampler: Arc::new(SmapsSampler::default()),
            process: None,
        }
    }
}

impl GuardBuilder {
    /// Name to log in place of the pid.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Time between samples (default 1s).
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// How often a status line is logged while under the limit (default 1m).
    pub fn stats_frequency(mut self, frequency: Duration) -> Self {
        self.stats_frequency = frequency;
        self
    }

    /// When `false`, a breach fires the kill notice but leaves the process
    /// alive (alert-only mode).
    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    /// Replace the procfs PSS sampler.
    pub fn sampler(mut self, sampler: impl MemorySampler + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// The process to supervise.
    pub fn process(mut self, process: impl ProcessController + 'static) -> Self {
        self.process = Some(Arc::new(process));
        self
    }

    pub fn build(self) -> Guard {
        Guard {
            shared: Arc::new(Shared {
                name: self.name,
                interval: self.interval,
                stats_frequency: self.stats_frequency,
                enforce: self.enforce,
                sampler: self.sampler,
                process: self.process,
                limit: AtomicU64::new(0),
                last_sample: AtomicU64::new(0),
                running: AtomicBool::new(false),
                cancel: Notify::new(),
                killed: Latch::new(),
                stopped: Latch::new(),
            }),
        }
    }
}

/// Supervises the memory usage of one process.
///
/// `Guard` is a cheap handle; clones share the same supervision session and
/// every method is safe to call concurrently.
#[derive(Clone)]
pub struct Guard {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("name", &self.shared.display_name())
            .field("pid", &self.pid())
            .field("interval", &self.shared.interval)
            .field("limit", &self.current_limit())
            .field("enforce", &self.shared.enforce)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Guard {
    /// Guard `process` with default settings.
    pub fn new(process: impl ProcessController + 'static) -> Self {
        Self::builder().process(process).build()
    }

    pub fn builder() -> GuardBuilder {
        GuardBuilder::default()
    }

    /// Set the memory ceiling in bytes and start the limiter.
    ///
    /// Succeeds at most once per guard, no matter how many callers race.
    /// Returns immediately; the first sample is taken one interval later.
    /// Must be called from within a Tokio runtime.
    pub fn limit(&self, max_bytes: u64) -> Result<(), GuardError> {
        if max_bytes == 0 {
            return Err(GuardError::InvalidLimit);
        }
        let Some(process) = self.shared.process.clone() else {
            return Err(GuardError::MissingProcess);
        };
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| GuardError::NoRuntime)?;

        if self
            .shared
            .limit
            .compare_exchange(0, max_bytes, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GuardError::AlreadyStarted);
        }

        self.shared.running.store(true, Ordering::Release);
        let exit = LoopExit::new(Arc::clone(&self.shared));
        runtime.spawn(limiter::run(exit, process, max_bytes));
        Ok(())
    }

    /// Last sampled PSS in bytes, or a fresh sample when none is cached.
    ///
    /// Returns 0 if the fresh sample fails. Never waits on the limiter.
    pub fn pss(&self) -> u64 {
        let last = self.shared.last_sample.load(Ordering::Acquire);
        if last > 0 {
            return last;
        }
        match &self.shared.process {
            Some(process) => self.shared.sampler.sample(process.pid()).unwrap_or(0),
            None => 0,
        }
    }

    /// Ask the limiter to stop and return immediately.
    ///
    /// Repeated and concurrent calls collapse into a single pending request.
    /// The guard is not usable after it stops.
    pub fn cancel(&self) {
        self.shared.cancel.notify_one();
    }

    /// Ask the limiter to stop and wait until it has fully exited.
    pub async fn cancel_wait(&self) {
        if !self.is_running() {
            return;
        }
        self.cancel();
        self.shared.stopped.wait().await;
    }

    /// Notification that resolves when the limit is breached.
    pub fn killed(&self) -> KillNotice {
        self.shared.killed.subscribe()
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.is_set()
    }

    /// True from a successful [`limit`](Self::limit) until the limiter exits.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The configured ceiling, or `None` before activation.
    pub fn current_limit(&self) -> Option<u64> {
        match self.shared.limit.load(Ordering::Acquire) {
            0 => None,
            limit => Some(limit),
        }
    }

    pub fn name(&self) -> String {
        self.shared.display_name()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.process.as_ref().map(|p| p.pid())
    }
}

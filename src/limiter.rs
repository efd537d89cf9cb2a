/// The limiter task: sample, compare against the limit, repeat.
///
/// One task runs per activated guard. It exits on cancellation or on the
/// first breach; sampler errors are logged and the loop carries on.
use crate::bytes::format_bytes;
use crate::guard::Shared;
use crate::process::ProcessController;
use crate::sampler::SampleError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Owns the limiter's teardown.
///
/// Created by the start gate and moved into the task, so teardown also runs
/// when the task panics or the runtime drops it before it is ever polled.
pub(crate) struct LoopExit {
    shared: Arc<Shared>,
    name: String,
}

impl LoopExit {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let name = shared.display_name();
        Self { shared, name }
    }
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        tracing::debug!(guard = %self.name, "memory guard limiter leaving");
        self.shared.running.store(false, Ordering::Release);
        self.shared.last_sample.store(0, Ordering::Release);
        self.shared.stopped.set();
    }
}

/// Procfs reads are blocking file I/O; keep them off the runtime's workers.
async fn sample_blocking(shared: &Shared, pid: u32) -> Result<u64, SampleError> {
    let sampler = Arc::clone(&shared.sampler);
    tokio::task::spawn_blocking(move || sampler.sample(pid))
        .await
        .map_err(|e| SampleError::Task { source: e })?
}

/// Why the limiter stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    Breached,
}

pub(crate) async fn run(exit: LoopExit, process: Arc<dyn ProcessController>, limit: u64) {
    let shared = &exit.shared;
    let name = exit.name.as_str();
    let pid = process.pid();

    tracing::debug!(
        guard = name,
        pid,
        limit = %format_bytes(limit),
        interval_ms = shared.interval.as_millis() as u64,
        enforce = shared.enforce,
        "memory guard running"
    );

    let mut since = Instant::now();
    let mut errors: u64 = 0;

    let reason = loop {
        tokio::select! {
            biased;
            _ = shared.cancel.notified() => break StopReason::Cancelled,
            _ = tokio::time::sleep(shared.interval) => {}
        }

        let pss = match sample_blocking(shared, pid).await {
            Ok(pss) => {
                errors = 0;
                shared.last_sample.store(pss, Ordering::Release);
                pss
            }
            Err(e) => {
                errors += 1;
                tracing::warn!(
                    guard = name,
                    error = %e,
                    consecutive_errors = errors,
                    "memory sample failed"
                );
                continue;
            }
        };

        if pss > limit {
            tracing::error!(
                guard = name,
                pid,
                pss = %format_bytes(pss),
                limit = %format_bytes(limit),
                "memory guard ALERT: limit exceeded"
            );
            shared.killed.set();
            if shared.enforce {
                process.terminate();
            } else {
                tracing::warn!(guard = name, pid, "alert-only mode, leaving process alive");
            }
            break StopReason::Breached;
        }

        if since.elapsed() >= shared.stats_frequency {
            since = Instant::now();
            tracing::debug!(
                guard = name,
                pss = %format_bytes(pss),
                limit = %format_bytes(limit),
                consecutive_errors = errors,
                "memory guard status"
            );
        }
    };

    tracing::debug!(guard = name, reason = ?reason, "memory guard stopping");
}

//! Memory high-water-mark guard for a single process.
//!
//! A [`Guard`] samples the proportional set size (PSS) of one process at a
//! fixed interval and kills the process the first time usage exceeds the
//! configured limit.
//!
//! ```no_run
//! use memguard::{Guard, OsProcess};
//!
//! # async fn example() -> Result<(), memguard::GuardError> {
//! let guard = Guard::new(OsProcess::current());
//! guard.limit(512 * 1024 * 1024)?;
//!
//! // ... memory-hungry work ...
//!
//! guard.cancel_wait().await;
//! # Ok(())
//! # }
//! ```

pub mod bytes;
pub mod config;
mod error;
mod guard;
mod latch;
mod limiter;
pub mod process;
pub mod sampler;
pub mod session;
pub mod signals;

pub use error::GuardError;
pub use guard::{Guard, GuardBuilder, DEFAULT_INTERVAL, DEFAULT_STATS_FREQUENCY};
pub use latch::KillNotice;
pub use process::{OsProcess, ProcessController};
pub use sampler::{MemorySampler, SampleError, SmapsSampler};

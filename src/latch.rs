//! One-shot broadcast latch.
//!
//! A latch starts open and can be set exactly once; any number of waiters
//! observe the transition. Guards use one latch as the kill broadcast and a
//! second one to signal that the limiter task has fully exited.

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Set the latch. Returns `true` only for the call that performed the
    /// transition.
    pub(crate) fn set(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> KillNotice {
        KillNotice {
            rx: self.tx.subscribe(),
        }
    }

    /// Wait until the latch is set.
    pub(crate) async fn wait(&self) {
        self.subscribe().wait().await;
    }
}

/// Awaitable notification that a guard killed (or, in alert-only mode,
/// would have killed) its process.
///
/// Obtained from [`Guard::killed`](crate::Guard::killed). Cloneable; every
/// clone resolves once the breach has happened.
#[derive(Debug, Clone)]
pub struct KillNotice {
    rx: watch::Receiver<bool>,
}

impl KillNotice {
    /// Whether the breach has already happened.
    pub fn is_killed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the breach.
    ///
    /// Returns `true` once it has happened, or `false` if every handle to
    /// the guard was dropped without a breach.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|killed| *killed).await.is_ok()
    }
}

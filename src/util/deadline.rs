//! Deadlines and bounded waits.
//!
//! `Deadline` is the single definition of "time elapsed since X compared
//! against budget Y" used for queue waits, run budgets and overall waits.
//! `run_bounded` / `run_bounded_blocking` run an operation on a dedicated
//! worker and give up waiting once a timeout passes. A timeout means the
//! result is unknown, not that the operation was undone: the async variant
//! aborts its task at the next await point, the blocking variant detaches its
//! thread.

use std::future::Future;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::warn;

use crate::core::BrokerError;

/// A budget measured from a fixed starting instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start measuring `budget` from now.
    #[must_use]
    pub fn start(budget: Duration) -> Self {
        Self::from_instant(Instant::now(), budget)
    }

    /// Measure `budget` from an existing instant.
    #[must_use]
    pub const fn from_instant(started: Instant, budget: Duration) -> Self {
        Self { started, budget }
    }

    /// Instant the budget is measured from.
    #[must_use]
    pub const fn started(&self) -> Instant {
        self.started
    }

    /// Configured budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time elapsed since the start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the budget is exhausted (zero once exceeded).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// True once strictly more than the budget has elapsed.
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.is_exceeded_at(Instant::now())
    }

    /// Same as [`Deadline::is_exceeded`] evaluated at `now`.
    #[must_use]
    pub fn is_exceeded_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) > self.budget
    }
}

/// Run `operation` as its own tokio task and wait at most `timeout` for it.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// - `BrokerError::WaitTimeout` if the operation did not finish in time; the
///   task is aborted best-effort.
/// - `BrokerError::Internal` if the operation panicked.
pub async fn run_bounded<F, T>(operation: F, timeout: Duration) -> Result<T, BrokerError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BrokerError::Internal(format!("bounded operation failed: {e}"))),
        Err(_) => {
            abort.abort();
            warn!(?timeout, "bounded operation timed out");
            Err(BrokerError::WaitTimeout { timeout })
        }
    }
}

/// Run a blocking `operation` on a dedicated OS thread and wait at most
/// `timeout` for its result.
///
/// # Errors
///
/// - `BrokerError::WaitTimeout` if the operation did not finish in time; the
///   thread keeps running detached.
/// - `BrokerError::Internal` if the thread could not be spawned or panicked.
pub fn run_bounded_blocking<F, T>(operation: F, timeout: Duration) -> Result<T, BrokerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("rsb-bounded-wait".into())
        .spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = tx.send(operation());
        })
        .map_err(|e| BrokerError::Internal(format!("failed to spawn bounded worker: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => {
            warn!(?timeout, "bounded blocking operation timed out");
            Err(BrokerError::WaitTimeout { timeout })
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(BrokerError::Internal("bounded worker exited without a result".into()))
        }
    }
}

//! Work unit abstraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AppResult, Session};

/// Observable progress flags of a work unit. Each flag only ever goes from
/// false to true.
#[derive(Debug, Default)]
pub struct WorkFlags {
    started: AtomicBool,
    finished: AtomicBool,
    any_errors: AtomicBool,
}

impl WorkFlags {
    /// Fresh flags, all false.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            any_errors: AtomicBool::new(false),
        }
    }

    /// Work entered its session.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Work left its session, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Work failed or was pre-empted.
    pub fn any_errors(&self) -> bool {
        self.any_errors.load(Ordering::Acquire)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn mark_errored(&self) {
        self.any_errors.store(true, Ordering::Release);
    }
}

/// Caller-supplied logic executed inside a broker-provided session.
///
/// The broker owns the flags: it marks the unit started before `run`, sets
/// `any_errors` if `run` fails or the unit is pre-empted, and marks it
/// finished after the session is closed. Resources the unit allocates for
/// itself (temporary files, ...) are released in its `Drop`.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_rsession_broker::core::{AppResult, Session, WorkFlags, WorkUnit};
///
/// struct SessionInfo {
///     flags: WorkFlags,
/// }
///
/// #[async_trait]
/// impl WorkUnit for SessionInfo {
///     async fn run(&self, session: Arc<dyn Session>) -> AppResult<()> {
///         session.eval("sessionInfo()").await?;
///         Ok(())
///     }
///
///     fn flags(&self) -> &WorkFlags {
///         &self.flags
///     }
/// }
/// ```
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Execute against `session`. The session is closed by the broker
    /// afterwards; implementations need not close it.
    async fn run(&self, session: Arc<dyn Session>) -> AppResult<()>;

    /// Progress flags maintained by the broker.
    fn flags(&self) -> &WorkFlags;

    /// See [`WorkFlags::is_started`].
    fn is_started(&self) -> bool {
        self.flags().is_started()
    }

    /// See [`WorkFlags::is_finished`].
    fn is_finished(&self) -> bool {
        self.flags().is_finished()
    }

    /// See [`WorkFlags::any_errors`].
    fn any_errors(&self) -> bool {
        self.flags().any_errors()
    }
}

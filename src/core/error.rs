//! Error types for broker operations.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by an execution back-end while opening or using a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The instance could not be reached.
    #[error("instance {address} unreachable: {reason}")]
    Unreachable {
        /// Address of the instance.
        address: String,
        /// Transport-level reason.
        reason: String,
    },
    /// The instance refused the handshake or login.
    #[error("handshake rejected: {0}")]
    Rejected(String),
    /// The instance speaks a protocol version older than supported.
    #[error("server version {found} is older than the required {required}")]
    Incompatible {
        /// Version reported by the server.
        found: u32,
        /// Minimum supported version.
        required: u32,
    },
    /// The session was already closed.
    #[error("session closed")]
    Closed,
    /// The back-end failed to evaluate an expression.
    #[error("evaluation failed: {0}")]
    Eval(String),
    /// File transfer or local I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors surfaced to task submitters and broker callers.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The request waited longer than its queue budget without admission.
    #[error("request queued for {waited:?}, exceeding its {budget:?} queue budget")]
    QueueTimeout {
        /// Time spent queueing.
        waited: Duration,
        /// Configured queue budget.
        budget: Duration,
    },
    /// A session could not be opened against the assigned instance.
    #[error("could not open session on {address}: {source}")]
    Connection {
        /// Address of the assigned instance.
        address: String,
        /// Underlying session failure.
        #[source]
        source: SessionError,
    },
    /// The task held its slot longer than its run budget and was pre-empted.
    #[error("run budget of {budget:?} exhausted, session force-closed")]
    RunExpired {
        /// Configured run budget.
        budget: Duration,
    },
    /// The work unit itself failed.
    #[error("work unit failed: {0:#}")]
    WorkUnit(#[source] anyhow::Error),
    /// A caller-side wait exceeded its bound; the awaited tasks keep running.
    #[error("wait timed out after {timeout:?}")]
    WaitTimeout {
        /// Bound that was exceeded.
        timeout: Duration,
    },
    /// The resource request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The broker configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The broker or its execution pool went away before the task resolved.
    #[error("broker shut down")]
    Shutdown,
    /// Internal failure (pool construction, panicked worker, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// True if the failing task had been admitted to an instance before it
    /// failed, false if it never got a slot (or the error is not task-related).
    #[must_use]
    pub const fn was_admitted(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::RunExpired { .. } | Self::WorkUnit(_)
        )
    }
}

/// Application-facing result used by work units.
pub type AppResult<T> = Result<T, anyhow::Error>;

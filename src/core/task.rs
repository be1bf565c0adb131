//! Task lifecycle: the two chained phases binding a request to a work unit.
//!
//! ```text
//! Created ─► Queued ─► Admitted ─► Connected ─► Running ─► Completed
//!              │           │           │           │  └───► Failed
//!              ▼           ▼           └─────┬─────┘
//!           Failed      Failed               ▼
//!       (queue timeout) (connection)      Expired (run budget, via sweep)
//! ```
//!
//! Phase one (acquire) polls the broker for admission and opens a session.
//! Phase two (run) is spawned from phase one's completion only if phase one
//! produced a session. The first terminal transition wins; whichever path
//! loses finds the session already taken and the outcome already published.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::broker::{BrokerCore, Spawn};
use crate::core::handle::{Completion, Outcome, TaskWatch};
use crate::core::stats::BrokerCounters;
use crate::core::{BrokerError, ResourceRequest, Session, WorkUnit};
use crate::util::Deadline;

/// Broker-local task identifier.
pub type TaskId = u64;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed, not yet started.
    Created,
    /// Waiting for admission.
    Queued,
    /// Assigned to an instance, session not yet open.
    Admitted,
    /// Session open, work not yet started.
    Connected,
    /// Work unit executing.
    Running,
    /// Work unit returned normally.
    Completed,
    /// Queue timeout, connection failure or work unit error.
    Failed,
    /// Pre-empted after exhausting its run budget.
    Expired,
}

impl TaskState {
    /// Completed, Failed or Expired.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Admitted and not yet terminal; only these states can expire.
    #[must_use]
    pub const fn holds_slot(self) -> bool {
        matches!(self, Self::Admitted | Self::Connected | Self::Running)
    }

    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Acquire,
    Run,
}

/// Mutable part of a task. Always locked after the broker registry, never
/// before it.
struct Control {
    state: TaskState,
    session: Option<Arc<dyn Session>>,
    acquire: Option<AbortHandle>,
    run: Option<AbortHandle>,
}

/// One request's journey from submission to a terminal state.
pub struct Task {
    id: TaskId,
    request: Arc<ResourceRequest>,
    work: Arc<dyn WorkUnit>,
    control: Mutex<Control>,
    completion: Completion,
    counters: Arc<BrokerCounters>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        request: Arc<ResourceRequest>,
        work: Arc<dyn WorkUnit>,
        counters: Arc<BrokerCounters>,
    ) -> (Arc<Self>, TaskWatch) {
        let (completion, watch) = Completion::new(id);
        let task = Arc::new(Self {
            id,
            request,
            work,
            control: Mutex::new(Control {
                state: TaskState::Created,
                session: None,
                acquire: None,
                run: None,
            }),
            completion,
            counters,
        });
        (task, watch)
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// The request this task serves.
    #[must_use]
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.control.lock().state
    }

    /// Start phase one on `spawner`; phase two is chained from it.
    pub(crate) fn launch<S>(self: &Arc<Self>, core: Arc<BrokerCore>, spawner: S)
    where
        S: Spawn + Clone + Send + Sync + 'static,
    {
        let (abort, registration) = AbortHandle::new_pair();
        let acquire = Abortable::new(Arc::clone(self).acquire_session(core), registration);
        if !self.register_abort(Phase::Acquire, abort) {
            return;
        }

        let task = Arc::clone(self);
        let continuation = spawner.clone();
        spawner.spawn(async move {
            match acquire.await {
                Ok(Ok(session)) => task.spawn_run(session, &continuation),
                Ok(Err(error)) => task.fail(error),
                Err(_aborted) => debug!(task_id = task.id, "session acquisition aborted"),
            }
        });
    }

    fn spawn_run<S: Spawn>(self: Arc<Self>, session: Arc<dyn Session>, spawner: &S) {
        let (abort, registration) = AbortHandle::new_pair();
        let run = Abortable::new(Arc::clone(&self).run_work(session), registration);
        if !self.register_abort(Phase::Run, abort) {
            return;
        }
        let task_id = self.id;
        spawner.spawn(async move {
            if run.await.is_err() {
                debug!(task_id, "run phase aborted");
            }
        });
    }

    /// Store a phase's abort handle, or abort it at once if the task already
    /// reached a terminal state.
    fn register_abort(&self, phase: Phase, abort: AbortHandle) -> bool {
        let mut control = self.control.lock();
        if control.state.is_terminal() {
            abort.abort();
            return false;
        }
        match phase {
            Phase::Acquire => control.acquire = Some(abort),
            Phase::Run => control.run = Some(abort),
        }
        true
    }

    async fn acquire_session(
        self: Arc<Self>,
        core: Arc<BrokerCore>,
    ) -> Result<Arc<dyn Session>, BrokerError> {
        self.transition(TaskState::Created, TaskState::Queued);
        let queue = Deadline::start(self.request.max_queue_wait());

        let instance = loop {
            if let Some(instance) = core.request_admission(&self) {
                break instance;
            }
            tokio::time::sleep(core.poll_interval()).await;
            if queue.is_exceeded() {
                return Err(BrokerError::QueueTimeout {
                    waited: queue.elapsed(),
                    budget: queue.budget(),
                });
            }
        };

        let session = core
            .connector()
            .connect(&instance)
            .await
            .map_err(|source| BrokerError::Connection {
                address: instance.address().to_owned(),
                source,
            })?;
        info!(
            task_id = self.id,
            request = %self.request,
            instance = %instance,
            "session opened"
        );

        if !self.attach_session(Arc::clone(&session)) {
            // Expired while connecting; the sweep already resolved the task.
            session.close();
            return Err(BrokerError::RunExpired {
                budget: self.request.max_run_duration(),
            });
        }
        Ok(session)
    }

    async fn run_work(self: Arc<Self>, session: Arc<dyn Session>) {
        if !self.begin_running() {
            session.close();
            return;
        }
        let flags = self.work.flags();

        let result = self.work.run(session).await;
        if result.is_err() {
            flags.mark_errored();
        }
        self.close_session();
        flags.mark_finished();

        match result {
            Ok(()) => {
                debug!(task_id = self.id, request = %self.request, "work unit completed");
                self.finish(TaskState::Completed, Ok(()));
            }
            Err(e) => {
                warn!(task_id = self.id, request = %self.request, error = %e, "work unit failed");
                self.finish(TaskState::Failed, Err(BrokerError::WorkUnit(e)));
            }
        }
    }

    /// Pre-empt the task if it has held its slots longer than its run budget.
    /// Called by the broker sweep under the registry lock.
    pub(crate) fn expire_if_overdue(&self, now: Instant) -> bool {
        let was_running;
        let session = {
            let mut control = self.control.lock();
            if !control.state.holds_slot() {
                return false;
            }
            let Some(deadline) = self.request.run_deadline() else {
                return false;
            };
            if !deadline.is_exceeded_at(now) {
                debug!(
                    task_id = self.id,
                    request = %self.request,
                    elapsed = ?deadline.elapsed(),
                    "task still in time"
                );
                return false;
            }
            was_running = control.state == TaskState::Running;
            control.state = TaskState::Expired;
            if let Some(abort) = control.acquire.take() {
                abort.abort();
            }
            if let Some(abort) = control.run.take() {
                abort.abort();
            }
            control.session.take()
        };

        info!(
            task_id = self.id,
            request = %self.request,
            budget = ?self.request.max_run_duration(),
            "task exhausted its run budget"
        );
        if let Some(session) = session {
            session.close();
        }
        let flags = self.work.flags();
        if was_running {
            flags.mark_errored();
            flags.mark_finished();
        }
        let outcome = Err(BrokerError::RunExpired {
            budget: self.request.max_run_duration(),
        });
        self.counters.record_finish(TaskState::Expired, &outcome);
        self.completion.resolve(TaskState::Expired, outcome);
        true
    }

    /// Queued → Admitted, called by the broker once the assignment is stamped.
    pub(crate) fn mark_admitted(&self) -> bool {
        self.transition(TaskState::Queued, TaskState::Admitted)
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut control = self.control.lock();
        if control.state != from {
            return false;
        }
        control.state = to;
        true
    }

    /// Connected → Running. The unit is flagged started under the same lock,
    /// so an expiry that observes `Running` also observes the flag.
    fn begin_running(&self) -> bool {
        let mut control = self.control.lock();
        if control.state != TaskState::Connected {
            return false;
        }
        control.state = TaskState::Running;
        self.work.flags().mark_started();
        true
    }

    fn attach_session(&self, session: Arc<dyn Session>) -> bool {
        let mut control = self.control.lock();
        if control.state != TaskState::Admitted {
            return false;
        }
        control.session = Some(session);
        control.state = TaskState::Connected;
        true
    }

    /// Take the session out and close it; a second call finds nothing.
    fn close_session(&self) {
        let session = self.control.lock().session.take();
        if let Some(session) = session {
            session.close();
        }
    }

    fn fail(&self, error: BrokerError) {
        warn!(task_id = self.id, request = %self.request, error = %error, "task failed");
        self.finish(TaskState::Failed, Err(error));
    }

    /// Publish a terminal state unless another path already did.
    fn finish(&self, state: TaskState, outcome: Outcome) -> bool {
        {
            let mut control = self.control.lock();
            if control.state.is_terminal() {
                return false;
            }
            control.state = state;
            control.acquire = None;
            control.run = None;
        }
        self.counters.record_finish(state, &outcome);
        self.completion.resolve(state, outcome);
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("request", &self.request.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

//! Handles returned to task submitters.
//!
//! A task resolves exactly once. The resolution (final state and outcome) is
//! parked in a shared slot and announced on a `watch` channel, so it can be
//! awaited from async code, waited on from plain threads, and observed by any
//! number of [`TaskWatch`]es without consuming it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::{BrokerError, ResourceRequest, Task, TaskId, TaskState, WorkUnit};

/// Final result of a task, before it is handed back to the submitter.
pub(crate) type Outcome = Result<(), BrokerError>;

struct Resolution {
    state: TaskState,
    outcome: Option<Outcome>,
}

type Slot = Arc<Mutex<Option<Resolution>>>;

/// Producer side, owned by the task. Dropping it unresolved makes every
/// waiter return `BrokerError::Shutdown`.
pub(crate) struct Completion {
    slot: Slot,
    done: watch::Sender<bool>,
}

impl Completion {
    pub(crate) fn new(task_id: TaskId) -> (Self, TaskWatch) {
        let slot: Slot = Arc::new(Mutex::new(None));
        let (done, rx) = watch::channel(false);
        let watch = TaskWatch {
            task_id,
            slot: Arc::clone(&slot),
            done: rx,
        };
        (Self { slot, done }, watch)
    }

    pub(crate) fn resolve(&self, state: TaskState, outcome: Outcome) {
        *self.slot.lock() = Some(Resolution {
            state,
            outcome: Some(outcome),
        });
        self.done.send_replace(true);
    }
}

/// Cloneable, non-consuming view of a task's completion.
#[derive(Clone)]
pub struct TaskWatch {
    task_id: TaskId,
    slot: Slot,
    done: watch::Receiver<bool>,
}

impl TaskWatch {
    /// Task being watched.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// True once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Terminal state, once reached.
    #[must_use]
    pub fn final_state(&self) -> Option<TaskState> {
        self.slot.lock().as_ref().map(|r| r.state)
    }

    /// Wait until the task reached a terminal state. Does not report how it
    /// ended; use [`TaskHandle::wait`] for that.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Shutdown` if the task was dropped unresolved.
    pub async fn finished(&self) -> Result<(), BrokerError> {
        if self.is_finished() {
            return Ok(());
        }
        let mut rx = self.done.clone();
        rx.wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| BrokerError::Shutdown)
    }
}

impl std::fmt::Debug for TaskWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWatch")
            .field("task_id", &self.task_id)
            .field("final_state", &self.final_state())
            .finish()
    }
}

/// Future-like handle returned at submission, resolving to the work unit.
pub struct TaskHandle<W: WorkUnit> {
    watch: TaskWatch,
    request: Arc<ResourceRequest>,
    work: Arc<W>,
    task: Weak<Task>,
}

impl<W: WorkUnit> TaskHandle<W> {
    pub(crate) const fn new(
        watch: TaskWatch,
        request: Arc<ResourceRequest>,
        work: Arc<W>,
        task: Weak<Task>,
    ) -> Self {
        Self {
            watch,
            request,
            work,
            task,
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.watch.task_id
    }

    /// The request this task was submitted with.
    #[must_use]
    pub const fn request(&self) -> &Arc<ResourceRequest> {
        &self.request
    }

    /// The submitted work unit.
    #[must_use]
    pub const fn work(&self) -> &Arc<W> {
        &self.work
    }

    /// Current lifecycle state. `None` only if the task vanished without
    /// resolving (broker shut down).
    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        self.watch
            .final_state()
            .or_else(|| self.task.upgrade().map(|t| t.state()))
    }

    /// True once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.watch.is_finished()
    }

    /// Non-consuming view usable with `wait_all`.
    #[must_use]
    pub fn watch(&self) -> TaskWatch {
        self.watch.clone()
    }

    /// Wait for the task and return the work unit, or the reason it failed.
    ///
    /// # Errors
    ///
    /// `QueueTimeout`, `Connection`, `RunExpired` or `WorkUnit` depending on
    /// how the task ended; `Shutdown` if the broker went away first.
    pub async fn wait(self) -> Result<Arc<W>, BrokerError> {
        self.watch.finished().await?;
        let outcome = self
            .watch
            .slot
            .lock()
            .as_mut()
            .and_then(|r| r.outcome.take());
        match outcome {
            Some(Ok(())) => Ok(self.work),
            Some(Err(e)) => Err(e),
            None => Err(BrokerError::Internal(format!(
                "outcome of task {} already taken",
                self.watch.task_id
            ))),
        }
    }

    /// Blocking variant of [`TaskHandle::wait`]. Must not be called from an
    /// async context.
    ///
    /// # Errors
    ///
    /// Same as [`TaskHandle::wait`].
    pub fn wait_blocking(self) -> Result<Arc<W>, BrokerError> {
        futures::executor::block_on(self.wait())
    }
}

impl<W: WorkUnit> std::fmt::Debug for TaskHandle<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("request", &self.request.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

//! Submission API.
//!
//! Free functions over a [`Broker`] that turn a work unit and a request into
//! a running task, plus helpers to wait on several tasks at once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::core::{
    Broker, BrokerError, ResourceRequest, Spawn, Task, TaskHandle, TaskWatch, WorkUnit,
};
use crate::util::run_bounded_blocking;

/// Submit `work` under `request`. The task starts queuing immediately.
///
/// The request is owned by the task from here on; its assignment can be
/// observed through [`TaskHandle::request`].
pub fn submit<S, W>(broker: &Broker<S>, work: Arc<W>, request: ResourceRequest) -> TaskHandle<W>
where
    S: Spawn + Clone + Send + Sync + 'static,
    W: WorkUnit,
{
    let request = Arc::new(request);
    let unit: Arc<dyn WorkUnit> = Arc::clone(&work) as Arc<dyn WorkUnit>;
    let (task, watch) = Task::new(
        broker.next_task_id(),
        Arc::clone(&request),
        unit,
        broker.counters(),
    );
    let handle = TaskHandle::new(watch, request, work, Arc::downgrade(&task));
    broker.register(&task);
    handle
}

/// Submit `work` with a one-slot request and default budgets.
pub fn submit_default<S, W>(broker: &Broker<S>, work: Arc<W>) -> TaskHandle<W>
where
    S: Spawn + Clone + Send + Sync + 'static,
    W: WorkUnit,
{
    submit(broker, work, ResourceRequest::default())
}

/// Submit and wait for the outcome.
///
/// # Errors
///
/// See [`TaskHandle::wait`].
pub async fn submit_and_wait<S, W>(
    broker: &Broker<S>,
    work: Arc<W>,
    request: ResourceRequest,
) -> Result<Arc<W>, BrokerError>
where
    S: Spawn + Clone + Send + Sync + 'static,
    W: WorkUnit,
{
    submit(broker, work, request).wait().await
}

/// Blocking variant of [`submit_and_wait`]. Must not be called from an async
/// context.
///
/// # Errors
///
/// See [`TaskHandle::wait`].
pub fn submit_and_wait_blocking<S, W>(
    broker: &Broker<S>,
    work: Arc<W>,
    request: ResourceRequest,
) -> Result<Arc<W>, BrokerError>
where
    S: Spawn + Clone + Send + Sync + 'static,
    W: WorkUnit,
{
    submit(broker, work, request).wait_blocking()
}

/// Wait until every watched task reached a terminal state.
///
/// Only reports whether everything finished in time; how each task ended is
/// read from its handle. Tasks keep running after a timeout.
///
/// # Errors
///
/// `WaitTimeout` if `timeout` elapsed first, `Shutdown` if a task was dropped
/// unresolved.
pub async fn wait_all<I>(timeout: Duration, watches: I) -> Result<(), BrokerError>
where
    I: IntoIterator<Item = TaskWatch>,
{
    let watches: Vec<TaskWatch> = watches.into_iter().collect();
    let pending = watches.len();
    let all = join_all(watches.iter().map(|w| w.finished()));
    match tokio::time::timeout(timeout, all).await {
        Ok(results) => results.into_iter().collect(),
        Err(_) => {
            let unfinished = watches.iter().filter(|w| !w.is_finished()).count();
            tracing::warn!(pending, unfinished, ?timeout, "wait_all timed out");
            Err(BrokerError::WaitTimeout { timeout })
        }
    }
}

/// Blocking variant of [`wait_all`]. The wait runs on a dedicated thread, so
/// it may be called from any non-async context.
///
/// # Errors
///
/// Same as [`wait_all`].
pub fn wait_all_blocking<I>(timeout: Duration, watches: I) -> Result<(), BrokerError>
where
    I: IntoIterator<Item = TaskWatch>,
{
    let watches: Vec<TaskWatch> = watches.into_iter().collect();
    run_bounded_blocking(
        move || {
            futures::executor::block_on(async {
                let results = join_all(watches.iter().map(|w| w.finished())).await;
                results.into_iter().collect::<Result<(), BrokerError>>()
            })
        },
        timeout,
    )?
}

//! Admission controller.
//!
//! The broker owns the registry of tracked tasks and decides, under a single
//! lock, whether a task may take slots on one of its instances. Every
//! admission request first pre-empts overdue tasks and collects finished
//! ones, so freed slots are visible to the very request that triggered the
//! sweep.
//!
//! Admission is first-fit over the instances in configured order. There is
//! no fairness among competing tasks: whichever task polls first after slots
//! free up wins them, and a large request can starve behind a stream of small
//! ones until its queue budget runs out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::stats::{BrokerCounters, BrokerStats, InstanceUsage};
use crate::core::{BrokerError, ComputeInstance, Connector, Task, TaskId, TaskState};
use crate::runtime::{OwnedRuntime, TokioSpawner};

/// Simple spawn abstraction to decouple the broker from a concrete runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, Arc<Task>>,
}

impl Registry {
    /// Slots held on the instance at `index` by tracked tasks.
    fn used_slots(&self, index: usize) -> u64 {
        self.tasks
            .values()
            .filter(|t| t.request().is_assigned_to(index))
            .map(|t| u64::from(t.request().requested_slots()))
            .sum()
    }
}

/// State shared between the broker and its running tasks.
pub(crate) struct BrokerCore {
    instances: Vec<Arc<ComputeInstance>>,
    registry: Mutex<Registry>,
    connector: Arc<dyn Connector>,
    poll_interval: Duration,
    counters: Arc<BrokerCounters>,
    audit: Mutex<Option<Box<dyn AuditSink>>>,
}

impl BrokerCore {
    fn new(config: &BrokerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            instances: config.instances.iter().cloned().map(Arc::new).collect(),
            registry: Mutex::new(Registry::default()),
            connector,
            poll_interval: config.poll_interval(),
            counters: Arc::new(BrokerCounters::default()),
            audit: Mutex::new(None),
        }
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub(crate) const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Try to admit `task`. Returns the instance it is assigned to, or `None`
    /// if no instance currently has room for it.
    pub(crate) fn request_admission(&self, task: &Arc<Task>) -> Option<Arc<ComputeInstance>> {
        let now = Instant::now();
        let mut registry = self.registry.lock();
        self.expire_overdue(&registry, now);
        self.collect_garbage(&mut registry);

        let request = task.request();
        if let Some(assignment) = request.assignment() {
            return Some(Arc::clone(&assignment.instance));
        }
        if task.state().is_terminal() {
            return None;
        }
        registry.tasks.entry(task.id()).or_insert_with(|| {
            info!(
                task_id = task.id(),
                request = %request,
                slots = request.requested_slots(),
                "task arrived"
            );
            Arc::clone(task)
        });

        let slots = u64::from(request.requested_slots());
        for (index, instance) in self.instances.iter().enumerate() {
            let used = registry.used_slots(index);
            if u64::from(instance.capacity()) < used + slots {
                continue;
            }
            if !request.assign(Arc::clone(instance), index, now) {
                return request.assigned_instance().cloned();
            }
            task.mark_admitted();
            self.counters.admitted.fetch_add(1, Ordering::Relaxed);
            info!(
                task_id = task.id(),
                request = %request,
                instance = %instance,
                slots,
                used = used + slots,
                capacity = instance.capacity(),
                "task admitted"
            );
            self.audit(task, AuditAction::Admit, None);
            return Some(Arc::clone(instance));
        }

        debug!(task_id = task.id(), request = %request, slots, "no instance has room");
        None
    }

    /// Pre-empt every tracked task that outlived its run budget.
    fn expire_overdue(&self, registry: &Registry, now: Instant) -> usize {
        let mut expired = 0;
        for task in registry.tasks.values() {
            if task.expire_if_overdue(now) {
                expired += 1;
                self.audit(task, AuditAction::Expire, None);
            }
        }
        expired
    }

    /// Drop terminal tasks from the registry, releasing their slots.
    fn collect_garbage(&self, registry: &mut Registry) -> usize {
        let finished: Vec<Arc<Task>> = registry
            .tasks
            .values()
            .filter(|t| t.state().is_terminal())
            .cloned()
            .collect();
        for task in &finished {
            registry.tasks.remove(&task.id());
            debug!(task_id = task.id(), state = %task.state(), "task collected");
            self.audit(task, AuditAction::Collect, Some(task.state().to_string()));
        }
        finished.len()
    }

    fn audit(&self, task: &Task, action: AuditAction, payload: Option<String>) {
        let mut audit = self.audit.lock();
        if let Some(sink) = audit.as_mut() {
            let request = task.request();
            let instance = request.assigned_instance().map(|i| i.address());
            sink.record(build_audit_event(
                task.id(),
                request.id(),
                instance,
                action,
                payload,
            ));
        }
    }
}

/// Admission broker over a fixed fleet of compute instances.
///
/// By default the broker runs its tasks on a tokio runtime it owns, sized to
/// the fleet's total capacity plus some slack. Dropping the broker shuts that
/// runtime down in the background; tasks that had not resolved report
/// `BrokerError::Shutdown` to their waiters.
pub struct Broker<S = TokioSpawner> {
    core: Arc<BrokerCore>,
    spawner: S,
    pool_threads: Option<usize>,
    next_task_id: AtomicU64,
    // Declared last so the runtime outlives everything above it on drop.
    runtime: Option<OwnedRuntime>,
}

impl Broker<TokioSpawner> {
    /// Create a broker with its own worker pool.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate, `Internal` if
    /// the runtime cannot be built.
    pub fn new(config: &BrokerConfig, connector: Arc<dyn Connector>) -> Result<Self, BrokerError> {
        config.validate().map_err(BrokerError::InvalidConfig)?;
        let threads = config.pool_size();
        let runtime = OwnedRuntime::with_worker_threads(threads)
            .map_err(|e| BrokerError::Internal(format!("failed to build worker pool: {e}")))?;
        info!(
            instances = config.instances.len(),
            capacity = config.total_capacity(),
            threads,
            "broker started"
        );
        Ok(Self {
            core: Arc::new(BrokerCore::new(config, connector)),
            spawner: runtime.spawner(),
            pool_threads: Some(threads),
            next_task_id: AtomicU64::new(1),
            runtime: Some(runtime),
        })
    }
}

impl<S> Broker<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Create a broker that runs its tasks on `spawner`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn with_spawner(
        config: &BrokerConfig,
        connector: Arc<dyn Connector>,
        spawner: S,
    ) -> Result<Self, BrokerError> {
        config.validate().map_err(BrokerError::InvalidConfig)?;
        info!(
            instances = config.instances.len(),
            capacity = config.total_capacity(),
            "broker started on external spawner"
        );
        Ok(Self {
            core: Arc::new(BrokerCore::new(config, connector)),
            spawner,
            pool_threads: None,
            next_task_id: AtomicU64::new(1),
            runtime: None,
        })
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(self, sink: Box<dyn AuditSink>) -> Self {
        *self.core.audit.lock() = Some(sink);
        self
    }

    /// Configured instances, in admission order.
    #[must_use]
    pub fn instances(&self) -> &[Arc<ComputeInstance>] {
        &self.core.instances
    }

    /// Delay between two admission attempts of a queued task.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.core.poll_interval
    }

    /// Sum of all instance capacities.
    #[must_use]
    pub fn total_capacity(&self) -> u64 {
        self.core
            .instances
            .iter()
            .map(|i| u64::from(i.capacity()))
            .sum()
    }

    /// Number of tasks in the registry.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.core.registry.lock().tasks.len()
    }

    /// Pre-empt overdue tasks and collect finished ones without admitting
    /// anything. Returns how many tasks were pre-empted.
    pub fn sweep(&self) -> usize {
        let mut registry = self.core.registry.lock();
        let expired = self.core.expire_overdue(&registry, Instant::now());
        let collected = self.core.collect_garbage(&mut registry);
        debug!(expired, collected, "sweep finished");
        expired
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let mut stats = BrokerStats {
            pool_threads: self.pool_threads,
            ..BrokerStats::default()
        };
        {
            let registry = self.core.registry.lock();
            stats.tracked = registry.tasks.len();
            for task in registry.tasks.values() {
                match task.state() {
                    TaskState::Queued => stats.queued += 1,
                    state if state.holds_slot() => stats.active += 1,
                    _ => {}
                }
            }
            stats.instances = self
                .core
                .instances
                .iter()
                .enumerate()
                .map(|(index, instance)| InstanceUsage {
                    address: instance.address().to_owned(),
                    capacity: instance.capacity(),
                    used: registry.used_slots(index),
                })
                .collect();
        }
        self.core.counters.fill(&mut stats);
        stats
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn counters(&self) -> Arc<BrokerCounters> {
        Arc::clone(&self.core.counters)
    }

    /// Start a freshly created task.
    pub(crate) fn register(&self, task: &Arc<Task>) {
        self.core.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = task.id(), request = %task.request(), "task submitted");
        self.core.audit(task, AuditAction::Submit, None);
        task.launch(Arc::clone(&self.core), self.spawner.clone());
    }
}

impl<S> Drop for Broker<S> {
    fn drop(&mut self) {
        if self.runtime.is_some() {
            debug!("broker dropped, shutting down worker pool");
        }
    }
}

impl<S> std::fmt::Debug for Broker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("instances", &self.core.instances)
            .field("poll_interval", &self.core.poll_interval)
            .field("pool_threads", &self.pool_threads)
            .finish_non_exhaustive()
    }
}

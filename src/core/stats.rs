//! Broker statistics and lifetime counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::core::{BrokerError, TaskState};

/// Slot usage of one instance at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceUsage {
    /// Instance address.
    pub address: String,
    /// Total slots.
    pub capacity: u32,
    /// Slots held by tracked, admitted tasks.
    pub used: u64,
}

/// Point-in-time view of a broker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerStats {
    /// Worker threads of the owned pool, `None` for an external spawner.
    pub pool_threads: Option<usize>,
    /// Tasks currently in the registry.
    pub tracked: usize,
    /// Tracked tasks still waiting for admission.
    pub queued: usize,
    /// Tracked tasks holding slots.
    pub active: usize,
    /// Per-instance usage in configured order.
    pub instances: Vec<InstanceUsage>,
    /// Tasks submitted.
    pub submitted: u64,
    /// Tasks admitted to an instance.
    pub admitted: u64,
    /// Tasks completed successfully.
    pub completed: u64,
    /// Tasks failed (queue timeout, connection, work unit error).
    pub failed: u64,
    /// Tasks pre-empted by the expiry sweep.
    pub expired: u64,
    /// Failed tasks that never got a slot.
    pub queue_timeouts: u64,
    /// Failed tasks whose session could not be opened.
    pub connection_failures: u64,
}

/// Lifetime counters shared by the broker and its tasks.
#[derive(Debug, Default)]
pub(crate) struct BrokerCounters {
    pub submitted: AtomicU64,
    pub admitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub expired: AtomicU64,
    pub queue_timeouts: AtomicU64,
    pub connection_failures: AtomicU64,
}

impl BrokerCounters {
    /// Count a task reaching `state` with `outcome`.
    pub fn record_finish(&self, state: TaskState, outcome: &Result<(), BrokerError>) {
        match state {
            TaskState::Completed => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            TaskState::Expired => {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
            TaskState::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                match outcome {
                    Err(BrokerError::QueueTimeout { .. }) => {
                        self.queue_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(BrokerError::Connection { .. }) => {
                        self.connection_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Copy the counters into `stats`.
    pub fn fill(&self, stats: &mut BrokerStats) {
        stats.submitted = self.submitted.load(Ordering::Relaxed);
        stats.admitted = self.admitted.load(Ordering::Relaxed);
        stats.completed = self.completed.load(Ordering::Relaxed);
        stats.failed = self.failed.load(Ordering::Relaxed);
        stats.expired = self.expired.load(Ordering::Relaxed);
        stats.queue_timeouts = self.queue_timeouts.load(Ordering::Relaxed);
        stats.connection_failures = self.connection_failures.load(Ordering::Relaxed);
    }
}

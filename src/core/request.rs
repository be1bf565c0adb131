//! Resource requests and their admission stamp.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::core::{BrokerError, ComputeInstance};
use crate::util::Deadline;

/// Default run and queue budget.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Identity of a request. Two requests with identical fields are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "#{}", &simple[..8])
    }
}

/// Where and when a request was admitted.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Instance the request runs on.
    pub instance: Arc<ComputeInstance>,
    /// Position of the instance in the broker's configured list.
    pub index: usize,
    /// Admission instant; the run budget is measured from here.
    pub accepted_at: Instant,
}

/// What a caller wants: how many slots, for how long, and how long it is
/// willing to queue for them.
///
/// Everything but the assignment is fixed at construction. The assignment is
/// a write-once cell stamped by the broker under its lock.
#[derive(Debug)]
pub struct ResourceRequest {
    id: RequestId,
    requested_slots: u32,
    max_run_duration: Duration,
    max_queue_wait: Duration,
    assignment: OnceLock<Assignment>,
}

impl ResourceRequest {
    /// Start building a request with default budgets and one slot.
    #[must_use]
    pub fn builder() -> ResourceRequestBuilder {
        ResourceRequestBuilder::default()
    }

    /// Request identity.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Number of slots required on a single instance.
    #[must_use]
    pub const fn requested_slots(&self) -> u32 {
        self.requested_slots
    }

    /// Budget once admitted.
    #[must_use]
    pub const fn max_run_duration(&self) -> Duration {
        self.max_run_duration
    }

    /// Budget while waiting for admission.
    #[must_use]
    pub const fn max_queue_wait(&self) -> Duration {
        self.max_queue_wait
    }

    /// Admission stamp, once the broker assigned an instance.
    #[must_use]
    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.get()
    }

    /// Instance assigned at admission.
    #[must_use]
    pub fn assigned_instance(&self) -> Option<&Arc<ComputeInstance>> {
        self.assignment.get().map(|a| &a.instance)
    }

    /// Admission instant.
    #[must_use]
    pub fn accepted_at(&self) -> Option<Instant> {
        self.assignment.get().map(|a| a.accepted_at)
    }

    /// True if assigned to the instance at `index` in the broker's list.
    pub(crate) fn is_assigned_to(&self, index: usize) -> bool {
        self.assignment.get().is_some_and(|a| a.index == index)
    }

    /// Run budget measured from admission.
    pub(crate) fn run_deadline(&self) -> Option<Deadline> {
        self.accepted_at()
            .map(|at| Deadline::from_instant(at, self.max_run_duration))
    }

    /// Stamp the assignment. Returns false if the request was already
    /// assigned, leaving the first assignment untouched.
    pub(crate) fn assign(&self, instance: Arc<ComputeInstance>, index: usize, now: Instant) -> bool {
        self.assignment
            .set(Assignment {
                instance,
                index,
                accepted_at: now,
            })
            .is_ok()
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        ResourceRequestBuilder::default().into_request()
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

/// Builder for [`ResourceRequest`].
#[derive(Debug, Clone)]
pub struct ResourceRequestBuilder {
    requested_slots: u32,
    max_run_duration: Duration,
    max_queue_wait: Duration,
}

impl Default for ResourceRequestBuilder {
    fn default() -> Self {
        Self {
            requested_slots: 1,
            max_run_duration: DEFAULT_BUDGET,
            max_queue_wait: DEFAULT_BUDGET,
        }
    }
}

impl ResourceRequestBuilder {
    /// Slots required on a single instance (at least 1).
    #[must_use]
    pub const fn requested_slots(mut self, slots: u32) -> Self {
        self.requested_slots = slots;
        self
    }

    /// Maximum time the request may hold its slots once admitted.
    #[must_use]
    pub const fn max_run_duration(mut self, budget: Duration) -> Self {
        self.max_run_duration = budget;
        self
    }

    /// Maximum time the request may wait for admission.
    #[must_use]
    pub const fn max_queue_wait(mut self, budget: Duration) -> Self {
        self.max_queue_wait = budget;
        self
    }

    /// Finish the request.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidRequest` if zero slots were requested.
    pub fn build(self) -> Result<ResourceRequest, BrokerError> {
        if self.requested_slots == 0 {
            return Err(BrokerError::InvalidRequest(
                "requested_slots must be at least 1".into(),
            ));
        }
        Ok(self.into_request())
    }

    fn into_request(self) -> ResourceRequest {
        ResourceRequest {
            id: RequestId::new(),
            requested_slots: self.requested_slots,
            max_run_duration: self.max_run_duration,
            max_queue_wait: self.max_queue_wait,
            assignment: OnceLock::new(),
        }
    }
}

//! Audit sink implementations.
//!
//! The broker reports every submission, admission, expiry and collection of
//! a task to an optional sink.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::core::{RequestId, TaskId};
use crate::util::clock::now_ms;

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Handed to the broker.
    Submit,
    /// Assigned to an instance.
    Admit,
    /// Pre-empted after exhausting its run budget.
    Expire,
    /// Removed from the registry after reaching a terminal state.
    Collect,
}

impl AuditAction {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Admit => "admit",
            Self::Expire => "expire",
            Self::Collect => "collect",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Request identity, as displayed in logs.
    pub request: String,
    /// Instance address, once assigned.
    pub instance: Option<String>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory sink. Clones share the same buffer, so a test can keep
/// one clone and hand the other to the broker.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events with the given action.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    task_id: TaskId,
    request: RequestId,
    instance: Option<&str>,
    action: AuditAction,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id,
        request: request.to_string(),
        instance: instance.map(str::to_owned),
        action,
        created_at_ms: now_ms(),
        payload,
    }
}

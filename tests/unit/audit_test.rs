//! Tests for audit sink

use prometheus_rsession_broker::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, ResourceRequest,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let request = ResourceRequest::default();

    let event = build_audit_event(
        1,
        request.id(),
        Some("R://node"),
        AuditAction::Admit,
        Some("payload".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].request, request.to_string());
    assert_eq!(events[0].instance.as_deref(), Some("R://node"));
    assert_eq!(events[0].action, AuditAction::Admit);
    assert!(events[0].created_at_ms > 0);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let request = ResourceRequest::default();

    sink.record(build_audit_event(1, request.id(), None, AuditAction::Submit, None));
    sink.record(build_audit_event(2, request.id(), None, AuditAction::Submit, None));
    sink.record(build_audit_event(3, request.id(), None, AuditAction::Submit, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2); // First one popped
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_audit_sink_clones_share_events() {
    let sink = InMemoryAuditSink::new(10);
    let mut writer = sink.clone();
    let request = ResourceRequest::default();

    writer.record(build_audit_event(7, request.id(), None, AuditAction::Expire, None));
    writer.record(build_audit_event(7, request.id(), None, AuditAction::Collect, None));

    assert_eq!(sink.events().len(), 2);
    assert_eq!(sink.events_for(AuditAction::Expire).len(), 1);
    assert_ne!(sink.events()[0].event_id, sink.events()[1].event_id);
}

#[test]
fn test_audit_action_labels() {
    assert_eq!(AuditAction::Collect.to_string(), "collect");
    assert_eq!(
        serde_json::to_string(&AuditAction::Submit).unwrap(),
        "\"submit\""
    );
}

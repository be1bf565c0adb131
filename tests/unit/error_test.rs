//! Tests for error types

use std::time::Duration;

use prometheus_rsession_broker::core::{BrokerError, SessionError};

#[test]
fn test_queue_timeout_error() {
    let err = BrokerError::QueueTimeout {
        waited: Duration::from_millis(1020),
        budget: Duration::from_secs(1),
    };
    assert_eq!(
        format!("{}", err),
        "request queued for 1.02s, exceeding its 1s queue budget"
    );
    assert!(!err.was_admitted());
}

#[test]
fn test_connection_error_keeps_source() {
    let err = BrokerError::Connection {
        address: "R://node".to_string(),
        source: SessionError::Rejected("bad credentials".to_string()),
    };
    assert_eq!(
        format!("{}", err),
        "could not open session on R://node: handshake rejected: bad credentials"
    );
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "handshake rejected: bad credentials");
    assert!(err.was_admitted());
}

#[test]
fn test_run_expired_error() {
    let err = BrokerError::RunExpired {
        budget: Duration::from_secs(2),
    };
    assert_eq!(format!("{}", err), "run budget of 2s exhausted, session force-closed");
    assert!(err.was_admitted());
}

#[test]
fn test_work_unit_error_shows_chain() {
    let inner = anyhow::anyhow!("disk full").context("writing results");
    let err = BrokerError::WorkUnit(inner);
    assert_eq!(format!("{}", err), "work unit failed: writing results: disk full");
    assert!(err.was_admitted());
}

#[test]
fn test_caller_side_errors_were_not_admitted() {
    assert!(!BrokerError::WaitTimeout { timeout: Duration::from_secs(1) }.was_admitted());
    assert!(!BrokerError::Shutdown.was_admitted());
    assert!(!BrokerError::InvalidRequest("x".to_string()).was_admitted());
    assert_eq!(format!("{}", BrokerError::Shutdown), "broker shut down");
}

#[test]
fn test_session_error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.R");
    let err = SessionError::from(io);
    assert_eq!(err, SessionError::Io("missing.R".to_string()));
    assert_eq!(
        format!("{}", SessionError::Incompatible { found: 101, required: 103 }),
        "server version 101 is older than the required 103"
    );
}

//! Tests for utility functions

use std::time::{Duration, Instant};

use prometheus_rsession_broker::core::BrokerError;
use prometheus_rsession_broker::util::{
    init_tracing, now_ms, run_bounded, run_bounded_blocking, Deadline,
};

#[test]
fn test_now_ms_advances() {
    let a = now_ms();
    std::thread::sleep(Duration::from_millis(2));
    assert!(now_ms() > a);
}

#[test]
fn test_deadline_accessors() {
    let start = Instant::now();
    let deadline = Deadline::from_instant(start, Duration::from_secs(5));
    assert_eq!(deadline.started(), start);
    assert_eq!(deadline.budget(), Duration::from_secs(5));
    assert!(!deadline.is_exceeded_at(start + Duration::from_secs(5)));
    assert!(deadline.is_exceeded_at(start + Duration::from_secs(6)));
}

#[test]
fn test_run_bounded_blocking_returns_value() {
    let value = run_bounded_blocking(|| 40 + 2, Duration::from_secs(1)).unwrap();
    assert_eq!(value, 42);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_bounded_aborts_on_timeout() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let result = run_bounded(
        async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = tx.send(());
        },
        Duration::from_millis(20),
    )
    .await;
    assert!(matches!(result, Err(BrokerError::WaitTimeout { .. })));
    // The aborted task drops its sender without sending
    assert!(rx.await.is_err());
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialized");
}

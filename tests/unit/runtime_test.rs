//! Tests for tokio spawner utilities

use prometheus_rsession_broker::core::Spawn;
use prometheus_rsession_broker::runtime::{OwnedRuntime, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_try_current_outside_runtime() {
    assert!(TokioSpawner::try_current().is_none());
}

#[test]
fn test_owned_runtime_runs_and_shuts_down() {
    let runtime = OwnedRuntime::with_worker_threads(0).unwrap();
    assert_eq!(runtime.worker_threads(), 1);

    let (tx, rx) = crossbeam_channel::bounded(1);
    runtime.spawner().spawn(async move {
        let name = std::thread::current().name().map(str::to_owned);
        tx.send(name).unwrap();
    });
    let name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("rsb-worker"));
    drop(runtime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_owned_runtime_dropped_inside_async_context() {
    let runtime = OwnedRuntime::with_worker_threads(1).unwrap();
    drop(runtime);
}

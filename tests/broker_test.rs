//! Integration tests for admission, queueing and pre-emption.
//!
//! This test validates:
//! 1. No instance ever carries more admitted slots than its capacity
//! 2. Each request is assigned exactly once
//! 3. Queue budgets and run budgets are enforced independently
//! 4. Failed, expired and completed tasks give their slots back
//! 5. Sessions are closed exactly once, whichever path ends the task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use prometheus_rsession_broker::config::BrokerConfig;
use prometheus_rsession_broker::core::{
    AppResult, AuditAction, Broker, BrokerError, ComputeInstance, InMemoryAuditSink,
    ResourceRequest, Session, TaskState, WorkFlags, WorkUnit,
};
use prometheus_rsession_broker::infra::InMemoryBackend;
use prometheus_rsession_broker::runtime::{submit, wait_all, TokioSpawner};
use prometheus_rsession_broker::util::init_tracing;
use prometheus_rsession_broker::workers::FnWork;

const POLL: Duration = Duration::from_millis(20);

// Slot-weighted concurrency per instance, as seen from inside work units
#[derive(Default)]
struct SlotTracker {
    usage: Mutex<HashMap<String, (u64, u64)>>,
}

impl SlotTracker {
    fn enter(&self, address: &str, slots: u64) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(address.to_owned()).or_default();
        entry.0 += slots;
        entry.1 = entry.1.max(entry.0);
    }

    fn leave(&self, address: &str, slots: u64) {
        let mut usage = self.usage.lock();
        if let Some(entry) = usage.get_mut(address) {
            entry.0 -= slots;
        }
    }

    fn peak(&self, address: &str) -> u64 {
        self.usage.lock().get(address).map_or(0, |e| e.1)
    }
}

// Work unit holding its slots for a fixed time
struct Probe {
    slots: u64,
    hold: Duration,
    tracker: Arc<SlotTracker>,
    flags: WorkFlags,
}

impl Probe {
    fn new(slots: u32, hold: Duration, tracker: &Arc<SlotTracker>) -> Self {
        Self {
            slots: u64::from(slots),
            hold,
            tracker: Arc::clone(tracker),
            flags: WorkFlags::new(),
        }
    }
}

#[async_trait]
impl WorkUnit for Probe {
    async fn run(&self, session: Arc<dyn Session>) -> AppResult<()> {
        let address = session.instance().address().to_owned();
        self.tracker.enter(&address, self.slots);
        tokio::time::sleep(self.hold).await;
        session.eval("Sys.time()").await?;
        self.tracker.leave(&address, self.slots);
        Ok(())
    }

    fn flags(&self) -> &WorkFlags {
        &self.flags
    }
}

fn broker_on(instances: Vec<ComputeInstance>, backend: &InMemoryBackend) -> Broker {
    init_tracing();
    let config = BrokerConfig::new(instances).with_poll_interval(POLL);
    Broker::with_spawner(
        &config,
        Arc::new(backend.clone()),
        TokioSpawner::try_current().expect("inside a tokio runtime"),
    )
    .unwrap()
}

fn request(slots: u32, run: Duration, queue: Duration) -> ResourceRequest {
    ResourceRequest::builder()
        .requested_slots(slots)
        .max_run_duration(run)
        .max_queue_wait(queue)
        .build()
        .unwrap()
}

fn sleeper(duration: Duration) -> Arc<FnWork> {
    Arc::new(FnWork::new(move |_session: Arc<dyn Session>| async move {
        tokio::time::sleep(duration).await;
        AppResult::Ok(())
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_never_exceeded_under_random_load() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(
        vec![
            ComputeInstance::new("R://a", 3),
            ComputeInstance::new("R://b", 2),
        ],
        &backend,
    );
    let tracker = Arc::new(SlotTracker::default());

    let plan: Vec<(u32, u64)> = {
        let mut rng = rand::rng();
        (0..40)
            .map(|_| (rng.random_range(1..=3), rng.random_range(5..30)))
            .collect()
    };

    let handles: Vec<_> = plan
        .iter()
        .map(|&(slots, hold_ms)| {
            let work = Arc::new(Probe::new(slots, Duration::from_millis(hold_ms), &tracker));
            submit(
                &broker,
                work,
                request(slots, Duration::from_secs(60), Duration::from_secs(60)),
            )
        })
        .collect();

    // Sample the broker's own accounting while the load runs
    let watches: Vec<_> = handles.iter().map(|h| h.watch()).collect();
    while !watches.iter().all(|w| w.is_finished()) {
        for usage in broker.stats().instances {
            assert!(usage.used <= u64::from(usage.capacity), "{usage:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for handle in handles {
        let work = handle.wait().await.unwrap();
        assert!(work.is_finished());
        assert!(!work.any_errors());
    }
    assert!(tracker.peak("R://a") <= 3);
    assert!(tracker.peak("R://b") <= 2);
    assert!(tracker.peak("R://a") > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_request_admitted_exactly_once() {
    let backend = InMemoryBackend::new();
    let audit = InMemoryAuditSink::new(1000);
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 2)], &backend)
        .with_audit(Box::new(audit.clone()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            submit(
                &broker,
                sleeper(Duration::from_millis(30)),
                request(1, Duration::from_secs(60), Duration::from_secs(60)),
            )
        })
        .collect();
    wait_all(Duration::from_secs(10), handles.iter().map(|h| h.watch()))
        .await
        .unwrap();

    let mut admitted: Vec<_> = audit
        .events_for(AuditAction::Admit)
        .into_iter()
        .map(|e| e.task_id)
        .collect();
    admitted.sort_unstable();
    let mut expected: Vec<_> = handles.iter().map(|h| h.id()).collect();
    expected.sort_unstable();
    assert_eq!(admitted, expected);

    for handle in &handles {
        let assignment = handle.request().assignment().unwrap();
        assert_eq!(assignment.instance.address(), "R://solo");
        assert_eq!(assignment.index, 0);
        assert_eq!(handle.state(), Some(TaskState::Completed));
    }
    assert_eq!(audit.events_for(AuditAction::Submit).len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_timeout_on_saturated_fleet() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    let occupant = submit(
        &broker,
        sleeper(Duration::from_secs(2)),
        request(1, Duration::from_secs(60), Duration::from_secs(60)),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(occupant.state(), Some(TaskState::Running));

    let started = Instant::now();
    let waiting = submit(
        &broker,
        sleeper(Duration::ZERO),
        request(1, Duration::from_secs(60), Duration::from_secs(1)),
    );
    let pending = Arc::clone(waiting.request());
    let err = waiting.wait().await.unwrap_err();

    assert!(matches!(err, BrokerError::QueueTimeout { budget, .. } if budget == Duration::from_secs(1)));
    assert!(!err.was_admitted());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1));
    assert!(waited < Duration::from_secs(1) + 5 * POLL, "gave up after {waited:?}");
    assert!(pending.assignment().is_none());

    occupant.wait().await.unwrap();
    assert_eq!(broker.stats().queue_timeouts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_expiry_preempts_and_frees_slot() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    let runaway = submit(
        &broker,
        sleeper(Duration::from_secs(600)),
        request(1, Duration::from_secs(1), Duration::from_secs(60)),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    let next = submit(
        &broker,
        sleeper(Duration::from_millis(10)),
        request(1, Duration::from_secs(60), Duration::from_secs(10)),
    );

    let runaway_work = Arc::clone(runaway.work());
    let err = tokio::time::timeout(Duration::from_secs(5), runaway.wait())
        .await
        .expect("expiry within a few polls")
        .unwrap_err();
    assert!(matches!(err, BrokerError::RunExpired { .. }));
    assert!(err.was_admitted());
    assert!(runaway_work.is_started());
    assert!(runaway_work.is_finished());
    assert!(runaway_work.any_errors());

    next.wait().await.unwrap();
    assert_eq!(backend.open_sessions("R://solo"), 0);
    assert_eq!(backend.opened_sessions("R://solo"), 2);
    assert_eq!(backend.closed_sessions("R://solo"), 2);
    assert_eq!(broker.stats().expired, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expiry_while_connecting_frees_slot() {
    let backend = InMemoryBackend::new().with_connect_delay(Duration::from_millis(400));
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    let slow = submit(
        &broker,
        sleeper(Duration::from_secs(60)),
        request(1, Duration::from_millis(50), Duration::from_secs(10)),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(slow.state(), Some(TaskState::Admitted));

    // Queued behind it, so the poll loop keeps sweeping
    let next = submit(
        &broker,
        sleeper(Duration::ZERO),
        request(1, Duration::from_secs(60), Duration::from_secs(10)),
    );

    let slow_work = Arc::clone(slow.work());
    let err = slow.wait().await.unwrap_err();
    assert!(matches!(err, BrokerError::RunExpired { budget } if budget == Duration::from_millis(50)));
    assert!(err.was_admitted());
    assert!(!slow_work.is_started());
    assert!(!slow_work.is_finished());

    let pending = Arc::clone(next.request());
    next.wait().await.unwrap();
    assert_eq!(pending.assigned_instance().unwrap().address(), "R://solo");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.open_sessions("R://solo"), 0);
    assert_eq!(
        backend.opened_sessions("R://solo"),
        backend.closed_sessions("R://solo")
    );
    assert_eq!(broker.stats().expired, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_units_that_started_are_finished_with_errors() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    // Tight run budgets so sweeps land at different points of the lifecycle
    let handles: Vec<_> = (0..12_u64)
        .map(|i| {
            submit(
                &broker,
                sleeper(Duration::from_secs(60)),
                request(1, Duration::from_millis(1 + i % 4), Duration::from_secs(30)),
            )
        })
        .collect();

    for handle in handles {
        // The last admitted task has nobody queued behind it to trigger a sweep
        while !handle.is_finished() {
            broker.sweep();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let work = Arc::clone(handle.work());
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, BrokerError::RunExpired { .. }));
        if work.is_started() {
            assert!(work.is_finished());
            assert!(work.any_errors());
        } else {
            assert!(!work.is_finished());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_n_plus_one_on_single_instance() {
    const N: u32 = 3;
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", N)], &backend);
    let tracker = Arc::new(SlotTracker::default());

    let handles: Vec<_> = (0..=N)
        .map(|_| {
            submit(
                &broker,
                Arc::new(Probe::new(1, Duration::from_millis(300), &tracker)),
                request(1, Duration::from_secs(60), Duration::from_secs(60)),
            )
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = broker.stats();
    assert_eq!(stats.active, N as usize);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.instances[0].used, u64::from(N));

    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(tracker.peak("R://solo"), u64::from(N));
    assert_eq!(backend.peak_open_sessions("R://solo"), N as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_work_releases_slot() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    let failing = Arc::new(FnWork::new(|_session: Arc<dyn Session>| async move {
        AppResult::<()>::Err(anyhow::anyhow!("boom"))
    }));
    let handle = submit(
        &broker,
        Arc::clone(&failing),
        request(1, Duration::from_secs(60), Duration::from_secs(60)),
    );
    let err = handle.wait().await.unwrap_err();
    match &err {
        BrokerError::WorkUnit(source) => assert_eq!(source.to_string(), "boom"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(failing.any_errors());
    assert!(failing.is_finished());

    let after = submit(
        &broker,
        sleeper(Duration::ZERO),
        request(1, Duration::from_secs(60), Duration::from_secs(5)),
    );
    after.wait().await.unwrap();

    broker.sweep();
    let stats = broker.stats();
    assert_eq!(stats.tracked, 0);
    assert_eq!(stats.instances[0].used, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(backend.open_sessions("R://solo"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_is_idempotent_when_completion_races_expiry() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://wide", 16)], &backend);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            submit(
                &broker,
                sleeper(Duration::from_millis(40 + i % 4 * 5)),
                request(1, Duration::from_millis(50), Duration::from_secs(10)),
            )
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !handles.iter().all(|h| h.is_finished()) {
        assert!(Instant::now() < deadline, "tasks did not finish");
        broker.sweep();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for handle in &handles {
        let state = handle.state().unwrap();
        assert!(matches!(state, TaskState::Completed | TaskState::Expired), "{state}");
        assert!(handle.work().is_finished());
    }
    assert_eq!(backend.open_sessions("R://wide"), 0);
    assert_eq!(backend.opened_sessions("R://wide"), 16);
    assert_eq!(backend.closed_sessions("R://wide"), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_fit_prefers_earlier_instances() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(
        vec![
            ComputeInstance::new("R://first", 1),
            ComputeInstance::new("R://second", 4),
        ],
        &backend,
    );

    let big = submit(
        &broker,
        sleeper(Duration::from_millis(50)),
        request(3, Duration::from_secs(60), Duration::from_secs(60)),
    );
    let small = submit(
        &broker,
        sleeper(Duration::from_millis(50)),
        request(1, Duration::from_secs(60), Duration::from_secs(60)),
    );
    let big_request = Arc::clone(big.request());
    let small_request = Arc::clone(small.request());
    big.wait().await.unwrap();
    small.wait().await.unwrap();

    assert_eq!(big_request.assigned_instance().unwrap().address(), "R://second");
    assert_eq!(small_request.assigned_instance().unwrap().address(), "R://first");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_all_times_out_without_cancelling() {
    let backend = InMemoryBackend::new();
    let broker = broker_on(vec![ComputeInstance::new("R://solo", 1)], &backend);

    let handle = submit(
        &broker,
        sleeper(Duration::from_millis(500)),
        request(1, Duration::from_secs(60), Duration::from_secs(60)),
    );
    let err = wait_all(Duration::from_millis(100), [handle.watch()])
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::WaitTimeout { .. }));
    assert!(!handle.is_finished());

    wait_all(Duration::from_secs(5), [handle.watch()]).await.unwrap();
    assert_eq!(handle.state(), Some(TaskState::Completed));
}

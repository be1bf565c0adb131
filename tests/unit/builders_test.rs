//! Tests for builder modules

use std::sync::Arc;

use prometheus_rsession_broker::builders::BrokerBuilder;
use prometheus_rsession_broker::config::BrokerConfig;
use prometheus_rsession_broker::core::{BrokerError, ComputeInstance, InMemoryAuditSink};
use prometheus_rsession_broker::infra::InMemoryBackend;
use prometheus_rsession_broker::runtime::TokioSpawner;

#[test]
fn test_broker_builder_defaults() {
    let builder = BrokerBuilder::new(BrokerConfig::default());
    assert_eq!(builder.config().instances.len(), 1);
    assert_eq!(builder.config().instances[0].address, "R://localhost");
    assert!(!builder.has_connector());
}

#[test]
fn test_broker_builder_rejects_invalid_config() {
    let err = BrokerBuilder::new(BrokerConfig::new(Vec::new()))
        .connector(Arc::new(InMemoryBackend::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfig(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broker_builder_with_spawner() {
    let config = BrokerConfig::new(vec![
        ComputeInstance::new("R://a", 2),
        ComputeInstance::new("R://b", 3),
    ]);
    let broker = BrokerBuilder::new(config)
        .connector(Arc::new(InMemoryBackend::new()))
        .audit(Box::new(InMemoryAuditSink::new(16)))
        .build_with_spawner(TokioSpawner::try_current().unwrap())
        .unwrap();

    assert_eq!(broker.instances().len(), 2);
    assert_eq!(broker.total_capacity(), 5);
    assert_eq!(broker.poll_interval().as_millis(), 5000);
    let stats = broker.stats();
    assert_eq!(stats.pool_threads, None);
    assert_eq!(stats.tracked, 0);
    assert_eq!(stats.instances[1].capacity, 3);
}

//! Tests for configuration validation

use std::time::Duration;

use prometheus_rsession_broker::config::{BrokerConfig, DEFAULT_POLL_INTERVAL_MS};
use prometheus_rsession_broker::core::{BrokerError, ComputeInstance};

fn fleet() -> Vec<ComputeInstance> {
    vec![
        ComputeInstance::new("R://node-1", 4),
        ComputeInstance::new("R://node-2", 2),
    ]
}

#[test]
fn test_broker_config_validation() {
    let valid = BrokerConfig::new(fleet());
    assert!(valid.validate().is_ok());
    assert_eq!(valid.total_capacity(), 6);
    assert_eq!(valid.pool_size(), 10);
}

#[test]
fn test_broker_config_empty_fleet() {
    let invalid = BrokerConfig::new(Vec::new());
    assert!(invalid.validate().is_err());
}

#[test]
fn test_broker_config_duplicate_address() {
    let invalid = BrokerConfig::new(vec![
        ComputeInstance::new("R://node-1", 4),
        ComputeInstance::new("R://node-1", 2),
    ]);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("R://node-1"));
}

#[test]
fn test_broker_config_blank_address() {
    let invalid = BrokerConfig::new(vec![ComputeInstance::new("  ", 1)]);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_broker_config_zero_poll_interval() {
    let invalid = BrokerConfig::new(fleet()).with_poll_interval(Duration::ZERO);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_threads_override() {
    let config = BrokerConfig::new(fleet()).with_worker_threads(3);
    assert_eq!(config.pool_size(), 3);
    let config = BrokerConfig::new(fleet()).with_pool_slack(0);
    assert_eq!(config.pool_size(), 6);
}

#[test]
fn test_broker_config_from_json() {
    let json = r#"{
        "instances": [
            {"address": "R://node-1", "capacity": 4},
            {"address": "R://node-2", "capacity": 2}
        ],
        "poll_interval_ms": 250
    }"#;
    let config = BrokerConfig::from_json_str(json).unwrap();
    assert_eq!(config.instances, fleet());
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.pool_slack, 4);
    assert_eq!(config.worker_threads, None);
}

#[test]
fn test_broker_config_json_defaults_and_errors() {
    let config =
        BrokerConfig::from_json_str(r#"{"instances":[{"address":"R://x","capacity":1}]}"#).unwrap();
    assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);

    let err = BrokerConfig::from_json_str("{not json").unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfig(_)));

    let err = BrokerConfig::from_json_str(r#"{"instances":[]}"#).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfig(_)));
}

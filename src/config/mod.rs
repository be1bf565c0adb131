//! Configuration models for the broker and its worker pool.

pub mod broker;

pub use broker::{BrokerConfig, CONFIG_ENV_VAR, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POOL_SLACK};

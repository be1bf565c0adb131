//! Broker configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{BrokerError, ComputeInstance};

/// Default delay between two admission attempts of a queued task.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Worker threads added on top of the fleet's total capacity.
pub const DEFAULT_POOL_SLACK: usize = 4;
/// Environment variable holding the configuration, inline JSON or a path.
pub const CONFIG_ENV_VAR: &str = "RSESSION_BROKER_CONFIG";

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_pool_slack() -> usize {
    DEFAULT_POOL_SLACK
}

/// Root broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Instances in admission order.
    pub instances: Vec<ComputeInstance>,
    /// Delay between two admission attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Extra worker threads beyond the total capacity.
    #[serde(default = "default_pool_slack")]
    pub pool_slack: usize,
    /// Explicit worker thread count, overriding capacity + slack.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(vec![ComputeInstance::default()])
    }
}

impl BrokerConfig {
    /// Configuration over `instances` with default timings.
    #[must_use]
    pub const fn new(instances: Vec<ComputeInstance>) -> Self {
        Self {
            instances,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            pool_slack: DEFAULT_POOL_SLACK,
            worker_threads: None,
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the pool slack.
    #[must_use]
    pub const fn with_pool_slack(mut self, slack: usize) -> Self {
        self.pool_slack = slack;
        self
    }

    /// Pin the worker thread count.
    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.instances.is_empty() {
            return Err("at least one instance must be configured".into());
        }
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.address.trim().is_empty() {
                return Err("instance address must not be empty".into());
            }
            if !seen.insert(instance.address.as_str()) {
                return Err(format!("duplicate instance address {}", instance.address));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.worker_threads == Some(0) {
            return Err("worker_threads must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, BrokerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BrokerError::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate().map_err(BrokerError::InvalidConfig)?;
        Ok(config)
    }

    /// Load from [`CONFIG_ENV_VAR`], after reading a `.env` file if present.
    /// The variable holds either inline JSON or the path of a JSON file.
    /// Falls back to [`BrokerConfig::default`] when it is unset.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or the document is invalid.
    pub fn from_env() -> Result<Self, BrokerError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(value) => Self::from_source(&value),
            Err(_) => {
                tracing::debug!(var = CONFIG_ENV_VAR, "no broker config set, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn from_source(value: &str) -> Result<Self, BrokerError> {
        let trimmed = value.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_json_str(trimmed);
        }
        let path = Path::new(value);
        let json = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Sum of all instance capacities.
    #[must_use]
    pub fn total_capacity(&self) -> u64 {
        self.instances.iter().map(|i| u64::from(i.capacity)).sum()
    }

    /// Worker threads for an owned pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        let size = self.worker_threads.unwrap_or_else(|| {
            usize::try_from(self.total_capacity())
                .unwrap_or(usize::MAX)
                .saturating_add(self.pool_slack)
        });
        size.max(1)
    }

    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

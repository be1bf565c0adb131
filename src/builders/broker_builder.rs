//! Builder to construct a broker from configuration.

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::core::{AuditSink, Broker, BrokerError, Connector, Spawn};
use crate::runtime::TokioSpawner;

/// Assembles a [`Broker`] from a [`BrokerConfig`], a connector and an
/// optional audit sink.
///
/// ```rust,ignore
/// let broker = BrokerBuilder::new(BrokerConfig::from_env()?)
///     .connector(Arc::new(InMemoryBackend::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    connector: Option<Arc<dyn Connector>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl BrokerBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            connector: None,
            audit: None,
        }
    }

    /// Configuration the broker will be built from.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// True once a connector was set.
    #[must_use]
    pub const fn has_connector(&self) -> bool {
        self.connector.is_some()
    }

    /// Back-end used to open sessions. Required.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Record task lifecycle events to `sink`.
    #[must_use]
    pub fn audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Build a broker with its own worker pool.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if no connector was set or the configuration is
    /// invalid; `Internal` if the worker pool cannot start.
    pub fn build(self) -> Result<Broker<TokioSpawner>, BrokerError> {
        let (config, connector, audit) = self.into_parts()?;
        let broker = Broker::new(&config, connector)?;
        Ok(attach_audit(broker, audit))
    }

    /// Build a broker running its tasks on `spawner`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if no connector was set or the configuration is
    /// invalid.
    pub fn build_with_spawner<S>(self, spawner: S) -> Result<Broker<S>, BrokerError>
    where
        S: Spawn + Clone + Send + Sync + 'static,
    {
        let (config, connector, audit) = self.into_parts()?;
        let broker = Broker::with_spawner(&config, connector, spawner)?;
        Ok(attach_audit(broker, audit))
    }

    fn into_parts(
        self,
    ) -> Result<(BrokerConfig, Arc<dyn Connector>, Option<Box<dyn AuditSink>>), BrokerError> {
        let connector = self
            .connector
            .ok_or_else(|| BrokerError::InvalidConfig("connector not set".into()))?;
        Ok((self.config, connector, self.audit))
    }
}

fn attach_audit<S>(broker: Broker<S>, audit: Option<Box<dyn AuditSink>>) -> Broker<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    match audit {
        Some(sink) => broker.with_audit(sink),
        None => broker,
    }
}

//! # Prometheus R-Session Broker
//!
//! Admission control for a fixed fleet of R compute instances.
//!
//! Each instance exposes a fixed number of concurrent slots. Callers submit a
//! work unit together with a resource request (slots, run budget, queue
//! budget); the broker parks the request until some instance has room,
//! opens a session there, runs the work unit inside it and closes the
//! session. Requests that hold their slots longer than their run budget are
//! pre-empted so the slots go back to the fleet.
//!
//! ## Core Problem Solved
//!
//! - **Bounded concurrency per instance**: an instance never carries more
//!   admitted slots than its capacity.
//! - **Bounded queueing**: a request that cannot be admitted within its queue
//!   budget fails instead of waiting forever.
//! - **Bounded runtime**: a runaway work unit loses its session and slots once
//!   its run budget is exhausted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use prometheus_rsession_broker::builders::BrokerBuilder;
//! use prometheus_rsession_broker::config::BrokerConfig;
//! use prometheus_rsession_broker::core::{ComputeInstance, ResourceRequest, Session};
//! use prometheus_rsession_broker::infra::InMemoryBackend;
//! use prometheus_rsession_broker::runtime::submit;
//! use prometheus_rsession_broker::workers::FnWork;
//!
//! let config = BrokerConfig::new(vec![ComputeInstance::new("R://node-1", 4)])
//!     .with_poll_interval(Duration::from_millis(250));
//! let broker = BrokerBuilder::new(config)
//!     .connector(Arc::new(InMemoryBackend::new()))
//!     .build()?;
//!
//! let request = ResourceRequest::builder()
//!     .requested_slots(2)
//!     .max_run_duration(Duration::from_secs(60))
//!     .max_queue_wait(Duration::from_secs(10))
//!     .build()?;
//! let work = Arc::new(FnWork::new(|session: Arc<dyn Session>| async move {
//!     session.eval("summary(cars)").await?;
//!     Ok(())
//! }));
//!
//! let work = submit(&broker, work, request).wait_blocking()?;
//! assert!(work.is_finished());
//! ```
//!
//! For complete scenarios, see `tests/broker_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core admission abstractions and capacity accounting.
pub mod core;
/// Configuration models for the broker and its worker pool.
pub mod config;
/// Builders to construct brokers from configuration.
pub mod builders;
/// Infrastructure adapters for session back-ends.
pub mod infra;
/// Runtime adapters and the submission API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
/// Ready-made work units.
pub mod workers;

//! Core admission abstractions and capacity accounting.

pub mod audit;
pub mod broker;
pub mod error;
pub mod handle;
pub mod instance;
pub mod request;
pub mod session;
pub mod stats;
pub mod task;
pub mod work;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use broker::{Broker, Spawn};
pub use error::{AppResult, BrokerError, SessionError};
pub use handle::{TaskHandle, TaskWatch};
pub use instance::{ComputeInstance, DEFAULT_INSTANCE_ADDRESS};
pub use request::{Assignment, RequestId, ResourceRequest, ResourceRequestBuilder, DEFAULT_BUDGET};
pub use session::{check_server_version, Connector, Session, MIN_SERVER_VERSION};
pub use stats::{BrokerStats, InstanceUsage};
pub use task::{Task, TaskId, TaskState};
pub use work::{WorkFlags, WorkUnit};

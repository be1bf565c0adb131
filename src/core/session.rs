//! Execution back-end contracts.
//!
//! A [`Connector`] opens [`Session`]s against a [`ComputeInstance`]. The
//! broker only ever calls `connect` and `close`; everything else is used by
//! work units.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{ComputeInstance, SessionError};

/// Oldest server protocol version a session may talk to.
pub const MIN_SERVER_VERSION: u32 = 103;

/// Reject servers older than [`MIN_SERVER_VERSION`].
///
/// # Errors
///
/// Returns `SessionError::Incompatible` if `found` is too old.
pub const fn check_server_version(found: u32) -> Result<(), SessionError> {
    if found < MIN_SERVER_VERSION {
        return Err(SessionError::Incompatible {
            found,
            required: MIN_SERVER_VERSION,
        });
    }
    Ok(())
}

/// An established connection to one instance.
///
/// `close` must be idempotent and safe to call concurrently with in-flight
/// calls: the broker may close a session out from under a running work unit
/// when its run budget is exhausted. Calls made after `close` fail with
/// `SessionError::Closed`.
#[async_trait]
pub trait Session: Send + Sync {
    /// Instance this session is connected to.
    fn instance(&self) -> &ComputeInstance;

    /// Evaluate an expression and return its printed result.
    async fn eval(&self, expression: &str) -> Result<String, SessionError>;

    /// Upload a local file under `remote` in the session's working directory.
    async fn send_file(&self, local: &Path, remote: &str) -> Result<(), SessionError>;

    /// Download `remote` from the session's working directory to `local`,
    /// replacing any existing file.
    async fn receive_file(&self, remote: &str, local: &Path) -> Result<(), SessionError>;

    /// Delete `remote` from the session's working directory.
    async fn remove_file(&self, remote: &str) -> Result<(), SessionError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// True once `close` has been called.
    fn is_closed(&self) -> bool;

    /// Upload a script file and source it.
    async fn source(&self, local: &Path) -> Result<(), SessionError> {
        let name = remote_name(local)?;
        self.send_file(local, &name).await?;
        self.eval(&format!("source('{name}')")).await.map(|_| ())
    }

    /// Upload a saved workspace (e.g. an `.RData` file) and load it.
    async fn load(&self, local: &Path) -> Result<(), SessionError> {
        let name = remote_name(local)?;
        self.send_file(local, &name).await?;
        self.eval(&format!("load('{name}')")).await.map(|_| ())
    }

    /// Load a package into the session.
    async fn load_package(&self, package: &str) -> Result<String, SessionError> {
        self.eval(&format!("library({package})")).await
    }
}

/// Opens sessions against instances.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `instance`, performing any handshake, login and version
    /// check.
    async fn connect(&self, instance: &ComputeInstance) -> Result<Arc<dyn Session>, SessionError>;
}

/// File name used for `local` on the remote side.
pub(crate) fn remote_name(local: &Path) -> Result<String, SessionError> {
    local
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| SessionError::Io(format!("{} has no file name", local.display())))
}

//! In-memory session backend for development and testing.
//!
//! Every instance address gets its own virtual working directory and
//! session counters. Nothing is evaluated for real: expressions are recorded
//! and answered from a configurable table, and `source('<file>')` replays the
//! lines of a previously uploaded file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{
    check_server_version, ComputeInstance, Connector, Session, SessionError, MIN_SERVER_VERSION,
};

/// Output returned for expressions without a configured result.
pub const DEFAULT_EVAL_OUTPUT: &str = "NULL";

#[derive(Debug, Default, Clone, Copy)]
struct SessionCounts {
    open: usize,
    peak_open: usize,
    opened: u64,
    closed: u64,
}

#[derive(Debug)]
struct BackendState {
    server_version: u32,
    connect_delay: Duration,
    unreachable: HashSet<String>,
    failing: HashSet<String>,
    results: HashMap<String, String>,
    counts: HashMap<String, SessionCounts>,
    evaluated: Vec<(String, String)>,
    files: HashMap<(String, String), Vec<u8>>,
}

/// Shared in-memory back-end. Clones observe and configure the same state.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Backend speaking [`MIN_SERVER_VERSION`], with every instance reachable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                server_version: MIN_SERVER_VERSION,
                connect_delay: Duration::ZERO,
                unreachable: HashSet::new(),
                failing: HashSet::new(),
                results: HashMap::new(),
                counts: HashMap::new(),
                evaluated: Vec::new(),
                files: HashMap::new(),
            })),
        }
    }

    /// Pretend to be a server of the given protocol version.
    #[must_use]
    pub fn with_server_version(self, version: u32) -> Self {
        self.state.lock().server_version = version;
        self
    }

    /// Delay every connection attempt.
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().connect_delay = delay;
        self
    }

    /// Refuse connections to `address`.
    #[must_use]
    pub fn with_unreachable(self, address: impl Into<String>) -> Self {
        self.state.lock().unreachable.insert(address.into());
        self
    }

    /// Make evaluating `expression` fail.
    #[must_use]
    pub fn with_failing_expression(self, expression: impl Into<String>) -> Self {
        self.state.lock().failing.insert(expression.into());
        self
    }

    /// Answer `expression` with `output`.
    #[must_use]
    pub fn with_result(self, expression: impl Into<String>, output: impl Into<String>) -> Self {
        self.state
            .lock()
            .results
            .insert(expression.into(), output.into());
        self
    }

    /// Sessions currently open on `address`.
    #[must_use]
    pub fn open_sessions(&self, address: &str) -> usize {
        self.counts(address).open
    }

    /// Highest number of sessions simultaneously open on `address`.
    #[must_use]
    pub fn peak_open_sessions(&self, address: &str) -> usize {
        self.counts(address).peak_open
    }

    /// Sessions ever opened on `address`.
    #[must_use]
    pub fn opened_sessions(&self, address: &str) -> u64 {
        self.counts(address).opened
    }

    /// Sessions closed on `address`; each session counts once.
    #[must_use]
    pub fn closed_sessions(&self, address: &str) -> u64 {
        self.counts(address).closed
    }

    /// Expressions evaluated on `address`, in order.
    #[must_use]
    pub fn evaluated(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .evaluated
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Contents of `name` in the working directory of `address`.
    #[must_use]
    pub fn remote_file(&self, address: &str, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(&(address.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Place a file in the working directory of `address`.
    pub fn put_remote_file(&self, address: &str, name: &str, contents: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .files
            .insert((address.to_owned(), name.to_owned()), contents.into());
    }

    fn counts(&self, address: &str) -> SessionCounts {
        self.state
            .lock()
            .counts
            .get(address)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for InMemoryBackend {
    async fn connect(&self, instance: &ComputeInstance) -> Result<Arc<dyn Session>, SessionError> {
        let delay = self.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.unreachable.contains(instance.address()) {
            return Err(SessionError::Unreachable {
                address: instance.address().to_owned(),
                reason: "connection refused".into(),
            });
        }
        check_server_version(state.server_version)?;

        let counts = state.counts.entry(instance.address().to_owned()).or_default();
        counts.open += 1;
        counts.opened += 1;
        counts.peak_open = counts.peak_open.max(counts.open);
        drop(state);

        Ok(Arc::new(InMemorySession {
            instance: instance.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session handed out by [`InMemoryBackend`].
#[derive(Debug)]
pub struct InMemorySession {
    instance: ComputeInstance,
    state: Arc<Mutex<BackendState>>,
    closed: AtomicBool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn key(&self, name: &str) -> (String, String) {
        (self.instance.address.clone(), name.to_owned())
    }

    fn evaluate(&self, state: &mut BackendState, expression: &str) -> Result<String, SessionError> {
        state
            .evaluated
            .push((self.instance.address.clone(), expression.to_owned()));
        if state.failing.contains(expression) {
            return Err(SessionError::Eval(format!("error in {expression}")));
        }
        if let Some(name) = sourced_file(expression) {
            let script = state
                .files
                .get(&self.key(name))
                .cloned()
                .ok_or_else(|| SessionError::Eval(format!("cannot open file '{name}'")))?;
            for line in String::from_utf8_lossy(&script).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    self.evaluate(state, line)?;
                }
            }
            return Ok(DEFAULT_EVAL_OUTPUT.to_owned());
        }
        Ok(state
            .results
            .get(expression)
            .cloned()
            .unwrap_or_else(|| DEFAULT_EVAL_OUTPUT.to_owned()))
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn instance(&self) -> &ComputeInstance {
        &self.instance
    }

    async fn eval(&self, expression: &str) -> Result<String, SessionError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        self.evaluate(&mut state, expression)
    }

    async fn send_file(&self, local: &Path, remote: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let contents = std::fs::read(local)?;
        self.state.lock().files.insert(self.key(remote), contents);
        Ok(())
    }

    async fn receive_file(&self, remote: &str, local: &Path) -> Result<(), SessionError> {
        self.ensure_open()?;
        let contents = self
            .state
            .lock()
            .files
            .get(&self.key(remote))
            .cloned()
            .ok_or_else(|| SessionError::Io(format!("remote file {remote} not found")))?;
        std::fs::write(local, contents)?;
        Ok(())
    }

    async fn remove_file(&self, remote: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.state.lock().files.remove(&self.key(remote));
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        let counts = state.counts.entry(self.instance.address.clone()).or_default();
        counts.open = counts.open.saturating_sub(1);
        counts.closed += 1;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// File name in `source('<name>')`, if `expression` has that shape.
fn sourced_file(expression: &str) -> Option<&str> {
    expression
        .trim()
        .strip_prefix("source('")?
        .strip_suffix("')")
}

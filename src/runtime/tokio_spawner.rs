//! Tokio runtime spawner implementation.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::core::Spawn;

/// Tokio-based spawner that executes tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Create a new `TokioSpawner` from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on, if any.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Underlying runtime handle.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Spawn for TokioSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut);
    }
}

/// A multi-threaded runtime owned by a broker.
///
/// Dropping it shuts the runtime down without blocking, which also makes it
/// safe to drop from inside another runtime's async context. Unfinished
/// futures are dropped by the worker threads as they exit.
#[derive(Debug)]
pub struct OwnedRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
    worker_threads: usize,
}

impl OwnedRuntime {
    /// Build a runtime with `worker_threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while starting the worker threads.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let worker_threads = worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("rsb-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            worker_threads,
        })
    }

    /// Spawner targeting this runtime.
    #[must_use]
    pub fn spawner(&self) -> TokioSpawner {
        TokioSpawner::new(self.handle.clone())
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_threads(&self) -> usize {
        self.worker_threads
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

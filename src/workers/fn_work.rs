//! Work unit backed by an async closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AppResult, Session, WorkFlags, WorkUnit};

type RunFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;
type BoxedRun = Box<dyn Fn(Arc<dyn Session>) -> RunFuture + Send + Sync>;

/// Adapts `Fn(Arc<dyn Session>) -> impl Future<Output = AppResult<()>>`
/// into a [`WorkUnit`].
///
/// ```rust,ignore
/// let work = Arc::new(FnWork::new(|session: Arc<dyn Session>| async move {
///     session.eval("summary(cars)").await?;
///     Ok(())
/// }));
/// ```
pub struct FnWork {
    run: BoxedRun,
    flags: WorkFlags,
}

impl FnWork {
    /// Wrap `f`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            run: Box::new(move |session| -> RunFuture { Box::pin(f(session)) }),
            flags: WorkFlags::new(),
        }
    }
}

#[async_trait]
impl WorkUnit for FnWork {
    async fn run(&self, session: Arc<dyn Session>) -> AppResult<()> {
        (self.run)(session).await
    }

    fn flags(&self) -> &WorkFlags {
        &self.flags
    }
}

impl std::fmt::Debug for FnWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnWork").field("flags", &self.flags).finish_non_exhaustive()
    }
}

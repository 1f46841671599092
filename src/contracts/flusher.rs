use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::contracts::error::FlushableSetError;
use crate::flushable::FlushableSet;

/// Error type accepted from user flush callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Awaitable handle to an in-flight asynchronous flush.
///
/// Clones share one outcome. It resolves after the buffered elements have been
/// cleared and the in-flight marker released, whether the sink succeeded or not.
pub type FlushSignal = Shared<BoxFuture<'static, Result<(), FlushableSetError>>>;

/// Callback invoked once per flush with the set being flushed.
pub type FlushCallback<T> = Arc<dyn Fn(&FlushableSet<T>) -> FlushAction + Send + Sync>;

/// What a flush callback reports back to the set.
///
/// # Behavior
/// - `Complete`: the sink finished synchronously; on `Ok` the set clears
///   immediately, on `Err` the failure propagates and nothing is cleared
/// - `Deferred`: the sink finishes later; the set marks itself as flushing
///   until the future settles, then clears regardless of the outcome
pub enum FlushAction {
    Complete(Result<(), BoxError>),
    Deferred(BoxFuture<'static, Result<(), BoxError>>),
}

impl FlushAction {
    /// A synchronous flush that succeeded.
    pub fn done() -> Self {
        FlushAction::Complete(Ok(()))
    }

    /// A synchronous flush that failed.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        FlushAction::Complete(Err(err.into()))
    }

    /// Wraps a future as an asynchronous flush.
    pub fn deferred<F, E>(fut: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        FlushAction::Deferred(async move { fut.await.map_err(Into::into) }.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, FlushAction::Deferred(_))
    }
}

impl std::fmt::Debug for FlushAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushAction::Complete(Ok(())) => f.write_str("Complete(Ok)"),
            FlushAction::Complete(Err(e)) => write!(f, "Complete(Err({}))", e),
            FlushAction::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

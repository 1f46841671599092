use std::future::Future;
use std::sync::Arc;

use crate::contracts::{BoxError, FlushAction, FlushCallback, FlushableSetError, Result};
use crate::flushable::FlushableSet;

/// Environment variable read by [`FlushableSetOptions::from_env`].
pub const MAX_SIZE_ENV: &str = "FLUSHABLE_SET_MAX_SIZE";

/// Construction options for a [`FlushableSet`].
pub struct FlushableSetOptions<T> {
    /// Element count that triggers a flush on the next add. `None` is unbounded.
    pub max_size: Option<usize>,
    /// Invoked when `flush()` is called manually or via `max_size`.
    pub on_flush: Option<FlushCallback<T>>,
}

impl<T> Default for FlushableSetOptions<T> {
    fn default() -> Self {
        Self {
            max_size: None,
            on_flush: None,
        }
    }
}

impl<T> Clone for FlushableSetOptions<T> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            on_flush: self.on_flush.clone(),
        }
    }
}

impl<T> std::fmt::Debug for FlushableSetOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushableSetOptions")
            .field("max_size", &self.max_size)
            .field("on_flush", &self.on_flush.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl<T> FlushableSetOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from environment variables.
    ///
    /// Environment variables:
    /// - `FLUSHABLE_SET_MAX_SIZE`: flush threshold (default: unbounded)
    ///
    /// Unparseable values fall back to the default. `0` is kept so that
    /// construction rejects it.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_size: std::env::var(MAX_SIZE_ENV)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .or(default.max_size),
            on_flush: None,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Registers a callback that reports its own [`FlushAction`].
    pub fn with_callback(mut self, callback: FlushCallback<T>) -> Self {
        self.on_flush = Some(callback);
        self
    }

    /// Registers a synchronous flush callback.
    pub fn on_flush<F, E>(self, f: F) -> Self
    where
        T: 'static,
        F: Fn(&FlushableSet<T>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.with_callback(Arc::new(move |set: &FlushableSet<T>| match f(set) {
            Ok(()) => FlushAction::done(),
            Err(e) => FlushAction::failed(e),
        }))
    }

    /// Registers an asynchronous flush callback.
    ///
    /// The returned future must own whatever it needs; clone the set handle
    /// into it to read the buffered elements.
    pub fn on_flush_async<F, Fut, E>(self, f: F) -> Self
    where
        T: 'static,
        F: Fn(&FlushableSet<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.with_callback(Arc::new(move |set: &FlushableSet<T>| {
            FlushAction::deferred(f(set))
        }))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_size == Some(0) {
            return Err(FlushableSetError::InvalidConfiguration(
                "max_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

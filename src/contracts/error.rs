use std::sync::{MutexGuard, PoisonError};

use thiserror::Error;

/// Errors surfaced by [`FlushableSet`](crate::FlushableSet).
///
/// `Clone` because a single deferred flush outcome is handed to every waiter
/// of its [`FlushSignal`](crate::FlushSignal).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlushableSetError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "An asynchronous flush is in progress, wait for it to finish before adding more values"
    )]
    FlushInProgress,

    #[error("Flush callback failed: {0}")]
    FlushCallbackFailure(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type used across the crate.
pub type Result<T, E = FlushableSetError> = std::result::Result<T, E>;

/// Extension trait for converting lock errors to FlushableSetError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a FlushableSetError.
    fn map_lock_err(self) -> Result<T>;
}

impl<'a, T> LockResultExt<MutexGuard<'a, T>>
    for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<MutexGuard<'a, T>> {
        self.map_err(|e| FlushableSetError::LockPoisoned(e.to_string()))
    }
}

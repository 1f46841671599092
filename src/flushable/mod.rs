//! Threshold-flushed unique-element buffer.
//!
//! The only coordination state is the in-flight [`FlushSignal`]. While it is
//! present the set is flushing: [`FlushableSet::add`] is rejected and
//! [`FlushableSet::add_async`] waits for it to settle.

mod config;

use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;

use crate::contracts::{
    BoxError, FlushAction, FlushCallback, FlushSignal, FlushableSetError, LockResultExt, Result,
};

pub use config::{FlushableSetOptions, MAX_SIZE_ENV};

struct State<T> {
    storage: HashSet<T>,
    /// Present while an asynchronous flush has not settled.
    flush_signal: Option<FlushSignal>,
    /// Set while the flush callback runs outside the lock.
    invoking: bool,
}

impl<T> State<T> {
    fn is_busy(&self) -> bool {
        self.invoking || self.flush_signal.is_some()
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    max_size: Option<usize>,
    on_flush: Option<FlushCallback<T>>,
}

/// Outcome of trying to admit a value into the set.
enum Admission<T> {
    Inserted,
    /// Threshold reached and the triggered flush is asynchronous; the value is
    /// inserted when it settles.
    Deferred(FlushSignal),
    /// A flush is in progress; the value is handed back untouched.
    Busy(T),
}

/// A unique-element buffer that flushes into a sink when it reaches `max_size`.
///
/// Cloning yields another handle to the same buffer.
///
/// # Behavior
/// - `add` rejects with `FlushInProgress` while an asynchronous flush is in flight
/// - `add_async` waits for an in-flight flush, then adds, then waits for the
///   flush its own value triggered (if any)
/// - Storage is cleared only after the flush callback completes, and for
///   asynchronous flushes it is cleared even if the callback fails
pub struct FlushableSet<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FlushableSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FlushableSet<T>
where
    T: Eq + Hash + Send + 'static,
{
    /// Creates an empty set.
    pub fn new(options: FlushableSetOptions<T>) -> Result<Self> {
        Self::with_initial(std::iter::empty(), options)
    }

    /// Creates a set seeded with `initial`. Duplicates collapse and no flush
    /// is triggered, even if `initial` exceeds `max_size`.
    pub fn with_initial<I>(
        initial: I,
        options: FlushableSetOptions<T>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        options.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    storage: initial.into_iter().collect(),
                    flush_signal: None,
                    invoking: false,
                }),
                max_size: options.max_size,
                on_flush: options.on_flush,
            }),
        })
    }

    /// Element count that triggers a flush. `None` is unbounded.
    pub fn max_size(&self) -> Option<usize> {
        self.inner.max_size
    }

    /// The in-flight asynchronous flush, if any.
    pub fn flush_signal(&self) -> Option<FlushSignal> {
        self.read().flush_signal.clone()
    }

    /// Whether an asynchronous flush is in flight, i.e. `add` would be rejected.
    pub fn is_flushing(&self) -> bool {
        self.read().flush_signal.is_some()
    }

    /// Adds a value, flushing first if the set is full.
    ///
    /// If the triggered flush is asynchronous, the value is inserted once it
    /// settles rather than before returning. Use [`add_async`](Self::add_async)
    /// to observe the insertion.
    pub fn add(&self, value: T) -> Result<&Self> {
        match self.admit(value)? {
            Admission::Busy(_) => Err(FlushableSetError::FlushInProgress),
            Admission::Inserted | Admission::Deferred(_) => Ok(self),
        }
    }

    /// Adds a value, waiting out any flush in progress.
    ///
    /// A failure of the flush waited on, or of the flush this value
    /// triggered, is returned. A value waiting behind a failed flush is not
    /// inserted.
    pub async fn add_async(&self, mut value: T) -> Result<&Self> {
        loop {
            if let Some(signal) = self.flush_signal() {
                signal.await?;
            }

            match self.admit(value)? {
                Admission::Inserted => return Ok(self),
                Admission::Deferred(signal) => {
                    signal.await?;
                    return Ok(self);
                }
                Admission::Busy(returned) => {
                    value = returned;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Invokes the flush callback and clears the set.
    ///
    /// Returns `None` when the flush completed synchronously and `Some` with
    /// the in-flight signal when the callback deferred its work.
    pub fn flush(&self) -> Result<Option<FlushSignal>> {
        self.claim()?;
        self.run_flush(None)
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().storage.contains(value)
    }

    pub fn remove<Q>(&self, value: &Q) -> Result<bool>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(self.state()?.storage.remove(value))
    }

    pub fn clear(&self) -> Result<()> {
        self.state()?.storage.clear();
        Ok(())
    }

    /// Takes every buffered element out without invoking the flush callback.
    pub fn drain(&self) -> Result<Vec<T>> {
        Ok(self.state()?.storage.drain().collect())
    }

    pub fn len(&self) -> usize {
        self.read().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().storage.is_empty()
    }

    /// Copies the buffered elements out, in no particular order.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.read().storage.iter().cloned().collect()
    }

    fn admit(&self, value: T) -> Result<Admission<T>> {
        {
            let mut state = self.state()?;
            if state.is_busy() {
                return Ok(Admission::Busy(value));
            }
            let full = self
                .inner
                .max_size
                .is_some_and(|max| state.storage.len() >= max);
            if !full {
                state.storage.insert(value);
                return Ok(Admission::Inserted);
            }
            state.invoking = true;
        }

        Ok(match self.run_flush(Some(value))? {
            Some(signal) => Admission::Deferred(signal),
            None => Admission::Inserted,
        })
    }

    fn claim(&self) -> Result<()> {
        let mut state = self.state()?;
        if state.is_busy() {
            return Err(FlushableSetError::FlushInProgress);
        }
        state.invoking = true;
        Ok(())
    }

    /// Runs the callback for a claimed flush. `pending` is inserted after the
    /// clear.
    fn run_flush(&self, pending: Option<T>) -> Result<Option<FlushSignal>> {
        let action = match &self.inner.on_flush {
            Some(callback) => std::panic::catch_unwind(AssertUnwindSafe(|| callback(self)))
                .unwrap_or_else(|payload| FlushAction::failed(panic_message(payload.as_ref()))),
            None => FlushAction::done(),
        };

        match action {
            FlushAction::Complete(Ok(())) => {
                let mut state = self.state()?;
                let buffered = state.storage.len();
                state.storage.clear();
                if let Some(value) = pending {
                    state.storage.insert(value);
                }
                state.invoking = false;
                tracing::debug!(path = "sync", buffered = buffered, "Flushed buffered elements");
                Ok(None)
            }
            FlushAction::Complete(Err(e)) => {
                self.state()?.invoking = false;
                Err(FlushableSetError::FlushCallbackFailure(e.to_string()))
            }
            FlushAction::Deferred(work) => self.start_deferred(work, pending).map(Some),
        }
    }

    fn start_deferred(
        &self,
        work: BoxFuture<'static, Result<(), BoxError>>,
        pending: Option<T>,
    ) -> Result<FlushSignal> {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.state()?.invoking = false;
                return Err(FlushableSetError::Runtime(e.to_string()));
            }
        };

        // Held until the signal is installed so the settle step cannot run first.
        let mut state = self.state()?;
        let task = runtime.spawn(settle(Arc::clone(&self.inner), work, pending));
        let owner = Arc::downgrade(&self.inner);
        let signal: FlushSignal = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The settle step never ran, so release the marker here.
                    release_marker(&owner);
                    Err(FlushableSetError::Runtime(format!("Flush task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared();

        state.invoking = false;
        state.flush_signal = Some(signal.clone());
        tracing::debug!(
            path = "deferred",
            buffered = state.storage.len(),
            "Started asynchronous flush"
        );

        Ok(signal)
    }

    fn state(&self) -> Result<MutexGuard<'_, State<T>>> {
        self.inner.state.lock().map_lock_err()
    }

    /// Lock for the read accessors. They stay infallible on a poisoned lock,
    /// like the settle step, while mutators report `LockPoisoned`.
    fn read(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Awaits the sink, then clears storage and releases the in-flight marker
/// whatever the outcome.
async fn settle<T>(
    inner: Arc<Inner<T>>,
    work: BoxFuture<'static, Result<(), BoxError>>,
    pending: Option<T>,
) -> Result<()>
where
    T: Eq + Hash + Send + 'static,
{
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FlushableSetError::FlushCallbackFailure(e.to_string())),
        Err(payload) => Err(FlushableSetError::FlushCallbackFailure(panic_message(
            payload.as_ref(),
        ))),
    };

    {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let buffered = state.storage.len();
        state.storage.clear();
        if let Some(value) = pending {
            tracing::trace!("Inserting value deferred behind flush");
            state.storage.insert(value);
        }
        state.flush_signal = None;
        tracing::debug!(
            buffered = buffered,
            ok = result.is_ok(),
            "Asynchronous flush settled"
        );
    }

    result
}

/// Clears the in-flight marker of a flush whose task was dropped before it
/// could settle. Storage is left as it was.
fn release_marker<T>(owner: &Weak<Inner<T>>) {
    if let Some(inner) = owner.upgrade() {
        inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush_signal = None;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("flush callback panicked: {}", detail)
}

impl<T> std::fmt::Debug for FlushableSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("FlushableSet")
            .field("max_size", &self.inner.max_size)
            .field("flushing", &state.flush_signal.is_some())
            .field("buffered", &state.storage.len())
            .finish()
    }
}

//! A unique-element buffer with a size threshold that flushes into a sink.
//!
//! [`FlushableSet`] behaves like a set, but once it holds `max_size` elements
//! the next add invokes the configured flush callback and clears the buffer.
//! The callback may finish synchronously or hand back a future; while such a
//! future is in flight `add` is rejected and `add_async` waits.
//!
//! ```
//! use flushable_set::{FlushableSet, FlushableSetOptions};
//!
//! let set = FlushableSet::new(
//!     FlushableSetOptions::new()
//!         .with_max_size(2)
//!         .on_flush(|set: &FlushableSet<u32>| {
//!             assert_eq!(set.len(), 2);
//!             Ok::<(), std::io::Error>(())
//!         }),
//! )?;
//!
//! set.add(1)?.add(2)?.add(3)?;
//! assert_eq!(set.snapshot(), vec![3]);
//! # Ok::<(), flushable_set::FlushableSetError>(())
//! ```

pub mod contracts;
pub mod flushable;

pub use contracts::{
    BoxError, FlushAction, FlushCallback, FlushSignal, FlushableSetError, Result,
};
pub use flushable::{FlushableSet, FlushableSetOptions, MAX_SIZE_ENV};

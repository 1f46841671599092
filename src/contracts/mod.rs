pub mod error;
pub mod flusher;

pub use error::{FlushableSetError, LockResultExt, Result};
pub use flusher::{BoxError, FlushAction, FlushCallback, FlushSignal};

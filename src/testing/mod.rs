//! In-process doubles for the store, cache, queue and time seams.
//!
//! Used by the integration tests and for running the pipeline without
//! Postgres or Redis.

pub mod cache;
pub mod queue;
pub mod store;
pub mod time;

pub use cache::MemoryCache;
pub use queue::{MemoryConsumer, MemoryQueue};
pub use store::MemoryStore;
pub use time::{ManualClock, RecordingSleeper};

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

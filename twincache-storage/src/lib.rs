//! twincache Storage - Key-Value Store Coordination
//!
//! The remote store offers a single synchronization primitive: a write to
//! one key conditioned on the etag last read from it. This crate wraps that
//! primitive:
//!
//! - [`KeyValueStore`]: the store trait with explicit read/write outcomes
//! - [`InMemoryKeyValueStore`] and [`StorageAdapterClient`]: implementations
//! - [`OptimisticWriteLock`]: advisory lock co-located with the value
//! - [`retry_until`]: conflict loop bounded by a [`Deadline`]

pub mod http;
pub mod lock;
pub mod memory;
pub mod retry;
pub mod traits;

pub use http::StorageAdapterClient;
pub use lock::{
    read_snapshot, write_value, LockAttempt, LockGuard, Lockable, OptimisticWriteLock, Snapshot,
};
pub use memory::InMemoryKeyValueStore;
pub use retry::{retry_until, Attempt, Deadline, FixedBackoff};
pub use traits::{KeyValueStore, ReadOutcome, WriteOutcome};

//! Durable list/map store — single async interface for all persistence.
//!
//! The queue, outbox, event log, and settings all live in one Redis-style
//! store: ordered lists addressed by key plus a flat key/value space.
//! `range` and `trim` accept negative indices with Redis clamping semantics
//! (`-1` is the tail).

use async_trait::async_trait;

use crate::error::StorageError;

mod memory;
mod upstash;

pub use memory::MemoryStore;
pub use upstash::{UpstashConfig, UpstashStore};

/// Backend-agnostic durable store.
///
/// Every operation is one blocking round trip to the backend. List pops are
/// atomic at the store level; that atomicity is the only concurrency
/// guarantee the rest of the service relies on.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Append a value to the tail of the list at `key`.
    async fn push_tail(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Pop the value at the head of the list at `key`. `None` if empty.
    async fn pop_head(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Current length of the list at `key` (0 if absent).
    async fn len(&self, key: &str) -> Result<u64, StorageError>;

    /// Values at indices `start..=stop` (inclusive, negative = from tail).
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError>;

    /// Retain only indices `start..=stop`, dropping everything else.
    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError>;

    /// Read the plain value at `key`. `None` if absent.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write the plain value at `key`.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

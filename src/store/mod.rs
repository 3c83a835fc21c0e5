//! List store abstraction.
//!
//! The queue needs exactly two primitives from its backing store: push onto
//! the head of a named list, and pop from its tail, blocking up to a timeout.
//! Pushing and popping at opposite ends makes every list FIFO.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::error::Result;
use std::time::Duration;

/// Ordered lists addressed by key.
#[async_trait::async_trait]
pub trait ListStore: Send + Sync {
    /// Push `value` onto the head of the list at `key`.
    async fn push(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Pop from the tail of the list at `key`, waiting up to `timeout` for an
    /// element. `Duration::ZERO` waits indefinitely. `None` means the wait
    /// expired.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Number of elements in the list at `key`.
    async fn len(&self, key: &str) -> Result<u64>;

    /// Release connections. Later calls fail with `Error::Closed`.
    async fn close(&self) -> Result<()>;
}

// Re-export async_trait for implementors
pub use async_trait::async_trait;

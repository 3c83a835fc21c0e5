//! In-process list store.
//!
//! Same contract as the Redis store: push to the head, blocking pop from the
//! tail, zero timeout waits forever. Useful for tests and single-process
//! pipelines.

use crate::error::{Error, Result};
use crate::store::ListStore;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    /// Woken on every push and on close.
    changed: Notify,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the list at `key`, head first. Does not consume anything.
    pub fn snapshot(&self, key: &str) -> Vec<Vec<u8>> {
        self.lock()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Vec<u8>>>> {
        // A panic while holding the lock cannot leave a list half-modified.
        self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn try_pop(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get_mut(key).and_then(VecDeque::pop_back)
    }
}

#[async_trait::async_trait]
impl ListStore for MemoryStore {
    async fn push(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        self.lock()
            .entry(key.to_string())
            .or_default()
            .push_front(value);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // A timeout too large to land on the clock waits indefinitely, like zero.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };

        loop {
            // Register interest before looking so a concurrent push is not missed.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            self.check_open()?;
            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, changed).await.is_err() {
                        return Ok(None);
                    }
                }
                None => changed.await,
            }
        }
    }

    async fn len(&self, key: &str) -> Result<u64> {
        self.check_open()?;
        Ok(self.lock().get(key).map_or(0, |list| list.len() as u64))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.changed.notify_waiters();
        Ok(())
    }
}

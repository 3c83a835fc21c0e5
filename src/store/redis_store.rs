//! Redis-backed list store.
//!
//! LPUSH onto the head, BRPOP from the tail. Plain commands share one
//! multiplexed connection. Redis serves a connection's commands in order, so
//! a BRPOP parked for its whole timeout would stall every producer behind it;
//! each blocking pop therefore runs on its own connection.

use crate::error::{Error, Result};
use crate::store::ListStore;

use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Longest wait sent to BRPOP as-is; anything beyond blocks indefinitely.
const MAX_BLOCK: Duration = Duration::from_secs(i32::MAX as u64);

/// BRPOP timeout argument in seconds, where 0 means no limit.
fn brpop_timeout(timeout: Duration) -> f64 {
    if timeout > MAX_BLOCK {
        0.0
    } else {
        timeout.as_secs_f64()
    }
}

/// Redis list store. `None` in `connection` means closed.
pub struct RedisStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Open a client and establish the shared connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {e}")))?;
        let connection = client.get_multiplexed_async_connection().await?;

        debug!("redis connection established");

        Ok(Self {
            client,
            connection: RwLock::new(Some(connection)),
        })
    }

    async fn shared_conn(&self) -> Result<MultiplexedConnection> {
        self.connection.read().await.clone().ok_or(Error::Closed)
    }

    /// A fresh connection for a blocking command.
    async fn dedicated_conn(&self) -> Result<MultiplexedConnection> {
        if self.connection.read().await.is_none() {
            return Err(Error::Closed);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait::async_trait]
impl ListStore for RedisStore {
    async fn push(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.shared_conn().await?;
        let len: u64 = conn.lpush(key, value).await?;
        debug!(key, len, "lpush");
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut conn = self.dedicated_conn().await?;

        // BRPOP replies [key, element], or nil once the timeout lapses.
        let reply: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(brpop_timeout(timeout))
            .query_async(&mut conn)
            .await?;

        debug!(key, hit = reply.is_some(), "brpop");
        Ok(reply.map(|(_, value)| value))
    }

    async fn len(&self, key: &str) -> Result<u64> {
        let mut conn = self.shared_conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn close(&self) -> Result<()> {
        if self.connection.write().await.take().is_some() {
            debug!("redis connection released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_pass_through_as_fractional_seconds() {
        assert_eq!(brpop_timeout(Duration::ZERO), 0.0);
        assert_eq!(brpop_timeout(Duration::from_millis(1500)), 1.5);
    }

    #[test]
    fn oversized_timeout_blocks_indefinitely() {
        assert_eq!(brpop_timeout(Duration::MAX), 0.0);
        assert_eq!(brpop_timeout(MAX_BLOCK), MAX_BLOCK.as_secs_f64());
    }
}

//! The queue client: enqueue, blocking dequeue, bounded retry, dead-lettering.
//!
//! Every envelope lives on one of two store lists: the live channel `<name>`
//! and the dead-letter channel `<name>:dead`. Producers push onto the head of
//! the live channel; consumers pop from its tail. A failed envelope is pushed
//! back onto the head of the live channel until it has failed `max_tries`
//! times, after which it is parked on the dead-letter channel for a human or
//! a replay tool to look at.
//!
//! Moving an envelope between channels is a pop followed by a push. If the
//! consumer process dies in between, the envelope is gone from both.

use crate::channel::Channels;
use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::model::{Envelope, MessageId, QueueStats};
use crate::store::{ListStore, RedisStore};
use crate::telemetry::metrics;

use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Attempts allowed before an envelope is dead-lettered.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Construction parameters, fixed for the lifetime of a [`Queue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub max_tries: u32,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    pub fn max_tries(mut self, n: u32) -> Self {
        self.max_tries = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("queue name must not be empty".to_string()));
        }
        if self.max_tries == 0 {
            return Err(Error::Config("max_tries must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where `retry` sent an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Back on the live channel for another attempt.
    Requeued,
    /// Out of attempts; parked on the dead-letter channel.
    DeadLettered,
}

/// Queue client. Share it behind an `Arc`; every operation takes `&self`.
pub struct Queue<S = RedisStore, C = JsonCodec> {
    store: S,
    codec: C,
    channels: Channels,
    max_tries: u32,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Queue<RedisStore, JsonCodec> {
    /// Connect to Redis at `url` and build a JSON-encoding queue.
    pub async fn connect(url: &str, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(url).await?;
        Self::with_store(config, store, JsonCodec)
    }
}

impl<S: ListStore, C: Codec> Queue<S, C> {
    /// Build a queue over any list store and codec.
    pub fn with_store(config: QueueConfig, store: S, codec: C) -> Result<Self> {
        config.validate()?;
        let channels = Channels::for_queue(&config.name);

        info!(
            queue = %channels.live,
            dead_letter = %channels.dead,
            max_tries = config.max_tries,
            "queue ready"
        );

        Ok(Self {
            store,
            codec,
            channels,
            max_tries: config.max_tries,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.channels.live
    }

    pub fn dead_name(&self) -> &str {
        &self.channels.dead
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wrap `payload` in a new envelope and push it onto the live channel.
    /// Returns the envelope's id.
    pub async fn enqueue<T: Serialize>(&self, kind: Option<&str>, payload: T) -> Result<MessageId> {
        let envelope = Envelope::new(kind.map(str::to_string), payload);
        self.push(&self.channels.live, &envelope).await?;
        self.count("enqueue");

        debug!(queue = %self.channels.live, id = %envelope.id, kind = ?envelope.kind, "enqueued");
        Ok(envelope.id)
    }

    /// Pop the oldest envelope from the live channel, waiting up to `timeout`
    /// (`Duration::ZERO` waits forever). `Ok(None)` means the wait expired.
    ///
    /// An entry that cannot be decoded is moved as-is to the dead-letter
    /// channel and reported as [`Error::Malformed`].
    pub async fn dequeue<T: DeserializeOwned>(&self, timeout: Duration) -> Result<Option<Envelope<T>>> {
        let Some(raw) = self.pop_raw(&self.channels.live, timeout).await? else {
            self.count("dequeue_empty");
            return Ok(None);
        };

        match self.decode(&self.channels.live, &raw) {
            Ok(envelope) => {
                self.count("dequeue");
                debug!(
                    queue = %self.channels.live,
                    id = %envelope.id,
                    attempts = envelope.attempts,
                    "dequeued"
                );
                Ok(Some(envelope))
            }
            Err(err) => {
                warn!(
                    queue = %self.channels.live,
                    error = %err,
                    "quarantining undecodable entry on dead-letter channel"
                );
                self.store.push(&self.channels.dead, raw).await?;
                self.count("quarantine");
                Err(err)
            }
        }
    }

    /// Record a failed attempt and push the envelope back onto the live
    /// channel, or onto the dead-letter channel once it has failed
    /// `max_tries` times. Counts exactly one attempt either way.
    ///
    /// On error the envelope's attempt count is left unchanged.
    pub async fn retry<T: Serialize>(&self, envelope: &mut Envelope<T>) -> Result<Route> {
        let before = envelope.attempts;
        let attempts = envelope.record_attempt();

        let routed = if attempts >= self.max_tries {
            self.dead_letter(envelope).await.map(|()| Route::DeadLettered)
        } else {
            self.push(&self.channels.live, envelope)
                .await
                .map(|()| Route::Requeued)
        };

        match routed {
            Ok(route) => {
                if route == Route::Requeued {
                    self.count("retry");
                    debug!(
                        queue = %self.channels.live,
                        id = %envelope.id,
                        attempts,
                        max_tries = self.max_tries,
                        "requeued for retry"
                    );
                }
                Ok(route)
            }
            Err(err) => {
                envelope.attempts = before;
                Err(err)
            }
        }
    }

    /// Record a failed attempt and park the envelope on the dead-letter
    /// channel regardless of how many attempts remain.
    ///
    /// On error the envelope's attempt count is left unchanged.
    pub async fn fail<T: Serialize>(&self, envelope: &mut Envelope<T>) -> Result<()> {
        let before = envelope.attempts;
        envelope.record_attempt();

        self.dead_letter(envelope).await.inspect_err(|_| {
            envelope.attempts = before;
        })
    }

    /// Pop the oldest envelope from the dead-letter channel. Same waiting
    /// rules as [`Queue::dequeue`]; undecodable entries are reported with
    /// their raw text and not put back.
    pub async fn drain_dead_letter<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<Envelope<T>>> {
        let Some(raw) = self.pop_raw(&self.channels.dead, timeout).await? else {
            return Ok(None);
        };
        let envelope = self.decode(&self.channels.dead, &raw)?;
        self.count("drain");
        Ok(Some(envelope))
    }

    /// Push an envelope back onto the live channel exactly as it is. Id,
    /// creation time and attempts are preserved.
    pub async fn replay<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<()> {
        self.push(&self.channels.live, envelope).await?;
        self.count("replay");
        info!(
            queue = %self.channels.live,
            id = %envelope.id,
            attempts = envelope.attempts,
            "replayed"
        );
        Ok(())
    }

    /// Current depth of both channels.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.check_open()?;
        Ok(QueueStats {
            pending: self.store.len(&self.channels.live).await?,
            dead: self.store.len(&self.channels.dead).await?,
        })
    }

    /// Release the store connection. Blocked `dequeue`/`drain_dead_letter`
    /// calls return [`Error::Closed`]; so does everything afterwards.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.close_notify.notify_waiters();
        self.store.close().await?;
        info!(queue = %self.channels.live, "queue closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    async fn push<T: Serialize>(&self, channel: &str, envelope: &Envelope<T>) -> Result<()> {
        self.check_open()?;
        let bytes = self.codec.encode(envelope)?;
        self.store.push(channel, bytes).await
    }

    /// Terminal routing. Does not touch `attempts`.
    async fn dead_letter<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<()> {
        self.push(&self.channels.dead, envelope).await?;
        self.count("dead_letter");
        metrics::dead_lettered().add(1, &[KeyValue::new("queue", self.channels.live.clone())]);
        info!(
            queue = %self.channels.live,
            id = %envelope.id,
            kind = ?envelope.kind,
            attempts = envelope.attempts,
            "dead-lettered"
        );
        Ok(())
    }

    async fn pop_raw(&self, channel: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // Register for the close signal before checking the flag.
        let closed = self.close_notify.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        self.check_open()?;

        tokio::select! {
            _ = closed => Err(Error::Closed),
            popped = self.store.blocking_pop(channel, timeout) => popped,
        }
    }

    fn decode<T: DeserializeOwned>(&self, channel: &str, raw: &[u8]) -> Result<Envelope<T>> {
        self.codec.decode(raw).map_err(|reason| Error::Malformed {
            channel: channel.to_string(),
            reason,
            raw: String::from_utf8_lossy(raw).into_owned(),
        })
    }

    fn count(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.channels.live.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

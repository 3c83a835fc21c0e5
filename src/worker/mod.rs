//! Consumer loop: dequeue, hand to a handler, route by its verdict.
//!
//! A [`Worker`] owns nothing but an `Arc` to the queue, so any number of them
//! can share one client. Each envelope is handled inside a `queue.process`
//! span. Store hiccups are logged and retried after a pause; the loop only
//! ends on [`Worker::shutdown`] or when the queue is closed.

pub mod command;

pub use command::CommandHandler;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::model::Envelope;
use crate::queue::{Queue, Route};
use crate::store::{ListStore, RedisStore};
use crate::telemetry::metrics;
use crate::telemetry::process::{record_disposition, start_process_span};

use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

/// A handler's verdict on one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; drop the envelope.
    Done,
    /// Failed; count the attempt and requeue (or dead-letter once exhausted).
    Retry { error: String },
    /// Failed for good; dead-letter now.
    DeadLetter { error: String },
}

impl Disposition {
    pub fn retry(error: impl std::fmt::Display) -> Self {
        Self::Retry {
            error: error.to_string(),
        }
    }

    pub fn dead_letter(error: impl std::fmt::Display) -> Self {
        Self::DeadLetter {
            error: error.to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Done => "done",
            Disposition::Retry { .. } => "retry",
            Disposition::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// Processes one envelope.
#[async_trait::async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(&self, envelope: &Envelope<T>) -> Disposition;
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long each dequeue blocks before the loop goes round again.
    pub poll_timeout: Duration,
    /// Pause after a store error before dequeuing again.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters since the worker started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
    /// Store failures that sent the loop into backoff.
    pub store_errors: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
    store_errors: AtomicU64,
}

pub struct Worker<T, H, S = RedisStore, C = JsonCodec> {
    queue: Arc<Queue<S, C>>,
    handler: Arc<H>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H, S, C> Clone for Worker<T, H, S, C> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            stopping: Arc::clone(&self.stopping),
            counters: Arc::clone(&self.counters),
            _payload: PhantomData,
        }
    }
}

impl<T, H, S, C> Worker<T, H, S, C>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    H: Handler<T>,
    S: ListStore,
    C: Codec,
{
    pub fn new(queue: Arc<Queue<S, C>>, handler: Arc<H>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            _payload: PhantomData,
        }
    }

    /// Stop every loop running on this worker or any of its clones. Loops
    /// started afterwards return at once. An envelope already being handled
    /// is finished and routed first.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Resolves once shutdown has been requested.
    async fn stopped(&self) {
        loop {
            let notified = self.shutdown.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent shutdown is not missed.
            notified.as_mut().enable();
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Run until shutdown or until the queue is closed.
    pub async fn run(&self) -> Result<WorkerStats> {
        info!(queue = %self.queue.name(), "worker started");

        loop {
            let next = tokio::select! {
                _ = self.stopped() => {
                    info!(queue = %self.queue.name(), "worker shutting down");
                    break;
                }
                next = self.queue.dequeue::<T>(self.config.poll_timeout) => next,
            };

            let outcome = match next {
                Ok(Some(envelope)) => self.process(envelope).await,
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {}
                Err(Error::Closed) => {
                    info!(queue = %self.queue.name(), "queue closed, worker stopping");
                    break;
                }
                Err(err @ Error::Malformed { .. }) => {
                    self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "skipped malformed entry");
                }
                Err(err) => {
                    self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %err, "queue operation failed, backing off");
                    tokio::select! {
                        _ = self.stopped() => {
                            info!(queue = %self.queue.name(), "worker shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        Ok(self.stats())
    }

    /// Handle one envelope and route it by the handler's verdict.
    async fn process(&self, mut envelope: Envelope<T>) -> Result<()> {
        let span = start_process_span(self.queue.name(), &envelope);

        async {
            let started = Instant::now();
            let disposition = self.handler.handle(&envelope).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            record_disposition(&span, disposition.label());
            metrics::handle_duration_ms().record(
                elapsed_ms,
                &[
                    KeyValue::new("queue", self.queue.name().to_string()),
                    KeyValue::new("disposition", disposition.label()),
                ],
            );

            match disposition {
                Disposition::Done => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Disposition::Retry { error } => {
                    warn!(id = %envelope.id, attempts = envelope.attempts, %error, "handler failed");
                    let route = self.queue.retry(&mut envelope).await.inspect_err(|e| {
                        error!(id = %envelope.id, error = %e, "could not route failed envelope");
                    })?;
                    let counter = match route {
                        Route::Requeued => &self.counters.retried,
                        Route::DeadLettered => &self.counters.dead_lettered,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Disposition::DeadLetter { error } => {
                    warn!(id = %envelope.id, %error, "handler gave up on envelope");
                    self.queue.fail(&mut envelope).await.inspect_err(|e| {
                        error!(id = %envelope.id, error = %e, "could not dead-letter envelope");
                    })?;
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                }
            }

            Ok(())
        }
        .instrument(span.clone())
        .await
    }
}

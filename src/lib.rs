//! # qued
//!
//! Reliable work queues on Redis lists.
//!
//! Producers [`enqueue`](Queue::enqueue) payloads wrapped in an [`Envelope`];
//! consumers [`dequeue`](Queue::dequeue) them with a blocking pop. A consumer
//! that fails calls [`retry`](Queue::retry), which puts the envelope back
//! until it has failed `max_tries` times and then parks it on the
//! `<name>:dead` channel. [`Worker`] wraps that loop around a [`Handler`].
//!
//! ```no_run
//! use qued::{Queue, QueueConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> qued::Result<()> {
//! let queue = Queue::connect("redis://localhost:6379", QueueConfig::new("my-queue")).await?;
//! let id = queue
//!     .enqueue(Some("user.created"), serde_json::json!({"name": "John Doe"}))
//!     .await?;
//!
//! if let Some(mut msg) = queue.dequeue::<serde_json::Value>(Duration::ZERO).await? {
//!     assert_eq!(msg.id, id);
//!     queue.retry(&mut msg).await?;
//! }
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use codec::{Codec, JsonCodec};
pub use error::{Error, Result};
pub use model::{Envelope, MessageId, QueueStats};
pub use queue::{Queue, QueueConfig, Route};
pub use store::{ListStore, MemoryStore, RedisStore};
pub use worker::{Disposition, Handler, Worker, WorkerConfig, WorkerStats};

//! Error types for qued.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// An entry popped from `channel` could not be decoded into an envelope.
    #[error("malformed envelope on {channel}: {reason}")]
    Malformed {
        channel: String,
        reason: String,
        raw: String,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("queue is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Envelope serialization.
//!
//! The queue never looks inside a payload; it hands whole envelopes to a
//! [`Codec`] on the way into the store and on the way out.

use crate::error::{Error, Result};
use crate::model::Envelope;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Turns envelopes into store bytes and back.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<Vec<u8>>;

    /// Decode failures are reported as a plain reason; the queue attaches the
    /// channel and raw bytes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> std::result::Result<Envelope<T>, String>;
}

/// Compact JSON, one object per entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<Vec<u8>> {
        serde_json::to_vec(envelope)
            .map_err(|e| Error::Codec(format!("encode envelope {}: {e}", envelope.id)))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> std::result::Result<Envelope<T>, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

//! Core data model.
//!
//! An envelope wraps a caller payload with identity, an optional type tag,
//! the time it was first enqueued, and how many times processing has failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Message ID
// ---------------------------------------------------------------------------

/// Newtype for message IDs. Serialized as the bare UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A unit of work as it travels through the live and dead-letter channels.
///
/// Everything except `attempts` is fixed when the envelope is created by
/// `Queue::enqueue`. `attempts` only ever grows, by one per `retry` or
/// `fail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: MessageId,

    /// Caller-supplied tag classifying the payload (e.g. "user.created").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Opaque to the queue.
    pub payload: T,

    /// First-seen time. Not refreshed on retry.
    pub created_at: DateTime<Utc>,

    /// Number of failed processing attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl<T> Envelope<T> {
    /// Wrap a payload in a brand-new envelope: fresh id, zero attempts.
    pub fn new(kind: Option<String>, payload: T) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            payload,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    /// The type tag, if any.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time channel depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Envelopes waiting on the live channel.
    pub pending: u64,
    /// Envelopes parked on the dead-letter channel.
    pub dead: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_envelope_starts_at_zero_attempts() {
        let env = Envelope::new(Some("user.created".to_string()), json!({"job": 1}));
        assert_eq!(env.attempts, 0);
        assert_eq!(env.kind(), Some("user.created"));
        assert!(env.created_at <= Utc::now());
    }

    #[test]
    fn ids_are_unique() {
        let a = Envelope::new(None, 1);
        let b = Envelope::new(None, 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let env = Envelope::new(Some("t".to_string()), json!({"job": 1}));
        let value = serde_json::to_value(&env).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["id", "type", "payload", "created_at", "attempts"] {
            assert!(obj.contains_key(field), "missing {field}");
        }
        assert_eq!(obj["id"], json!(env.id.to_string()));
    }

    #[test]
    fn absent_type_is_omitted() {
        let env = Envelope::new(None, "x");
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("type").is_none());
    }

    #[test]
    fn missing_attempts_decodes_as_zero() {
        let raw = r#"{
            "id": "6f1c1c3e-4a4b-4d6a-9d0e-1f2a3b4c5d6e",
            "payload": {"name": "John Doe"},
            "created_at": "2025-01-02T03:04:05Z"
        }"#;
        let env: Envelope<serde_json::Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.attempts, 0);
        assert_eq!(env.kind, None);
        assert_eq!(env.payload["name"], "John Doe");
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut env = Envelope::new(Some("job".to_string()), json!([1, "two", {"three": 3.0}]));
        env.record_attempt();
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn record_attempt_is_monotonic() {
        let mut env = Envelope::new(None, ());
        assert_eq!(env.record_attempt(), 1);
        assert_eq!(env.record_attempt(), 2);
        env.attempts = u32::MAX;
        assert_eq!(env.record_attempt(), u32::MAX);
    }
}

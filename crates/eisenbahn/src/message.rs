use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EisenbahnError;

/// Wire-format message envelope for inter-component communication.
///
/// Messages are serialized with MessagePack for compact, fast transport.
/// The `topic` field is used by PUB/SUB routing, while `correlation_id`
/// enables request-response tracking and distributed tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Routing topic naming the payload type (e.g. "dpip.ingest.workload").
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this message was created.
    pub timestamp: DateTime<Utc>,

    /// Correlation ID matching replies to requests.
    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    /// Consumers should check this before deserializing the payload.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Default version for messages that omit the field (backward compat).
fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        })
    }

    /// Create a message with an explicit correlation ID (for replies/continuations).
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            version: 1,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    /// Decode a raw pipeline frame into a payload.
    ///
    /// The frame is normally a MessagePack envelope. Upstream producers that
    /// push the bare payload as JSON are accepted too. Anything else is a
    /// [`EisenbahnError::Protocol`] error.
    pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, EisenbahnError> {
        if let Ok(message) = Self::from_bytes(frame) {
            return message.decode().map_err(|e| {
                EisenbahnError::Protocol(format!(
                    "payload of topic '{}' does not decode: {e}",
                    message.topic
                ))
            });
        }
        serde_json::from_slice(frame).map_err(|e| {
            EisenbahnError::Protocol(format!("frame is neither an envelope nor JSON: {e}"))
        })
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

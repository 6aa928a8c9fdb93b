//! Event payload serialization.
//!
//! The registry and its stores never look inside a payload. They only need a
//! round-trip between an event and the string that gets persisted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to serialize event: {0}")]
    Encode(String),
    #[error("failed to deserialize event of type {event_type}: {reason}")]
    Decode { event_type: String, reason: String },
}

impl SerializationError {
    fn decode(event_type: &str, reason: impl ToString) -> Self {
        SerializationError::Decode {
            event_type: event_type.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Converts events to and from their persisted string form.
pub trait EventSerializer: Send + Sync {
    fn serialize<E: Serialize>(&self, event: &E) -> Result<String, SerializationError>;

    fn deserialize<E: DeserializeOwned>(
        &self,
        serialized: &str,
        event_type: &str,
    ) -> Result<E, SerializationError>;
}

/// JSON serialization via serde_json. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize<E: Serialize>(&self, event: &E) -> Result<String, SerializationError> {
        serde_json::to_string(event).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn deserialize<E: DeserializeOwned>(
        &self,
        serialized: &str,
        event_type: &str,
    ) -> Result<E, SerializationError> {
        serde_json::from_str(serialized).map_err(|e| SerializationError::decode(event_type, e))
    }
}

/// Compact binary serialization: bitcode bytes, base64 encoded so the
/// persisted column stays textual.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitcodeEventSerializer;

impl EventSerializer for BitcodeEventSerializer {
    fn serialize<E: Serialize>(&self, event: &E) -> Result<String, SerializationError> {
        let bytes =
            bitcode::serialize(event).map_err(|e| SerializationError::Encode(e.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    fn deserialize<E: DeserializeOwned>(
        &self,
        serialized: &str,
        event_type: &str,
    ) -> Result<E, SerializationError> {
        let bytes = STANDARD
            .decode(serialized)
            .map_err(|e| SerializationError::decode(event_type, e))?;
        bitcode::deserialize(&bytes).map_err(|e| SerializationError::decode(event_type, e))
    }
}

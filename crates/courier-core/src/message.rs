use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{CourierError, CourierResult};

/// Ordered-key payload mapping carried by a [`Message`].
pub type Payload = serde_json::Map<String, Value>;

/// The envelope carried by every bus.
///
/// A message is immutable by convention once handed to a broker: a broker
/// may fan the same payload out to multiple subscribers, so handlers must
/// treat it as shared-immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, generated when absent from a decoded form.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Dot-segmented classification (e.g. `order.created`). Immutable
    /// after creation.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Structured business payload. Keys keep their insertion order.
    #[serde(default)]
    pub payload: Payload,
    /// Transport and routing metadata, never business payload.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// UTC creation instant, generated when absent from a decoded form.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message of the given type with a fresh id and timestamp
    /// and empty payload and headers.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload: Payload::new(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inserts a single payload entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Inserts a single header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Encodes the message as a generic structured mapping.
    pub fn to_value(&self) -> CourierResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| CourierError::Format(format!("message encoding failed: {e}")))
    }

    /// Decodes a message from a structured mapping.
    ///
    /// Fails with [`CourierError::Format`] when the value is not a mapping
    /// or the required `type` field is missing.
    pub fn from_value(value: Value) -> CourierResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| CourierError::Format(format!("invalid message encoding: {e}")))
    }

    /// Encodes the message as its textual serialized form.
    pub fn to_json(&self) -> CourierResult<String> {
        serde_json::to_string(self)
            .map_err(|e| CourierError::Format(format!("message encoding failed: {e}")))
    }

    /// Decodes a message from its textual serialized form.
    ///
    /// Fails with [`CourierError::Format`] when the input is not valid
    /// structured data or the required `type` field is missing.
    pub fn from_json(raw: &str) -> CourierResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CourierError::Format(format!("invalid message encoding: {e}")))
    }
}

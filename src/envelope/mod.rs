//! Wire envelope and its decoded form.
//!
//! Every frame on the socket is a JSON envelope:
//!
//! ```text
//! { "type": string, "channel": string|null, "id": string, "timestamp": number, "data": any }
//! ```
//!
//! Inbound frames are decoded once into [`Envelope`], whose [`Payload`] is a
//! sum type over the known `type` values; listeners never re-parse `data`.

mod command;

pub use command::Command;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::execution::ExecutionUpdate;
use crate::notification::NotificationRecord;

/// Reserved inbound `type` values
pub const TYPE_NOTIFICATION: &str = "notification";
pub const TYPE_EXECUTION_UPDATE: &str = "execution_update";
pub const TYPE_SUBSCRIBE_ACK: &str = "subscribe_ack";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_PONG: &str = "pong";

/// Envelope exactly as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WireEnvelope {
    /// Build an outbound envelope with a fresh id and the current time
    pub fn new(kind: impl Into<String>, channel: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            channel,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeAckData {
    #[serde(default)]
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Decoded payload, one variant per reserved `type`
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Notification(NotificationRecord),
    ExecutionUpdate(ExecutionUpdate),
    SubscribeAck { channels: Vec<String> },
    Error { code: Option<String>, message: String },
    Pong,
    /// Any `type` this client does not know; kept verbatim
    Unknown { kind: String, data: serde_json::Value },
}

/// Inbound envelope after decoding
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: Option<String>,
    pub id: String,
    pub timestamp: i64,
    pub payload: Payload,
}

impl Envelope {
    /// Decode a text frame
    pub fn decode(frame: &str) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_str(frame)?;
        Self::from_wire(wire)
    }

    pub fn from_wire(wire: WireEnvelope) -> Result<Self> {
        let WireEnvelope {
            kind,
            channel,
            id,
            timestamp,
            data,
        } = wire;

        let payload = match kind.as_str() {
            TYPE_NOTIFICATION => {
                let mut body: crate::notification::NotificationPayload =
                    serde_json::from_value(data)?;
                if body.id.as_deref().is_some_and(str::is_empty) {
                    body.id = None;
                }
                if body.id.is_none() && id.is_empty() {
                    return Err(ClientError::Decode(
                        "notification without an id".to_string(),
                    ));
                }
                Payload::Notification(body.into_record(&id, timestamp))
            }
            TYPE_EXECUTION_UPDATE => {
                let mut update: ExecutionUpdate = serde_json::from_value(data)?;
                if update.timestamp == 0 {
                    update.timestamp = timestamp;
                }
                Payload::ExecutionUpdate(update)
            }
            TYPE_SUBSCRIBE_ACK => {
                let ack: SubscribeAckData = serde_json::from_value(data)?;
                Payload::SubscribeAck {
                    channels: ack.channels,
                }
            }
            TYPE_ERROR => {
                let err: ErrorData = serde_json::from_value(data)?;
                Payload::Error {
                    code: err.code,
                    message: err.message,
                }
            }
            TYPE_PONG => Payload::Pong,
            _ => Payload::Unknown { kind, data },
        };

        Ok(Self {
            channel,
            id,
            timestamp,
            payload,
        })
    }

    /// The wire `type` this envelope was decoded from
    pub fn kind(&self) -> &str {
        match &self.payload {
            Payload::Notification(_) => TYPE_NOTIFICATION,
            Payload::ExecutionUpdate(_) => TYPE_EXECUTION_UPDATE,
            Payload::SubscribeAck { .. } => TYPE_SUBSCRIBE_ACK,
            Payload::Error { .. } => TYPE_ERROR,
            Payload::Pong => TYPE_PONG,
            Payload::Unknown { kind, .. } => kind,
        }
    }

    pub fn notification(&self) -> Option<&NotificationRecord> {
        match &self.payload {
            Payload::Notification(record) => Some(record),
            _ => None,
        }
    }

    pub fn execution_update(&self) -> Option<&ExecutionUpdate> {
        match &self.payload {
            Payload::ExecutionUpdate(update) => Some(update),
            _ => None,
        }
    }
}

//! JSON wire envelope and its codec.
//!
//! Every frame exchanged with a client is a JSON object carrying a required
//! `type` tag plus optional `to`, `from`, `payload` and `ts`. Unknown top-level
//! fields survive a decode/encode cycle so the echo path can return a message
//! verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sender attribution used for envelopes the server originates.
pub const SERVER_SENDER: &str = "server";

/// Tag of every envelope, over the reserved set plus anything else a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Ack,
    Echo,
    Error,
    Warn,
    /// Job dispatch request.
    Job,
    /// Job result delivered to the receiver.
    Followers,
    /// Job completion notice delivered to the requester.
    Done,
    /// Job failure notice delivered to the receiver.
    JobError,
    /// Presence ping.
    Ping,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ack => "ack",
            Self::Echo => "echo",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Job => "job",
            Self::Followers => "followers",
            Self::Done => "done",
            Self::JobError => "job_error",
            Self::Ping => "ping",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ack" => Self::Ack,
            "echo" => Self::Echo,
            "error" => Self::Error,
            "warn" => Self::Warn,
            "job" => Self::Job,
            "followers" => Self::Followers,
            "done" => Self::Done,
            "job_error" => Self::JobError,
            "ping" => Self::Ping,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<MessageKind>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            to: None,
            from: None,
            payload,
            ts: None,
            extra: Map::new(),
        }
    }

    /// Envelope attributed to the server itself.
    pub fn server(kind: impl Into<MessageKind>, payload: Value) -> Self {
        Self::new(kind, Some(payload)).with_from(SERVER_SENDER)
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Serialize for the wire, stamping `ts` if the envelope has none.
    pub fn encode(&self) -> String {
        let mut out = self.clone();
        if out.ts.is_none() {
            out.ts = Some(now_millis());
        }
        // Map keys are strings and every value is already a serde_json::Value,
        // so serialization cannot fail.
        serde_json::to_string(&out).unwrap_or_default()
    }

    /// Full JSON form, used when the envelope itself becomes a payload.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error("message is missing a string \"type\" field")]
    MissingType,
    #[error("field \"{field}\" has the wrong type")]
    InvalidField { field: String },
}

/// Decode a raw frame into an envelope, failing closed on anything malformed.
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let Value::Object(map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    match map.get("type") {
        Some(Value::String(tag)) if !tag.trim().is_empty() => {}
        _ => return Err(DecodeError::MissingType),
    }

    for field in ["to", "from"] {
        if let Some(v) = map.get(field) {
            if !(v.is_string() || v.is_null()) {
                return Err(DecodeError::InvalidField {
                    field: field.to_string(),
                });
            }
        }
    }
    if let Some(v) = map.get("ts") {
        if !(v.is_i64() || v.is_null()) {
            return Err(DecodeError::InvalidField {
                field: "ts".to_string(),
            });
        }
    }

    serde_json::from_value(Value::Object(map)).map_err(|e| DecodeError::InvalidJson(e.to_string()))
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

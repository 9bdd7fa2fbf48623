//! JSON frame envelope.
//!
//! Every text frame exchanged with the peer is a JSON object carrying a
//! protocol version and a type tag, plus whatever fields the type needs:
//!
//! ```text
//! {"v":1,"type":"status","uptime":1234,"rssi":-61}
//! ```
//!
//! The transport itself only ever originates one envelope, the heartbeat
//! probe `{"v":1,"type":"ping"}`. Producers and consumers use
//! [`Envelope`] to build and parse the rest.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{MAX_MESSAGE_LEN, Message};

/// Envelope protocol version.
pub const ENVELOPE_VERSION: u64 = 1;

/// Type tag of the heartbeat probe.
pub const PING_TYPE: &str = "ping";

/// Serialized heartbeat probe.
pub const HEARTBEAT_FRAME: &str = r#"{"v":1,"type":"ping"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not a JSON object with `v` and `type`.
    Malformed,
    /// `v` is present but not a version we speak.
    UnsupportedVersion(u64),
    /// Serialized envelope does not fit in one message.
    TooLarge,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed envelope"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported envelope version {v}"),
            Self::TooLarge => write!(f, "envelope exceeds {MAX_MESSAGE_LEN} bytes"),
        }
    }
}

/// A typed frame: version, type tag, and free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: &str) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field insert. `v` and `type` are reserved and ignored.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "v" && key != "type" {
            self.fields.insert(key.into(), value.into());
        }
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serialize into a single message. Envelopes are never truncated:
    /// a cut JSON document is useless to the peer.
    pub fn to_message(&self) -> Result<Message, EnvelopeError> {
        let bytes = serde_json::to_vec(self).map_err(|_| EnvelopeError::Malformed)?;
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(EnvelopeError::TooLarge);
        }
        Ok(Message::new(&bytes))
    }

    /// Parse an inbound frame.
    pub fn parse(msg: &Message) -> Result<Self, EnvelopeError> {
        Self::parse_bytes(msg.as_bytes())
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let env: Self = serde_json::from_slice(bytes).map_err(|_| EnvelopeError::Malformed)?;
        if env.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(env.v));
        }
        Ok(env)
    }

    pub fn is_ping(&self) -> bool {
        self.kind == PING_TYPE
    }
}

/// The liveness probe sent while connected.
pub fn heartbeat_probe() -> Message {
    Message::from_text(HEARTBEAT_FRAME)
}

/// Whether `msg` is a heartbeat probe.
pub fn is_heartbeat(msg: &Message) -> bool {
    Envelope::parse(msg).is_ok_and(|env| env.is_ping())
}

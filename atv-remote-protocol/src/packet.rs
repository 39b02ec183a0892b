//! Bridge Network Packet
//!
//! Packets exchanged with a remote-control bridge are JSON objects terminated
//! by a single newline.
//!
//! ## Packet Structure
//!
//! - `id`: UNIX epoch timestamp in milliseconds
//! - `type`: packet type in format `atvremote.<area>[.<action>]`
//! - `body`: JSON dictionary of type-specific parameters

use crate::{ProtocolError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pairing handshake start request
pub const PAIR_START: &str = "atvremote.pair.start";
/// Pairing handshake start response
pub const PAIR_STARTED: &str = "atvremote.pair.started";
/// Pairing code submission
pub const PAIR_FINISH: &str = "atvremote.pair.finish";
/// Pairing code verdict
pub const PAIR_FINISHED: &str = "atvremote.pair.finished";
/// Identity exchanged when a control connection opens
pub const IDENTITY: &str = "atvremote.identity";
/// Key action
pub const KEY: &str = "atvremote.key";
/// Activity report from the device
pub const ACTIVITY: &str = "atvremote.activity";

/// A bridge network packet
///
/// # Examples
///
/// ```
/// use atv_remote_protocol::Packet;
/// use serde_json::json;
///
/// let packet = Packet::new("atvremote.key", json!({ "key": "POWER", "direction": "press" }));
/// let bytes = packet.to_bytes().unwrap();
/// assert_eq!(bytes.last(), Some(&b'\n'));
///
/// let parsed = Packet::from_bytes(&bytes).unwrap();
/// assert!(parsed.is_type("atvremote.key"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    /// UNIX timestamp in milliseconds
    #[serde(deserialize_with = "deserialize_id")]
    pub id: i64,

    /// Packet type
    #[serde(rename = "type")]
    pub packet_type: String,

    /// Type-specific parameters
    #[serde(default)]
    pub body: Value,
}

impl Packet {
    /// Creates a new packet stamped with the current time
    pub fn new(packet_type: impl Into<String>, body: Value) -> Self {
        Self {
            id: current_timestamp(),
            packet_type: packet_type.into(),
            body,
        }
    }

    /// Serialize packet to bytes with newline terminator
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_string(self)?;
        let mut bytes = json.into_bytes();
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Deserialize a packet from bytes
    ///
    /// Accepts `\n`, `\r\n` or no terminator.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);

        serde_json::from_slice(trimmed).map_err(|e| {
            ProtocolError::InvalidPacket(format!("Failed to deserialize packet: {}", e))
        })
    }

    /// Builder pattern: Add a key-value pair to the body
    pub fn with_body_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(ref mut map) = self.body {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Check if packet is of a specific type
    pub fn is_type(&self, packet_type: &str) -> bool {
        self.packet_type == packet_type
    }

    /// Get a field from the body as a specific type
    pub fn get_body_field<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.body
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Fail with `InvalidPacket` unless this packet has the expected type
    pub fn expect_type(self, packet_type: &str) -> Result<Self> {
        if self.is_type(packet_type) {
            Ok(self)
        } else {
            Err(ProtocolError::InvalidPacket(format!(
                "expected '{}', got '{}'",
                packet_type, self.packet_type
            )))
        }
    }
}

/// Some bridges send the id as a string
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::custom("Invalid number for id")),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::custom("Invalid string for id")),
        _ => Err(Error::custom("id must be a number or string")),
    }
}

/// Generate current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

//! Wire Protocol Types
//!
//! JSON text frames exchanged on the per-session socket and on the shared
//! channel. Raw terminal bytes travel as binary frames and have no type here.

use serde::{Deserialize, Serialize};

/// Control frames on a session socket.
///
/// `Resize` flows client → server whenever the surface geometry changes;
/// `Exit` flows server → client when the remote process terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TerminalControl {
    Resize { cols: u16, rows: u16 },
    Exit,
}

impl TerminalControl {
    pub fn to_json(&self) -> String {
        // Both variants are plain structs of integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Envelope carried on the shared channel in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Client → server control messages on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelControl {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

impl ChannelControl {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

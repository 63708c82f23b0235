use std::fmt::Display;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Human-facing timestamp layout used by the terminal client.
const DISPLAY_LAYOUT: &str = "%a, %d %b %H:%M:%S";

/// A chat message as it travels over the wire.
///
/// Encoded as a single JSON object per WebSocket frame:
/// `{"name":"alice","text":"hi","time":"2024-05-01T10:00:00.123456789Z"}`.
/// The `name` field is omitted for anonymous senders and for advisory
/// messages produced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
    pub time: DateTime<Utc>,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(name: Option<String>, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
            time: Utc::now(),
        }
    }

    /// Synthetic notice announcing that a peer dropped abnormally.
    ///
    /// Carries only the error description; the peer's identity is not
    /// disclosed to the remaining participants.
    pub fn advisory(error: &impl Display) -> Self {
        Self::new(None, error.to_string())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn decode_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Formats the message as one terminal line.
    pub fn render(&self) -> String {
        let time = self.time.with_timezone(&Local).format(DISPLAY_LAYOUT);
        match &self.name {
            Some(name) => format!("{name} : {time} {}", self.text),
            None => format!("Message: {time} {}", self.text),
        }
    }
}

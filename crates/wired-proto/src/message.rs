use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::size::TermSize;

/// Messages sent from a browser tab to the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keystrokes or pasted text, forwarded verbatim to the shell.
    Input { data: String },
    /// Requested grid size. Values are untrusted; the receiver clamps them.
    Resize {
        #[serde(default, deserialize_with = "lenient_dimension")]
        cols: i64,
        #[serde(default, deserialize_with = "lenient_dimension")]
        rows: i64,
    },
    /// Liveness ping carrying the sender's clock in milliseconds.
    Heartbeat { timestamp: i64 },
}

/// Messages sent from the server to a browser tab.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Shell output, one message per PTY read.
    Output { data: String },
    /// Echo of a client heartbeat with its original timestamp.
    Heartbeat { timestamp: i64 },
}

impl ClientMessage {
    pub fn resize(size: TermSize) -> Self {
        ClientMessage::Resize {
            cols: size.cols as i64,
            rows: size.rows as i64,
        }
    }

    /// The clamped size carried by a resize message.
    pub fn requested_size(&self) -> Option<TermSize> {
        match self {
            ClientMessage::Resize { cols, rows } => Some(TermSize::clamped(*cols, *rows)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Accept any JSON value for a grid dimension.
///
/// Floats are truncated, numeric strings are parsed, and anything else maps
/// to zero, which clamping later lifts to the minimum size.
fn lenient_dimension<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    })
}

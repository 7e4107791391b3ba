//! Wire payloads exchanged between display and controller processes

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A relay payload: a flat JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Milliseconds since the Unix epoch, as carried in every payload.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serialize a payload struct into a relay payload map.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::protocol(format!(
            "payload must serialize to an object, got {other}"
        ))),
    }
}

/// Deserialize a relay payload map into a payload struct.
pub fn from_payload<T: DeserializeOwned>(payload: Payload) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(payload))?)
}

// ─────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────

/// Playback command sent from a controller to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Next,
    Previous,
    Play,
    Pause,
    Reload,
    BlackScreen,
    ShowScreen,
    /// Anything this build does not recognize; handled as a no-op
    #[serde(other)]
    Unknown,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Next => "next",
            CommandKind::Previous => "previous",
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Reload => "reload",
            CommandKind::BlackScreen => "black-screen",
            CommandKind::ShowScreen => "show-screen",
            CommandKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = Error;

    /// Parse a wire name or one of the short aliases used on stdin.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "next" | "n" => Ok(CommandKind::Next),
            "previous" | "prev" | "p" => Ok(CommandKind::Previous),
            "play" => Ok(CommandKind::Play),
            "pause" => Ok(CommandKind::Pause),
            "reload" => Ok(CommandKind::Reload),
            "black-screen" | "black" | "b" => Ok(CommandKind::BlackScreen),
            "show-screen" | "show" | "s" => Ok(CommandKind::ShowScreen),
            other => Err(Error::protocol(format!("unknown command: {other}"))),
        }
    }
}

/// A command as broadcast on the command topic and appended to the log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Command {
    pub command: CommandKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    pub timestamp: i64,
}

impl Command {
    pub fn new(command: CommandKind, payload: Option<Value>) -> Self {
        Self {
            command,
            payload,
            timestamp: now_millis(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Status & Liveness
// ─────────────────────────────────────────────────────────

/// Display playback status, published whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_playing: bool,
    pub is_black_screen: bool,
    pub current_item_index: usize,
    pub timestamp: i64,
}

/// Display liveness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeartbeatSignal {
    pub timestamp: i64,
}

impl HeartbeatSignal {
    pub fn now() -> Self {
        Self {
            timestamp: now_millis(),
        }
    }
}

//! Headless mode - NDJSON event output for scripting and tests
//!
//! The `slidesync` binary has no UI. Both roles report what happens as
//! structured JSON events on stdout and take their input as lines on stdin.
//!
//! # Event Format
//!
//! Events are output as NDJSON (newline-delimited JSON), one event per line.
//! Each event has an "event" field indicating its type, along with event-specific data.
//!
//! # Example Output
//!
//! ```json
//! {"event":"session_started","role":"display","session_id":"demo","timestamp":1704700001000}
//! {"event":"sequence_loaded","session_id":"demo","items":["a","b","x"],"timestamp":1704700001002}
//! {"event":"state_changed","session_id":"demo","is_playing":true,"is_black_screen":false,"current_item_index":0,"timestamp":1704700001003}
//! ```

pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use slidesync_app::{Notice, NoticeLevel, SessionObserver};
use slidesync_core::{Command, CommandKind, StatusSnapshot};

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// A display or controller session is running
    SessionStarted {
        role: String,
        session_id: String,
        timestamp: i64,
    },

    /// The display built its playback sequence (on start and on reload)
    SequenceLoaded {
        session_id: String,
        items: Vec<String>,
        timestamp: i64,
    },

    /// Playback state changed (display: local, controller: as reported)
    StateChanged {
        session_id: String,
        is_playing: bool,
        is_black_screen: bool,
        current_item_index: usize,
        timestamp: i64,
    },

    /// Controller: the display started or stopped sending heartbeats
    DisplayActive {
        session_id: String,
        active: bool,
        timestamp: i64,
    },

    /// Controller: a sent command came back from the relay
    CommandDelivered {
        session_id: String,
        command: CommandKind,
        timestamp: i64,
    },

    /// User-facing notice
    Notice {
        level: NoticeLevel,
        message: String,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },

    /// Session shut down
    SessionEnded { session_id: String, timestamp: i64 },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn session_started(role: &str, session_id: &str) -> Self {
        Self::SessionStarted {
            role: role.to_string(),
            session_id: session_id.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn sequence_loaded(session_id: &str, items: &[String]) -> Self {
        Self::SequenceLoaded {
            session_id: session_id.to_string(),
            items: items.to_vec(),
            timestamp: Self::now(),
        }
    }

    /// Carries the status's own timestamp, not the emit time.
    pub fn state_changed(session_id: &str, status: &StatusSnapshot) -> Self {
        Self::StateChanged {
            session_id: session_id.to_string(),
            is_playing: status.is_playing,
            is_black_screen: status.is_black_screen,
            current_item_index: status.current_item_index,
            timestamp: status.timestamp,
        }
    }

    pub fn display_active(session_id: &str, active: bool) -> Self {
        Self::DisplayActive {
            session_id: session_id.to_string(),
            active,
            timestamp: Self::now(),
        }
    }

    pub fn command_delivered(session_id: &str, command: &Command) -> Self {
        Self::CommandDelivered {
            session_id: session_id.to_string(),
            command: command.command,
            timestamp: command.timestamp,
        }
    }

    pub fn notice(notice: &Notice) -> Self {
        Self::Notice {
            level: notice.level,
            message: notice.message.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }

    pub fn session_ended(session_id: &str) -> Self {
        Self::SessionEnded {
            session_id: session_id.to_string(),
            timestamp: Self::now(),
        }
    }
}

/// Observer that prints every callback as a [`HeadlessEvent`].
#[derive(Debug, Clone)]
pub struct HeadlessObserver {
    session_id: String,
}

impl HeadlessObserver {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

impl SessionObserver for HeadlessObserver {
    fn on_state_change(&self, status: &StatusSnapshot) {
        HeadlessEvent::state_changed(&self.session_id, status).emit();
    }

    fn on_display_active_changed(&self, active: bool) {
        HeadlessEvent::display_active(&self.session_id, active).emit();
    }

    fn on_sequence_loaded(&self, item_ids: &[String]) {
        HeadlessEvent::sequence_loaded(&self.session_id, item_ids).emit();
    }

    fn on_command_delivered(&self, command: &Command) {
        HeadlessEvent::command_delivered(&self.session_id, command).emit();
    }

    fn on_notice(&self, notice: &Notice) {
        HeadlessEvent::notice(notice).emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_started_serialization() {
        let event = HeadlessEvent::session_started("display", "demo");
        let json = serde_json::to_string(&event).expect("serialization failed");

        let value: serde_json::Value = serde_json::from_str(&json).expect("invalid JSON");

        assert_eq!(value["event"], "session_started");
        assert_eq!(value["role"], "display");
        assert_eq!(value["session_id"], "demo");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_state_changed_keeps_status_timestamp() {
        let status = StatusSnapshot {
            is_playing: true,
            is_black_screen: false,
            current_item_index: 3,
            timestamp: 1234,
        };
        let value = serde_json::to_value(HeadlessEvent::state_changed("demo", &status))
            .expect("serialization failed");

        assert_eq!(value["event"], "state_changed");
        assert_eq!(value["current_item_index"], 3);
        assert_eq!(value["is_playing"], true);
        assert_eq!(value["timestamp"], 1234);
    }

    #[test]
    fn test_command_delivered_uses_wire_name() {
        let command = Command::new(CommandKind::BlackScreen, None);
        let value = serde_json::to_value(HeadlessEvent::command_delivered("demo", &command))
            .expect("serialization failed");

        assert_eq!(value["event"], "command_delivered");
        assert_eq!(value["command"], "black-screen");
    }

    #[test]
    fn test_notice_serialization() {
        let value = serde_json::to_value(HeadlessEvent::notice(&Notice::warning("relay down")))
            .expect("serialization failed");

        assert_eq!(value["event"], "notice");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "relay down");
    }

    #[test]
    fn test_sequence_loaded_serialization() {
        let items = vec!["a".to_string(), "x".to_string()];
        let value = serde_json::to_value(HeadlessEvent::sequence_loaded("demo", &items))
            .expect("serialization failed");

        assert_eq!(value["event"], "sequence_loaded");
        assert_eq!(value["items"], serde_json::json!(["a", "x"]));
    }
}

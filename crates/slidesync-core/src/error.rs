//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Relay/Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel '{topic}' did not complete within {waited_ms}ms")]
    ChannelTimeout { topic: String, waited_ms: u64 },

    #[error("Channel '{topic}' error: {message}")]
    Channel { topic: String, message: String },

    #[error("Relay connection error: {message}")]
    Relay { message: String },

    #[error("Relay protocol error: {message}")]
    Protocol { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Sequencing/Playback Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid stream configuration: {message}")]
    SequenceBuild { message: String },

    // ─────────────────────────────────────────────────────────────
    // Record Store Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to write command log: {message}")]
    CommandLog { message: String },

    #[error("Record store error: {message}")]
    Store { message: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn channel_timeout(topic: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::ChannelTimeout {
            topic: topic.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    pub fn channel(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn sequence_build(message: impl Into<String>) -> Self {
        Self::SequenceBuild {
            message: message.into(),
        }
    }

    pub fn command_log(message: impl Into<String>) -> Self {
        Self::CommandLog {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Channel failures evict the cached handle, so the next scheduled
    /// attempt (heartbeat tick, manual command) starts from a fresh channel.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChannelTimeout { .. }
                | Error::Channel { .. }
                | Error::Relay { .. }
                | Error::Protocol { .. }
                | Error::ChannelClosed
                | Error::CommandLog { .. }
        )
    }
}

//! Configuration types for Slidesync
//!
//! Defines `Settings` and its sections. Every field has a serde default so a
//! partial (or empty) `config.toml` is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application settings (.slidesync/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,
}

/// Hosted relay connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RelaySettings {
    /// WebSocket endpoint; empty means "use the in-process relay"
    #[serde(default)]
    pub url: String,

    /// Project API key sent as the `apikey` query parameter
    #[serde(default)]
    pub api_key: String,

    /// Prepended to every topic name on the wire
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Bound on a channel join (and a publish ack), in milliseconds
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            topic_prefix: default_topic_prefix(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl RelaySettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Heartbeat, liveness and command timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A display is active while its last heartbeat is younger than this
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// How often the controller re-evaluates liveness
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,

    /// Trailing debounce applied to controller commands
    #[serde(default = "default_command_debounce_ms")]
    pub command_debounce_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            liveness_poll_ms: default_liveness_poll_ms(),
            command_debounce_ms: default_command_debounce_ms(),
        }
    }
}

impl SyncSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms.max(1))
    }

    pub fn command_debounce(&self) -> Duration {
        Duration::from_millis(self.command_debounce_ms)
    }
}

/// Display playback settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// Fallback duration for still items when neither the stream nor the
    /// session sets one, in seconds
    #[serde(default = "default_item_duration_secs")]
    pub default_item_duration_secs: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            default_item_duration_secs: default_item_duration_secs(),
        }
    }
}

impl PlaybackSettings {
    /// Configured fallback duration; unusable values give the built-in 5 s.
    pub fn default_item_duration(&self) -> Duration {
        let secs = self.default_item_duration_secs;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            slidesync_core::DEFAULT_ITEM_DURATION
        }
    }
}

fn default_topic_prefix() -> String {
    "realtime:".to_string()
}

fn default_join_timeout_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_liveness_timeout_ms() -> u64 {
    10_000
}

fn default_liveness_poll_ms() -> u64 {
    1000
}

fn default_command_debounce_ms() -> u64 {
    300
}

fn default_item_duration_secs() -> f64 {
    5.0
}

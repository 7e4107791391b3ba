//! Configuration file parsing for Slidesync
//!
//! Supports:
//! - `.slidesync/config.toml` - Relay, sync timing and playback settings

pub mod settings;
pub mod types;

pub use settings::{config_path, load_settings, save_settings};
pub use types::*;

//! slidesync-app - Display and controller sessions for Slidesync
//!
//! This crate implements the preview playback state machine as a TEA-style
//! reducer, the display and controller session runtimes that drive it over
//! relay channels, configuration loading, the record-store seam, and the
//! heartbeat, status and command protocols.

pub mod command;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod display;
pub mod heartbeat;
pub mod observer;
pub mod playback;
pub mod store;

// Re-export primary types
pub use command::{CommandSender, SentCommand};
pub use config::Settings;
pub use controller::ControllerSession;
pub use debounce::Debouncer;
pub use display::DisplaySession;
pub use heartbeat::{publish_status, spawn_heartbeat, LivenessMonitor};
pub use observer::{Notice, NoticeLevel, NoopObserver, ObserverEvent, SessionObserver};
pub use playback::{
    update, AdvanceTrigger, PlaybackAction, PlaybackModel, PlaybackMsg, PlaybackState,
    UpdateResult,
};
pub use store::{
    CommandLogEntry, JsonFileStore, LocalRecordStore, MemoryStore, RecordStore, SessionRecord,
    StoreDocument,
};

// Re-export relay types used alongside sessions
pub use slidesync_relay::{ChannelManager, MemoryRelay, Relay, WsRelay};

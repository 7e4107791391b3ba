//! # slidesync-core - Core Domain Types
//!
//! Foundation crate for Slidesync. Provides the slideshow data model, the
//! relay wire payloads and topic naming, error handling, logging setup, and
//! the playback sequencer.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing, rand).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`ContentStream`], [`StreamKind`], [`StreamSettings`] - Configured content streams
//! - [`StreamItem`], [`ItemKind`], [`ItemContent`] - Playable units
//! - [`EnhancedItem`], [`PlaybackSequence`] - Sequencer output
//! - [`SessionInfo`] - Session-level playback configuration
//!
//! ### Wire Payloads (`events`, `topic`)
//! - [`Command`], [`CommandKind`] - Controller to display commands
//! - [`StatusSnapshot`], [`HeartbeatSignal`] - Display to controller signals
//! - [`Topic`], [`TopicKind`], [`ChannelOptions`] - Relay topic naming
//!
//! ### Sequencing (`sequencer`)
//! - [`build_sequence()`] - Merge primary and interstitial streams
//! - [`build_sequence_or_empty()`] - Same, failing closed to an empty sequence
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `is_recoverable()` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use slidesync_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod sequencer;
pub mod topic;
pub mod types;

/// Prelude for common imports used throughout all Slidesync crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result};
pub use events::{
    from_payload, now_millis, to_payload, Command, CommandKind, HeartbeatSignal, Payload,
    StatusSnapshot,
};
pub use sequencer::{build_sequence, build_sequence_or_empty};
pub use topic::{ChannelOptions, Topic, TopicKind};
pub use types::{
    ContentStream, EnhancedItem, ItemContent, ItemKind, PlaybackSequence, SessionInfo,
    StreamItem, StreamKind, StreamSettings, DEFAULT_FREQUENCY, DEFAULT_ITEM_DURATION,
};

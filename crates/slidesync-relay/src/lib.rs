//! # slidesync-relay - Relay Channel Management
//!
//! Keeps one live channel per topic on a hosted realtime relay that requires
//! a join handshake, and provides the transports that speak to it.
//!
//! Depends on [`slidesync_core`] for topics, payloads and error handling.
//!
//! ## Public API
//!
//! ### Channel Manager
//! - [`ChannelManager`] - Cached per-topic channels with publish-before-join
//!   and fresh-subscription guards
//! - [`Subscription`] - Handle returned by `subscribe`; `unsubscribe()` is idempotent
//! - [`ChannelState`] - `idle | connecting | joined | errored`
//!
//! ### Transports
//! - [`Relay`] / [`LocalRelay`] - Join-handshake seam (`trait_variant`)
//! - [`MemoryRelay`] - In-process relay shared by clones
//! - [`WsRelay`] - WebSocket client for the hosted relay's Phoenix-style protocol
//!
//! ### Wire Protocol
//! - [`RelayFrame`], [`parse_frame()`], [`ReplyTracker`] - Frame codec and ref tracking

pub mod channel;
pub mod client;
pub mod memory;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transport;

pub use channel::{ChannelHandle, ChannelManager, ChannelState, Subscription, DEFAULT_JOIN_TIMEOUT};
pub use client::{socket_url, ConnectionState, WsRelay};
pub use memory::MemoryRelay;
pub use protocol::{parse_frame, RelayFrame, RelayMessage, Reply, ReplyTracker};
pub use transport::{LinkCommand, LinkEvent, LocalRelay, Relay, RelayLink};

//! Transport seam between the [`ChannelManager`](crate::ChannelManager) and a
//! hosted relay.
//!
//! A [`Relay`] performs the join handshake for one topic and hands back a
//! [`RelayLink`]: an outbound command sender and an inbound event receiver.
//! Dropping the outbound sender (or sending [`LinkCommand::Leave`]) leaves
//! the topic.

use tokio::sync::{mpsc, oneshot};

use slidesync_core::prelude::*;
use slidesync_core::{ChannelOptions, Payload};

/// Capacity of a link's outbound command channel.
pub const LINK_COMMAND_CAPACITY: usize = 32;

/// Capacity of a link's inbound event channel (bursty on reconnect).
pub const LINK_EVENT_CAPACITY: usize = 256;

/// Commands sent from a channel handle to the transport.
#[derive(Debug)]
pub enum LinkCommand {
    /// Broadcast `payload` under `event`; `ack` resolves once the relay
    /// accepted the message.
    Push {
        event: String,
        payload: Payload,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Leave the topic and stop the link.
    Leave,
}

/// Events delivered from the transport to a channel handle.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A broadcast message on the joined topic.
    Message { event: String, payload: Payload },
    /// The relay closed the channel or the connection dropped.
    Closed { reason: String },
}

/// A joined topic on a relay.
#[derive(Debug)]
pub struct RelayLink {
    pub outbound: mpsc::Sender<LinkCommand>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

impl RelayLink {
    /// Create a link plus the transport-side halves of its channels.
    pub fn pair() -> (Self, mpsc::Receiver<LinkCommand>, mpsc::Sender<LinkEvent>) {
        let (outbound, command_rx) = mpsc::channel(LINK_COMMAND_CAPACITY);
        let (event_tx, inbound) = mpsc::channel(LINK_EVENT_CAPACITY);
        (Self { outbound, inbound }, command_rx, event_tx)
    }
}

/// A hosted relay that requires an explicit join handshake per topic.
#[trait_variant::make(Relay: Send)]
pub trait LocalRelay {
    /// Join `topic`, resolving once the relay acknowledged the join.
    ///
    /// # Errors
    ///
    /// - [`Error::Channel`] if the relay rejected the join.
    /// - [`Error::ChannelClosed`] / [`Error::Relay`] if the connection is gone.
    async fn join(&self, topic: &str, options: ChannelOptions) -> Result<RelayLink>;
}

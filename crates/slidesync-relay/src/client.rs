//! WebSocket client for the hosted realtime relay.
//!
//! [`WsRelay`] owns one WebSocket connection shared by every joined topic.
//! A background task multiplexes the socket; each [`RelayLink`] handed out
//! by [`Relay::join`] gets a small forwarder task that turns link commands
//! into socket commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  LinkCommand   ┌─────────────┐ SocketCommand ┌──────────────────────┐
//! │ ChannelHandle │ ─────────────▶ │  forwarder  │ ────────────▶ │  background IO task  │
//! │               │ ◀───────────── │  (per link) │               │  frames ⇄ WebSocket  │
//! └───────────────┘   LinkEvent    └─────────────┘               │  ReplyTracker        │
//!         ▲                                                      └──────────┬───────────┘
//!         └──────────────────── LinkEvent (broadcast / closed) ─────────────┘
//! ```
//!
//! Losing the socket closes every joined link (the channel manager evicts the
//! handles) and the task reconnects with capped exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use slidesync_core::prelude::*;
use slidesync_core::{ChannelOptions, Payload};

use crate::protocol::{next_ref, parse_frame, RelayFrame, RelayMessage, Reply, ReplyTracker};
use crate::transport::{LinkCommand, LinkEvent, Relay, RelayLink};

/// Initial reconnection backoff duration.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum reconnection backoff duration (cap).
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Maximum number of consecutive reconnection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Capacity of the socket command channel.
const CMD_CHANNEL_CAPACITY: usize = 64;

/// Interval between socket keep-alive frames.
const SOCKET_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// How often pending replies are swept.
const STALE_REPLY_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// A pending reply older than this is dropped; its waiter sees a closed channel.
const STALE_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Protocol version requested in the socket URL.
const PROTOCOL_VSN: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Current connection state of a [`WsRelay`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost; background task is retrying.
    Reconnecting { attempt: u32 },
}

/// Messages sent from links to the background task.
enum SocketCommand {
    Join {
        topic: String,
        options: ChannelOptions,
        events: mpsc::Sender<LinkEvent>,
        /// Answered with the join ref once the relay accepts the join.
        reply_tx: oneshot::Sender<Result<String>>,
    },
    Push {
        topic: String,
        event: String,
        payload: Payload,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Leave `topic` if `join_ref` is still its current join.
    Leave {
        topic: String,
        join_ref: String,
    },
    Disconnect,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// A topic joined on the current socket.
struct JoinedChannel {
    join_ref: String,
    events: mpsc::Sender<LinkEvent>,
}

// ---------------------------------------------------------------------------
// WsRelay
// ---------------------------------------------------------------------------

/// Relay transport over a single multiplexed WebSocket.
///
/// Cloning is cheap; all clones share the connection. The background task
/// exits once every clone is dropped or [`WsRelay::disconnect`] is called.
#[derive(Clone)]
pub struct WsRelay {
    cmd_tx: mpsc::Sender<SocketCommand>,
    state: Arc<std::sync::RwLock<ConnectionState>>,
    topic_prefix: Arc<str>,
}

impl std::fmt::Debug for WsRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRelay")
            .field("connection_state", &self.connection_state())
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

impl WsRelay {
    /// Connect to the relay at `relay_url` and return a client.
    ///
    /// `topic_prefix` is prepended to every topic name on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// cannot be established.
    pub async fn connect(relay_url: &str, api_key: &str, topic_prefix: &str) -> Result<Self> {
        let url = socket_url(relay_url, api_key)?;
        let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(CMD_CHANNEL_CAPACITY);
        let state = Arc::new(std::sync::RwLock::new(ConnectionState::Connecting));

        info!("Connecting to relay at {}", redact(&url));
        let ws_stream = connect_ws(&url).await?;
        set_state(&state, ConnectionState::Connected);

        tokio::spawn(run_client_task(url, ws_stream, cmd_rx, Arc::clone(&state)));

        Ok(Self {
            cmd_tx,
            state,
            topic_prefix: Arc::from(topic_prefix),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Close the socket and stop the background task.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(SocketCommand::Disconnect).await;
    }

    fn wire_topic(&self, topic: &str) -> String {
        format!("{}{}", self.topic_prefix, topic)
    }
}

impl Relay for WsRelay {
    async fn join(&self, topic: &str, options: ChannelOptions) -> Result<RelayLink> {
        let wire_topic = self.wire_topic(topic);
        let (link, command_rx, event_tx) = RelayLink::pair();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(SocketCommand::Join {
                topic: wire_topic.clone(),
                options,
                events: event_tx,
                reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        let join_ref = reply_rx.await.map_err(|_| Error::ChannelClosed)??;

        tokio::spawn(forward_link(
            wire_topic,
            join_ref,
            command_rx,
            self.cmd_tx.clone(),
        ));
        Ok(link)
    }
}

/// Turn one link's commands into socket commands until the link leaves.
async fn forward_link(
    topic: String,
    join_ref: String,
    mut command_rx: mpsc::Receiver<LinkCommand>,
    cmd_tx: mpsc::Sender<SocketCommand>,
) {
    while let Some(command) = command_rx.recv().await {
        match command {
            LinkCommand::Push {
                event,
                payload,
                ack,
            } => {
                let push = SocketCommand::Push {
                    topic: topic.clone(),
                    event,
                    payload,
                    ack,
                };
                if let Err(mpsc::error::SendError(SocketCommand::Push { ack, .. })) =
                    cmd_tx.send(push).await
                {
                    let _ = ack.send(Err(Error::ChannelClosed));
                    return;
                }
            }
            LinkCommand::Leave => break,
        }
    }

    let _ = cmd_tx.send(SocketCommand::Leave { topic, join_ref }).await;
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn run_client_task(
    url: Url,
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    state: Arc<std::sync::RwLock<ConnectionState>>,
) {
    let mut tracker = ReplyTracker::new();

    if !run_io_loop(ws_stream, &mut cmd_rx, &mut tracker).await {
        set_state(&state, ConnectionState::Disconnected);
        return;
    }

    let mut attempt: u32 = 1;
    loop {
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(
                "Relay: exceeded {} reconnection attempts, giving up",
                MAX_RECONNECT_ATTEMPTS
            );
            set_state(&state, ConnectionState::Disconnected);
            break;
        }

        set_state(&state, ConnectionState::Reconnecting { attempt });
        let backoff = compute_backoff(attempt);
        warn!(
            "Relay: connection lost, retrying in {:?} (attempt {}/{})",
            backoff, attempt, MAX_RECONNECT_ATTEMPTS
        );
        tokio::time::sleep(backoff).await;

        if cmd_rx.is_closed() {
            set_state(&state, ConnectionState::Disconnected);
            break;
        }

        match connect_ws(&url).await {
            Ok(ws_stream) => {
                info!("Relay: reconnected (attempt {})", attempt);
                set_state(&state, ConnectionState::Connected);
                attempt = 1;

                if !run_io_loop(ws_stream, &mut cmd_rx, &mut tracker).await {
                    set_state(&state, ConnectionState::Disconnected);
                    break;
                }
            }
            Err(err) => {
                warn!("Relay: reconnection attempt {} failed: {}", attempt, err);
                attempt += 1;
            }
        }
    }

    debug!("Relay background task exiting");
}

/// Run one connection's read/write select loop.
///
/// Returns `true` if the connection was lost unexpectedly (caller should
/// reconnect), `false` on a clean shutdown.
async fn run_io_loop(
    ws_stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    tracker: &mut ReplyTracker,
) -> bool {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut channels: HashMap<String, JoinedChannel> = HashMap::new();

    let mut heartbeat = tokio::time::interval(SOCKET_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut cleanup = tokio::time::interval(STALE_REPLY_CLEANUP_INTERVAL);
    cleanup.tick().await;

    let reconnect = loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_ws_text(text.as_str(), tracker, &mut channels);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("Relay: received Close frame");
                        break true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Relay: WebSocket read error: {}", err);
                        break true;
                    }
                    None => {
                        debug!("Relay: WebSocket stream ended");
                        break true;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SocketCommand::Join { topic, options, events, reply_tx }) => {
                        handle_join(topic, options, events, reply_tx, tracker, &mut channels, &mut ws_sink).await;
                    }
                    Some(SocketCommand::Push { topic, event, payload, ack }) => {
                        handle_push(&topic, &event, &payload, ack, tracker, &channels, &mut ws_sink).await;
                    }
                    Some(SocketCommand::Leave { topic, join_ref }) => {
                        if remove_if_current(&mut channels, &topic, Some(join_ref.as_str())).is_some() {
                            let frame = RelayFrame::leave(&topic, &next_ref(), &join_ref);
                            if let Err(err) = send_frame(&mut ws_sink, &frame).await {
                                debug!("Relay: failed to leave '{}': {}", topic, err);
                            }
                        } else {
                            debug!("Relay: ignoring leave for superseded join {} on '{}'", join_ref, topic);
                        }
                    }
                    Some(SocketCommand::Disconnect) | None => {
                        debug!("Relay: shutting down socket");
                        send_close(&mut ws_sink).await;
                        break false;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if let Err(err) = send_frame(&mut ws_sink, &RelayFrame::heartbeat(&next_ref())).await {
                    warn!("Relay: heartbeat failed: {}", err);
                    break true;
                }
            }

            _ = cleanup.tick() => {
                let stale = tracker.cleanup_stale(STALE_REPLY_TIMEOUT);
                if !stale.is_empty() {
                    debug!("Relay: dropped {} stale reply wait(s): {:?}", stale.len(), stale);
                }
            }
        }
    };

    close_channels(&mut channels, "connection lost");
    tracker.clear();
    reconnect
}

/// Route an incoming frame to a reply waiter or a joined link.
fn handle_ws_text(
    text: &str,
    tracker: &mut ReplyTracker,
    channels: &mut HashMap<String, JoinedChannel>,
) {
    match parse_frame(text) {
        RelayMessage::Reply {
            reference, reply, ..
        } => {
            if !tracker.complete(&reference, reply) {
                trace!("Relay: reply for untracked ref {}", reference);
            }
        }
        RelayMessage::Broadcast {
            topic,
            event,
            payload,
        } => {
            let Some(channel) = channels.get(&topic) else {
                debug!("Relay: broadcast for unjoined topic '{}'", topic);
                return;
            };
            match channel.events.try_send(LinkEvent::Message { event, payload }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Relay: link for '{}' is full, dropping message", topic);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    channels.remove(&topic);
                }
            }
        }
        RelayMessage::ChannelError { topic, join_ref }
        | RelayMessage::ChannelClose { topic, join_ref } => {
            if let Some(channel) = remove_if_current(channels, &topic, join_ref.as_deref()) {
                warn!("Relay: channel '{}' closed by relay", topic);
                let _ = channel.events.try_send(LinkEvent::Closed {
                    reason: "closed by relay".to_string(),
                });
            }
        }
        RelayMessage::Unknown(raw) => {
            let preview: String = raw.chars().take(120).collect();
            trace!("Relay: ignoring frame: {}", preview);
        }
    }
}

/// Remove `topic` unless `join_ref` names an older join than the current one.
///
/// A frame without a join ref applies to whatever join is current.
fn remove_if_current(
    channels: &mut HashMap<String, JoinedChannel>,
    topic: &str,
    join_ref: Option<&str>,
) -> Option<JoinedChannel> {
    match (channels.get(topic), join_ref) {
        (Some(channel), Some(join_ref)) if channel.join_ref != join_ref => None,
        (Some(_), _) => channels.remove(topic),
        (None, _) => None,
    }
}

async fn handle_join(
    topic: String,
    options: ChannelOptions,
    events: mpsc::Sender<LinkEvent>,
    reply_tx: oneshot::Sender<Result<String>>,
    tracker: &mut ReplyTracker,
    channels: &mut HashMap<String, JoinedChannel>,
    ws_sink: &mut WsSink,
) {
    let (reference, reply_rx) = tracker.register();
    let frame = RelayFrame::join(&topic, options, &reference);

    if let Err(err) = send_frame(ws_sink, &frame).await {
        let _ = reply_tx.send(Err(err));
        return;
    }

    // A previous link for the same topic is replaced; it will never see
    // another message.
    if let Some(previous) = channels.insert(
        topic.clone(),
        JoinedChannel {
            join_ref: reference.clone(),
            events,
        },
    ) {
        let _ = previous.events.try_send(LinkEvent::Closed {
            reason: "replaced by a newer join".to_string(),
        });
    }

    tokio::spawn(async move {
        let _ = reply_tx.send(reply_to_result(&topic, reply_rx.await).map(|()| reference));
    });
}

async fn handle_push(
    topic: &str,
    event: &str,
    payload: &Payload,
    ack: oneshot::Sender<Result<()>>,
    tracker: &mut ReplyTracker,
    channels: &HashMap<String, JoinedChannel>,
    ws_sink: &mut WsSink,
) {
    let Some(channel) = channels.get(topic) else {
        let _ = ack.send(Err(Error::channel(topic, "not joined")));
        return;
    };

    let (reference, reply_rx) = tracker.register();
    let frame = RelayFrame::broadcast(topic, event, payload, &reference, &channel.join_ref);
    if let Err(err) = send_frame(ws_sink, &frame).await {
        let _ = ack.send(Err(err));
        return;
    }

    let topic = topic.to_string();
    tokio::spawn(async move {
        let _ = ack.send(reply_to_result(&topic, reply_rx.await));
    });
}

fn reply_to_result(
    topic: &str,
    reply: std::result::Result<Reply, oneshot::error::RecvError>,
) -> Result<()> {
    match reply {
        Ok(reply) if reply.is_ok() => Ok(()),
        Ok(reply) => Err(Error::channel(topic, reply.reason())),
        Err(_) => Err(Error::ChannelClosed),
    }
}

fn close_channels(channels: &mut HashMap<String, JoinedChannel>, reason: &str) {
    for (topic, channel) in channels.drain() {
        debug!("Relay: closing link for '{}'", topic);
        let _ = channel.events.try_send(LinkEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Build the socket URL: WebSocket scheme plus `apikey` and `vsn` query
/// parameters.
pub fn socket_url(relay_url: &str, api_key: &str) -> Result<Url> {
    let mut url = Url::parse(relay_url)
        .map_err(|err| Error::relay(format!("invalid relay URL '{relay_url}': {err}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::relay(format!("unsupported relay URL scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::relay(format!("cannot use scheme '{scheme}' for {relay_url}")))?;

    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// The URL without its query string, for logging.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

async fn connect_ws(url: &Url) -> Result<WsStream> {
    let (ws_stream, _response) = connect_async(url.as_str())
        .await
        .map_err(|err| Error::relay(format!("Failed to connect to relay: {err}")))?;
    Ok(ws_stream)
}

async fn send_frame(ws_sink: &mut WsSink, frame: &RelayFrame) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    ws_sink
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|err| Error::relay(format!("Failed to send frame: {err}")))
}

async fn send_close(ws_sink: &mut WsSink) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

fn set_state(state: &std::sync::RwLock<ConnectionState>, value: ConnectionState) {
    *state.write().unwrap_or_else(|e| e.into_inner()) = value;
}

/// Exponential backoff for reconnection attempt `n`: `1s * 2^(n-1)`, capped
/// at 30s.
fn compute_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let secs = INITIAL_BACKOFF.as_secs().saturating_mul(multiplier);
    Duration::from_secs(secs.min(MAX_BACKOFF.as_secs()))
}

//! Phoenix-channel frames spoken by the hosted realtime relay.
//!
//! Every WebSocket text frame is a JSON object:
//!
//! ```json
//! {"topic": "realtime:session:abc:status", "event": "broadcast",
//!  "payload": {...}, "ref": "7", "join_ref": "3"}
//! ```
//!
//! Joins, pushes and leaves carry a `ref`; the relay answers each with a
//! `phx_reply` frame echoing that `ref`. Broadcasts from other members arrive
//! unsolicited with `event = "broadcast"` and an inner
//! `{"type": "broadcast", "event": ..., "payload": ...}` envelope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use slidesync_core::{ChannelOptions, Payload};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const BROADCAST: &str = "broadcast";

/// Topic that socket-level heartbeats are sent on.
pub const PHOENIX_TOPIC: &str = "phoenix";

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl RelayFrame {
    /// Join request for `topic` with broadcast options.
    ///
    /// `ack` asks the relay to reply to each broadcast push so the sender can
    /// tell when a message was accepted.
    pub fn join(topic: &str, options: ChannelOptions, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": options.echo_self, "ack": true },
                    "presence": { "key": "" }
                }
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    /// Broadcast `payload` under `event` on an already joined `topic`.
    pub fn broadcast(
        topic: &str,
        event: &str,
        payload: &Payload,
        reference: &str,
        join_ref: &str,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            event: BROADCAST.to_string(),
            payload: json!({
                "type": BROADCAST,
                "event": event,
                "payload": payload,
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    /// Socket keep-alive.
    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsed messages
// ---------------------------------------------------------------------------

/// Outcome carried by a `phx_reply` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// `"ok"` or `"error"`.
    pub status: String,
    pub response: Value,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Human-readable failure reason, if the relay gave one.
    pub fn reason(&self) -> String {
        self.response
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("relay replied '{}'", self.status))
    }
}

/// The result of parsing a raw relay WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Reply to a join, push, leave or heartbeat we sent.
    Reply {
        topic: String,
        reference: String,
        reply: Reply,
    },
    /// A broadcast from a member of `topic`.
    Broadcast {
        topic: String,
        event: String,
        payload: Payload,
    },
    /// The relay crashed or rejected the channel process for `topic`.
    ChannelError {
        topic: String,
        join_ref: Option<String>,
    },
    /// The relay closed `topic`. `join_ref` names the join it belonged to.
    ChannelClose {
        topic: String,
        join_ref: Option<String>,
    },
    /// A frame we received but could not interpret.
    Unknown(String),
}

/// Parse a raw WebSocket text frame into a typed [`RelayMessage`].
///
/// Presence and postgres-change frames are reported as
/// [`RelayMessage::Unknown`]; this client only uses broadcast.
pub fn parse_frame(text: &str) -> RelayMessage {
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return RelayMessage::Unknown(text.to_string()),
    };

    match frame.event.as_str() {
        PHX_REPLY => {
            let Some(reference) = frame.reference else {
                return RelayMessage::Unknown(text.to_string());
            };
            let status = frame
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let response = frame
                .payload
                .get("response")
                .cloned()
                .unwrap_or(Value::Null);
            RelayMessage::Reply {
                topic: frame.topic,
                reference,
                reply: Reply { status, response },
            }
        }
        BROADCAST => {
            let event = frame.payload.get("event").and_then(Value::as_str);
            let payload = frame.payload.get("payload").and_then(Value::as_object);
            match (event, payload) {
                (Some(event), Some(payload)) => RelayMessage::Broadcast {
                    topic: frame.topic,
                    event: event.to_string(),
                    payload: payload.clone(),
                },
                _ => RelayMessage::Unknown(text.to_string()),
            }
        }
        PHX_ERROR => RelayMessage::ChannelError {
            topic: frame.topic,
            join_ref: frame.join_ref,
        },
        PHX_CLOSE => RelayMessage::ChannelClose {
            topic: frame.topic,
            join_ref: frame.join_ref,
        },
        _ => RelayMessage::Unknown(text.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Reply tracker
// ---------------------------------------------------------------------------

/// Global monotonically-increasing counter for frame refs.
static FRAME_REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique frame ref string.
pub fn next_ref() -> String {
    FRAME_REF_COUNTER.fetch_add(1, Ordering::SeqCst).to_string()
}

struct PendingReply {
    reply_tx: oneshot::Sender<Reply>,
    created_at: Instant,
}

/// Tracks frames awaiting a `phx_reply` and routes replies to their senders.
#[derive(Default)]
pub struct ReplyTracker {
    pending: HashMap<String, PendingReply>,
}

impl ReplyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh ref and register a pending slot for it.
    pub fn register(&mut self) -> (String, oneshot::Receiver<Reply>) {
        let reference = next_ref();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            reference.clone(),
            PendingReply {
                reply_tx: tx,
                created_at: Instant::now(),
            },
        );
        (reference, rx)
    }

    /// Deliver a reply to its waiting sender.
    ///
    /// Returns `false` if nothing was waiting on `reference`.
    pub fn complete(&mut self, reference: &str, reply: Reply) -> bool {
        match self.pending.remove(reference) {
            Some(pending) => {
                let _ = pending.reply_tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop every request pending longer than `timeout`; their receivers see
    /// a closed channel. Returns the removed refs.
    pub fn cleanup_stale(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.created_at) > timeout)
            .map(|(reference, _)| reference.clone())
            .collect();
        for reference in &stale {
            self.pending.remove(reference);
        }
        stale
    }

    /// Drop every pending request.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

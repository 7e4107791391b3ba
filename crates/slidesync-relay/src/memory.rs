//! In-process relay.
//!
//! [`MemoryRelay`] behaves like the hosted relay for every participant that
//! holds a clone of it: joins are acknowledged (after an optional simulated
//! handshake delay), broadcasts fan out to every other member of the topic,
//! and a member's own messages come back only when it joined with
//! `echo_self`. Used by the integration tests and for single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use slidesync_core::prelude::*;
use slidesync_core::ChannelOptions;

use crate::transport::{LinkCommand, LinkEvent, Relay, RelayLink};

struct Member {
    id: u64,
    echo_self: bool,
    events: mpsc::Sender<LinkEvent>,
}

#[derive(Default)]
struct MemoryRelayInner {
    members: Mutex<HashMap<String, Vec<Member>>>,
    next_member_id: AtomicU64,
    join_delay: Mutex<Duration>,
    reject_joins: AtomicBool,
    joins: AtomicUsize,
}

/// A relay shared by clones within one process.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<MemoryRelayInner>,
}

impl std::fmt::Debug for MemoryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.lock_members().len();
        f.debug_struct("MemoryRelay")
            .field("topics", &topics)
            .field("joins", &self.join_count())
            .finish()
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent join handshake by `delay`.
    pub fn set_join_delay(&self, delay: Duration) {
        *self
            .inner
            .join_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Reject every subsequent join handshake while `reject` is true.
    pub fn set_reject_joins(&self, reject: bool) {
        self.inner.reject_joins.store(reject, Ordering::SeqCst);
    }

    /// Number of join handshakes attempted so far.
    pub fn join_count(&self) -> usize {
        self.inner.joins.load(Ordering::SeqCst)
    }

    /// Number of currently joined members of `topic`.
    pub fn member_count(&self, topic: &str) -> usize {
        self.lock_members().get(topic).map_or(0, Vec::len)
    }

    /// Drop every member of `topic`, as if the relay lost their connections.
    ///
    /// Each member receives [`LinkEvent::Closed`].
    pub fn disconnect_topic(&self, topic: &str) {
        let removed = self.lock_members().remove(topic).unwrap_or_default();
        debug!(
            "MemoryRelay: disconnecting {} member(s) of '{}'",
            removed.len(),
            topic
        );
        for member in removed {
            let _ = member.events.try_send(LinkEvent::Closed {
                reason: "connection lost".to_string(),
            });
        }
    }

    fn lock_members(&self) -> MutexGuard<'_, HashMap<String, Vec<Member>>> {
        self.inner
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn join_delay(&self) -> Duration {
        *self
            .inner
            .join_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn is_member(&self, topic: &str, member_id: u64) -> bool {
        self.lock_members()
            .get(topic)
            .is_some_and(|members| members.iter().any(|m| m.id == member_id))
    }

    fn remove_member(&self, topic: &str, member_id: u64) {
        let mut members = self.lock_members();
        if let Some(list) = members.get_mut(topic) {
            list.retain(|m| m.id != member_id);
            if list.is_empty() {
                members.remove(topic);
            }
        }
    }

    /// Deliver a broadcast from `sender_id` to the topic's members.
    fn fan_out(&self, topic: &str, sender_id: u64, event: &str, payload: &slidesync_core::Payload) {
        let targets: Vec<mpsc::Sender<LinkEvent>> = {
            let members = self.lock_members();
            members
                .get(topic)
                .map(|list| {
                    list.iter()
                        .filter(|m| m.id != sender_id || m.echo_self)
                        .map(|m| m.events.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for target in targets {
            let message = LinkEvent::Message {
                event: event.to_string(),
                payload: payload.clone(),
            };
            if let Err(err) = target.try_send(message) {
                warn!("MemoryRelay: dropping '{}' message on '{}': {}", event, topic, err);
            }
        }
    }
}

impl Relay for MemoryRelay {
    async fn join(&self, topic: &str, options: ChannelOptions) -> Result<RelayLink> {
        let delay = self.join_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner.joins.fetch_add(1, Ordering::SeqCst);
        if self.inner.reject_joins.load(Ordering::SeqCst) {
            return Err(Error::channel(topic, "join rejected by relay"));
        }

        let (link, command_rx, event_tx) = RelayLink::pair();
        let member_id = self.inner.next_member_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut members = self.lock_members();
            members.entry(topic.to_string()).or_default().push(Member {
                id: member_id,
                echo_self: options.echo_self,
                events: event_tx,
            });
        }

        debug!("MemoryRelay: member {} joined '{}'", member_id, topic);
        tokio::spawn(run_member(
            self.clone(),
            topic.to_string(),
            member_id,
            command_rx,
        ));

        Ok(link)
    }
}

/// Serve one member's outbound commands until it leaves or is disconnected.
async fn run_member(
    relay: MemoryRelay,
    topic: String,
    member_id: u64,
    mut command_rx: mpsc::Receiver<LinkCommand>,
) {
    while let Some(command) = command_rx.recv().await {
        match command {
            LinkCommand::Push {
                event,
                payload,
                ack,
            } => {
                if !relay.is_member(&topic, member_id) {
                    let _ = ack.send(Err(Error::channel(&topic, "not joined")));
                    break;
                }
                relay.fan_out(&topic, member_id, &event, &payload);
                let _ = ack.send(Ok(()));
            }
            LinkCommand::Leave => break,
        }
    }

    relay.remove_member(&topic, member_id);
    debug!("MemoryRelay: member {} left '{}'", member_id, topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slidesync_core::Payload;
    use tokio::sync::oneshot;

    fn payload(n: i64) -> Payload {
        let mut map = Payload::new();
        map.insert("n".into(), json!(n));
        map
    }

    async fn push(link: &RelayLink, event: &str, n: i64) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        link.outbound
            .send(LinkCommand::Push {
                event: event.to_string(),
                payload: payload(n),
                ack,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        ack_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_members_only() {
        let relay = MemoryRelay::new();
        let no_echo = ChannelOptions { echo_self: false };
        let mut sender = relay.join("t", no_echo).await.unwrap();
        let mut receiver = relay.join("t", no_echo).await.unwrap();

        push(&sender, "status", 1).await.unwrap();

        assert_eq!(
            receiver.inbound.recv().await,
            Some(LinkEvent::Message {
                event: "status".into(),
                payload: payload(1)
            })
        );
        assert!(sender.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_echo_self_delivers_own_messages() {
        let relay = MemoryRelay::new();
        let mut sender = relay
            .join("t", ChannelOptions { echo_self: true })
            .await
            .unwrap();

        push(&sender, "command", 7).await.unwrap();

        assert_eq!(
            sender.inbound.recv().await,
            Some(LinkEvent::Message {
                event: "command".into(),
                payload: payload(7)
            })
        );
    }

    #[tokio::test]
    async fn test_rejected_join_returns_channel_error() {
        let relay = MemoryRelay::new();
        relay.set_reject_joins(true);
        let err = relay
            .join("t", ChannelOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Channel { .. }));
        assert_eq!(relay.join_count(), 1);
        assert_eq!(relay.member_count("t"), 0);
    }

    #[tokio::test]
    async fn test_leave_removes_member() {
        let relay = MemoryRelay::new();
        let link = relay.join("t", ChannelOptions::default()).await.unwrap();
        assert_eq!(relay.member_count("t"), 1);

        link.outbound.send(LinkCommand::Leave).await.unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(relay.member_count("t"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_topic_closes_members() {
        let relay = MemoryRelay::new();
        let mut link = relay.join("t", ChannelOptions::default()).await.unwrap();

        relay.disconnect_topic("t");

        assert!(matches!(
            link.inbound.recv().await,
            Some(LinkEvent::Closed { .. })
        ));
        assert!(push(&link, "status", 1).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_delay_is_applied() {
        let relay = MemoryRelay::new();
        relay.set_join_delay(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        relay.join("t", ChannelOptions::default()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}

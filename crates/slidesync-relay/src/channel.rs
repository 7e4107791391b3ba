//! Channel manager: one live relay channel per topic per process.
//!
//! The hosted relay requires a join handshake before a channel carries
//! traffic. [`ChannelManager`] caches a [`ChannelHandle`] per topic, makes
//! [`publish`](ChannelManager::publish) wait (bounded) for the join to
//! complete, and evicts handles whenever a join fails, times out, or the
//! connection drops, so the next call starts over with a fresh channel.
//!
//! The manager never retries on its own; callers either tolerate the loss
//! (heartbeats) or surface it (commands).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use slidesync_core::prelude::*;
use slidesync_core::{ChannelOptions, Payload, Topic};

use crate::transport::{LinkCommand, LinkEvent, Relay, RelayLink};

/// Default bound on waiting for a join handshake (and the publish ack).
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Torn down locally.
    Idle,
    /// Join handshake in flight.
    Connecting,
    Joined,
    /// Join failed or the connection dropped.
    Errored,
}

impl ChannelState {
    fn is_settled(self) -> bool {
        self != ChannelState::Connecting
    }
}

type Handler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Process-local record of one relay channel.
pub struct ChannelHandle {
    /// Generation, distinguishes a handle from its replacements.
    id: u64,
    topic: String,
    options: ChannelOptions,
    state: watch::Sender<ChannelState>,
    failure: OnceLock<String>,
    outbound: OnceLock<mpsc::Sender<LinkCommand>>,
    handlers: std::sync::RwLock<Vec<(String, Handler)>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelHandle {
    fn new(id: u64, topic: &Topic, handlers: Vec<(String, Handler)>) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            id,
            topic: topic.name().to_string(),
            options: topic.options(),
            state,
            failure: OnceLock::new(),
            outbound: OnceLock::new(),
            handlers: std::sync::RwLock::new(handlers),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn is_live(&self) -> bool {
        matches!(self.state(), ChannelState::Connecting | ChannelState::Joined)
    }

    fn fail(&self, reason: impl Into<String>) {
        let _ = self.failure.set(reason.into());
        self.state.send_replace(ChannelState::Errored);
    }

    fn failure_reason(&self) -> String {
        self.failure
            .get()
            .cloned()
            .unwrap_or_else(|| "channel closed".to_string())
    }

    fn dispatch(&self, event: &str, payload: Payload) {
        let matching: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        if matching.is_empty() {
            trace!("Channel '{}': no handler for '{}'", self.topic, event);
        }
        for handler in matching {
            handler(payload.clone());
        }
    }

    /// Leave the topic and stop the background task. Idempotent.
    fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(outbound) = self.outbound.get() {
            let _ = outbound.try_send(LinkCommand::Leave);
        }
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        if self.is_live() {
            self.state.send_replace(ChannelState::Idle);
        }
    }
}

type ChannelMap = HashMap<String, Arc<ChannelHandle>>;

// ---------------------------------------------------------------------------
// ChannelManager
// ---------------------------------------------------------------------------

/// Caches one channel handle per topic over a [`Relay`].
///
/// Clones share the same cache.
#[derive(Clone)]
pub struct ChannelManager<R> {
    relay: R,
    join_timeout: Duration,
    channels: Arc<Mutex<ChannelMap>>,
    next_id: Arc<AtomicU64>,
}

impl<R> std::fmt::Debug for ChannelManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("join_timeout", &self.join_timeout)
            .field("topics", &self.active_topics())
            .finish()
    }
}

impl<R> ChannelManager<R> {
    /// All topics with a cached handle, sorted.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.channels).keys().cloned().collect();
        topics.sort();
        topics
    }

    /// State of the cached handle for `topic`, if any.
    pub fn state(&self, topic: &Topic) -> Option<ChannelState> {
        lock(&self.channels).get(topic.name()).map(|h| h.state())
    }

    pub fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    /// Tear down and evict every cached handle.
    pub fn close_all(&self) {
        let drained: Vec<Arc<ChannelHandle>> =
            lock(&self.channels).drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.teardown();
        }
    }

    fn evict(&self, handle: &ChannelHandle) {
        evict(&self.channels, handle);
        handle.teardown();
    }
}

impl<R> ChannelManager<R>
where
    R: Relay + Clone + Sync + 'static,
{
    pub fn new(relay: R) -> Self {
        Self::with_join_timeout(relay, DEFAULT_JOIN_TIMEOUT)
    }

    pub fn with_join_timeout(relay: R, join_timeout: Duration) -> Self {
        Self {
            relay,
            join_timeout,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Broadcast `payload` under `event` on `topic`.
    ///
    /// Waits for the channel's join handshake if it is still connecting; the
    /// join and the relay's acknowledgment share one `join_timeout` bound.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelTimeout`] if the join or the ack did not complete in
    ///   time. The handle is evicted.
    /// - [`Error::Channel`] if the join failed or the connection dropped. The
    ///   handle is evicted.
    pub async fn publish(&self, topic: &Topic, event: &str, payload: Payload) -> Result<()> {
        let handle = self.get_or_create(topic);
        let deadline = Instant::now() + self.join_timeout;

        let mut state_rx = handle.state.subscribe();
        let settled = timeout_at(deadline, async {
            state_rx.wait_for(|s| s.is_settled()).await.map(|s| *s)
        })
        .await;

        match settled {
            Err(_) => {
                warn!(
                    "Channel '{}': join did not complete within {:?}, evicting",
                    topic, self.join_timeout
                );
                self.evict(&handle);
                return Err(Error::channel_timeout(topic.name(), self.join_timeout));
            }
            Ok(Ok(ChannelState::Joined)) => {}
            Ok(_) => {
                let reason = handle.failure_reason();
                self.evict(&handle);
                return Err(Error::channel(topic.name(), reason));
            }
        }

        let Some(outbound) = handle.outbound.get().cloned() else {
            self.evict(&handle);
            return Err(Error::channel(topic.name(), "joined without a link"));
        };

        let (ack, ack_rx) = oneshot::channel();
        let command = LinkCommand::Push {
            event: event.to_string(),
            payload,
            ack,
        };
        let sent = timeout_at(deadline, async {
            outbound
                .send(command)
                .await
                .map_err(|_| Error::ChannelClosed)?;
            ack_rx.await.map_err(|_| Error::ChannelClosed)?
        })
        .await;

        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!("Channel '{}': publish failed: {}", topic, err);
                self.evict(&handle);
                Err(match err {
                    Error::ChannelClosed => Error::channel(topic.name(), handle.failure_reason()),
                    other => other,
                })
            }
            Err(_) => {
                warn!("Channel '{}': publish ack timed out, evicting", topic);
                self.evict(&handle);
                Err(Error::channel_timeout(topic.name(), self.join_timeout))
            }
        }
    }

    /// Register `handler` for `event` on a fresh channel for `topic`.
    ///
    /// Any cached handle for the topic is torn down first, so only the newest
    /// subscription's handler fires afterwards.
    pub fn subscribe<F>(&self, topic: &Topic, event: &str, handler: F) -> Subscription
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let handle = {
            let mut channels = lock(&self.channels);
            if let Some(previous) = channels.remove(topic.name()) {
                debug!("Channel '{}': replacing handle for new subscription", topic);
                previous.teardown();
            }
            self.create_locked(&mut channels, topic, vec![(event.to_string(), handler)])
        };

        Subscription {
            channels: Arc::clone(&self.channels),
            handle,
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Cached live handle for `topic`, or a new one.
    fn get_or_create(&self, topic: &Topic) -> Arc<ChannelHandle> {
        let mut channels = lock(&self.channels);
        if let Some(existing) = channels.get(topic.name()) {
            if existing.is_live() {
                return Arc::clone(existing);
            }
            debug!("Channel '{}': discarding {:?} handle", topic, existing.state());
            existing.teardown();
            channels.remove(topic.name());
        }
        self.create_locked(&mut channels, topic, Vec::new())
    }

    /// Create a handle in `connecting` state and start its join.
    fn create_locked(
        &self,
        channels: &mut ChannelMap,
        topic: &Topic,
        handlers: Vec<(String, Handler)>,
    ) -> Arc<ChannelHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(ChannelHandle::new(id, topic, handlers));
        channels.insert(topic.name().to_string(), Arc::clone(&handle));

        let task = tokio::spawn(drive_channel(
            self.relay.clone(),
            Arc::clone(&handle),
            Arc::clone(&self.channels),
        ));
        *handle.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        debug!("Channel '{}': created handle #{}", topic, id);
        handle
    }
}

/// Join the handle's topic and pump inbound events into its handlers until
/// the link closes.
async fn drive_channel<R: Relay>(
    relay: R,
    handle: Arc<ChannelHandle>,
    channels: Arc<Mutex<ChannelMap>>,
) {
    let link = match relay.join(&handle.topic, handle.options).await {
        Ok(link) => link,
        Err(err) => {
            warn!("Channel '{}': join failed: {}", handle.topic, err);
            handle.fail(err.to_string());
            evict(&channels, &handle);
            return;
        }
    };

    let RelayLink {
        outbound,
        mut inbound,
    } = link;
    let _ = handle.outbound.set(outbound);
    handle.state.send_replace(ChannelState::Joined);
    debug!("Channel '{}': joined", handle.topic);

    let reason = loop {
        match inbound.recv().await {
            Some(LinkEvent::Message { event, payload }) => handle.dispatch(&event, payload),
            Some(LinkEvent::Closed { reason }) => break reason,
            None => break "link dropped".to_string(),
        }
    };

    warn!("Channel '{}': closed ({}), evicting", handle.topic, reason);
    handle.fail(reason);
    evict(&channels, &handle);
}

/// Remove `handle` from the cache unless a newer handle replaced it.
fn evict(channels: &Mutex<ChannelMap>, handle: &ChannelHandle) {
    let mut channels = lock(channels);
    if channels
        .get(&handle.topic)
        .is_some_and(|cached| cached.id == handle.id)
    {
        channels.remove(&handle.topic);
    }
}

fn lock(channels: &Mutex<ChannelMap>) -> MutexGuard<'_, ChannelMap> {
    channels.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Token returned by [`ChannelManager::subscribe`].
///
/// The channel stays open until [`unsubscribe`](Subscription::unsubscribe)
/// or until a newer subscription on the same topic replaces it.
pub struct Subscription {
    channels: Arc<Mutex<ChannelMap>>,
    handle: Arc<ChannelHandle>,
    unsubscribed: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("unsubscribed", &self.unsubscribed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Subscription {
    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    /// Tear down and evict this subscription's channel.
    ///
    /// Idempotent; never evicts a newer handle created for the same topic.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        evict(&self.channels, &self.handle);
        self.handle.teardown();
        debug!("Channel '{}': unsubscribed", self.handle.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRelay;
    use crate::test_utils::{collecting_handler, wait_for_state};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn payload(n: i64) -> Payload {
        let mut map = Payload::new();
        map.insert("n".into(), json!(n));
        map
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_before_join_goes_connecting_then_joined() {
        let relay = MemoryRelay::new();
        let display = ChannelManager::new(relay.clone());
        let controller = ChannelManager::new(relay.clone());
        let topic = Topic::status("s1");

        let (handler, mut received) = collecting_handler();
        let _sub = controller.subscribe(&topic, "status", handler);
        wait_for_state(&controller, &topic, ChannelState::Joined).await;

        relay.set_join_delay(Duration::from_secs(1));
        let publisher = display.clone();
        let publish_topic = topic.clone();
        let task =
            tokio::spawn(async move { publisher.publish(&publish_topic, "status", payload(1)).await });
        tokio::task::yield_now().await;

        assert_eq!(display.state(&topic), Some(ChannelState::Connecting));
        task.await.unwrap().unwrap();
        assert_eq!(display.state(&topic), Some(ChannelState::Joined));
        assert_eq!(received.recv().await, Some(payload(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_evicts_and_next_publish_recreates() {
        let relay = MemoryRelay::new();
        relay.set_join_delay(Duration::from_secs(10));
        let manager = ChannelManager::with_join_timeout(relay.clone(), Duration::from_secs(5));
        let topic = Topic::heartbeat("s1");

        let err = manager
            .publish(&topic, "heartbeat", payload(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelTimeout { waited_ms: 5000, .. }));
        assert_eq!(manager.state(&topic), None);
        assert!(err.is_recoverable());

        relay.set_join_delay(Duration::ZERO);
        assert_ok!(manager.publish(&topic, "heartbeat", payload(2)).await);
        assert_eq!(manager.state(&topic), Some(ChannelState::Joined));
        assert_eq!(relay.join_count(), 1);
    }

    #[tokio::test]
    async fn test_join_failure_evicts_with_channel_error() {
        let relay = MemoryRelay::new();
        relay.set_reject_joins(true);
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::status("s1");

        let err = assert_err!(manager.publish(&topic, "status", payload(1)).await);
        match err {
            Error::Channel { topic: name, message } => {
                assert_eq!(name, "session:s1:status");
                assert!(message.contains("rejected"));
            }
            other => panic!("Expected Channel error, got {:?}", other),
        }
        assert!(manager.active_topics().is_empty());

        relay.set_reject_joins(false);
        assert_ok!(manager.publish(&topic, "status", payload(2)).await);
        assert_eq!(manager.active_topics(), vec!["session:s1:status".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_reuses_joined_handle() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::heartbeat("s1");

        assert_ok!(manager.publish(&topic, "heartbeat", payload(1)).await);
        assert_ok!(manager.publish(&topic, "heartbeat", payload(2)).await);

        assert_eq!(relay.join_count(), 1);
        assert_eq!(relay.member_count(topic.name()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_subscription_replaces_previous_handler() {
        let relay = MemoryRelay::new();
        let controller = ChannelManager::new(relay.clone());
        let display = ChannelManager::new(relay.clone());
        let topic = Topic::status("s1");

        let (first, mut first_rx) = collecting_handler();
        let _old = controller.subscribe(&topic, "status", first);
        wait_for_state(&controller, &topic, ChannelState::Joined).await;

        let (second, mut second_rx) = collecting_handler();
        let _new = controller.subscribe(&topic, "status", second);
        wait_for_state(&controller, &topic, ChannelState::Joined).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_ok!(display.publish(&topic, "status", payload(3)).await);

        assert_eq!(second_rx.recv().await, Some(payload(3)));
        assert!(first_rx.try_recv().is_err());
        assert_eq!(relay.member_count(topic.name()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent_and_spares_newer_handle() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::commands("s1");

        let (handler, _rx) = collecting_handler();
        let first = manager.subscribe(&topic, "command", handler);
        first.unsubscribe();
        assert_eq!(manager.state(&topic), None);
        assert_eq!(first.state(), ChannelState::Idle);

        let (handler, _rx2) = collecting_handler();
        let second = manager.subscribe(&topic, "command", handler);
        first.unsubscribe();
        assert_eq!(manager.state(&topic), Some(second.state()));

        wait_for_state(&manager, &topic, ChannelState::Joined).await;
        first.unsubscribe();
        assert_eq!(manager.state(&topic), Some(ChannelState::Joined));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_topic_echoes_to_publisher() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::commands("s1");

        let (handler, mut rx) = collecting_handler();
        let _sub = manager.subscribe(&topic, "command", handler);
        assert_ok!(manager.publish(&topic, "command", payload(1)).await);

        assert_eq!(rx.recv().await, Some(payload(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_topic_does_not_echo_to_publisher() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::status("s1");

        let (handler, mut rx) = collecting_handler();
        let _sub = manager.subscribe(&topic, "status", handler);
        assert_ok!(manager.publish(&topic, "status", payload(1)).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handlers_only_receive_their_event() {
        let relay = MemoryRelay::new();
        let listener = ChannelManager::new(relay.clone());
        let sender = ChannelManager::new(relay.clone());
        let topic = Topic::status("s1");

        let (handler, mut rx) = collecting_handler();
        let _sub = listener.subscribe(&topic, "status", handler);
        wait_for_state(&listener, &topic, ChannelState::Joined).await;

        assert_ok!(sender.publish(&topic, "other", payload(1)).await);
        assert_ok!(sender.publish(&topic, "status", payload(2)).await);

        assert_eq!(rx.recv().await, Some(payload(2)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_drop_evicts_handle() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());
        let topic = Topic::heartbeat("s1");

        assert_ok!(manager.publish(&topic, "heartbeat", payload(1)).await);
        relay.disconnect_topic(topic.name());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(&topic), None);

        assert_ok!(manager.publish(&topic, "heartbeat", payload(2)).await);
        assert_eq!(relay.join_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_tears_down_every_handle() {
        let relay = MemoryRelay::new();
        let manager = ChannelManager::new(relay.clone());

        manager
            .publish(&Topic::status("s1"), "status", payload(1))
            .await
            .unwrap();
        manager
            .publish(&Topic::heartbeat("s1"), "heartbeat", payload(1))
            .await
            .unwrap();
        assert_eq!(manager.active_topics().len(), 2);

        manager.close_all();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(manager.active_topics().is_empty());
        assert_eq!(relay.member_count("session:s1:status"), 0);
        assert_eq!(relay.member_count("session:s1:heartbeat"), 0);
    }
}

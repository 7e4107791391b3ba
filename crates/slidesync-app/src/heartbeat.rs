//! Display liveness and status signalling.
//!
//! The display publishes a heartbeat immediately on start and then on a
//! fixed interval, and publishes a status snapshot whenever its playback
//! state changes. The controller tracks heartbeat receipt with a
//! [`LivenessMonitor`]; liveness is soft, so a missed beat or two is
//! expected to read as "inactive" rather than as an error.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use slidesync_core::prelude::*;
use slidesync_core::{to_payload, HeartbeatSignal, StatusSnapshot, Topic};
use slidesync_relay::{ChannelManager, Relay};

/// Start the display's heartbeat loop.
///
/// The first beat goes out immediately. Publish failures are logged and the
/// loop keeps going; the channel manager will rejoin on the next tick.
pub fn spawn_heartbeat<R>(
    channels: ChannelManager<R>,
    session_id: &str,
    interval: Duration,
) -> JoinHandle<()>
where
    R: Relay + Clone + Sync + 'static,
{
    let topic = Topic::heartbeat(session_id);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = publish_heartbeat(&channels, &topic).await {
                if err.is_recoverable() {
                    debug!("Heartbeat on '{}' failed: {}", topic, err);
                } else {
                    warn!("Heartbeat on '{}' failed: {}", topic, err);
                }
            }
        }
    })
}

async fn publish_heartbeat<R>(channels: &ChannelManager<R>, topic: &Topic) -> Result<()>
where
    R: Relay + Clone + Sync + 'static,
{
    let payload = to_payload(&HeartbeatSignal::now())?;
    channels.publish(topic, topic.event(), payload).await
}

/// Publish a playback status snapshot on the session's status topic.
pub async fn publish_status<R>(
    channels: &ChannelManager<R>,
    session_id: &str,
    status: &StatusSnapshot,
) -> Result<()>
where
    R: Relay + Clone + Sync + 'static,
{
    let topic = Topic::status(session_id);
    let payload = to_payload(status)?;
    channels.publish(&topic, topic.event(), payload).await
}

/// Tracks when the last heartbeat arrived.
///
/// A display that has never been heard from is inactive.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    last_receipt: Option<Instant>,
    timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_receipt: None,
            timeout,
        }
    }

    /// Record a heartbeat received at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last_receipt = Some(now);
    }

    pub fn last_receipt(&self) -> Option<Instant> {
        self.last_receipt
    }

    /// `true` while the last heartbeat is younger than the timeout.
    pub fn is_active(&self, now: Instant) -> bool {
        self.last_receipt
            .is_some_and(|last| now.saturating_duration_since(last) < self.timeout)
    }
}

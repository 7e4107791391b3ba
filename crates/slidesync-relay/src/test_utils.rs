//! Test utilities for channel tests
//!
//! Available to other crates through the `test-helpers` feature.

use std::time::Duration;

use tokio::sync::mpsc;

use slidesync_core::{Payload, Topic};

use crate::channel::{ChannelManager, ChannelState};

/// A subscription handler that forwards every payload into a channel.
pub fn collecting_handler() -> (
    impl Fn(Payload) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Payload>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |payload: Payload| {
        let _ = tx.send(payload);
    };
    (handler, rx)
}

/// Poll until the cached handle for `topic` reaches `expected`.
///
/// Panics after 100 polls (one simulated second with paused time).
pub async fn wait_for_state<R>(manager: &ChannelManager<R>, topic: &Topic, expected: ChannelState) {
    for _ in 0..100 {
        if manager.state(topic) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "channel '{}' never reached {:?} (last: {:?})",
        topic,
        expected,
        manager.state(topic)
    );
}

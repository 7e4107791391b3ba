//! Sending playback commands from a controller.
//!
//! Each command is appended to the durable log first (best effort) and then
//! broadcast on the session's command topic. The command topic echoes back
//! to its publisher, which is how the controller learns a command went out.

use serde_json::Value;

use slidesync_core::prelude::*;
use slidesync_core::{to_payload, Command, CommandKind, Topic};
use slidesync_relay::{ChannelManager, Relay};

use crate::store::RecordStore;

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub command: Command,
    /// `false` if the log append failed and was skipped
    pub logged: bool,
}

/// Sends commands for one session.
#[derive(Debug, Clone)]
pub struct CommandSender<R, S> {
    channels: ChannelManager<R>,
    store: S,
    session_id: String,
}

impl<R, S> CommandSender<R, S>
where
    R: Relay + Clone + Sync + 'static,
    S: RecordStore + Sync,
{
    pub fn new(channels: ChannelManager<R>, store: S, session_id: impl Into<String>) -> Self {
        Self {
            channels,
            store,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Log, then broadcast, a command.
    ///
    /// A log failure is reported in [`SentCommand::logged`] and does not stop
    /// the broadcast.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelTimeout`] or [`Error::Channel`] if the broadcast could
    /// not be delivered to the relay.
    pub async fn send_command(
        &self,
        kind: CommandKind,
        payload: Option<Value>,
    ) -> Result<SentCommand> {
        let command = Command::new(kind, payload);

        let logged = match self
            .store
            .append_command_log(&self.session_id, &command)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Command '{}' not logged: {}", kind, err);
                false
            }
        };

        let topic = Topic::commands(&self.session_id);
        self.channels
            .publish(&topic, topic.event(), to_payload(&command)?)
            .await?;
        debug!("Sent command '{}' on '{}'", kind, topic);

        Ok(SentCommand { command, logged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use slidesync_core::from_payload;
    use slidesync_relay::test_utils::{collecting_handler, wait_for_state};
    use slidesync_relay::{ChannelState, MemoryRelay};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn sender(relay: &MemoryRelay, store: &MemoryStore) -> CommandSender<MemoryRelay, MemoryStore> {
        CommandSender::new(ChannelManager::new(relay.clone()), store.clone(), "s1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_logs_then_broadcasts() {
        let relay = MemoryRelay::new();
        let store = MemoryStore::new();
        let display = ChannelManager::new(relay.clone());
        let topic = Topic::commands("s1");
        let (handler, mut received) = collecting_handler();
        let _sub = display.subscribe(&topic, "command", handler);
        wait_for_state(&display, &topic, ChannelState::Joined).await;

        let sent = assert_ok!(
            sender(&relay, &store)
                .send_command(CommandKind::BlackScreen, None)
                .await
        );

        assert!(sent.logged);
        assert_eq!(store.command_log().len(), 1);
        assert_eq!(store.command_log()[0].command, CommandKind::BlackScreen);

        let command: Command = from_payload(received.recv().await.unwrap()).unwrap();
        assert_eq!(command, sent.command);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_failure_does_not_block_broadcast() {
        let relay = MemoryRelay::new();
        let store = MemoryStore::new();
        store.set_fail_command_log(true);

        let sent = assert_ok!(sender(&relay, &store).send_command(CommandKind::Next, None).await);

        assert!(!sent.logged);
        assert!(store.command_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_is_returned() {
        let relay = MemoryRelay::new();
        relay.set_join_delay(Duration::from_secs(30));
        let store = MemoryStore::new();

        let err = assert_err!(sender(&relay, &store).send_command(CommandKind::Play, None).await);

        assert!(matches!(err, Error::ChannelTimeout { .. }));
        assert_eq!(store.command_log().len(), 1);
    }
}

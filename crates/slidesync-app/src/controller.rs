//! Controller session runtime.
//!
//! Follows a display from the outside: mirrors its status (last write wins),
//! tracks its heartbeat to decide whether it is active, and sends commands
//! through a trailing debounce. Commands sent from here come back on the
//! echo-enabled command topic and are reported as delivered.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use slidesync_core::prelude::*;
use slidesync_core::{
    from_payload, Command, CommandKind, HeartbeatSignal, Payload, StatusSnapshot, Topic,
};
use slidesync_relay::{ChannelManager, Relay, Subscription};

use crate::command::CommandSender;
use crate::config::Settings;
use crate::debounce::Debouncer;
use crate::heartbeat::LivenessMonitor;
use crate::observer::{Notice, SessionObserver};
use crate::store::RecordStore;

type PendingCommand = (CommandKind, Option<Value>);

/// Inbound traffic from the session's topics.
#[derive(Debug)]
enum ControllerMsg {
    Status(StatusSnapshot),
    Heartbeat,
    Delivered(Command),
}

/// A running controller.
///
/// Dropping the session shuts it down.
pub struct ControllerSession<R> {
    session_id: String,
    channels: ChannelManager<R>,
    debouncer: Debouncer<PendingCommand>,
    status_rx: watch::Receiver<Option<StatusSnapshot>>,
    active_rx: watch::Receiver<bool>,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R> std::fmt::Debug for ControllerSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("session_id", &self.session_id)
            .field("status", &*self.status_rx.borrow())
            .field("display_active", &*self.active_rx.borrow())
            .finish()
    }
}

impl<R> ControllerSession<R>
where
    R: Relay + Clone + Sync + 'static,
{
    /// Subscribe to the session's topics and start tracking the display.
    pub fn start<S>(
        channels: ChannelManager<R>,
        store: S,
        session_id: impl Into<String>,
        settings: &Settings,
        observer: Arc<dyn SessionObserver>,
    ) -> Self
    where
        S: RecordStore + Sync + 'static,
    {
        let session_id = session_id.into();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let subscriptions = vec![
            subscribe_as(&channels, Topic::status(&session_id), &msg_tx, |payload| {
                from_payload::<StatusSnapshot>(payload).map(ControllerMsg::Status)
            }),
            subscribe_as(&channels, Topic::heartbeat(&session_id), &msg_tx, |payload| {
                from_payload::<HeartbeatSignal>(payload).map(|_| ControllerMsg::Heartbeat)
            }),
            subscribe_as(&channels, Topic::commands(&session_id), &msg_tx, |payload| {
                from_payload::<Command>(payload).map(ControllerMsg::Delivered)
            }),
        ];

        let (status_tx, status_rx) = watch::channel(None);
        let (active_tx, active_rx) = watch::channel(false);
        let tracker = tokio::spawn(run_tracker(
            msg_rx,
            LivenessMonitor::new(settings.sync.liveness_timeout()),
            settings.sync.liveness_poll(),
            status_tx,
            active_tx,
            Arc::clone(&observer),
        ));

        let (debouncer, debounced) = Debouncer::spawn(settings.sync.command_debounce());
        let sender = CommandSender::new(channels.clone(), store, session_id.clone());
        let dispatcher = tokio::spawn(run_dispatcher(sender, debounced, observer));

        info!("Controller attached to '{}'", session_id);
        Self {
            session_id,
            channels,
            debouncer,
            status_rx,
            active_rx,
            subscriptions,
            tasks: vec![tracker, dispatcher],
        }
    }
}

impl<R> ControllerSession<R> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last status received from the display, if any.
    pub fn status(&self) -> Option<StatusSnapshot> {
        *self.status_rx.borrow()
    }

    pub fn is_display_active(&self) -> bool {
        *self.active_rx.borrow()
    }

    /// Queue a command. Calls within the debounce window collapse to the last
    /// one; a failed send surfaces as a warning [`Notice`].
    pub fn send(&self, kind: CommandKind, payload: Option<Value>) -> bool {
        self.debouncer.call((kind, payload))
    }

    /// Stop all tasks, drop any pending command, close all channels.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.debouncer.cancel();
        for task in &self.tasks {
            task.abort();
        }
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.channels.close_all();
        debug!("Controller for '{}' shut down", self.session_id);
    }
}

impl<R> Drop for ControllerSession<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Subscribe to `topic`, decoding each payload into a [`ControllerMsg`].
fn subscribe_as<R, F>(
    channels: &ChannelManager<R>,
    topic: Topic,
    msg_tx: &mpsc::UnboundedSender<ControllerMsg>,
    decode: F,
) -> Subscription
where
    R: Relay + Clone + Sync + 'static,
    F: Fn(Payload) -> Result<ControllerMsg> + Send + Sync + 'static,
{
    let msg_tx = msg_tx.clone();
    let name = topic.name().to_string();
    channels.subscribe(&topic, topic.event(), move |payload| match decode(payload) {
        Ok(msg) => {
            let _ = msg_tx.send(msg);
        }
        Err(err) => warn!("Ignoring malformed payload on '{}': {}", name, err),
    })
}

/// Mirror status, record heartbeats, and re-evaluate liveness every poll.
async fn run_tracker(
    mut msg_rx: mpsc::UnboundedReceiver<ControllerMsg>,
    mut liveness: LivenessMonitor,
    poll: Duration,
    status_tx: watch::Sender<Option<StatusSnapshot>>,
    active_tx: watch::Sender<bool>,
    observer: Arc<dyn SessionObserver>,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = msg_rx.recv() => match msg {
                Some(ControllerMsg::Status(status)) => {
                    status_tx.send_replace(Some(status));
                    observer.on_state_change(&status);
                }
                Some(ControllerMsg::Heartbeat) => liveness.record(Instant::now()),
                Some(ControllerMsg::Delivered(command)) => {
                    trace!("Command '{}' delivered", command.command);
                    observer.on_command_delivered(&command);
                }
                None => break,
            },
            _ = ticker.tick() => {
                let active = liveness.is_active(Instant::now());
                if active != *active_tx.borrow() {
                    info!("Display is now {}", if active { "active" } else { "inactive" });
                    active_tx.send_replace(active);
                    observer.on_display_active_changed(active);
                }
            }
        }
    }
}

/// Send each debounced command; failures become notices.
async fn run_dispatcher<R, S>(
    sender: CommandSender<R, S>,
    mut debounced: mpsc::Receiver<PendingCommand>,
    observer: Arc<dyn SessionObserver>,
) where
    R: Relay + Clone + Sync + 'static,
    S: RecordStore + Sync,
{
    while let Some((kind, payload)) = debounced.recv().await {
        if let Err(err) = sender.send_command(kind, payload).await {
            warn!("Command '{}' not sent: {}", kind, err);
            observer.on_notice(&Notice::warning(format!(
                "Could not send '{kind}' to the display: {err}"
            )));
        }
    }
}

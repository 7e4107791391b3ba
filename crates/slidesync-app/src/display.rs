//! Display session runtime.
//!
//! A [`DisplaySession`] loads the session's streams and settings, builds the
//! playback sequence, and then runs one message loop that feeds the playback
//! reducer with remote commands, timer expiries and media events. Reducer
//! effects are carried out here: the auto-advance timer is a deadline inside
//! the loop, status snapshots go to a publisher task, and `reload` rebuilds
//! the model from the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use slidesync_core::prelude::*;
use slidesync_core::{
    build_sequence_or_empty, from_payload, now_millis, Command, CommandKind, StatusSnapshot,
    Topic,
};
use slidesync_relay::{ChannelManager, Relay, Subscription};

use crate::config::Settings;
use crate::heartbeat::{publish_status, spawn_heartbeat};
use crate::observer::{Notice, SessionObserver};
use crate::playback::{update, PlaybackAction, PlaybackModel, PlaybackMsg, PlaybackState};
use crate::store::RecordStore;

/// A running display.
///
/// Dropping the session shuts it down.
pub struct DisplaySession<R> {
    session_id: String,
    channels: ChannelManager<R>,
    msg_tx: mpsc::UnboundedSender<PlaybackMsg>,
    state_rx: watch::Receiver<PlaybackState>,
    commands: Subscription,
    tasks: Vec<JoinHandle<()>>,
}

impl<R> std::fmt::Debug for DisplaySession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("session_id", &self.session_id)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl<R> DisplaySession<R>
where
    R: Relay + Clone + Sync + 'static,
{
    /// Load the session and start playing it.
    ///
    /// The observer receives the built sequence, then the initial state.
    ///
    /// # Errors
    ///
    /// Store errors from the initial load (e.g. [`Error::SessionNotFound`]).
    /// An invalid stream configuration is not an error: it loads as an empty
    /// sequence.
    pub async fn start<S>(
        channels: ChannelManager<R>,
        store: S,
        session_id: impl Into<String>,
        settings: &Settings,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self>
    where
        S: RecordStore + Sync + 'static,
    {
        let session_id = session_id.into();
        let fallback = settings.playback.default_item_duration();
        let model = load_model(&store, &session_id, fallback).await?;
        info!(
            "Display '{}' loaded {} items",
            session_id,
            model.sequence().len()
        );

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(model.state());
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let commands = {
            let msg_tx = msg_tx.clone();
            let topic = Topic::commands(&session_id);
            channels.subscribe(&topic, topic.event(), move |payload| {
                match from_payload::<Command>(payload) {
                    Ok(command) => {
                        let _ = msg_tx.send(PlaybackMsg::Command(command.command));
                    }
                    Err(err) => warn!("Ignoring malformed command: {}", err),
                }
            })
        };

        let heartbeat = spawn_heartbeat(
            channels.clone(),
            &session_id,
            settings.sync.heartbeat_interval(),
        );
        let publisher = tokio::spawn(run_status_publisher(
            channels.clone(),
            session_id.clone(),
            status_rx,
        ));

        let runtime = DisplayRuntime {
            store,
            session_id: session_id.clone(),
            fallback,
            observer,
            model,
            timer: None,
            state_tx,
            status_tx,
        };
        let task = tokio::spawn(runtime.run(msg_rx));

        Ok(Self {
            session_id,
            channels,
            msg_tx,
            state_rx,
            commands,
            tasks: vec![task, heartbeat, publisher],
        })
    }
}

impl<R> DisplaySession<R> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    /// Watch playback state changes.
    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }

    /// The video at `index` finished playing.
    pub fn media_ended(&self, index: usize) {
        let _ = self.msg_tx.send(PlaybackMsg::MediaEnded { index });
    }

    /// The media at `index` could not be played.
    pub fn media_failed(&self, index: usize) {
        let _ = self.msg_tx.send(PlaybackMsg::MediaFailed { index });
    }

    /// Apply a command locally, as if it had arrived from a controller.
    pub fn apply_command(&self, kind: CommandKind) {
        let _ = self.msg_tx.send(PlaybackMsg::Command(kind));
    }

    /// Stop every task and timer and close all channels. Idempotent.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.commands.unsubscribe();
        self.channels.close_all();
        debug!("Display '{}' shut down", self.session_id);
    }
}

impl<R> Drop for DisplaySession<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-fetch session and streams and build a fresh model.
async fn load_model<S: RecordStore>(
    store: &S,
    session_id: &str,
    fallback: Duration,
) -> Result<PlaybackModel> {
    let session = store.get_session(session_id).await?;
    let streams = store.get_streams(session_id).await?;
    let sequence = build_sequence_or_empty(&streams, session.shuffle, &mut rand::thread_rng());
    Ok(PlaybackModel::new(sequence, &session, fallback))
}

/// Publish status snapshots in order, off the message loop.
async fn run_status_publisher<R>(
    channels: ChannelManager<R>,
    session_id: String,
    mut status_rx: mpsc::UnboundedReceiver<StatusSnapshot>,
) where
    R: Relay + Clone + Sync + 'static,
{
    while let Some(status) = status_rx.recv().await {
        if let Err(err) = publish_status(&channels, &session_id, &status).await {
            warn!("Status publish for '{}' failed: {}", session_id, err);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
}

/// State owned by the display's message loop.
struct DisplayRuntime<S> {
    store: S,
    session_id: String,
    fallback: Duration,
    observer: Arc<dyn SessionObserver>,
    model: PlaybackModel,
    timer: Option<ArmedTimer>,
    state_tx: watch::Sender<PlaybackState>,
    status_tx: mpsc::UnboundedSender<StatusSnapshot>,
}

impl<S: RecordStore + Sync> DisplayRuntime<S> {
    async fn run(mut self, mut msg_rx: mpsc::UnboundedReceiver<PlaybackMsg>) {
        self.announce_sequence();
        let initial = self.model.start();
        self.apply(initial.actions);

        loop {
            let deadline = self.timer.map(|timer| timer.deadline);
            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    Some(msg) => self.step(msg).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(timer) = self.timer.take() {
                        trace!("Timer #{} fired", timer.generation);
                        self.step(PlaybackMsg::TimerFired { generation: timer.generation }).await;
                    }
                }
            }
        }
        debug!("Display '{}' message loop ended", self.session_id);
    }

    async fn step(&mut self, msg: PlaybackMsg) {
        let result = update(&mut self.model, msg);
        if self.apply(result.actions) {
            self.reload().await;
        }
    }

    /// Carry out reducer effects. Returns `true` if a reload was requested.
    fn apply(&mut self, actions: Vec<PlaybackAction>) -> bool {
        let mut reload = false;
        for action in actions {
            match action {
                PlaybackAction::ArmTimer { generation, after } => {
                    self.timer = Some(ArmedTimer {
                        generation,
                        deadline: Instant::now() + after,
                    });
                }
                PlaybackAction::CancelTimer => self.timer = None,
                PlaybackAction::PublishStatus(state) => {
                    let status = state.snapshot(now_millis());
                    self.state_tx.send_replace(state);
                    self.observer.on_state_change(&status);
                    let _ = self.status_tx.send(status);
                }
                PlaybackAction::Reload => reload = true,
            }
        }
        reload
    }

    /// Hard restart: new sequence, initial state, fresh trigger.
    ///
    /// If the store cannot be read the current model keeps running.
    async fn reload(&mut self) {
        info!("Display '{}' reloading", self.session_id);
        match load_model(&self.store, &self.session_id, self.fallback).await {
            Ok(model) => {
                self.timer = None;
                self.model = model;
                self.announce_sequence();
                let initial = self.model.start();
                self.apply(initial.actions);
            }
            Err(err) => {
                error!("Reload of '{}' failed: {}", self.session_id, err);
                self.observer
                    .on_notice(&Notice::error(format!("Reload failed: {err}")));
            }
        }
    }

    fn announce_sequence(&self) {
        let ids: Vec<String> = self
            .model
            .sequence()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            warn!("Display '{}' has nothing to play", self.session_id);
        }
        self.observer.on_sequence_loaded(&ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverEvent;
    use crate::store::MemoryStore;
    use slidesync_core::{
        to_payload, ContentStream, HeartbeatSignal, SessionInfo, StreamItem, StreamKind,
        StreamSettings,
    };
    use slidesync_relay::test_utils::{collecting_handler, wait_for_state};
    use slidesync_relay::{ChannelState, MemoryRelay};

    fn photos(ids: &[&str]) -> ContentStream {
        ids.iter().fold(
            ContentStream::new("main", StreamKind::Primary, 0),
            |stream, id| stream.with_item(StreamItem::photo(*id, format!("{id}.jpg"))),
        )
    }

    fn store_with(streams: Vec<ContentStream>, autoplay: bool) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_session(
            SessionInfo {
                id: "s1".into(),
                autoplay,
                ..SessionInfo::default()
            },
            streams,
        );
        store
    }

    async fn start(
        relay: &MemoryRelay,
        store: MemoryStore,
    ) -> (
        DisplaySession<MemoryRelay>,
        mpsc::UnboundedReceiver<ObserverEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let display = DisplaySession::start(
            ChannelManager::new(relay.clone()),
            store,
            "s1",
            &Settings::default(),
            Arc::new(tx),
        )
        .await
        .unwrap();
        (display, rx)
    }

    async fn next_state(events: &mut mpsc::UnboundedReceiver<ObserverEvent>) -> StatusSnapshot {
        loop {
            match events.recv().await {
                Some(ObserverEvent::StateChanged(status)) => return status,
                Some(_) => continue,
                None => panic!("observer channel closed"),
            }
        }
    }

    async fn send_command(relay: &MemoryRelay, kind: CommandKind) {
        let controller = ChannelManager::new(relay.clone());
        let topic = Topic::commands("s1");
        controller
            .publish(&topic, topic.event(), to_payload(&Command::new(kind, None)).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_announces_sequence_then_state() {
        let relay = MemoryRelay::new();
        let (display, mut events) = start(&relay, store_with(vec![photos(&["a", "b"])], false)).await;

        assert_eq!(
            events.recv().await.unwrap(),
            ObserverEvent::SequenceLoaded(vec!["a".into(), "b".into()])
        );
        let status = next_state(&mut events).await;
        assert_eq!(status.current_item_index, 0);
        assert!(!status.is_playing);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_session_fails_start() {
        let relay = MemoryRelay::new();
        let (tx, _rx) = mpsc::unbounded_channel::<ObserverEvent>();
        let err = DisplaySession::start(
            ChannelManager::new(relay),
            MemoryStore::new(),
            "nope",
            &Settings::default(),
            Arc::new(tx),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_advances_on_timer() {
        let relay = MemoryRelay::new();
        let (display, mut events) =
            start(&relay, store_with(vec![photos(&["a", "b", "c"])], true)).await;

        let first = next_state(&mut events).await;
        assert!(first.is_playing);
        let began = Instant::now();

        let second = next_state(&mut events).await;
        assert_eq!(second.current_item_index, 1);
        assert!(began.elapsed() >= Duration::from_secs(5));
        assert_eq!(display.state().current_index, 1);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_commands_drive_state_and_publish_status() {
        let relay = MemoryRelay::new();
        let watcher = ChannelManager::new(relay.clone());
        let status_topic = Topic::status("s1");
        let (handler, mut published) = collecting_handler();
        let _sub = watcher.subscribe(&status_topic, "status", handler);
        wait_for_state(&watcher, &status_topic, ChannelState::Joined).await;

        let (display, mut events) =
            start(&relay, store_with(vec![photos(&["a", "b", "c"])], false)).await;
        next_state(&mut events).await;
        wait_for_state(&display.channels, &Topic::commands("s1"), ChannelState::Joined).await;

        send_command(&relay, CommandKind::Previous).await;
        assert_eq!(next_state(&mut events).await.current_item_index, 2);

        send_command(&relay, CommandKind::BlackScreen).await;
        assert!(next_state(&mut events).await.is_black_screen);

        let mut last = None;
        for _ in 0..3 {
            let payload = published.recv().await.unwrap();
            last = Some(from_payload::<StatusSnapshot>(payload).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.current_item_index, 2);
        assert!(last.is_black_screen);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_waits_for_media_end() {
        let relay = MemoryRelay::new();
        let stream = ContentStream::new("main", StreamKind::Primary, 0)
            .with_item(StreamItem::video("v", "v.mp4"))
            .with_item(StreamItem::photo("p", "p.jpg"));
        let (display, mut events) = start(&relay, store_with(vec![stream], true)).await;
        next_state(&mut events).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(display.state().current_index, 0);

        display.media_ended(0);
        assert_eq!(next_state(&mut events).await.current_item_index, 1);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_rebuilds_from_store() {
        let relay = MemoryRelay::new();
        let store = store_with(vec![photos(&["a", "b"])], false);
        let (display, mut events) = start(&relay, store.clone()).await;
        display.apply_command(CommandKind::Next);
        assert_eq!(next_state(&mut events).await.current_item_index, 0);
        assert_eq!(next_state(&mut events).await.current_item_index, 1);

        store.set_streams("s1", vec![photos(&["x", "y", "z"])]).unwrap();
        display.apply_command(CommandKind::Reload);

        loop {
            if let Some(ObserverEvent::SequenceLoaded(ids)) = events.recv().await {
                assert_eq!(ids, vec!["x", "y", "z"]);
                break;
            }
        }
        assert_eq!(next_state(&mut events).await.current_item_index, 0);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_streams_load_as_empty_sequence() {
        let relay = MemoryRelay::new();
        let interstitial = ContentStream::new("promo", StreamKind::SinglePhoto, 1)
            .with_settings(StreamSettings {
                frequency: Some(-1),
                ..StreamSettings::default()
            })
            .with_item(StreamItem::photo("x", "x.jpg"));
        let (display, mut events) =
            start(&relay, store_with(vec![photos(&["a"]), interstitial], true)).await;

        assert_eq!(
            events.recv().await.unwrap(),
            ObserverEvent::SequenceLoaded(Vec::new())
        );
        display.apply_command(CommandKind::Next);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(display.state().current_index, 0);
        display.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_until_shutdown() {
        let relay = MemoryRelay::new();
        let watcher = ChannelManager::new(relay.clone());
        let topic = Topic::heartbeat("s1");
        let (handler, mut beats) = collecting_handler();
        let _sub = watcher.subscribe(&topic, "heartbeat", handler);
        wait_for_state(&watcher, &topic, ChannelState::Joined).await;

        let (display, _events) = start(&relay, store_with(vec![photos(&["a"])], false)).await;
        let beat = beats.recv().await.unwrap();
        assert!(from_payload::<HeartbeatSignal>(beat).is_ok());

        display.shutdown();
        assert!(display.channels.active_topics().is_empty());
        tokio::time::sleep(Duration::from_secs(20)).await;
        while beats.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(beats.try_recv().is_err());
    }
}

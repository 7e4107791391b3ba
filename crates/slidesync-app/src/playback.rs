//! Preview playback state machine (TEA pattern)
//!
//! [`update`] is a pure reducer: it takes the model and one
//! [`PlaybackMsg`], computes the whole next state, and returns the effects
//! the display runtime must carry out (arm or cancel the auto-advance timer,
//! publish status, reload). It never touches the clock or the network.
//!
//! Exactly one [`AdvanceTrigger`] is active at a time. Still items advance on
//! a timer; videos advance when the media reports it ended (or failed, which
//! skips it). A trigger message is honored only if it matches the active
//! trigger, so a timer that fires after the state moved on is ignored.

use std::time::Duration;

use slidesync_core::{CommandKind, PlaybackSequence, SessionInfo, StatusSnapshot};

/// The display's playback state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub current_index: usize,
    pub is_playing: bool,
    pub is_black_screen: bool,
}

impl PlaybackState {
    pub fn snapshot(&self, timestamp: i64) -> StatusSnapshot {
        StatusSnapshot {
            is_playing: self.is_playing,
            is_black_screen: self.is_black_screen,
            current_item_index: self.current_index,
            timestamp,
        }
    }
}

/// What will advance playback next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdvanceTrigger {
    /// Nothing armed (paused, black screen, or nothing to play).
    #[default]
    Idle,
    /// A one-shot timer; only the matching generation may fire.
    Timer { generation: u64, after: Duration },
    /// Waiting for the video at `index` to end.
    AwaitingMediaEnd { index: usize },
}

/// Inputs to the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMsg {
    Command(CommandKind),
    TimerFired { generation: u64 },
    MediaEnded { index: usize },
    /// Media at `index` could not be played; skipped like an ended video.
    MediaFailed { index: usize },
}

/// Effects for the runtime to execute, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    ArmTimer { generation: u64, after: Duration },
    CancelTimer,
    PublishStatus(PlaybackState),
    /// Re-fetch streams and session, rebuild the sequence, reset state.
    Reload,
}

/// Result of one reducer step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub actions: Vec<PlaybackAction>,
}

impl UpdateResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn action(action: PlaybackAction) -> Self {
        Self {
            actions: vec![action],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Everything the reducer reads and writes.
#[derive(Debug, Clone)]
pub struct PlaybackModel {
    sequence: PlaybackSequence,
    state: PlaybackState,
    trigger: AdvanceTrigger,
    loop_playback: bool,
    /// Seconds per still item when the stream does not say otherwise
    default_duration: Option<f64>,
    last_generation: u64,
}

impl PlaybackModel {
    /// Model for a freshly loaded session, positioned on the first item.
    ///
    /// `fallback_duration` applies when neither the stream nor the session
    /// gives a usable duration.
    pub fn new(sequence: PlaybackSequence, session: &SessionInfo, fallback_duration: Duration) -> Self {
        let default_duration = session
            .default_duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .or(Some(fallback_duration.as_secs_f64()));

        Self {
            sequence,
            state: PlaybackState {
                current_index: 0,
                is_playing: session.autoplay,
                is_black_screen: false,
            },
            trigger: AdvanceTrigger::Idle,
            loop_playback: session.loop_playback,
            default_duration,
            last_generation: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn trigger(&self) -> AdvanceTrigger {
        self.trigger
    }

    pub fn sequence(&self) -> &PlaybackSequence {
        &self.sequence
    }

    /// Arm the first trigger and announce the initial state.
    pub fn start(&mut self) -> UpdateResult {
        let mut actions = Vec::new();
        actions.extend(self.arm());
        actions.push(PlaybackAction::PublishStatus(self.state));
        UpdateResult { actions }
    }

    /// The `next` rule: step forward, wrap only when looping, otherwise stay
    /// on the last item and pause.
    fn advanced(&self) -> PlaybackState {
        let mut next = self.state;
        let Some(last) = self.sequence.last_index() else {
            return next;
        };
        if next.current_index < last {
            next.current_index += 1;
        } else if self.loop_playback {
            next.current_index = 0;
        } else {
            next.current_index = last;
            next.is_playing = false;
        }
        next
    }

    /// The `previous` rule: step back, always wrapping.
    fn retreated(&self) -> PlaybackState {
        let mut next = self.state;
        next.current_index = match (next.current_index, self.sequence.last_index()) {
            (0, Some(last)) => last,
            (index, _) => index - 1,
        };
        next
    }

    /// Arm the trigger for the current state, if playback should advance.
    fn arm(&mut self) -> Option<PlaybackAction> {
        if !self.state.is_playing || self.state.is_black_screen {
            self.trigger = AdvanceTrigger::Idle;
            return None;
        }
        let item = self.sequence.get(self.state.current_index)?;

        if item.is_video() {
            self.trigger = AdvanceTrigger::AwaitingMediaEnd {
                index: self.state.current_index,
            };
            return None;
        }

        self.last_generation += 1;
        let after = item.display_duration(self.default_duration);
        self.trigger = AdvanceTrigger::Timer {
            generation: self.last_generation,
            after,
        };
        Some(PlaybackAction::ArmTimer {
            generation: self.last_generation,
            after,
        })
    }

    /// Install `next` and derive the effects.
    ///
    /// `rearm` forces a fresh trigger even when the state is unchanged (a
    /// fired trigger on a single-item loop).
    fn transition(&mut self, next: PlaybackState, rearm: bool) -> UpdateResult {
        let changed = next != self.state;
        self.state = next;

        let mut actions = Vec::new();
        if changed || rearm {
            if matches!(self.trigger, AdvanceTrigger::Timer { .. }) {
                actions.push(PlaybackAction::CancelTimer);
            }
            self.trigger = AdvanceTrigger::Idle;
            actions.extend(self.arm());
        }
        if changed {
            actions.push(PlaybackAction::PublishStatus(self.state));
        }
        UpdateResult { actions }
    }
}

/// Process a message and update the model.
pub fn update(model: &mut PlaybackModel, msg: PlaybackMsg) -> UpdateResult {
    if model.sequence.is_empty() {
        return match msg {
            PlaybackMsg::Command(CommandKind::Reload) => UpdateResult::action(PlaybackAction::Reload),
            _ => UpdateResult::none(),
        };
    }

    match msg {
        PlaybackMsg::Command(kind) => handle_command(model, kind),

        PlaybackMsg::TimerFired { generation } => match model.trigger {
            AdvanceTrigger::Timer {
                generation: armed, ..
            } if armed == generation => {
                model.trigger = AdvanceTrigger::Idle;
                let next = model.advanced();
                model.transition(next, true)
            }
            _ => UpdateResult::none(),
        },

        PlaybackMsg::MediaEnded { index } | PlaybackMsg::MediaFailed { index } => {
            match model.trigger {
                AdvanceTrigger::AwaitingMediaEnd { index: awaited } if awaited == index => {
                    model.trigger = AdvanceTrigger::Idle;
                    let next = model.advanced();
                    model.transition(next, true)
                }
                _ => UpdateResult::none(),
            }
        }
    }
}

fn handle_command(model: &mut PlaybackModel, kind: CommandKind) -> UpdateResult {
    let current = model.state;
    let next = match kind {
        CommandKind::Next => model.advanced(),
        CommandKind::Previous => model.retreated(),
        CommandKind::Play => PlaybackState {
            is_playing: true,
            ..current
        },
        CommandKind::Pause => PlaybackState {
            is_playing: false,
            ..current
        },
        CommandKind::BlackScreen => PlaybackState {
            is_black_screen: true,
            ..current
        },
        CommandKind::ShowScreen => PlaybackState {
            is_black_screen: false,
            ..current
        },
        CommandKind::Reload => return UpdateResult::action(PlaybackAction::Reload),
        CommandKind::Unknown => return UpdateResult::none(),
    };
    model.transition(next, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidesync_core::{
        build_sequence, ContentStream, StreamItem, StreamKind, StreamSettings,
    };

    fn primary(ids: &[&str]) -> ContentStream {
        ids.iter().fold(
            ContentStream::new("main", StreamKind::Primary, 0),
            |stream, id| stream.with_item(StreamItem::photo(*id, format!("{id}.jpg"))),
        )
    }

    fn sequence(streams: &[ContentStream]) -> PlaybackSequence {
        build_sequence(streams, false, &mut rand::thread_rng()).unwrap()
    }

    fn session(loop_playback: bool, autoplay: bool) -> SessionInfo {
        SessionInfo {
            id: "s1".into(),
            loop_playback,
            autoplay,
            ..SessionInfo::default()
        }
    }

    fn model(ids: &[&str], loop_playback: bool, autoplay: bool) -> PlaybackModel {
        PlaybackModel::new(
            sequence(&[primary(ids)]),
            &session(loop_playback, autoplay),
            Duration::from_secs(5),
        )
    }

    fn armed_generation(model: &PlaybackModel) -> u64 {
        match model.trigger() {
            AdvanceTrigger::Timer { generation, .. } => generation,
            other => panic!("Expected Timer trigger, got {:?}", other),
        }
    }

    fn fire(model: &mut PlaybackModel) -> UpdateResult {
        let generation = armed_generation(model);
        update(model, PlaybackMsg::TimerFired { generation })
    }

    #[test]
    fn test_start_arms_timer_when_autoplaying() {
        let mut m = model(&["a", "b"], false, true);
        let result = m.start();
        assert_eq!(
            result.actions,
            vec![
                PlaybackAction::ArmTimer {
                    generation: 1,
                    after: Duration::from_secs(5)
                },
                PlaybackAction::PublishStatus(PlaybackState {
                    current_index: 0,
                    is_playing: true,
                    is_black_screen: false
                }),
            ]
        );
    }

    #[test]
    fn test_start_paused_arms_nothing() {
        let mut m = model(&["a", "b"], false, false);
        let result = m.start();
        assert_eq!(result.actions.len(), 1);
        assert_eq!(m.trigger(), AdvanceTrigger::Idle);
    }

    #[test]
    fn test_next_wraps_only_when_looping() {
        let mut looping = model(&["a", "b", "c"], true, false);
        for _ in 0..3 {
            update(&mut looping, PlaybackMsg::Command(CommandKind::Next));
        }
        assert_eq!(looping.state().current_index, 0);

        let mut clamped = model(&["a", "b", "c"], false, true);
        clamped.start();
        for _ in 0..5 {
            update(&mut clamped, PlaybackMsg::Command(CommandKind::Next));
        }
        assert_eq!(clamped.state().current_index, 2);
        assert!(!clamped.state().is_playing);
        assert_eq!(clamped.trigger(), AdvanceTrigger::Idle);
    }

    #[test]
    fn test_previous_always_wraps() {
        let mut m = model(&["a", "b", "c"], false, false);
        update(&mut m, PlaybackMsg::Command(CommandKind::Previous));
        assert_eq!(m.state().current_index, 2);
        update(&mut m, PlaybackMsg::Command(CommandKind::Previous));
        assert_eq!(m.state().current_index, 1);
    }

    #[test]
    fn test_play_pause_toggle_and_publish() {
        let mut m = model(&["a", "b"], false, false);
        let result = update(&mut m, PlaybackMsg::Command(CommandKind::Play));
        assert!(m.state().is_playing);
        assert!(matches!(result.actions[0], PlaybackAction::ArmTimer { .. }));
        assert!(matches!(result.actions[1], PlaybackAction::PublishStatus(_)));

        let result = update(&mut m, PlaybackMsg::Command(CommandKind::Pause));
        assert_eq!(
            result.actions,
            vec![
                PlaybackAction::CancelTimer,
                PlaybackAction::PublishStatus(m.state())
            ]
        );
        assert_eq!(m.trigger(), AdvanceTrigger::Idle);
    }

    #[test]
    fn test_repeated_command_is_silent() {
        let mut m = model(&["a", "b"], false, true);
        m.start();
        let generation = armed_generation(&m);
        let result = update(&mut m, PlaybackMsg::Command(CommandKind::Play));
        assert!(result.is_empty());
        assert_eq!(armed_generation(&m), generation);
    }

    #[test]
    fn test_black_screen_disarms_and_show_rearms() {
        let mut m = model(&["a", "b"], false, true);
        m.start();

        let result = update(&mut m, PlaybackMsg::Command(CommandKind::BlackScreen));
        assert_eq!(result.actions[0], PlaybackAction::CancelTimer);
        assert!(m.state().is_black_screen);
        assert_eq!(m.trigger(), AdvanceTrigger::Idle);

        let result = update(&mut m, PlaybackMsg::Command(CommandKind::ShowScreen));
        assert!(matches!(result.actions[0], PlaybackAction::ArmTimer { .. }));
        assert!(!m.state().is_black_screen);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut m = model(&["a", "b", "c"], false, true);
        m.start();
        let stale = armed_generation(&m);
        update(&mut m, PlaybackMsg::Command(CommandKind::Next));

        let result = update(&mut m, PlaybackMsg::TimerFired { generation: stale });
        assert!(result.is_empty());
        assert_eq!(m.state().current_index, 1);
    }

    #[test]
    fn test_single_item_loop_rearms_after_firing() {
        let mut m = model(&["only"], true, true);
        m.start();
        let first = armed_generation(&m);

        let result = fire(&mut m);

        assert_eq!(m.state().current_index, 0);
        assert_eq!(
            result.actions,
            vec![PlaybackAction::ArmTimer {
                generation: first + 1,
                after: Duration::from_secs(5)
            }]
        );
    }

    #[test]
    fn test_timer_at_end_without_loop_pauses() {
        let mut m = model(&["a", "b"], false, true);
        m.start();
        fire(&mut m);
        assert_eq!(m.state().current_index, 1);

        let result = fire(&mut m);
        assert_eq!(m.state().current_index, 1);
        assert!(!m.state().is_playing);
        assert_eq!(
            result.actions,
            vec![PlaybackAction::PublishStatus(m.state())]
        );
    }

    #[test]
    fn test_video_waits_for_media_end_and_skips_on_failure() {
        let stream = ContentStream::new("main", StreamKind::Primary, 0)
            .with_item(StreamItem::video("v1", "v1.mp4"))
            .with_item(StreamItem::video("v2", "v2.mp4"))
            .with_item(StreamItem::photo("p", "p.jpg"));
        let mut m = PlaybackModel::new(
            sequence(&[stream]),
            &session(false, true),
            Duration::from_secs(5),
        );

        let result = m.start();
        assert_eq!(m.trigger(), AdvanceTrigger::AwaitingMediaEnd { index: 0 });
        assert!(!result
            .actions
            .iter()
            .any(|a| matches!(a, PlaybackAction::ArmTimer { .. })));

        assert!(update(&mut m, PlaybackMsg::MediaEnded { index: 1 }).is_empty());

        update(&mut m, PlaybackMsg::MediaEnded { index: 0 });
        assert_eq!(m.state().current_index, 1);
        assert_eq!(m.trigger(), AdvanceTrigger::AwaitingMediaEnd { index: 1 });

        let result = update(&mut m, PlaybackMsg::MediaFailed { index: 1 });
        assert_eq!(m.state().current_index, 2);
        assert!(matches!(result.actions[0], PlaybackAction::ArmTimer { .. }));
    }

    #[test]
    fn test_duration_resolution_order() {
        let stream = primary(&["a"]).with_settings(StreamSettings {
            duration: Some(3.0),
            ..StreamSettings::default()
        });
        let mut m = PlaybackModel::new(
            sequence(&[stream]),
            &SessionInfo {
                default_duration: Some(8.0),
                autoplay: true,
                ..SessionInfo::default()
            },
            Duration::from_secs(5),
        );
        m.start();
        assert!(matches!(
            m.trigger(),
            AdvanceTrigger::Timer { after, .. } if after == Duration::from_secs(3)
        ));

        let mut m = PlaybackModel::new(
            sequence(&[primary(&["a"])]),
            &SessionInfo {
                default_duration: Some(-1.0),
                autoplay: true,
                ..SessionInfo::default()
            },
            Duration::from_secs(7),
        );
        m.start();
        assert!(matches!(
            m.trigger(),
            AdvanceTrigger::Timer { after, .. } if after == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_empty_sequence_ignores_everything_but_reload() {
        let mut m = PlaybackModel::new(
            PlaybackSequence::empty(),
            &session(true, true),
            Duration::from_secs(5),
        );
        for kind in [
            CommandKind::Next,
            CommandKind::Previous,
            CommandKind::Play,
            CommandKind::BlackScreen,
        ] {
            assert!(update(&mut m, PlaybackMsg::Command(kind)).is_empty());
        }
        assert!(update(&mut m, PlaybackMsg::TimerFired { generation: 0 }).is_empty());
        assert_eq!(
            update(&mut m, PlaybackMsg::Command(CommandKind::Reload)).actions,
            vec![PlaybackAction::Reload]
        );
    }

    #[test]
    fn test_unknown_command_is_noop() {
        let mut m = model(&["a", "b"], false, true);
        m.start();
        let before = m.state();
        assert!(update(&mut m, PlaybackMsg::Command(CommandKind::Unknown)).is_empty());
        assert_eq!(m.state(), before);
    }

    #[test]
    fn test_end_to_end_sequence_with_interstitials() {
        let interstitial = ContentStream::new("promo", StreamKind::SinglePhoto, 1)
            .with_settings(StreamSettings {
                frequency: Some(2),
                ..StreamSettings::default()
            })
            .with_item(StreamItem::photo("X", "x.jpg"));
        let mut m = PlaybackModel::new(
            sequence(&[primary(&["A", "B", "C", "D", "E"]), interstitial]),
            &session(false, true),
            Duration::from_secs(5),
        );
        assert_eq!(m.sequence().ids(), vec!["A", "B", "X", "C", "D", "X", "E"]);

        m.start();
        let mut shown = vec![m.sequence().get(0).unwrap().id().to_string()];
        while m.state().is_playing {
            fire(&mut m);
            let id = m.sequence().get(m.state().current_index).unwrap().id();
            if m.state().is_playing {
                shown.push(id.to_string());
            }
        }

        assert_eq!(shown, vec!["A", "B", "X", "C", "D", "X", "E"]);
        assert_eq!(m.state().current_index, 6);
    }

    #[test]
    fn test_commands_walk_sequence_with_interstitials() {
        let interstitial = ContentStream::new("promo", StreamKind::SinglePhoto, 1)
            .with_settings(StreamSettings {
                frequency: Some(2),
                ..StreamSettings::default()
            })
            .with_item(StreamItem::photo("X", "x.jpg"));
        let mut m = PlaybackModel::new(
            sequence(&[primary(&["A", "B", "C", "D", "E"]), interstitial]),
            &session(false, false),
            Duration::from_secs(5),
        );
        m.start();
        assert!(!m.state().is_playing);

        update(&mut m, PlaybackMsg::Command(CommandKind::Play));
        assert_eq!(m.state().current_index, 0);
        assert!(m.state().is_playing);

        for expected in 1..=3 {
            update(&mut m, PlaybackMsg::Command(CommandKind::Next));
            assert_eq!(m.state().current_index, expected);
        }
        assert_eq!(m.sequence().get(3).unwrap().id(), "C");
        assert!(m.state().is_playing);

        for expected in 4..=6 {
            update(&mut m, PlaybackMsg::Command(CommandKind::Next));
            assert_eq!(m.state().current_index, expected);
            assert!(m.state().is_playing);
        }

        let result = update(&mut m, PlaybackMsg::Command(CommandKind::Next));
        assert_eq!(m.state().current_index, 6);
        assert!(!m.state().is_playing);
        assert_eq!(m.trigger(), AdvanceTrigger::Idle);
        assert_eq!(result.actions.last(), Some(&PlaybackAction::PublishStatus(m.state())));
    }
}

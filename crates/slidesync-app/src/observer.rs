//! Observer seam between session runtimes and whatever presents them.
//!
//! Runtimes call into a [`SessionObserver`] from their message loop; every
//! method has a no-op default so presenters implement only what they show.
//! [`ObserverEvent`] plus the `mpsc::UnboundedSender` impl turns callbacks
//! into a stream, which the headless runner and the tests consume.

use serde::Serialize;
use tokio::sync::mpsc;

use slidesync_core::{Command, StatusSnapshot};

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A dismissible, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Callbacks from display and controller sessions.
pub trait SessionObserver: Send + Sync {
    /// Playback state changed (display: local state; controller: remote status).
    fn on_state_change(&self, _status: &StatusSnapshot) {}

    /// Controller only: the display started or stopped sending heartbeats.
    fn on_display_active_changed(&self, _active: bool) {}

    /// Display only: a sequence was built (on load and on every reload).
    fn on_sequence_loaded(&self, _item_ids: &[String]) {}

    /// Controller only: the relay echoed a command back to its sender.
    fn on_command_delivered(&self, _command: &Command) {}

    fn on_notice(&self, _notice: &Notice) {}
}

/// Observer callbacks as values.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    StateChanged(StatusSnapshot),
    DisplayActiveChanged(bool),
    SequenceLoaded(Vec<String>),
    CommandDelivered(Command),
    Notice(Notice),
}

impl SessionObserver for mpsc::UnboundedSender<ObserverEvent> {
    fn on_state_change(&self, status: &StatusSnapshot) {
        let _ = self.send(ObserverEvent::StateChanged(*status));
    }

    fn on_display_active_changed(&self, active: bool) {
        let _ = self.send(ObserverEvent::DisplayActiveChanged(active));
    }

    fn on_sequence_loaded(&self, item_ids: &[String]) {
        let _ = self.send(ObserverEvent::SequenceLoaded(item_ids.to_vec()));
    }

    fn on_command_delivered(&self, command: &Command) {
        let _ = self.send(ObserverEvent::CommandDelivered(command.clone()));
    }

    fn on_notice(&self, notice: &Notice) {
        let _ = self.send(ObserverEvent::Notice(notice.clone()));
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer: &dyn SessionObserver = &tx;

        observer.on_display_active_changed(true);
        observer.on_notice(&Notice::warning("relay unreachable"));

        assert_eq!(rx.try_recv().unwrap(), ObserverEvent::DisplayActiveChanged(true));
        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::Notice(Notice {
                level: NoticeLevel::Warning,
                message: "relay unreachable".into()
            })
        );
    }

    #[test]
    fn test_noop_observer_accepts_everything() {
        let observer = NoopObserver;
        observer.on_sequence_loaded(&["a".to_string()]);
        observer.on_notice(&Notice::error("ignored"));
    }

    #[test]
    fn test_notice_level_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Notice::info("hi")).unwrap(),
            r#"{"level":"info","message":"hi"}"#
        );
    }
}

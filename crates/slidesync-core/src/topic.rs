//! Relay topic naming and per-topic channel options
//!
//! Topic names are part of the wire contract between display and controller
//! builds and must stay `session:{id}:{commands|status|heartbeat}`.

/// The three per-session topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Commands,
    Status,
    Heartbeat,
}

impl TopicKind {
    fn suffix(self) -> &'static str {
        match self {
            TopicKind::Commands => "commands",
            TopicKind::Status => "status",
            TopicKind::Heartbeat => "heartbeat",
        }
    }

    /// The single event name carried on this topic.
    pub fn event(self) -> &'static str {
        match self {
            TopicKind::Commands => "command",
            TopicKind::Status => "status",
            TopicKind::Heartbeat => "heartbeat",
        }
    }

    /// Command topics echo to their publisher so the sender can confirm
    /// delivery; status and heartbeat topics must not trigger the
    /// publisher's own handlers.
    pub fn options(self) -> ChannelOptions {
        ChannelOptions {
            echo_self: matches!(self, TopicKind::Commands),
        }
    }
}

/// Options fixed when a channel handle is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Deliver this process's own publishes back to its subscribers
    pub echo_self: bool,
}

/// A named relay topic together with its channel options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    name: String,
    kind: TopicKind,
}

impl Topic {
    pub fn new(session_id: &str, kind: TopicKind) -> Self {
        Self {
            name: format!("session:{}:{}", session_id, kind.suffix()),
            kind,
        }
    }

    pub fn commands(session_id: &str) -> Self {
        Self::new(session_id, TopicKind::Commands)
    }

    pub fn status(session_id: &str) -> Self {
        Self::new(session_id, TopicKind::Status)
    }

    pub fn heartbeat(session_id: &str) -> Self {
        Self::new(session_id, TopicKind::Heartbeat)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    pub fn event(&self) -> &'static str {
        self.kind.event()
    }

    pub fn options(&self) -> ChannelOptions {
        self.kind.options()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

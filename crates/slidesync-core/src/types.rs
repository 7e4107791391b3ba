//! Slideshow domain types: content streams, items, and the playback sequence.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interstitial insertion interval used when a stream leaves `frequency` unset.
pub const DEFAULT_FREQUENCY: i64 = 5;

/// Fallback display time for a non-video item when neither the stream nor
/// the session configures one.
pub const DEFAULT_ITEM_DURATION: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────
// Streams
// ─────────────────────────────────────────────────────────

/// Kind of content stream.
///
/// `Primary` streams form the base traversal order. The remaining kinds are
/// interstitial: their items are spliced into the base order every
/// `frequency` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    Primary,
    SinglePhoto,
    Video,
}

impl StreamKind {
    pub fn is_primary(self) -> bool {
        matches!(self, StreamKind::Primary)
    }

    pub fn is_interstitial(self) -> bool {
        !self.is_primary()
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Primary => write!(f, "primary"),
            StreamKind::SinglePhoto => write!(f, "single-photo"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Per-stream presentation settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    /// Seconds each non-video item stays on screen
    #[serde(default)]
    pub duration: Option<f64>,

    /// Transition name, passed through to the renderer
    #[serde(default)]
    pub transition: Option<String>,

    /// Transition speed, passed through to the renderer
    #[serde(default)]
    pub transition_speed: Option<String>,

    /// Interstitial insertion interval (base positions between insertions)
    #[serde(default)]
    pub frequency: Option<i64>,
}

impl StreamSettings {
    /// Configured frequency, or [`DEFAULT_FREQUENCY`] when unset.
    pub fn frequency_or_default(&self) -> i64 {
        self.frequency.unwrap_or(DEFAULT_FREQUENCY)
    }
}

/// A named, ordered collection of items.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStream {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub kind: StreamKind,

    /// Position among sibling streams
    #[serde(default)]
    pub order: i64,

    #[serde(default)]
    pub settings: StreamSettings,

    #[serde(default)]
    pub items: Vec<StreamItem>,
}

impl ContentStream {
    pub fn new(id: impl Into<String>, kind: StreamKind, order: i64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            order,
            settings: StreamSettings::default(),
            items: Vec::new(),
        }
    }

    /// Builder-style helper that replaces the stream settings.
    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builder-style helper that appends an item, assigning it this stream's
    /// id and the next order position.
    pub fn with_item(mut self, mut item: StreamItem) -> Self {
        item.stream_id = self.id.clone();
        item.order = self.items.len() as i64;
        self.items.push(item);
        self
    }

    /// Items sorted by their `order` field; ties keep declaration order.
    pub fn ordered_items(&self) -> Vec<&StreamItem> {
        let mut items: Vec<&StreamItem> = self.items.iter().collect();
        items.sort_by_key(|item| item.order);
        items
    }
}

// ─────────────────────────────────────────────────────────
// Items
// ─────────────────────────────────────────────────────────

/// Kind of playable unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Photo,
    Video,
    Custom,
}

/// Media descriptor for an item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemContent {
    /// Playable URL
    pub url: String,

    /// Natural duration in seconds, if the content source knows it
    #[serde(default)]
    pub duration: Option<f64>,
}

/// One playable unit belonging to exactly one stream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    pub id: String,

    #[serde(default)]
    pub stream_id: String,

    #[serde(default)]
    pub kind: ItemKind,

    /// Position within the owning stream
    #[serde(default)]
    pub order: i64,

    pub content: ItemContent,
}

impl StreamItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: String::new(),
            kind,
            order: 0,
            content: ItemContent {
                url: url.into(),
                duration: None,
            },
        }
    }

    pub fn photo(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, ItemKind::Photo, url)
    }

    pub fn video(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, ItemKind::Video, url)
    }
}

// ─────────────────────────────────────────────────────────
// Sequencer Output
// ─────────────────────────────────────────────────────────

/// A stream item paired with its owning stream's kind and settings.
///
/// Interstitial items appear several times in a sequence; every occurrence
/// shares the same `Arc`s.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedItem {
    pub item: Arc<StreamItem>,
    pub stream_id: String,
    pub stream_kind: StreamKind,
    pub settings: Arc<StreamSettings>,
}

impl EnhancedItem {
    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn url(&self) -> &str {
        &self.item.content.url
    }

    /// Video items advance on media completion instead of a timer.
    pub fn is_video(&self) -> bool {
        self.item.kind == ItemKind::Video
    }

    /// How long a non-video item stays on screen.
    ///
    /// Resolution order: stream setting, session default, then
    /// [`DEFAULT_ITEM_DURATION`]. Non-positive and non-finite values are
    /// skipped.
    pub fn display_duration(&self, session_default: Option<f64>) -> Duration {
        [self.settings.duration, session_default]
            .into_iter()
            .flatten()
            .find(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_ITEM_DURATION)
    }
}

/// Ordered list of items the display steps through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSequence {
    items: Vec<EnhancedItem>,
}

impl PlaybackSequence {
    pub fn new(items: Vec<EnhancedItem>) -> Self {
        Self { items }
    }

    /// The "nothing to play" sequence.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EnhancedItem> {
        self.items.get(index)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.items.len().checked_sub(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnhancedItem> {
        self.items.iter()
    }

    /// Item ids in playback order.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(EnhancedItem::id).collect()
    }
}

// ─────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────

/// Session-level playback configuration, as kept by the record store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Seconds per item when the stream does not say otherwise
    #[serde(default)]
    pub default_duration: Option<f64>,

    /// Wrap to the first item after the last one
    #[serde(default, rename = "loop")]
    pub loop_playback: bool,

    /// Shuffle the primary items once per sequence build
    #[serde(default)]
    pub shuffle: bool,

    /// Start playing as soon as the display loads
    #[serde(default)]
    pub autoplay: bool,
}

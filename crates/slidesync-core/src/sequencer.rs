//! Playback sequencer
//!
//! Merges the primary streams into a base order, optionally shuffles it once,
//! then splices every interstitial item in after each `frequency`-th base
//! position.
//!
//! ```text
//! primary:      A B C D E          interstitial (f = 2): X
//! sequence:     A B X C D X E
//! ```

use std::sync::Arc;

use rand::Rng;

use crate::error::{Error, Result};
use crate::types::{ContentStream, EnhancedItem, PlaybackSequence};

/// An interstitial item waiting for its next insertion point.
struct Scheduled {
    item: EnhancedItem,
    frequency: usize,
    /// 1-indexed count of emitted base items after which this item is due
    next_at: usize,
}

/// Build the playback sequence for a set of streams.
///
/// Deterministic for identical input when `shuffle` is false; `rng` is only
/// consulted for the shuffle.
///
/// A frequency of 0 inserts after every base position. A negative frequency
/// is rejected with [`Error::SequenceBuild`].
pub fn build_sequence<R: Rng + ?Sized>(
    streams: &[ContentStream],
    shuffle: bool,
    rng: &mut R,
) -> Result<PlaybackSequence> {
    let streams = ordered_streams(streams);

    for stream in streams.iter().filter(|s| s.kind.is_interstitial()) {
        let frequency = stream.settings.frequency_or_default();
        if frequency < 0 {
            return Err(Error::sequence_build(format!(
                "stream '{}' has negative frequency {}",
                stream.id, frequency
            )));
        }
    }

    let mut base: Vec<EnhancedItem> = streams
        .iter()
        .filter(|s| s.kind.is_primary())
        .flat_map(|s| enhance(s))
        .collect();

    if shuffle && !base.is_empty() {
        fisher_yates(&mut base, rng);
    }

    let interstitials: Vec<(usize, EnhancedItem)> = streams
        .iter()
        .filter(|s| s.kind.is_interstitial())
        .flat_map(|s| {
            let frequency = effective_frequency(s.settings.frequency_or_default());
            enhance(s).into_iter().map(move |item| (frequency, item))
        })
        .collect();

    if base.is_empty() {
        let items = interstitials.into_iter().map(|(_, item)| item).collect();
        return Ok(PlaybackSequence::new(items));
    }

    let mut scheduled: Vec<Scheduled> = interstitials
        .into_iter()
        .map(|(frequency, item)| Scheduled {
            item,
            frequency,
            next_at: frequency,
        })
        .collect();

    let inserted: usize = scheduled
        .iter()
        .map(|s| base.len() / s.frequency)
        .sum();
    let mut items = Vec::with_capacity(base.len() + inserted);

    for (position, base_item) in base.into_iter().enumerate() {
        items.push(base_item);
        let emitted = position + 1;
        for entry in scheduled.iter_mut().filter(|s| s.next_at == emitted) {
            items.push(entry.item.clone());
            entry.next_at = entry.next_at.saturating_add(entry.frequency);
        }
    }

    Ok(PlaybackSequence::new(items))
}

/// Build the sequence, failing closed to an empty sequence on invalid input.
pub fn build_sequence_or_empty<R: Rng + ?Sized>(
    streams: &[ContentStream],
    shuffle: bool,
    rng: &mut R,
) -> PlaybackSequence {
    match build_sequence(streams, shuffle, rng) {
        Ok(sequence) => sequence,
        Err(err) => {
            tracing::error!("Sequence build failed, nothing to play: {}", err);
            PlaybackSequence::empty()
        }
    }
}

/// Streams sorted by `order`; ties keep declaration order.
fn ordered_streams(streams: &[ContentStream]) -> Vec<&ContentStream> {
    let mut ordered: Vec<&ContentStream> = streams.iter().collect();
    ordered.sort_by_key(|s| s.order);
    ordered
}

/// Pair each of a stream's items with the stream's kind and settings.
fn enhance(stream: &ContentStream) -> Vec<EnhancedItem> {
    let settings = Arc::new(stream.settings.clone());
    stream
        .ordered_items()
        .into_iter()
        .map(|item| EnhancedItem {
            item: Arc::new(item.clone()),
            stream_id: stream.id.clone(),
            stream_kind: stream.kind,
            settings: Arc::clone(&settings),
        })
        .collect()
}

/// Frequency 0 means "every position"; the caller has already rejected
/// negative values.
fn effective_frequency(frequency: i64) -> usize {
    if frequency <= 0 {
        1
    } else {
        usize::try_from(frequency).unwrap_or(usize::MAX)
    }
}

fn fisher_yates<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

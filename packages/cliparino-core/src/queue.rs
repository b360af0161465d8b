//! Thread-safe FIFO queue of pending clips and the last-played slot.
//!
//! Multiple producers (command router, shoutout pipeline, approval gate)
//! enqueue; a single consumer (the playback engine) dequeues. Stop does NOT
//! drain the queue - enqueued clips remain and resume after a subsequent
//! play.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::twitch::types::Clip;
use crate::utils::now_millis;

/// How a clip ended up in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueSource {
    /// `!watch <url-or-id>` direct request.
    Watch,
    /// Chosen by the shoutout pipeline.
    Shoutout,
    /// `!replay` of the last played clip.
    Replay,
    /// Chosen by clip search (possibly via mod approval).
    Search,
}

/// A queued clip plus its playback bookkeeping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// The clip to play.
    pub clip: Clip,
    /// Unix timestamp (ms) at enqueue time.
    pub enqueued_at: u64,
    /// Playback-start failures for this entry. Only ever increments; at 3
    /// the entry is quarantined (dropped without re-enqueue).
    pub failure_count: u32,
    /// Where the request came from.
    pub source: EnqueueSource,
    /// Priority lane flag. Currently always false - all sources share one
    /// FIFO - but carried on the entry so a priority lane stays additive.
    pub priority: bool,
}

impl QueueEntry {
    /// Wraps a clip for the queue.
    #[must_use]
    pub fn new(clip: Clip, source: EnqueueSource) -> Self {
        Self {
            clip,
            enqueued_at: now_millis(),
            failure_count: 0,
            source,
            priority: false,
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    entries: VecDeque<QueueEntry>,
    last_played: Option<Clip>,
}

/// Strict-FIFO clip queue with an independent last-played slot.
///
/// All operations take the internal lock once and are atomic with respect
/// to each other. The last-played slot survives `!stop` and is only replaced
/// on a successful playback completion.
#[derive(Debug, Default)]
pub struct ClipQueue {
    inner: Mutex<QueueInner>,
}

impl ClipQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns the resulting queue length.
    pub fn enqueue(&self, clip: Clip, source: EnqueueSource) -> usize {
        let mut inner = self.inner.lock();
        inner.entries.push_back(QueueEntry::new(clip, source));
        inner.entries.len()
    }

    /// Removes and returns the head entry, or `None` when empty.
    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.inner.lock().entries.pop_front()
    }

    /// Returns an entry to the head of the queue (failed playback retry).
    pub fn requeue_front(&self, entry: QueueEntry) {
        self.inner.lock().entries.push_front(entry);
    }

    /// Non-destructive head inspection.
    #[must_use]
    pub fn peek(&self) -> Option<QueueEntry> {
        self.inner.lock().entries.front().cloned()
    }

    /// Returns the last successfully played clip, if any.
    #[must_use]
    pub fn last_played(&self) -> Option<Clip> {
        self.inner.lock().last_played.clone()
    }

    /// Atomically replaces the last-played slot.
    pub fn set_last_played(&self, clip: Clip) {
        self.inner.lock().last_played = Some(clip);
    }

    /// Current queue length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

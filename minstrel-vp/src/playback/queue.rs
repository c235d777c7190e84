//! Per-session track queue
//!
//! Ordered, mutable list of pending tracks plus the pre-shuffle snapshot of
//! the most recently appended batch. The snapshot is what makes repeated
//! reshuffles non-compounding: a reshuffle always permutes the original load
//! order, never an already-shuffled one.

use crate::playback::types::TrackRequest;
use rand::Rng;
use std::collections::VecDeque;

/// Pending tracks for one session, FIFO unless explicitly shuffled
#[derive(Debug, Default)]
pub struct TrackQueue {
    entries: VecDeque<TrackRequest>,
    /// Pre-shuffle ordering of the most recently appended batch
    snapshot: Vec<TrackRequest>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch to the tail, preserving input order
    ///
    /// A non-empty batch becomes the new reshuffle snapshot. No-op on empty
    /// input.
    pub fn append(&mut self, batch: Vec<TrackRequest>) {
        if batch.is_empty() {
            return;
        }
        self.snapshot = batch.clone();
        self.entries.extend(batch);
    }

    /// Unbiased Fisher–Yates shuffle of the pending entries
    ///
    /// The currently playing track is not in the queue and is unaffected.
    pub fn shuffle_in_place<R: Rng>(&mut self, rng: &mut R) {
        shuffle_slice(self.entries.make_contiguous(), rng);
    }

    /// Drop all pending entries; returns the count removed
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Remove and return the head; `None` is the normal go-idle signal
    pub fn pop_next(&mut self) -> Option<TrackRequest> {
        self.entries.pop_front()
    }

    /// The last pre-shuffle ordering, for the reshuffle-current-playlist
    /// action
    pub fn snapshot_for_reshuffle(&self) -> &[TrackRequest] {
        &self.snapshot
    }

    /// Replace the pending entries without touching the snapshot
    ///
    /// Used by reshuffle: the snapshot must keep the original load order, so
    /// the reshuffled entries cannot go through `append`.
    pub fn replace_pending(&mut self, entries: Vec<TrackRequest>) {
        self.entries = entries.into();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRequest> {
        self.entries.iter()
    }
}

/// Unbiased Fisher–Yates shuffle
///
/// Iterates from the last index down to 1, swapping with a uniformly random
/// earlier-or-equal index, so every permutation is equally likely. Also used
/// by the session's reshuffle action on the snapshot copy.
pub fn shuffle_slice<T, R: Rng>(slice: &mut [T], rng: &mut R) {
    for i in (1..slice.len()).rev() {
        let j = rng.gen_range(0..=i);
        slice.swap(i, j);
    }
}

//! Per-range streamline removal gradients and bounded best-candidate sets.
//!
//! Each index range is one unit of work: a [`TrackGradientCalculator`] reads
//! the model and a frozen [`CostSnapshot`], and returns the range's lowest
//! gradients in a [`BestCandidates`]. Merging candidate sets keeps the best
//! `capacity` of the union under a total order (gradient, then track index),
//! so the final ranking does not depend on how the index space was split.

use std::cmp::Ordering;
use std::ops::Range;

use crate::model::{CostSnapshot, Model};


/// Removal gradient of one streamline.
#[derive(Debug, Clone, Copy)]
pub struct GradientEntry {
    pub track: u32,
    pub gradient: f64,
}

impl GradientEntry {
    pub fn new(track: u32, gradient: f64) -> Self {
        Self { track, gradient }
    }
}

impl Ord for GradientEntry {
    /// Most negative gradient first, ties broken by ascending track index.
    fn cmp(&self, other: &Self) -> Ordering {
        self.gradient
            .total_cmp(&other.gradient)
            .then(self.track.cmp(&other.track))
    }
}

impl PartialOrd for GradientEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GradientEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GradientEntry {}

/// Half-open range of original streamline indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackIndexRange {
    pub start: usize,
    pub end: usize,
}

impl TrackIndexRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Range<usize>> for TrackIndexRange {
    fn from(range: Range<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

/// The `capacity` best (lowest) negative gradients seen, plus the overall
/// best gradient including non-negative ones.
///
/// Stored as a bounded max-heap: the root is the worst entry kept, so a new
/// entry only has to beat the root to get in.
#[derive(Debug, Clone)]
pub struct BestCandidates {
    capacity: usize,
    items: Vec<GradientEntry>,
    best_overall: Option<GradientEntry>,
    evaluated: usize,
}

impl BestCandidates {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity.min(4096)),
            best_overall: None,
            evaluated: 0,
        }
    }

    /// Record one evaluated gradient. Only negative gradients are candidates.
    pub fn observe(&mut self, entry: GradientEntry) {
        self.evaluated += 1;
        if self.best_overall.is_none_or(|best| entry < best) {
            self.best_overall = Some(entry);
        }
        if entry.gradient < 0.0 {
            self.push(entry);
        }
    }

    fn push(&mut self, entry: GradientEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() < self.capacity {
            self.items.push(entry);
            self.sift_up(self.items.len() - 1);
        } else if entry < self.items[0] {
            self.items[0] = entry;
            self.sift_down(0);
        }
    }

    /// Union of two candidate sets, keeping the best `capacity` entries.
    pub fn merge(mut self, other: Self) -> Self {
        let (mut larger, smaller) = if self.items.len() >= other.items.len() {
            (std::mem::take(&mut self), other)
        } else {
            (other, std::mem::take(&mut self))
        };
        for entry in smaller.items {
            larger.push(entry);
        }
        larger.evaluated += smaller.evaluated;
        if let Some(best) = smaller.best_overall {
            if larger.best_overall.is_none_or(|current| best < current) {
                larger.best_overall = Some(best);
            }
        }
        larger
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lowest gradient among all evaluated streamlines, removable-negative or not.
    pub fn best_overall(&self) -> Option<GradientEntry> {
        self.best_overall
    }

    /// Number of streamlines whose gradient was evaluated.
    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    /// Candidates ordered best first.
    pub fn into_sorted_vec(self) -> Vec<GradientEntry> {
        let mut items = self.items;
        items.sort_unstable();
        items
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.items[idx] > self.items[parent] {
                self.items.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut largest = idx;

            if left < self.items.len() && self.items[left] > self.items[largest] {
                largest = left;
            }
            if right < self.items.len() && self.items[right] > self.items[largest] {
                largest = right;
            }

            if largest != idx {
                self.items.swap(idx, largest);
                idx = largest;
            } else {
                break;
            }
        }
    }
}

impl Default for BestCandidates {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Read-only gradient pass over one index range.
#[derive(Debug, Clone, Copy)]
pub struct TrackGradientCalculator<'a> {
    model: &'a Model,
    snapshot: CostSnapshot,
}

impl<'a> TrackGradientCalculator<'a> {
    pub fn new(model: &'a Model, snapshot: CostSnapshot) -> Self {
        Self { model, snapshot }
    }

    pub fn calculate(&self, range: TrackIndexRange, capacity: usize) -> BestCandidates {
        let mut candidates = BestCandidates::new(capacity);
        let end = range.end.min(self.model.track_count());
        for index in range.start..end {
            if !self.model.is_removable(index) {
                continue;
            }
            let gradient = self
                .model
                .calc_gradient(index, self.snapshot.mu, self.snapshot.roc_cost);
            candidates.observe(GradientEntry::new(index as u32, gradient));
        }
        candidates
    }
}

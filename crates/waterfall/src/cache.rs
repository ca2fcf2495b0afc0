//! Sparse cache of loaded waterfall slices.
//!
//! Tracks which slice indices hold data and which ranges are in flight so the
//! host never requests the same range twice. Never performs I/O itself.

use crate::{SliceIndex, SliceRange};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct SliceCache<T> {
    total_slices: usize,
    // Presence of a key is what "loaded" means; payload and loaded state can't drift apart.
    slices: BTreeMap<SliceIndex, T>,
    loading: HashSet<SliceRange>,
}

impl<T> Default for SliceCache<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> SliceCache<T> {
    pub fn new(total_slices: usize) -> Self {
        Self {
            total_slices,
            slices: BTreeMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn total_slices(&self) -> usize {
        self.total_slices
    }

    pub fn loaded_count(&self) -> usize {
        self.slices.len()
    }

    /// Fraction of the capture held locally, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        if self.total_slices == 0 {
            return 0.0;
        }
        self.slices.len() as f64 / self.total_slices as f64
    }

    pub fn is_loaded(&self, index: SliceIndex) -> bool {
        self.slices.contains_key(&index)
    }

    pub fn get(&self, index: SliceIndex) -> Option<&T> {
        self.slices.get(&index)
    }

    /// True when every index of `[start, end)`, clamped to the capture, is loaded.
    pub fn is_range_loaded(&self, start: SliceIndex, end: SliceIndex) -> bool {
        SliceRange::new(start, end)
            .clamp_to(self.total_slices)
            .iter()
            .all(|i| self.slices.contains_key(&i))
    }

    /// One entry per index of the clamped range; `None` where no data is loaded yet.
    pub fn range_slices(&self, start: SliceIndex, end: SliceIndex) -> Vec<Option<&T>> {
        SliceRange::new(start, end)
            .clamp_to(self.total_slices)
            .iter()
            .map(|i| self.slices.get(&i))
            .collect()
    }

    /// Stores `slices` at consecutive indices from `start`. Indices past the
    /// capture end are dropped.
    pub fn add_loaded<I>(&mut self, start: SliceIndex, slices: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut stored = 0usize;
        let mut dropped = 0usize;
        for (offset, payload) in slices.into_iter().enumerate() {
            let index = start.saturating_add(offset);
            if index >= self.total_slices {
                dropped += 1;
                continue;
            }
            self.slices.insert(index, payload);
            stored += 1;
        }
        if dropped > 0 {
            debug!(
                target: "waterfall::cache",
                start,
                dropped,
                total = self.total_slices,
                "ignored slices beyond capture end"
            );
        }
        trace!(target: "waterfall::cache", start, stored, "slices loaded");
    }

    /// Maximal contiguous sub-ranges of `[start, end)` with no loaded data,
    /// ascending and disjoint.
    pub fn missing_ranges(&self, start: SliceIndex, end: SliceIndex) -> Vec<SliceRange> {
        let query = SliceRange::new(start, end).clamp_to(self.total_slices);
        let mut ranges = Vec::new();
        let mut open: Option<SliceIndex> = None;

        for i in query.iter() {
            if self.slices.contains_key(&i) {
                if let Some(s) = open.take() {
                    ranges.push(SliceRange::new(s, i));
                }
            } else if open.is_none() {
                open = Some(i);
            }
        }
        if let Some(s) = open {
            ranges.push(SliceRange::new(s, query.end));
        }
        ranges
    }

    /// Exact-identity lookup; an overlapping but different range does not count.
    pub fn is_range_loading(&self, start: SliceIndex, end: SliceIndex) -> bool {
        self.loading.contains(&SliceRange::new(start, end))
    }

    pub fn mark_range_loading(&mut self, start: SliceIndex, end: SliceIndex) {
        self.loading.insert(SliceRange::new(start, end));
    }

    /// Clears the in-flight marker whether the fetch succeeded or not.
    pub fn mark_range_loaded(&mut self, start: SliceIndex, end: SliceIndex) {
        self.loading.remove(&SliceRange::new(start, end));
    }

    pub fn loading_ranges(&self) -> Vec<SliceRange> {
        let mut ranges: Vec<_> = self.loading.iter().copied().collect();
        ranges.sort();
        ranges
    }

    pub fn has_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    /// Updates capacity and prunes payloads that fall past the new end.
    pub fn set_total_slices(&mut self, total_slices: usize) {
        if total_slices < self.total_slices {
            let pruned = self.slices.split_off(&total_slices).len();
            if pruned > 0 {
                debug!(
                    target: "waterfall::cache",
                    pruned,
                    total = total_slices,
                    "pruned slices beyond new capture end"
                );
            }
        }
        self.total_slices = total_slices;
    }

    pub fn clear(&mut self) {
        self.slices.clear();
        self.loading.clear();
    }
}

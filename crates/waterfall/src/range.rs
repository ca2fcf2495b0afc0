use crate::SliceIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open interval `[start, end)` of slice indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: SliceIndex,
    pub end: SliceIndex,
}

impl SliceRange {
    /// An `end` before `start` collapses to an empty range at `start`.
    pub fn new(start: SliceIndex, end: SliceIndex) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn with_len(start: SliceIndex, len: usize) -> Self {
        Self::new(start, start.saturating_add(len))
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: SliceIndex) -> bool {
        index >= self.start && index < self.end
    }

    pub fn clamp_to(&self, total: usize) -> Self {
        Self::new(self.start.min(total), self.end.min(total))
    }

    pub fn iter(&self) -> std::ops::Range<SliceIndex> {
        self.start..self.end
    }
}

impl From<std::ops::Range<SliceIndex>> for SliceRange {
    fn from(r: std::ops::Range<SliceIndex>) -> Self {
        Self::new(r.start, r.end)
    }
}

impl fmt::Display for SliceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

use serde::{Deserialize, Serialize};

use crate::address::{Offset, RelativeAddress, Size};
use crate::range::{DataRange, SourceRange};

/// Maps a span of a block's bytes to the span of the original image it came from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct RangePair {
    pub data: DataRange,
    pub source: SourceRange,
}

impl RangePair {
    pub fn new(data: DataRange, source: SourceRange) -> Self {
        Self { data, source }
    }

    /// Translate an offset of the block into an address of the original image, extrapolating
    /// linearly from this pair.
    pub fn translate(&self, offset: Offset) -> Option<RelativeAddress> {
        let delta = i64::from(offset) - i64::from(self.data.start());
        self.source.start().checked_offset(delta)
    }

    /// Translate an address of the original image back into an offset of the block.
    pub fn offset_of(&self, address: RelativeAddress) -> Option<Offset> {
        let delta = address - self.source.start();
        let offset = i64::from(self.data.start()).checked_add(delta)?;
        Offset::try_from(offset).ok()
    }
}

/// The source ranges of a block, ordered by data offset. Data ranges never intersect.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRanges {
    pairs: Vec<RangePair>,
}

impl SourceRanges {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Shorthand for a block whose `size` bytes all come from `address` onwards.
    pub fn contiguous(address: RelativeAddress, size: Size) -> Self {
        let mut ranges = Self::new();
        if size > 0 {
            ranges.push(DataRange::new(0, size), SourceRange::new(address, size));
        }
        ranges
    }

    /// Insert a pair. Returns false and leaves the table untouched if `data` intersects a range
    /// already present.
    pub fn push(&mut self, data: DataRange, source: SourceRange) -> bool {
        let at = self.pairs.partition_point(|pair| pair.data < data);

        let clashes_before = at > 0 && self.pairs[at - 1].data.intersects(&data);
        let clashes_after = at < self.pairs.len() && self.pairs[at].data.intersects(&data);
        if clashes_before || clashes_after {
            return false;
        }

        self.pairs.insert(at, RangePair::new(data, source));
        true
    }

    /// Find the pair whose data range contains all of `range`.
    pub fn find_range_pair(&self, range: DataRange) -> Option<&RangePair> {
        let at = self
            .pairs
            .partition_point(|pair| pair.data.start() <= range.start());

        at.checked_sub(1)
            .map(|at| &self.pairs[at])
            .filter(|pair| pair.data.contains_range(&range))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RangePair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

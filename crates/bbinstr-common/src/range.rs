use serde::{Deserialize, Serialize};

use crate::address::{Address, Offset, RelativeAddress, Size};

/// A half-open span of `size` bytes starting at `start`.
///
/// Ranges order lexicographically, first by start and then by size.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct AddressRange<A> {
    start: A,
    size: Size,
}

pub type RelativeAddressRange = AddressRange<RelativeAddress>;

/// A span of offsets within a block.
pub type DataRange = AddressRange<Offset>;

/// A span of addresses in the original image.
pub type SourceRange = RelativeAddressRange;

impl<A: Address> AddressRange<A> {
    pub fn new(start: A, size: Size) -> Self {
        Self { start, size }
    }

    pub fn start(&self) -> A {
        self.start
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn end(&self) -> A {
        self.start.advance(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, address: A) -> bool {
        self.start <= address && address < self.end()
    }

    pub fn contains_range(&self, other: &Self) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Whether two ranges overlap, given that `earlier` sorts before `later`.
pub fn overlaps<A: Address>(earlier: &AddressRange<A>, later: &AddressRange<A>) -> bool {
    debug_assert!(earlier.start() <= later.start());
    earlier.end() > later.start()
}

/// Find the first adjacent pair of overlapping ranges in a sorted slice. Returns the index of the
/// earlier range of the pair.
pub fn first_overlap<A: Address>(sorted: &[AddressRange<A>]) -> Option<usize> {
    sorted
        .windows(2)
        .position(|pair| overlaps(&pair[0], &pair[1]))
}

/// Whether no two ranges in a sorted slice overlap.
pub fn is_disjoint<A: Address>(sorted: &[AddressRange<A>]) -> bool {
    first_overlap(sorted).is_none()
}

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// An offset within a block. Negative values are only used as sentinels.
pub type Offset = i32;

/// A size in bytes.
pub type Size = u32;

/// Marks a successor or instruction that has no counterpart in the original block.
pub const NO_OFFSET: Offset = -1;

/// An address relative to the image base.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RelativeAddress(pub u32);

impl RelativeAddress {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Displace this address by a signed amount, failing if the result leaves the 32-bit address
    /// space.
    pub fn checked_offset(self, delta: i64) -> Option<Self> {
        let value = i64::from(self.0).checked_add(delta)?;
        u32::try_from(value).ok().map(Self)
    }
}

impl Add<Size> for RelativeAddress {
    type Output = Self;

    fn add(self, rhs: Size) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for RelativeAddress {
    type Output = i64;

    fn sub(self, rhs: Self) -> Self::Output {
        i64::from(self.0) - i64::from(rhs.0)
    }
}

impl fmt::Display for RelativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Anything that can be the start of an [`AddressRange`](crate::AddressRange).
pub trait Address: Copy + Ord + fmt::Debug {
    /// The address `size` bytes past this one.
    fn advance(self, size: Size) -> Self;
}

impl Address for RelativeAddress {
    fn advance(self, size: Size) -> Self {
        self + size
    }
}

impl Address for Offset {
    fn advance(self, size: Size) -> Self {
        self + size as Offset
    }
}

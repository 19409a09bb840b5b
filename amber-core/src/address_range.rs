use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Range, RangeInclusive};
use thiserror::Error;

/// A non-empty range in a 64-bit address space bounded inclusively below and above.
///
/// Enforces the invariant that `self.start() <= self.end()`.
///
/// Note that this is indifferent as to what is addressed, this can be bytes, words, or anything
/// else.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressRange {
    start: u64,
    end: u64,
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.start, self.end)
    }
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> Result<Self, InvalidBoundsError> {
        (start <= end)
            .then_some(Self { start, end })
            .ok_or(InvalidBoundsError { start, end })
    }

    /// Create a new address range covering `size` addresses starting at `start`.
    /// Returns an error for `size == 0` and for ranges that wrap past the end of the address
    /// space.
    pub fn from_start_size(start: u64, size: u64) -> Result<Self, InvalidBoundsError> {
        match size
            .checked_sub(1)
            .and_then(|delta| start.checked_add(delta))
        {
            Some(end) => Ok(Self { start, end }),
            None => Err(InvalidBoundsError {
                start,
                end: start.wrapping_add(size),
            }),
        }
    }

    pub fn start(self) -> u64 {
        self.start
    }

    pub fn end(self) -> u64 {
        self.end
    }

    /// Check if an address is contained within this address range.
    pub fn contains(self, address: u64) -> bool {
        self.start <= address && address <= self.end
    }

    /// Check if another range is fully contained within this address range.
    pub fn contains_range(self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Check if this range has at least one address in common with another.
    pub fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns `self.end() - self.start()`, which is the size minus 1.
    ///
    /// This value is always within the range `0..=u64::MAX`.
    pub fn delta(self) -> u64 {
        self.end - self.start
    }
}

impl TryFrom<RangeInclusive<u64>> for AddressRange {
    type Error = InvalidBoundsError;

    fn try_from(value: RangeInclusive<u64>) -> Result<Self, Self::Error> {
        Self::new(*value.start(), *value.end())
    }
}

impl TryFrom<Range<u64>> for AddressRange {
    type Error = InvalidBoundsError;

    fn try_from(value: Range<u64>) -> Result<Self, Self::Error> {
        match value.end.checked_sub(1) {
            Some(end) => Self::new(value.start, end),
            None => Err(InvalidBoundsError {
                start: value.start,
                end: value.end,
            }),
        }
    }
}

impl From<AddressRange> for RangeInclusive<u64> {
    fn from(value: AddressRange) -> Self {
        value.start..=value.end
    }
}

#[derive(Error, Debug, Clone)]
#[error("bounds [{start:#x}, {end:#x}] do not form a valid 64-bit address range")]
pub struct InvalidBoundsError {
    start: u64,
    end: u64,
}

#[macro_export]
macro_rules! address_range {
    ($start:expr, $end:expr) => {
        $crate::address_range::AddressRange::new($start, $end).unwrap()
    };
}

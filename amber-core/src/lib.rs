#[macro_use]
extern crate static_assertions;

use std::fmt;

pub mod address_range;
pub mod instruction;
pub mod machine;
pub mod memory;
pub mod registers;

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;

/// Re-export of the machine itself, since it is the main entry point of this crate.
pub use machine::Machine;

/// List of privilege levels implemented by this machine.
///
/// A privilege level is always referenced by two bits, so `0`, `1`, `2`, and `3` are
/// representable encodings. This machine only implements the two mandatory levels: machine-mode
/// (`3`), which all traps are taken to, and user-mode (`0`), which guest programs run at.
///
/// > The machine level has the highest privileges and is the only mandatory privilege level for a
/// > RISC-V hardware platform. Code run in machine-mode (M-mode) is usually inherently trusted, as
/// > it has low-level access to the machine implementation. M-mode can be used to manage secure
/// > execution environments on RISC-V. User-mode (U-mode) and supervisor-mode (S-mode) are intended
/// > for conventional application and operating system usage respectively.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lower privilege level.
    User = 0,
    // Levels 1 (supervisor) and 2 (reserved) are not implemented.
    /// Machine (abbreviated `M`) is the highest privilege level.
    /// It is the only mandatory privilege level for a RISC-V hardware platform.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Convert a 2-bit value into a [`PrivilegeLevel`].
    ///
    /// The unimplemented encodings `1` and `2` collapse to [`PrivilegeLevel::User`], matching the
    /// WARL treatment of the fields they can be read from.
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0..=2 => Self::User,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Machine => "M",
        })
    }
}

/// Address alignment ranging from no alignment (`1`) up to doubleword alignment.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u64);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Doubleword alignment means the address is a multiple of 8 (`address & 0b111 == 0`).
    pub const DOUBLEWORD: Self = Self(8);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two.
    ///
    /// If `size` is a power of two, the alignment will be equal to the size.
    pub fn natural_for_size(size: u64) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns the alignment as a power of two.
    pub fn as_power_of_two(self) -> u64 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u64) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}

use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::PrivilegeLevel;

/// Bit indices of the implemented mstatus fields.
mod idx {
    pub const MIE: usize = 3;
    pub const MPIE: usize = 7;
    pub const MPP: usize = 11;
}

/// Mask of the mstatus bits that guest writes can affect: MIE, MPIE, and the two MPP bits.
const WRITABLE_MASK: u64 = (1 << idx::MIE) | (1 << idx::MPIE) | (0b11 << idx::MPP);

/// Provides the mstatus register.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state.
///
/// Of the many fields mstatus defines, this machine implements exactly the three that drive its
/// trap architecture: MIE, MPIE, and MPP. All other bits are hardwired to zero.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self { mstatus: 0 }
    }

    /// Returns the full mstatus register value.
    pub fn read(&self) -> u64 {
        self.mstatus
    }

    /// Write a (masked) value to the mstatus register.
    ///
    /// Only the bits of `value` for which the corresponding bit in `mask` is `1` will be written,
    /// and of those only the implemented (writable) fields take effect.
    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & WRITABLE_MASK;
        self.mstatus = self.mstatus & !mask | value & mask;
        // MPP is a WARL field; collapse the unimplemented encodings (S-mode and the reserved
        // level) to U-mode.
        if self.mpp() == PrivilegeLevel::User {
            self.set_mpp(PrivilegeLevel::User);
        }
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u2(self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le())
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous Privilege level) field to
    /// `value`.
    pub fn set_mpp(&mut self, value: PrivilegeLevel) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_fields() {
        let mut status = Status::new();
        status.write(u64::MAX, u64::MAX);
        // Only MIE, MPIE, and MPP stick.
        assert_eq!(WRITABLE_MASK, status.read());
        assert!(status.mie());
        assert!(status.mpie());
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
    }

    #[test]
    fn test_mpp_warl() {
        let mut status = Status::new();
        // 0b01 (S-mode) is not implemented; the write collapses to U-mode.
        status.write(0b01 << 11, u64::MAX);
        assert_eq!(PrivilegeLevel::User, status.mpp());
        assert_eq!(0, status.read());
    }

    #[test]
    fn test_field_accessors() {
        let mut status = Status::new();
        status.set_mie(true);
        assert_eq!(1 << 3, status.read());
        status.set_mpie(true);
        assert_eq!(1 << 3 | 1 << 7, status.read());
        status.set_mpp(PrivilegeLevel::Machine);
        assert_eq!(1 << 3 | 1 << 7 | 0b11 << 11, status.read());
        status.set_mie(false);
        status.set_mpp(PrivilegeLevel::User);
        assert_eq!(1 << 7, status.read());
    }
}

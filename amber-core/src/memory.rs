//! Memory subsystem backing the guest physical address space.
//!
//! The guest sees a single flat byte-addressable space of `ram_size` bytes starting at a fixed
//! base address. Accessibility is governed by a set of non-overlapping [`AddressRange`]s, each
//! carrying either a [`Protection`] mask (host-memory-backed) or a pair of MMIO callbacks.
//! Addresses not covered by any range fault on access.

use crate::{AddressRange, Alignment};
use log::{debug, trace};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;
use thiserror::Error;

/// Memory protection mask, any combination of {read, write, execute}.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Protection(u8);

impl Protection {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const EXECUTE: Self = Self(1 << 2);
    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);
    pub const READ_EXECUTE: Self = Self(Self::READ.0 | Self::EXECUTE.0);
    pub const ALL: Self = Self(Self::READ.0 | Self::WRITE.0 | Self::EXECUTE.0);

    /// Returns `true` if all permissions in `other` are also present in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Protection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Self::READ) { 'r' } else { '-' },
            if self.contains(Self::WRITE) { 'w' } else { '-' },
            if self.contains(Self::EXECUTE) { 'x' } else { '-' },
        )
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protection({self})")
    }
}

/// A pair of host callbacks servicing loads and stores within an MMIO range.
///
/// The load callback receives the byte address being accessed and returns a value that is
/// truncated to the access size by the caller. The store callback receives the byte address and
/// the (zero-extended) value being stored.
///
/// Callbacks are shared behind [`Rc`] so that an MMIO range can be split by a later overlapping
/// insertion without duplicating host state.
#[derive(Clone)]
pub struct Mmio {
    load: Rc<RefCell<dyn FnMut(u64) -> u64>>,
    store: Rc<RefCell<dyn FnMut(u64, u64)>>,
}

impl Mmio {
    pub fn new(
        load: impl FnMut(u64) -> u64 + 'static,
        store: impl FnMut(u64, u64) + 'static,
    ) -> Self {
        Self {
            load: Rc::new(RefCell::new(load)),
            store: Rc::new(RefCell::new(store)),
        }
    }
}

impl fmt::Debug for Mmio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmio").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Region {
    Ram(Protection),
    Mmio(Mmio),
}

/// The memory subsystem of a single machine.
pub struct Memory {
    ram: Box<[u8]>,
    /// Guest address of the first byte of `ram`.
    guest_base: u64,
    /// Pairwise disjoint ranges ordered by start address.
    regions: Vec<(AddressRange, Region)>,
    /// Index into `regions` of the most recently hit MMIO range. Invalidated on every insertion.
    mru_mmio: Option<usize>,
}

impl Memory {
    /// Create a new memory subsystem backed by `ram_size` bytes of zeroed host memory, covering
    /// the guest addresses `guest_base..guest_base + ram_size`.
    ///
    /// No range is accessible until mapped with [`map`](Self::map) or
    /// [`map_mmio`](Self::map_mmio).
    ///
    /// # Panics
    ///
    /// Panics if `ram_size` is zero or if the RAM would extend past the end of the 64-bit address
    /// space.
    pub fn new(ram_size: usize, guest_base: u64) -> Self {
        const_assert!(usize::BITS <= 64);
        assert!(ram_size > 0, "guest RAM size must be non-zero");
        assert!(
            guest_base.checked_add(ram_size as u64).is_some(),
            "guest RAM must not wrap the 64-bit address space"
        );
        Self {
            ram: vec![0; ram_size].into_boxed_slice(),
            guest_base,
            regions: Vec::new(),
            mru_mmio: None,
        }
    }

    /// Returns the size of the backing RAM in bytes.
    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    /// Returns the guest address of the first byte of RAM.
    pub fn guest_base(&self) -> u64 {
        self.guest_base
    }

    /// Returns the guest address range covered by the backing RAM.
    pub fn ram_range(&self) -> AddressRange {
        AddressRange::from_start_size(self.guest_base, self.ram.len() as u64).unwrap()
    }

    /// Make `range` accessible with protection mask `protection`, backed by host RAM.
    ///
    /// Overlapping parts of previously mapped ranges (RAM-backed or MMIO) are replaced; their
    /// non-overlapping remainders are kept intact.
    pub fn map(&mut self, range: AddressRange, protection: Protection) -> Result<(), MapError> {
        if !self.ram_range().contains_range(range) {
            return Err(MapError {
                range,
                ram: self.ram_range(),
            });
        }
        debug!("Mapping {range} as {protection}");
        self.insert_region(range, Region::Ram(protection));
        Ok(())
    }

    /// Route accesses to `range` to the given MMIO callbacks.
    ///
    /// MMIO ranges are not backed by RAM and may lie outside of it. Overlapping parts of
    /// previously mapped ranges are replaced, as with [`map`](Self::map).
    pub fn map_mmio(&mut self, range: AddressRange, mmio: Mmio) {
        debug!("Mapping {range} as MMIO");
        self.insert_region(range, Region::Mmio(mmio));
    }

    fn insert_region(&mut self, range: AddressRange, region: Region) {
        let mut regions = Vec::with_capacity(self.regions.len() + 2);
        for (existing, value) in self.regions.drain(..) {
            if !existing.overlaps(range) {
                regions.push((existing, value));
                continue;
            }
            // The newly inserted range wins within the overlap; only the parts of the existing
            // range that stick out on either side survive.
            if existing.start() < range.start() {
                let left = AddressRange::new(existing.start(), range.start() - 1).unwrap();
                regions.push((left, value.clone()));
            }
            if existing.end() > range.end() {
                let right = AddressRange::new(range.end() + 1, existing.end()).unwrap();
                regions.push((right, value));
            }
        }
        regions.push((range, region));
        regions.sort_by_key(|(range, _)| range.start());
        self.regions = regions;
        self.mru_mmio = None;
    }

    /// Perform a `size`-byte load at `address`, with `size` one of {1, 2, 4, 8}.
    ///
    /// The returned value is the little-endian interpretation of the addressed bytes,
    /// zero-extended to 64 bits. Loads from MMIO ranges invoke the range's load callback instead
    /// and truncate its result to `size` bytes.
    pub fn load(&mut self, address: u64, size: u64) -> Result<u64, MemoryError> {
        trace!("Loading {size} bytes from memory at {address:#x}");
        self.check_alignment(address, size)?;
        let access = self.access_range(address, size)?;
        let index = match self.mmio_cache_lookup(access) {
            Some(index) => index,
            None => self.region_index(address).ok_or_else(|| {
                debug!("Load from unmapped address {address:#x}");
                MemoryError::AccessFault
            })?,
        };
        let (range, region) = &self.regions[index];
        if !range.contains_range(access) {
            debug!("Load at {address:#x} crosses the boundary of {range}");
            return Err(MemoryError::AccessFault);
        }
        match region {
            Region::Mmio(mmio) => {
                let mmio = mmio.clone();
                self.mru_mmio = Some(index);
                let value = (mmio.load.borrow_mut())(address);
                Ok(truncate(value, size))
            }
            Region::Ram(protection) => {
                if !protection.contains(Protection::READ) {
                    debug!("Load from non-readable range {range} ({protection})");
                    return Err(MemoryError::AccessFault);
                }
                Ok(self.read_ram(address, size))
            }
        }
    }

    /// Perform a `size`-byte store of the low `size` bytes of `value` at `address`, with `size`
    /// one of {1, 2, 4, 8}.
    ///
    /// Stores to MMIO ranges invoke the range's store callback with the zero-extended value.
    pub fn store(&mut self, address: u64, size: u64, value: u64) -> Result<(), MemoryError> {
        trace!(value; "Storing {size} bytes to memory at {address:#x}");
        self.check_alignment(address, size)?;
        let access = self.access_range(address, size)?;
        let index = match self.mmio_cache_lookup(access) {
            Some(index) => index,
            None => self.region_index(address).ok_or_else(|| {
                debug!("Store to unmapped address {address:#x}");
                MemoryError::AccessFault
            })?,
        };
        let (range, region) = &self.regions[index];
        if !range.contains_range(access) {
            debug!("Store at {address:#x} crosses the boundary of {range}");
            return Err(MemoryError::AccessFault);
        }
        match region {
            Region::Mmio(mmio) => {
                let mmio = mmio.clone();
                self.mru_mmio = Some(index);
                (mmio.store.borrow_mut())(address, truncate(value, size));
                Ok(())
            }
            Region::Ram(protection) => {
                if !protection.contains(Protection::WRITE) {
                    debug!("Store to non-writable range {range} ({protection})");
                    return Err(MemoryError::AccessFault);
                }
                self.write_ram(address, size, value);
                Ok(())
            }
        }
    }

    /// Reads a naturally-aligned 32-bit little-endian instruction word from memory.
    ///
    /// Requires execute permission on the covering range. MMIO ranges are never executable.
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    pub fn fetch32(&self, address: u64) -> Result<u32, MemoryError> {
        trace!("Fetching instruction from memory at {address:#x}");
        self.check_alignment(address, 4)?;
        let access = self.access_range(address, 4)?;
        let (range, region) = self
            .region_index(address)
            .map(|index| &self.regions[index])
            .ok_or_else(|| {
                debug!("Fetch from unmapped address {address:#x}");
                MemoryError::AccessFault
            })?;
        match region {
            Region::Ram(protection)
                if protection.contains(Protection::EXECUTE) && range.contains_range(access) =>
            {
                Ok(self.read_ram(address, 4) as u32)
            }
            _ => {
                debug!("Fetch from non-executable address {address:#x}");
                Err(MemoryError::AccessFault)
            }
        }
    }

    /// Copies `data` into RAM starting at guest address `address`.
    ///
    /// This bypasses all protection checks; it is intended for program loading, not for use on
    /// behalf of guest code. Fails only if the destination is not entirely backed by RAM.
    pub fn memcpy_in(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let index = self.ram_offset(address, data.len() as u64)?;
        self.ram[index..index + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copies `buf.len()` bytes out of RAM starting at guest address `address`.
    ///
    /// This bypasses all protection checks, like [`memcpy_in`](Self::memcpy_in).
    pub fn memcpy_out(&self, buf: &mut [u8], address: u64) -> Result<(), MemoryError> {
        let index = self.ram_offset(address, buf.len() as u64)?;
        buf.copy_from_slice(&self.ram[index..index + buf.len()]);
        Ok(())
    }

    /// Fills `len` bytes of RAM starting at guest address `address` with `value`.
    ///
    /// This bypasses all protection checks, like [`memcpy_in`](Self::memcpy_in).
    pub fn memset(&mut self, address: u64, value: u8, len: u64) -> Result<(), MemoryError> {
        let index = self.ram_offset(address, len)?;
        self.ram[index..index + len as usize].fill(value);
        Ok(())
    }

    /// Translate a guest address to a pointer into the backing host memory, or `None` if the
    /// address is not backed by RAM. Not used on the hot path.
    pub fn guest_to_host(&self, address: u64) -> Option<*const u8> {
        self.ram_range()
            .contains(address)
            .then(|| unsafe { self.ram.as_ptr().add((address - self.guest_base) as usize) })
    }

    /// Translate a pointer into the backing host memory back to the corresponding guest address,
    /// or `None` if the pointer does not point into the backing RAM. Not used on the hot path.
    pub fn host_to_guest(&self, pointer: *const u8) -> Option<u64> {
        let offset = (pointer as usize).checked_sub(self.ram.as_ptr() as usize)?;
        (offset < self.ram.len()).then(|| self.guest_base + offset as u64)
    }

    fn check_alignment(&self, address: u64, size: u64) -> Result<(), MemoryError> {
        // 1-byte accesses are always naturally aligned.
        let aligned = Alignment::natural_for_size(size)
            .map(|alignment| alignment.is_aligned(address))
            .unwrap_or(false);
        if !aligned {
            debug!("Misaligned {size}-byte access at {address:#x}");
            return Err(MemoryError::MisalignedAccess);
        }
        Ok(())
    }

    fn access_range(&self, address: u64, size: u64) -> Result<AddressRange, MemoryError> {
        AddressRange::from_start_size(address, size).map_err(|_| MemoryError::AccessFault)
    }

    /// Short-circuit lookup through the most-recently-used MMIO range.
    fn mmio_cache_lookup(&self, access: AddressRange) -> Option<usize> {
        let index = self.mru_mmio?;
        let (range, _) = &self.regions[index];
        range.contains_range(access).then_some(index)
    }

    fn region_index(&self, address: u64) -> Option<usize> {
        self.regions
            .binary_search_by(|(range, _)| {
                if address < range.start() {
                    Ordering::Greater
                } else if address <= range.end() {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            })
            .ok()
    }

    /// Checks that `[address, address + len)` is entirely backed by RAM, and returns the offset
    /// of `address` into the RAM buffer.
    fn ram_offset(&self, address: u64, len: u64) -> Result<usize, MemoryError> {
        let offset = address
            .checked_sub(self.guest_base)
            .ok_or(MemoryError::AccessFault)?;
        match offset.checked_add(len) {
            Some(end) if end <= self.ram.len() as u64 => Ok(offset as usize),
            _ => Err(MemoryError::AccessFault),
        }
    }

    // The read_ram/write_ram callers have already checked that the access is entirely backed by
    // RAM, so the slice indexing cannot go out of bounds.

    fn read_ram(&self, address: u64, size: u64) -> u64 {
        let index = (address - self.guest_base) as usize;
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(&self.ram[index..index + size as usize]);
        u64::from_le_bytes(buf)
    }

    fn write_ram(&mut self, address: u64, size: u64, value: u64) {
        let index = (address - self.guest_base) as usize;
        self.ram[index..index + size as usize].copy_from_slice(&value.to_le_bytes()[..size as usize]);
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("guest_base", &self.guest_base)
            .field("ram_size", &self.ram.len())
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

fn truncate(value: u64, size: u64) -> u64 {
    match size {
        8 => value,
        _ => value & ((1 << (8 * size)) - 1),
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
}

#[derive(Error, Debug, Clone)]
#[error("range {range} falls outside the guest RAM {ram}")]
pub struct MapError {
    range: AddressRange,
    ram: AddressRange,
}

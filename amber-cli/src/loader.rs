//! Loading of statically-linked ELF64 executables into a fresh machine.

use amber_core::machine::{Config, Machine};
use amber_core::memory::{MapError, MemoryError, Protection};
use amber_core::registers::Specifier;
use amber_core::AddressRange;
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use goblin::elf::Elf;
use log::{debug, warn};
use thiserror::Error;

/// Builds a machine from an ELF image.
///
/// Each PT_LOAD segment's file bytes are copied to its virtual address and mapped with the
/// protection its flags ask for; the zero-filled tail (`memsz - filesz`) and all RAM above the
/// topmost segment are mapped read-write, the latter serving as heap and stack. The machine comes
/// back in user mode with the pc at the ELF entry point and the stack pointer at the top of RAM.
pub fn load_elf(image: &[u8], ram_size: usize) -> Result<Machine, LoadError> {
    let elf = Elf::parse(image)?;

    let segments: Vec<_> = elf
        .program_headers
        .iter()
        .filter(|header| header.p_type == PT_LOAD && header.p_memsz > 0)
        .collect();
    if segments.is_empty() {
        return Err(LoadError::NoLoadableSegments);
    }

    let guest_base = segments.iter().map(|header| header.p_vaddr).min().unwrap();
    let guest_top = segments
        .iter()
        .map(|header| {
            header
                .p_vaddr
                .checked_add(header.p_memsz)
                .ok_or(LoadError::MalformedSegment)
        })
        .try_fold(0u64, |top, end| end.map(|end| top.max(end)))?;
    // The stack pointer lands at `ram_size - 8`, which must clear the loaded segments.
    if guest_top.saturating_add(8) > ram_size as u64 {
        return Err(LoadError::RamTooSmall {
            needed: guest_top,
            ram_size,
        });
    }

    let mut machine = Machine::new(Config {
        ram_size,
        guest_base,
    });

    for header in &segments {
        debug!(
            "loading segment: file range [{:#x}..{:#x}] to guest range [{:#x}..{:#x}] ({})",
            header.p_offset,
            header.p_offset + header.p_filesz,
            header.p_vaddr,
            header.p_vaddr + header.p_memsz,
            protection_for(header.p_flags),
        );
        if header.p_filesz > 0 {
            let data = image
                .get(header.file_range())
                .ok_or(LoadError::MalformedSegment)?;
            machine.memory_mut().memcpy_in(header.p_vaddr, data)?;
            machine.memory_mut().map(
                AddressRange::from_start_size(header.p_vaddr, header.p_filesz)
                    .map_err(|_| LoadError::MalformedSegment)?,
                protection_for(header.p_flags),
            )?;
        }
        if header.p_memsz > header.p_filesz {
            let bss_start = header.p_vaddr + header.p_filesz;
            let bss_size = header.p_memsz - header.p_filesz;
            machine.memory_mut().memset(bss_start, 0, bss_size)?;
            machine.memory_mut().map(
                AddressRange::from_start_size(bss_start, bss_size)
                    .map_err(|_| LoadError::MalformedSegment)?,
                Protection::READ_WRITE,
            )?;
        }
    }

    // Everything above the topmost segment becomes the heap and stack.
    if guest_top < ram_size as u64 {
        machine.memory_mut().map(
            AddressRange::new(guest_top, ram_size as u64 - 1).unwrap(),
            Protection::READ_WRITE,
        )?;
    }

    // The `_end` symbol marks the initial program break.
    for sym in elf.syms.iter() {
        if elf.strtab.get_at(sym.st_name) == Some("_end") {
            machine.set_heap_start(sym.st_value);
            break;
        }
    }
    if machine.heap_start() == 0 {
        warn!("no `_end` symbol found; the initial heap boundary is unknown");
    }

    *machine.registers_mut().pc_mut() = elf.entry;
    machine
        .registers_mut()
        .set_x(Specifier::SP, ram_size as u64 - 8);
    Ok(machine)
}

fn protection_for(flags: u32) -> Protection {
    let mut protection = Protection::NONE;
    if flags & PF_R != 0 {
        protection = protection | Protection::READ;
    }
    if flags & PF_W != 0 {
        protection = protection | Protection::WRITE;
    }
    if flags & PF_X != 0 {
        protection = protection | Protection::EXECUTE;
    }
    protection
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("the ELF has no loadable segments")]
    NoLoadableSegments,
    #[error("a segment's bounds are inconsistent with the file image")]
    MalformedSegment,
    #[error("guest RAM of {ram_size:#x} bytes is too small for segments ending at {needed:#x}")]
    RamTooSmall { needed: u64, ram_size: usize },
    #[error("segment does not fit in guest RAM: {0}")]
    Map(#[from] MapError),
    #[error("segment bytes fall outside guest RAM: {0}")]
    Copy(#[from] MemoryError),
}

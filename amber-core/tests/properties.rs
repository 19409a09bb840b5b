//! Property-based tests for the decoder and the LR/SC reservation rules.

use amber_core::instruction::{AmoOp, AmoWidth, Instruction, LoadWidth, RegImmOp, StoreWidth};
use amber_core::machine::{Config, Machine};
use amber_core::memory::Protection;
use amber_core::registers::Specifier;
use amber_core::address_range;
use proptest::prelude::*;

proptest! {
    /// Decoding has no state: any 32-bit word decodes without panicking, and decoding the same
    /// word twice gives identical results.
    #[test]
    fn decode_is_total_and_deterministic(raw in any::<u32>()) {
        let first = Instruction::decode(raw);
        let second = Instruction::decode(raw);
        prop_assert_eq!(first, second);
    }

    /// Encoding an `addi` from random fields and decoding it recovers the fields.
    #[test]
    fn addi_round_trips(rd in 0u32..32, rs1 in 0u32..32, imm in -2048i32..2048) {
        let raw = ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13;
        prop_assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::new(rd).unwrap(),
                src: Specifier::new(rs1).unwrap(),
                immediate: imm as i64,
            }),
            Instruction::decode(raw)
        );
    }

    /// Encoding a `jal` from a random even 21-bit offset and decoding it recovers the offset.
    #[test]
    fn jal_offset_round_trips(rd in 0u32..32, offset in (-(1i32 << 20) / 2..(1i32 << 20) / 2)) {
        let offset = offset * 2; // bit 0 of the J-immediate is always zero
        let imm = offset as u32;
        let raw = ((imm >> 20) & 1) << 31
            | ((imm >> 1) & 0x3FF) << 21
            | ((imm >> 11) & 1) << 20
            | ((imm >> 12) & 0xFF) << 12
            | rd << 7
            | 0x6F;
        prop_assert_eq!(
            Ok(Instruction::Jal {
                dest: Specifier::new(rd).unwrap(),
                offset,
            }),
            Instruction::decode(raw)
        );
    }
}

const BASE: u64 = 0x8000_0000;

/// The operations a random atomic sequence is built from.
#[derive(Debug, Clone, Copy)]
enum AtomicStep {
    Lr(u8),
    Sc(u8),
    Amo(u8),
    /// An ordinary load or store, which must leave the reservation alone.
    Plain(u8),
}

fn atomic_step() -> impl Strategy<Value = AtomicStep> {
    (0u8..4, 0u8..4).prop_map(|(kind, slot)| match kind {
        0 => AtomicStep::Lr(slot),
        1 => AtomicStep::Sc(slot),
        2 => AtomicStep::Amo(slot),
        _ => AtomicStep::Plain(slot),
    })
}

fn machine() -> Machine {
    let mut machine = Machine::new(Config {
        ram_size: 0x1000,
        guest_base: BASE,
    });
    machine
        .memory_mut()
        .map(address_range![BASE, BASE + 0xFFF], Protection::ALL)
        .unwrap();
    *machine.registers_mut().pc_mut() = BASE;
    machine
}

proptest! {
    /// SC succeeds iff the most recent reservation was an LR to the same address with no
    /// intervening SC or AMO. Ordinary loads and stores do not disturb the reservation.
    #[test]
    fn reservation_invariants(steps in proptest::collection::vec(atomic_step(), 1..64)) {
        let mut machine = machine();
        // Model of the {address, valid} reservation pair.
        let mut reservation: Option<u64> = None;

        let x1 = Specifier::new(1u8).unwrap();
        let x5 = Specifier::new(5u8).unwrap();
        for step in steps {
            let slot_address = |slot: u8| BASE + 8 * slot as u64;
            match step {
                AtomicStep::Lr(slot) => {
                    let address = slot_address(slot);
                    machine.registers_mut().set_x(x1, address);
                    machine.execute_instruction(Instruction::Amo {
                        op: AmoOp::Lr,
                        width: AmoWidth::Doubleword,
                        aq: false,
                        rl: false,
                        src: Specifier::X0,
                        addr: x1,
                        dest: x5,
                    }).unwrap();
                    reservation = Some(address);
                }
                AtomicStep::Sc(slot) => {
                    let address = slot_address(slot);
                    machine.registers_mut().set_x(x1, address);
                    machine.registers_mut().set_x(Specifier::SP, 0x77);
                    machine.execute_instruction(Instruction::Amo {
                        op: AmoOp::Sc,
                        width: AmoWidth::Doubleword,
                        aq: false,
                        rl: false,
                        src: Specifier::SP,
                        addr: x1,
                        dest: x5,
                    }).unwrap();
                    let expect_success = reservation == Some(address);
                    prop_assert_eq!(!expect_success as u64, machine.registers().x(x5));
                    reservation = None;
                }
                AtomicStep::Amo(slot) => {
                    machine.registers_mut().set_x(x1, slot_address(slot));
                    machine.execute_instruction(Instruction::Amo {
                        op: AmoOp::Add,
                        width: AmoWidth::Doubleword,
                        aq: false,
                        rl: false,
                        src: Specifier::SP,
                        addr: x1,
                        dest: x5,
                    }).unwrap();
                    reservation = None;
                }
                AtomicStep::Plain(slot) => {
                    machine.registers_mut().set_x(x1, slot_address(slot));
                    machine.execute_instruction(Instruction::Store {
                        width: StoreWidth::Sd,
                        src: Specifier::SP,
                        base: x1,
                        offset: 0,
                    }).unwrap();
                    machine.execute_instruction(Instruction::Load {
                        width: LoadWidth::Ld,
                        dest: x5,
                        base: x1,
                        offset: 0,
                    }).unwrap();
                }
            }
        }
    }
}

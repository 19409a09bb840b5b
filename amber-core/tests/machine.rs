//! End-to-end tests driving whole guest programs through the machine.

use amber_core::machine::{csr, Config, Machine, StopReason, MCAUSE_INTERRUPT_BIT};
use amber_core::memory::{Mmio, Protection};
use amber_core::registers::Specifier;
use amber_core::{address_range, PrivilegeLevel};
use std::cell::RefCell;
use std::rc::Rc;

const BASE: u64 = 0x8000_0000;
const RAM_SIZE: usize = 0x1_0000;

/// Builds a machine with the given program loaded at [`BASE`], the pc pointing at it, all of RAM
/// mapped rwx, and the conventional exit call (93) registered to stop the machine.
fn machine_with(words: &[u32]) -> Machine {
    let mut machine = Machine::new(Config {
        ram_size: RAM_SIZE,
        guest_base: BASE,
    });
    machine
        .memory_mut()
        .map(
            address_range![BASE, BASE + RAM_SIZE as u64 - 1],
            Protection::ALL,
        )
        .unwrap();
    let image: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    machine.memory_mut().memcpy_in(BASE, &image).unwrap();
    *machine.registers_mut().pc_mut() = BASE;
    machine.add_syscall(93, |machine| machine.stop());
    machine
}

fn x(machine: &Machine, index: u8) -> u64 {
    machine.registers().x(Specifier::new(index).unwrap())
}

// Hand encoders for the handful of formats the test programs need.

fn enc_i(opcode: u32, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn enc_r(opcode: u32, rd: u32, funct3: u32, rs1: u32, rs2: u32, funct7: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn enc_s(opcode: u32, funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32 & 0xFFF;
    ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7) | opcode
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    enc_i(0x13, rd, 0b000, rs1, imm)
}

fn slli(rd: u32, rs1: u32, shamt: i32) -> u32 {
    enc_i(0x13, rd, 0b001, rs1, shamt)
}

fn csrrw(rd: u32, csr: u16, rs1: u32) -> u32 {
    enc_i(0x73, rd, 0b001, rs1, csr as i32)
}

fn csrrs(rd: u32, csr: u16, rs1: u32) -> u32 {
    enc_i(0x73, rd, 0b010, rs1, csr as i32)
}

fn csrrc(rd: u32, csr: u16, rs1: u32) -> u32 {
    enc_i(0x73, rd, 0b011, rs1, csr as i32)
}

const ECALL: u32 = 0x0000_0073;
const MRET: u32 = 0x3020_0073;
const WFI: u32 = 0x1050_0073;

/// `addi x17, x0, 93; ecall`
fn exit_sequence() -> [u32; 2] {
    [addi(17, 0, 93), ECALL]
}

#[test]
fn immediate_arithmetic() {
    // Scenario: addi/addi/add, then exit. The raw words are fixed by the ISA encoding.
    let mut machine = machine_with(&[
        0x0050_0093, // addi x1, x0, 5
        0x0070_0113, // addi x2, x0, 7
        0x0020_81B3, // add x3, x1, x2
        0x05D0_0893, // addi x17, x0, 93
        0x0000_0073, // ecall
    ]);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(12, x(&machine, 3));
    assert_eq!(93, x(&machine, 17));
}

#[test]
fn signed_vs_unsigned_compare() {
    let mut program = vec![
        0xFFF0_0093, // addi x1, x0, -1
        0x0010_0113, // addi x2, x0, 1
        enc_r(0x33, 3, 0b010, 1, 2, 0), // slt x3, x1, x2
        enc_r(0x33, 4, 0b011, 1, 2, 0), // sltu x4, x1, x2
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(1, x(&machine, 3));
    assert_eq!(0, x(&machine, 4));
}

#[test]
fn divide_by_zero() {
    let mut program = vec![
        addi(1, 0, 42),
        enc_r(0x33, 3, 0b100, 1, 0, 1), // div x3, x1, x0
        enc_r(0x33, 4, 0b110, 1, 0, 1), // rem x4, x1, x0
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0xFFFF_FFFF_FFFF_FFFF, x(&machine, 3));
    assert_eq!(42, x(&machine, 4));
}

#[test]
fn signed_division_overflow() {
    let mut program = vec![
        addi(1, 0, 1),
        slli(1, 1, 63), // x1 = 0x8000_0000_0000_0000
        addi(2, 0, -1),
        enc_r(0x33, 3, 0b100, 1, 2, 1), // div x3, x1, x2
        enc_r(0x33, 4, 0b110, 1, 2, 1), // rem x4, x1, x2
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0x8000_0000_0000_0000, x(&machine, 3));
    assert_eq!(0, x(&machine, 4));
}

#[test]
fn branch_to_misaligned_address_traps() {
    // A two-byte forward jump lands on a halfword boundary, which must raise
    // instruction-address-misaligned with the target in mtval. The handler at mtvec just parks
    // the machine in WFI.
    let mut machine = machine_with(&[
        0x0020_006F, // jal x0, 2
        0, 0, 0,
        WFI, // trap handler (BASE + 0x10)
    ]);
    machine.write_csr(csr::MTVEC, BASE + 0x10, u64::MAX).unwrap();
    assert_eq!(
        Ok(StopReason::WaitingForInterrupt),
        machine.simulate(u64::MAX)
    );
    assert_eq!(Ok(0), machine.read_csr(csr::MCAUSE));
    assert_eq!(Ok(BASE + 2), machine.read_csr(csr::MTVAL));
    assert_eq!(Ok(BASE), machine.read_csr(csr::MEPC));
}

#[test]
fn ecall_dispatches_to_registered_handler() {
    // The guest passes a pointer to a NUL-terminated string in a0; the handler for call 1000
    // copies it byte by byte into a console MMIO window whose store callback appends to a host
    // buffer.
    const CONSOLE: u64 = 0x1000_0000;
    const STRING: u64 = BASE + 0x1000;

    let mut program = vec![
        enc_i(0x73, 0, 0, 0, 0), // ecall (x17 = 1000, set up below)
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    machine.memory_mut().memcpy_in(STRING, b"hi\0").unwrap();
    machine.registers_mut().set_x(Specifier::A7, 1000);
    machine.registers_mut().set_x(Specifier::A0, STRING);

    let output = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&output);
    machine.memory_mut().map_mmio(
        address_range![CONSOLE, CONSOLE + 0xFF],
        Mmio::new(|_| 0, move |_, value| sink.borrow_mut().push(value as u8)),
    );
    machine.add_syscall(1000, |machine| {
        let mut pointer = machine.registers().x(Specifier::A0);
        loop {
            let byte = machine.memory_mut().load(pointer, 1).unwrap();
            if byte == 0 {
                break;
            }
            machine.memory_mut().store(CONSOLE, 1, byte).unwrap();
            pointer += 1;
        }
    });

    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(b"hi".to_vec(), *output.borrow());
}

#[test]
fn sign_extension_of_loads() {
    let mut program = vec![
        enc_i(0x03, 5, 0b000, 1, 0), // lb x5, 0(x1)
        enc_i(0x03, 6, 0b100, 1, 0), // lbu x6, 0(x1)
        enc_i(0x03, 7, 0b001, 1, 0), // lh x7, 0(x1)
        enc_i(0x03, 8, 0b101, 1, 0), // lhu x8, 0(x1)
        enc_i(0x03, 9, 0b010, 1, 0), // lw x9, 0(x1)
        enc_i(0x03, 10, 0b110, 1, 0), // lwu x10, 0(x1)
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    machine.memory_mut().memcpy_in(BASE + 0x1000, &[0xFF; 8]).unwrap();
    machine.registers_mut().set_x(Specifier::new(1u8).unwrap(), BASE + 0x1000);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0xFFFF_FFFF_FFFF_FFFF, x(&machine, 5));
    assert_eq!(0x0000_0000_0000_00FF, x(&machine, 6));
    assert_eq!(0xFFFF_FFFF_FFFF_FFFF, x(&machine, 7));
    assert_eq!(0x0000_0000_0000_FFFF, x(&machine, 8));
    assert_eq!(0xFFFF_FFFF_FFFF_FFFF, x(&machine, 9));
    assert_eq!(0x0000_0000_FFFF_FFFF, x(&machine, 10));
}

#[test]
fn store_load_round_trip() {
    let mut program = vec![
        enc_s(0x23, 0b011, 1, 2, 0), // sd x2, 0(x1)
        enc_i(0x03, 3, 0b011, 1, 0), // ld x3, 0(x1)
        enc_s(0x23, 0b000, 1, 2, 8), // sb x2, 8(x1)
        enc_i(0x03, 4, 0b100, 1, 8), // lbu x4, 8(x1)
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    machine.registers_mut().set_x(Specifier::new(1u8).unwrap(), BASE + 0x2000);
    machine.registers_mut().set_x(Specifier::SP, 0x0123_4567_89AB_CDEF);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0x0123_4567_89AB_CDEF, x(&machine, 3));
    assert_eq!(0xEF, x(&machine, 4));
}

#[test]
fn mret_returns_past_ecall() {
    // A user-mode program triggers an unhandled ecall; the m-mode handler advances mepc past the
    // ecall and returns with mret. Privilege must come back as user with MIE restored from MPIE
    // and MPP cleared.
    let handler_base = BASE + 0x100;
    let mut machine = machine_with(&[
        ECALL,         // x17 = 7, no handler registered
        addi(1, 0, 1), // executed after mret
        addi(17, 0, 93),
        ECALL,
    ]);
    let handler = [
        csrrs(5, csr::MEPC, 0), // x5 = mepc
        addi(5, 5, 4),
        csrrw(0, csr::MEPC, 5), // mepc += 4
        MRET,
    ];
    let image: Vec<u8> = handler.iter().flat_map(|word| word.to_le_bytes()).collect();
    machine.memory_mut().memcpy_in(handler_base, &image).unwrap();
    machine.write_csr(csr::MTVEC, handler_base, u64::MAX).unwrap();
    machine.registers_mut().set_x(Specifier::A7, 7);

    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(1, x(&machine, 1));
    assert_eq!(PrivilegeLevel::User, machine.privilege_mode());
    let mstatus = machine.read_csr(csr::MSTATUS).unwrap();
    // MIE (bit 3) restored from the pre-trap value (0), MPIE (bit 7) set, MPP (bits 11-12)
    // cleared.
    assert_eq!(1 << 7, mstatus);
    // The ecall itself was recorded with the u-mode cause.
    assert_eq!(Ok(8), machine.read_csr(csr::MCAUSE));
}

#[test]
fn sc_requires_valid_reservation() {
    let mut program = vec![
        enc_r(0x2F, 5, 0b010, 1, 0, 0b00010 << 2),  // lr.w x5, (x1)
        enc_r(0x2F, 6, 0b010, 1, 2, 0b00011 << 2),  // sc.w x6, x2, (x1)
        enc_r(0x2F, 7, 0b010, 1, 2, 0b00011 << 2),  // sc.w x7, x2, (x1), no reservation left
        enc_r(0x2F, 8, 0b010, 1, 0, 0b00010 << 2),  // lr.w x8, (x1)
        enc_r(0x2F, 9, 0b010, 1, 2, 0b00001 << 2),  // amoswap.w x9, x2, (x1) clears it
        enc_r(0x2F, 10, 0b010, 1, 2, 0b00011 << 2), // sc.w x10, x2, (x1)
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    machine.registers_mut().set_x(Specifier::new(1u8).unwrap(), BASE + 0x3000);
    machine.registers_mut().set_x(Specifier::SP, 0x55);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0, x(&machine, 6));
    assert_eq!(1, x(&machine, 7));
    assert_eq!(1, x(&machine, 10));
    assert_eq!(Ok(0x55), machine.memory_mut().load(BASE + 0x3000, 4));
}

#[test]
fn wfi_suspends_until_interrupt() {
    // Vectored mode: the timer interrupt (code 7) vectors to base + 28. The handler clears the
    // pending bit and returns; execution resumes after the wfi.
    let vector_base = BASE + 0x100;
    let mut program = vec![
        WFI,
        addi(1, 0, 5),
        addi(17, 0, 93),
        ECALL,
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    let handler = [
        csrrc(0, csr::MIP, 6), // clear the timer-pending bit (x6 = 1 << 7)
        MRET,
    ];
    let image: Vec<u8> = handler.iter().flat_map(|word| word.to_le_bytes()).collect();
    machine
        .memory_mut()
        .memcpy_in(vector_base + 4 * 7, &image)
        .unwrap();
    machine
        .write_csr(csr::MTVEC, vector_base | 1, u64::MAX)
        .unwrap();
    machine.registers_mut().set_x(Specifier::new(6u8).unwrap(), 1 << 7);

    assert_eq!(
        Ok(StopReason::WaitingForInterrupt),
        machine.simulate(u64::MAX)
    );
    assert_eq!(0, x(&machine, 1));

    // Raise a machine timer interrupt and let the guest continue. The interrupt is taken even
    // though the guest never set MIE, because it is waiting in user mode.
    machine.write_csr(csr::MIE, 1 << 7, u64::MAX).unwrap();
    machine.write_csr(csr::MIP, 1 << 7, u64::MAX).unwrap();
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(5, x(&machine, 1));
    assert_eq!(
        Ok(MCAUSE_INTERRUPT_BIT | 7),
        machine.read_csr(csr::MCAUSE)
    );
}

#[test]
fn unrecognized_csr_traps_illegal_instruction() {
    let raw = csrrw(1, 0x340, 2); // mscratch is not implemented
    let mut machine = machine_with(&[
        raw,
        0, 0, 0,
        WFI, // trap handler (BASE + 0x10)
    ]);
    machine.write_csr(csr::MTVEC, BASE + 0x10, u64::MAX).unwrap();
    assert_eq!(
        Ok(StopReason::WaitingForInterrupt),
        machine.simulate(u64::MAX)
    );
    assert_eq!(Ok(2), machine.read_csr(csr::MCAUSE));
    assert_eq!(Ok(raw as u64), machine.read_csr(csr::MTVAL));
}

#[test]
fn csr_write_to_read_only_region_traps() {
    // mhartid reads as zero, but writing it raises illegal-instruction.
    let mut machine = machine_with(&[
        csrrs(1, csr::MHARTID, 0), // reading is fine
        csrrw(0, csr::MHARTID, 0), // CSRRW always counts as a write
        0, 0,
        WFI, // trap handler (BASE + 0x10)
    ]);
    machine.write_csr(csr::MTVEC, BASE + 0x10, u64::MAX).unwrap();
    machine.registers_mut().set_x(Specifier::new(1u8).unwrap(), 0xDEAD);
    assert_eq!(
        Ok(StopReason::WaitingForInterrupt),
        machine.simulate(u64::MAX)
    );
    assert_eq!(0, x(&machine, 1));
    assert_eq!(Ok(2), machine.read_csr(csr::MCAUSE));
    assert_eq!(Ok(BASE + 4), machine.read_csr(csr::MEPC));
}

#[test]
fn register_zero_stays_zero() {
    let mut program = vec![
        addi(0, 0, 42), // write to x0 is discarded
        enc_r(0x33, 1, 0b000, 0, 0, 0), // add x1, x0, x0
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(0, x(&machine, 0));
    assert_eq!(0, x(&machine, 1));
}

#[test]
fn step_budget_suspends_and_resumes() {
    let mut program = vec![
        addi(1, 0, 1),
        addi(2, 0, 2),
        addi(3, 0, 3),
    ];
    program.extend(exit_sequence());
    let mut machine = machine_with(&program);
    assert_eq!(Ok(StopReason::StepLimitReached), machine.simulate(2));
    assert_eq!(2, x(&machine, 2));
    assert_eq!(0, x(&machine, 3));
    // State is consistent; simulation picks up where it left off.
    assert_eq!(Ok(StopReason::Stopped), machine.simulate(u64::MAX));
    assert_eq!(3, x(&machine, 3));
}

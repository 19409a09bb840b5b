//! Provides a simulatable RV64IMA machine.

pub mod csr;
mod execute;
mod interrupts;
mod status;
mod trap;

use crate::instruction::{
    AmoOp, BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegReg32Op, RegRegOp,
    RegShiftImmOp, StoreWidth,
};
use crate::memory::{Memory, MemoryError};
use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;
use execute::Executor;
use interrupts::Interrupts;
use log::{debug, trace};
use status::Status;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use trap::{Trap, VectorMode};

pub use csr::CsrSpecifier;

/// A host-provided environment-call handler.
///
/// Handlers receive a mutable reference to the whole machine. By convention they read their
/// arguments from registers `a0`–`a6` and place their return value in `a0`; after the handler
/// returns, the machine advances the pc past the `ecall` instruction.
pub type SyscallHandler = Rc<dyn Fn(&mut Machine)>;

/// The mcause bit distinguishing interrupts from exceptions.
pub const MCAUSE_INTERRUPT_BIT: u64 = 1 << 63;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of bytes of guest RAM backing the machine.
    pub ram_size: usize,
    /// Guest address of the first byte of RAM. Program loaders typically set this to the lowest
    /// virtual address of any loadable segment.
    pub guest_base: u64,
}

/// Machine implementing the RV64IMA ISA.
///
/// As hardware multithreading is not supported, the machine has exactly a single hart; harts are
/// therefore not modelled explicitly.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// The machine owns its register file, CSRs, and memory. Hosts interact with it in four ways:
/// reading and writing that state directly, registering environment-call handlers
/// ([`add_syscall`](Self::add_syscall)), installing MMIO ranges (through
/// [`memory_mut`](Self::memory_mut)), and driving execution with [`simulate`](Self::simulate).
pub struct Machine {
    config: Config,
    /// General purpose registers: x and pc registers.
    registers: Registers,
    /// The machine's current privilege mode.
    privilege_mode: PrivilegeLevel,
    /// The mstatus register.
    status: Status,
    /// Trap setup and handling registers (mtvec, medeleg, mideleg, mepc, mcause, mtval).
    trap: Trap,
    /// Interrupt pending/enable registers (mip, mie).
    interrupts: Interrupts,
    /// The guest physical address space.
    memory: Memory,
    /// Address reserved by the most recent LR, if still valid.
    reservation: Option<u64>,
    /// When set, instruction fetch is suspended until an interrupt becomes pending.
    wfi: bool,
    /// Cleared by handlers to stop simulation at the next instruction boundary.
    running: bool,
    /// Initial heap boundary (the `_end` symbol) recorded by the program loader.
    heap_start: u64,
    syscalls: HashMap<u64, SyscallHandler>,
    wfi_hook: Option<SyscallHandler>,
}

impl Machine {
    /// Create a machine with zeroed registers and unmapped memory.
    ///
    /// The machine starts in user mode with the pc at zero; a program loader is expected to map
    /// memory, load code, and point the pc at its entry before simulating.
    pub fn new(config: Config) -> Self {
        let memory = Memory::new(config.ram_size, config.guest_base);
        Self {
            config,
            registers: Registers::new(0),
            privilege_mode: PrivilegeLevel::User,
            status: Status::new(),
            trap: Trap::new(),
            interrupts: Interrupts::new(),
            memory,
            reservation: None,
            wfi: false,
            running: true,
            heap_start: 0,
            syscalls: HashMap::new(),
            wfi_hook: None,
        }
    }

    /// Provide a read-only view of this machine's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provides immutable access to the general purpose (x) registers, and the pc register.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Provides mutable access to the general purpose (x) registers, and the pc register.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Provides immutable access to the memory subsystem.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Provides mutable access to the memory subsystem.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Returns the current privilege mode. See also [`PrivilegeLevel`].
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    /// Sets the current privilege mode.
    pub fn set_privilege_mode(&mut self, privilege_mode: PrivilegeLevel) {
        self.privilege_mode = privilege_mode;
    }

    /// Returns `false` once a handler has called [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop simulation at the next instruction boundary. Intended to be called from an
    /// environment-call handler or MMIO callback.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Set the running flag, e.g. to resume a machine stopped by a handler.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Returns the initial heap boundary recorded by the program loader, or `0` if none was set.
    pub fn heap_start(&self) -> u64 {
        self.heap_start
    }

    /// Record the initial heap boundary (the value of the program's `_end` symbol).
    pub fn set_heap_start(&mut self, heap_start: u64) {
        self.heap_start = heap_start;
    }

    /// Register `handler` for environment calls made with `number` in register `a7`.
    ///
    /// Returns `false` if a handler is already registered for that number, leaving it in place.
    pub fn add_syscall(&mut self, number: u64, handler: impl Fn(&mut Machine) + 'static) -> bool {
        match self.syscalls.entry(number) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Rc::new(handler));
                true
            }
        }
    }

    /// Remove the handler registered for `number`, returning `false` if there was none.
    ///
    /// Environment calls with an unhandled number take the ordinary trap path through mtvec.
    pub fn remove_syscall(&mut self, number: u64) -> bool {
        self.syscalls.remove(&number).is_some()
    }

    /// Install a hook that runs whenever the guest executes WFI, before fetch is suspended.
    /// A host can use this to drive an interrupt source (e.g. set a timer-pending bit).
    pub fn set_wfi_hook(&mut self, hook: impl Fn(&mut Machine) + 'static) {
        self.wfi_hook = Some(Rc::new(hook));
    }

    /// Read the value of a CSR by its specifier.
    pub fn read_csr(&self, specifier: CsrSpecifier) -> Result<u64, CsrError> {
        if !csr::is_valid(specifier) {
            return Err(CsrError::Unrecognized(specifier));
        }
        match specifier {
            //
            // Machine trap setup
            //
            csr::MSTATUS => Ok(self.status.read()),
            csr::MEDELEG => Ok(self.trap.read_medeleg()),
            csr::MIDELEG => Ok(self.trap.read_mideleg()),
            csr::MIE => Ok(self.interrupts.read_mie()),
            csr::MTVEC => Ok(self.trap.read_mtvec()),
            //
            // Machine trap handling
            //
            csr::MEPC => Ok(self.trap.read_mepc()),
            csr::MCAUSE => Ok(self.trap.read_mcause()),
            csr::MTVAL => Ok(self.trap.read_mtval()),
            csr::MIP => Ok(self.interrupts.read_mip()),
            //
            // Recognized registers hardwired to zero
            //
            csr::MHARTID | csr::MNSTATUS | csr::SATP | csr::PMPCFG0 | csr::PMPADDR0 => Ok(0),
            _ => Err(CsrError::Unrecognized(specifier)),
        }
    }

    /// Write a (masked) value to a CSR by its specifier.
    ///
    /// Only the bits of `value` for which the corresponding bit in `mask` is `1` will be written.
    /// Registers with partially-writable fields (mstatus) additionally restrict the mask to their
    /// writable bits.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        value: u64,
        mask: u64,
    ) -> Result<(), CsrError> {
        if !csr::is_valid(specifier) {
            return Err(CsrError::Unrecognized(specifier));
        }
        match specifier {
            //
            // Machine trap setup
            //
            csr::MSTATUS => self.status.write(value, mask),
            csr::MEDELEG => self.trap.write_medeleg(value, mask),
            csr::MIDELEG => self.trap.write_mideleg(value, mask),
            csr::MIE => self.interrupts.write_mie(value, mask),
            csr::MTVEC => self.trap.write_mtvec(value, mask),
            //
            // Machine trap handling
            //
            csr::MEPC => self.trap.write_mepc(value, mask),
            csr::MCAUSE => self.trap.write_mcause(value, mask),
            csr::MTVAL => self.trap.write_mtval(value, mask),
            csr::MIP => self.interrupts.write_mip(value, mask),
            //
            // Recognized registers hardwired to zero; writes are ignored.
            //
            csr::MHARTID | csr::MNSTATUS | csr::SATP | csr::PMPCFG0 | csr::PMPADDR0 => {}
            _ => Err(CsrError::Unrecognized(specifier))?,
        }
        Ok(())
    }

    /// Run the machine for at most `max_instructions` instructions.
    ///
    /// Simulation also returns early when a handler clears the running flag, or when the machine
    /// executes WFI and no enabled interrupt is pending. In every [`StopReason`] case the machine
    /// is left in a consistent state and `simulate` may simply be called again.
    ///
    /// The only error condition is an unrecoverable trap; see [`SimulationError`]. The machine
    /// state after an error is unspecified.
    pub fn simulate(&mut self, max_instructions: u64) -> Result<StopReason, SimulationError> {
        for _ in 0..max_instructions {
            if !self.running {
                return Ok(StopReason::Stopped);
            }
            if self.wfi && self.interrupts.pending() == 0 {
                return Ok(StopReason::WaitingForInterrupt);
            }
            self.step()?;
        }
        Ok(StopReason::StepLimitReached)
    }

    /// Poll for interrupts, then fetch and execute a single instruction.
    ///
    /// Does nothing if the machine is waiting for an interrupt and none is pending.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        // Register x0 is structurally wired to zero by [`Registers`], so there is nothing to
        // re-zero before executing.
        if self.wfi {
            if self.interrupts.pending() == 0 {
                return Ok(());
            }
            // The poll below clears the wfi flag and decides whether to take the interrupt.
        }
        self.poll_interrupts()?;
        let pc = self.registers.pc();
        if pc % 4 != 0 {
            return self.trap(Exception::InstructionAddressMisaligned(pc).into());
        }
        let raw = match self.memory.fetch32(pc) {
            Ok(raw) => raw,
            // Alignment was checked above, so only an access fault can remain.
            Err(MemoryError::MisalignedAccess | MemoryError::AccessFault) => {
                return self.trap(Exception::InstructionAccessFault(pc).into());
            }
        };
        let result = Instruction::decode(raw)
            .map_err(|_| Exception::IllegalInstruction(Some(raw)))
            .and_then(|instruction| self.execute_instruction(instruction));
        match result {
            Ok(()) => Ok(()),
            Err(Exception::IllegalInstruction(None)) => {
                self.trap(Exception::IllegalInstruction(Some(raw)).into())
            }
            Err(exception) => self.trap(exception.into()),
        }
    }

    /// Take the highest-priority pending-and-enabled interrupt, if the current privilege mode
    /// allows it.
    ///
    /// > An interrupt i will trap to M-mode (causing the privilege mode to change to M-mode) if
    /// > all of the following are true: (a) either the current privilege mode is M and the MIE bit
    /// > in the mstatus register is set, or the current privilege mode has less privilege than
    /// > M-mode; (b) bit i is set in both mip and mie.
    fn poll_interrupts(&mut self) -> Result<(), SimulationError> {
        if self.interrupts.pending() == 0 {
            return Ok(());
        }
        self.wfi = false;
        if self.privilege_mode < PrivilegeLevel::Machine || self.status.mie() {
            if let Some(interrupt) = self.interrupts.next_pending() {
                return self.trap(interrupt.into());
            }
        }
        Ok(())
    }

    /// Execute a single (decoded) instruction.
    ///
    /// This only takes care of executing the instruction-specific operations, such as updating `x`
    /// registers, updating memory, updating the `pc` register, and depending on the instruction
    /// also updating CSRs. Exceptions are returned to the caller rather than taken.
    pub fn execute_instruction(&mut self, instruction: Instruction) -> ExecutionResult {
        let mut executor = Executor { machine: self };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u6,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u6)
            }
            Instruction::Addiw {
                dest,
                src,
                immediate,
            } => executor.addiw(dest, src, immediate),
            Instruction::OpShiftImm32 {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slliw,
                    RegShiftImmOp::Srli => Executor::srliw,
                    RegShiftImmOp::Srai => Executor::sraiw,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Op32 {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegReg32Op::Addw => Executor::addw,
                    RegReg32Op::Subw => Executor::subw,
                    RegReg32Op::Sllw => Executor::sllw,
                    RegReg32Op::Srlw => Executor::srlw,
                    RegReg32Op::Sraw => Executor::sraw,
                    RegReg32Op::Mulw => Executor::mulw,
                    RegReg32Op::Divw => Executor::divw,
                    RegReg32Op::Divuw => Executor::divuw,
                    RegReg32Op::Remw => Executor::remw,
                    RegReg32Op::Remuw => Executor::remuw,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Ld => Executor::ld,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                    LoadWidth::Lwu => Executor::lwu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                    StoreWidth::Sd => Executor::sd,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Amo {
                op,
                width,
                aq: _,
                rl: _,
                src,
                addr,
                dest,
            } => match op {
                // With a single hart, the acquire/release bits have no observable effect.
                AmoOp::Lr => executor.lr(width, dest, addr),
                AmoOp::Sc => executor.sc(width, dest, src, addr),
                AmoOp::Swap => executor.amoswap(width, dest, src, addr),
                AmoOp::Add => executor.amoadd(width, dest, src, addr),
                AmoOp::Xor => executor.amoxor(width, dest, src, addr),
                AmoOp::And => executor.amoand(width, dest, src, addr),
                AmoOp::Or => executor.amoor(width, dest, src, addr),
                AmoOp::Min => executor.amomin(width, dest, src, addr),
                AmoOp::Max => executor.amomax(width, dest, src, addr),
                AmoOp::Minu => executor.amominu(width, dest, src, addr),
                AmoOp::Maxu => executor.amomaxu(width, dest, src, addr),
            },
            Instruction::Fence {
                predecessor,
                successor,
            } => executor.fence(predecessor, successor),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Mret => executor.mret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::Csr { op, dest, csr, src } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrw,
                    CsrOp::ReadSet => Executor::csrrs,
                    CsrOp::ReadClear => Executor::csrrc,
                };
                op(&mut executor, dest, csr, src)
            }
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrwi,
                    CsrOp::ReadSet => Executor::csrrsi,
                    CsrOp::ReadClear => Executor::csrrci,
                };
                op(&mut executor, dest, csr, immediate)
            }
        }
    }

    /// Enter a trap with the given cause.
    ///
    /// Environment calls whose `a7` number has a registered handler are dispatched to that
    /// handler instead; the trap CSRs are then left untouched and the pc advances past the
    /// `ecall`.
    fn trap(&mut self, cause: TrapCause) -> Result<(), SimulationError> {
        if let TrapCause::Exception(
            Exception::EnvironmentCallFromUMode | Exception::EnvironmentCallFromMMode,
        ) = cause
        {
            let number = self.registers.x(Specifier::A7);
            if let Some(handler) = self.syscalls.get(&number).map(Rc::clone) {
                trace!("Dispatching environment call {number} to its registered handler");
                handler(self);
                let pc = self.registers.pc_mut();
                *pc = pc.wrapping_add(4);
                return Ok(());
            }
        }
        let pc = self.registers.pc();
        debug!(pc; "Taking trap: {cause:?}");
        // Determine the mcause code and the auxiliary mtval value.
        let (mcause, mtval) = match cause {
            TrapCause::Exception(exception) => {
                let mtval = match exception {
                    Exception::IllegalInstruction(raw) => raw.map(u64::from).unwrap_or(0),
                    Exception::InstructionAddressMisaligned(address)
                    | Exception::InstructionAccessFault(address)
                    | Exception::LoadAddressMisaligned(address)
                    | Exception::LoadAccessFault(address)
                    | Exception::StoreAddressMisaligned(address)
                    | Exception::StoreAccessFault(address) => address,
                    Exception::Breakpoint
                    | Exception::EnvironmentCallFromUMode
                    | Exception::EnvironmentCallFromMMode => pc,
                };
                (exception.code(), mtval)
            }
            TrapCause::Interrupt(interrupt) => (interrupt.code() | MCAUSE_INTERRUPT_BIT, 0),
        };
        self.trap.write_mepc(pc, u64::MAX);
        self.trap.write_mcause(mcause, u64::MAX);
        self.trap.write_mtval(mtval, u64::MAX);
        // Stash the interrupted context in mstatus, then mask interrupts.
        self.status.set_mpp(self.privilege_mode);
        let mie = self.status.mie();
        self.status.set_mpie(mie);
        self.status.set_mie(false);
        self.privilege_mode = PrivilegeLevel::Machine;
        // Determine the trap handler address based on the mtvec register and cause type.
        let handler_address = match (self.trap.mtvec_mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.trap.mtvec_base() + 4 * interrupt.code()
            }
            (VectorMode::Vectored, TrapCause::Exception(_)) | (VectorMode::Direct, _) => {
                self.trap.mtvec_base()
            }
        };
        *self.registers.pc_mut() = handler_address;
        if handler_address == 0 {
            // The machine was never given a trap vector, so continuing would execute from
            // address zero. Surface this to the host instead.
            return Err(SimulationError::RunawayTrap { cause: mcause, pc });
        }
        Ok(())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("registers", &self.registers)
            .field("privilege_mode", &self.privilege_mode)
            .field("status", &self.status)
            .field("trap", &self.trap)
            .field("interrupts", &self.interrupts)
            .field("memory", &self.memory)
            .field("reservation", &self.reservation)
            .field("wfi", &self.wfi)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

/// Reason for a normal return from [`Machine::simulate`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StopReason {
    /// The given maximum number of instructions was reached.
    StepLimitReached,
    /// A handler cleared the running flag; see [`Machine::stop`].
    Stopped,
    /// The machine executed WFI and no enabled interrupt is pending.
    WaitingForInterrupt,
}

/// Unrecoverable simulation errors. The machine state after one of these is unspecified.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum SimulationError {
    /// A trap was taken while mtvec still held its reset value of zero, leaving the machine with
    /// nothing sensible to execute.
    #[error("trap with cause {cause:#x} at pc {pc:#x} taken with no trap vector configured")]
    RunawayTrap { cause: u64, pc: u64 },
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrError {
    #[error("unrecognized CSR: {0:#05x}")]
    Unrecognized(CsrSpecifier),
}

/// Result of executing a single instruction. [`Ok`] if execution went normal, [`Err`] if an
/// exception occurred.
pub type ExecutionResult<T = ()> = Result<T, Exception>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    ///
    /// The inner value is the faulting address.
    InstructionAddressMisaligned(u64),
    /// The inner value is the faulting address.
    InstructionAccessFault(u64),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access an unrecognized CSR.
    /// - Attempt to write to a read-only CSR.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    Breakpoint,
    /// The inner value is the faulting address.
    LoadAddressMisaligned(u64),
    /// The inner value is the faulting address.
    LoadAccessFault(u64),
    /// The inner value is the faulting address.
    StoreAddressMisaligned(u64),
    /// The inner value is the faulting address.
    StoreAccessFault(u64),
    EnvironmentCallFromUMode,
    EnvironmentCallFromMMode,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u64 = 1;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u64 = 4;
    pub const LOAD_ACCESS_FAULT: u64 = 5;
    pub const STORE_ADDRESS_MISALIGNED: u64 = 6;
    pub const STORE_ACCESS_FAULT: u64 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u64 = 8;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u64 = 11;

    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreAddressMisaligned(_) => Self::STORE_ADDRESS_MISALIGNED,
            Self::StoreAccessFault(_) => Self::STORE_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    MachineSoftwareInterrupt,
    MachineTimerInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt, without the interrupt bit.
    pub const fn code(&self) -> u64 {
        match self {
            Self::MachineSoftwareInterrupt => 3,
            Self::MachineTimerInterrupt => 7,
            Self::MachineExternalInterrupt => 11,
        }
    }
}

/// Cause of a trap: either a synchronous exception or an interrupt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

use log::trace;

use crate::instruction::{AmoWidth, CsrOp, FenceOrderCombination};
use crate::machine::{csr, CsrSpecifier, Exception, ExecutionResult, Machine};
use crate::memory::MemoryError;
use crate::registers::{Registers, Specifier};
use crate::{Alignment, PrivilegeLevel};

#[derive(Debug)]
pub(super) struct Executor<'m> {
    pub machine: &'m mut Machine,
}

impl<'m> Executor<'m> {
    /// Executes an `addi` instruction.
    ///
    /// Corresponds to the assembly instruction `addi dest src immediate`.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result. ADDI rd, rs1, 0 is used
    /// > to implement the MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// Corresponds to the assembly instruction `slti dest src immediate`.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing slti {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i64) < imm) as u64)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// Corresponds to the assembly instruction `sltiu dest src immediate`.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is
    /// > first sign-extended to XLEN bits then treated as an unsigned number). Note, SLTIU rd,
    /// > rs1, 1 sets rd to 1 if rs1 equals zero, otherwise sets rd to 0 (assembler
    /// > pseudoinstruction SEQZ rd, rs).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing sltiu {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u64)) as u64)
    }

    /// Executes an `andi` instruction.
    ///
    /// Corresponds to the assembly instruction `andi dest src immediate`.
    ///
    /// > ANDI, ORI, XORI are logical operations that perform bitwise AND, OR, and XOR on register
    /// > rs1 and the sign-extended 12-bit immediate and place the result in rd.
    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing andi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u64))
    }

    /// Executes an `ori` instruction.
    ///
    /// Corresponds to the assembly instruction `ori dest src immediate`.
    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing ori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u64))
    }

    /// Executes a `xori` instruction.
    ///
    /// Corresponds to the assembly instruction `xori dest src immediate`.
    ///
    /// > Note, XORI rd, rs1, -1 performs a bitwise logical inversion of register rs1 (assembler
    /// > pseudoinstruction NOT rd, rs).
    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing xori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u64))
    }

    /// Executes an `addiw` instruction.
    ///
    /// Corresponds to the assembly instruction `addiw dest src immediate`.
    ///
    /// > ADDIW is an RV64I instruction that adds the sign-extended 12-bit immediate to register
    /// > rs1 and produces the proper sign-extension of a 32-bit result in rd. Overflows are
    /// > ignored and the result is the low 32 bits of the result sign-extended to 64 bits.
    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addiw {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            s.wrapping_add_signed(imm) as i32 as u64
        })
    }

    /// Executes a `slli` instruction.
    ///
    /// Corresponds to the assembly instruction `slli dest src shift_amount_u6`.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower bits).
    ///
    /// # Panics
    ///
    /// `shift_amount` must fit in a u6 (`0..=63`), otherwise this will panic.
    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    ) -> ExecutionResult {
        trace!("Executing slli {dest} {src} {shift_amount_u6}");
        self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// Corresponds to the assembly instruction `srli dest src shift_amount_u6`.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper bits).
    ///
    /// # Panics
    ///
    /// `shift_amount` must fit in a u6 (`0..=63`), otherwise this will panic.
    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    ) -> ExecutionResult {
        trace!("Executing srli {dest} {src} {shift_amount_u6}");
        self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// Corresponds to the assembly instruction `srai dest src shift_amount_u6`.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated upper
    /// > bits).
    ///
    /// # Panics
    ///
    /// `shift_amount` must fit in a u6 (`0..=63`), otherwise this will panic.
    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    ) -> ExecutionResult {
        trace!("Executing srai {dest} {src} {shift_amount_u6}");
        self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| {
            ((s as i64) >> shamt) as u64
        })
    }

    /// Executes a `slliw` instruction.
    ///
    /// > SLLIW, SRLIW, and SRAIW are RV64I-only instructions that are analogously defined but
    /// > operate on 32-bit values and sign-extend their 32-bit results to 64 bits.
    pub fn slliw(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing slliw {dest} {src} {shift_amount_u5}");
        self.reg_shamt32_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as u32) << shamt) as i32 as u64
        })
    }

    /// Executes a `srliw` instruction. See also [`slliw`](Self::slliw).
    pub fn srliw(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing srliw {dest} {src} {shift_amount_u5}");
        self.reg_shamt32_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as u32) >> shamt) as i32 as u64
        })
    }

    /// Executes a `sraiw` instruction. See also [`slliw`](Self::slliw).
    pub fn sraiw(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing sraiw {dest} {src} {shift_amount_u5}");
        self.reg_shamt32_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u64
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// Corresponds to the assembly instruction `lui dest immediate`.
    ///
    /// > LUI (load upper immediate) uses the same opcode as RV32I. LUI places the 20-bit
    /// > U-immediate into bits 31–12 of register rd and places zero in the lowest 12 bits. The
    /// > 32-bit result is sign-extended to 64 bits.
    pub fn lui(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let registers = &mut self.machine.registers;
        registers.set_x(dest, immediate as u64);
        increment_pc(registers);
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// Corresponds to the assembly instruction `auipc dest immediate`.
    ///
    /// > AUIPC (add upper immediate to pc) uses the same opcode as RV32I. AUIPC is used to build
    /// > pc-relative addresses and uses the U-type format. AUIPC appends 12 low-order zero bits to
    /// > the 20-bit U-immediate, sign-extends the result to 64 bits, adds it to the address of the
    /// > AUIPC instruction, then places the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let registers = &mut self.machine.registers;
        let result = registers.pc().wrapping_add_signed(immediate);
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    /// Executes an `add` instruction.
    ///
    /// > ADD performs the addition of rs1 and rs2.
    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing add {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    /// Executes a `sub` instruction.
    ///
    /// > SUB performs the subtraction of rs2 from rs1.
    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sub {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively, writing 1 to rd if
    /// > rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing slt {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i64) < (s2 as i64)) as u64
        })
    }

    /// Executes a `sltu` instruction.
    ///
    /// > Note, SLTU rd, x0, rs2 sets rd to 1 if rs2 is not equal to zero, otherwise sets rd to
    /// > zero (assembler pseudoinstruction SNEZ rd, rs).
    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sltu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u64)
    }

    /// Executes an `and` instruction.
    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing and {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    /// Executes an `or` instruction.
    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing or {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    /// Executes a `xor` instruction.
    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing xor {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on the
    /// > value in register rs1 by the shift amount held in register rs2. In RV64I, only the low 6
    /// > bits of rs2 are considered for the shift amount.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sll {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x3F))
    }

    /// Executes a `srl` instruction. See also [`sll`](Self::sll).
    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srl {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x3F))
    }

    /// Executes a `sra` instruction. See also [`sll`](Self::sll).
    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sra {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i64) >> (s2 & 0x3F)) as u64
        })
    }

    /// Executes an `addw` instruction.
    ///
    /// > ADDW and SUBW are RV64I-only instructions that are defined analogously to ADD and SUB but
    /// > operate on 32-bit values and produce signed 32-bit results. Overflows are ignored, and
    /// > the low 32-bits of the result is sign-extended to 64-bits and written to the destination
    /// > register.
    pub fn addw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing addw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as u32).wrapping_add(s2 as u32) as i32 as u64
        })
    }

    /// Executes a `subw` instruction. See also [`addw`](Self::addw).
    pub fn subw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing subw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as u32).wrapping_sub(s2 as u32) as i32 as u64
        })
    }

    /// Executes a `sllw` instruction.
    ///
    /// > SLLW, SRLW, and SRAW are RV64I-only instructions that are analogously defined but operate
    /// > on 32-bit values and sign-extend their 32-bit results to 64 bits. The shift amount is
    /// > given by rs2[4:0].
    pub fn sllw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sllw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32) << (s2 & 0x1F)) as i32 as u64
        })
    }

    /// Executes a `srlw` instruction. See also [`sllw`](Self::sllw).
    pub fn srlw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srlw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32) >> (s2 & 0x1F)) as i32 as u64
        })
    }

    /// Executes a `sraw` instruction. See also [`sllw`](Self::sllw).
    pub fn sraw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sraw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u64
        })
    }

    /// Executes a `mul` instruction.
    ///
    /// > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the lower XLEN
    /// > bits in the destination register.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mul {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2))
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits of
    /// > the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and signed rs1×unsigned
    /// > rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulh {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i64 as i128 * s2 as i64 as i128) >> 64) as u64
        })
    }

    /// Executes a `mulhsu` instruction. See also [`mulh`](Self::mulh).
    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhsu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i64 as i128 * s2 as i128) >> 64) as u64
        })
    }

    /// Executes a `mulhu` instruction. See also [`mulh`](Self::mulh).
    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u128 * s2 as u128) >> 64) as u64
        })
    }

    /// Executes a `mulw` instruction.
    ///
    /// > MULW is an RV64 instruction that multiplies the lower 32 bits of the source registers,
    /// > placing the sign-extension of the lower 32 bits of the result into the destination
    /// > register.
    pub fn mulw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as u32).wrapping_mul(s2 as u32) as i32 as u64
        })
    }

    /// Executes a `div` instruction.
    ///
    /// > DIV and DIVU perform an XLEN bits by XLEN bits signed and unsigned integer division of
    /// > rs1 by rs2, rounding towards zero.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by zero
    /// > equals the dividend. Signed division overflow occurs only when the most-negative integer
    /// > is divided by −1. The quotient of a signed division with overflow is equal to the
    /// > dividend, and the remainder is zero. Unsigned division overflow cannot occur.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing div {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 == 0 {
            true => u64::MAX,
            false => (s1 as i64).overflowing_div(s2 as i64).0 as u64,
        })
    }

    /// Executes a `divu` instruction. See also [`div`](Self::div).
    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            s1.checked_div(s2).unwrap_or(u64::MAX)
        })
    }

    /// Executes a `rem` instruction.
    ///
    /// > REM and REMU provide the remainder of the corresponding division operation. For REM, the
    /// > sign of the result equals the sign of the dividend.
    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing rem {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 == 0 {
            true => s1,
            false => (s1 as i64).overflowing_rem(s2 as i64).0 as u64,
        })
    }

    /// Executes a `remu` instruction. See also [`rem`](Self::rem).
    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    /// Executes a `divw` instruction.
    ///
    /// > DIVW and DIVUW are RV64 instructions that divide the lower 32 bits of rs1 by the lower 32
    /// > bits of rs2, treating them as signed and unsigned integers respectively, placing the
    /// > 32-bit quotient in rd, sign-extended to 64 bits.
    pub fn divw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i32 == 0 {
            true => u64::MAX,
            false => (s1 as i32).overflowing_div(s2 as i32).0 as u64,
        })
    }

    /// Executes a `divuw` instruction. See also [`divw`](Self::divw).
    pub fn divuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divuw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as u32).checked_div(s2 as u32).unwrap_or(u32::MAX) as i32 as u64
        })
    }

    /// Executes a `remw` instruction.
    ///
    /// > REMW and REMUW are RV64 instructions that provide the corresponding signed and unsigned
    /// > remainder operations. Both REMW and REMUW always sign-extend the 32-bit result to 64
    /// > bits, including on a divide by zero.
    pub fn remw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i32 == 0 {
            true => s1 as i32 as u64,
            false => (s1 as i32).overflowing_rem(s2 as i32).0 as u64,
        })
    }

    /// Executes a `remuw` instruction. See also [`remw`](Self::remw).
    pub fn remuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remuw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as u32).checked_rem(s2 as u32).unwrap_or(s1 as u32) as i32 as u64
        })
    }

    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers| {
            registers.pc().wrapping_add_signed(offset as i64)
        })
    }

    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset as i64) & !1
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) < (s2 as i64))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) >= (s2 as i64))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lb {dest} {offset}({base})");
        self.load_op(dest, base, offset, 1, |value| value as i8 as u64)
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lbu {dest} {offset}({base})");
        self.load_op(dest, base, offset, 1, |value| value)
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lh {dest} {offset}({base})");
        self.load_op(dest, base, offset, 2, |value| value as i16 as u64)
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lhu {dest} {offset}({base})");
        self.load_op(dest, base, offset, 2, |value| value)
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lw {dest} {offset}({base})");
        self.load_op(dest, base, offset, 4, |value| value as i32 as u64)
    }

    pub fn lwu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lwu {dest} {offset}({base})");
        self.load_op(dest, base, offset, 4, |value| value)
    }

    pub fn ld(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing ld {dest} {offset}({base})");
        self.load_op(dest, base, offset, 8, |value| value)
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sb {src} {offset}({base})");
        self.store_op(src, base, offset, 1)
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sh {src} {offset}({base})");
        self.store_op(src, base, offset, 2)
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sw {src} {offset}({base})");
        self.store_op(src, base, offset, 4)
    }

    pub fn sd(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sd {src} {offset}({base})");
        self.store_op(src, base, offset, 8)
    }

    pub fn lr(&mut self, width: AmoWidth, dest: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing lr {dest}, ({addr})");
        let address = self.machine.registers.x(addr);
        let (size, alignment) = width_of(width);
        if !alignment.is_aligned(address) {
            return Err(Exception::LoadAddressMisaligned(address));
        }
        let value = self
            .machine
            .memory
            .load(address, size)
            .map_err(|err| load_exception(err, address))?;
        let value = match width {
            AmoWidth::Word => value as i32 as u64,
            AmoWidth::Doubleword => value,
        };
        self.machine.reservation = Some(address);
        let registers = &mut self.machine.registers;
        registers.set_x(dest, value);
        increment_pc(registers);
        Ok(())
    }

    pub fn sc(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing sc {dest}, {src}, ({addr})");
        let address = self.machine.registers.x(addr);
        let (size, alignment) = width_of(width);
        if !alignment.is_aligned(address) {
            return Err(Exception::StoreAddressMisaligned(address));
        }
        let success = self.machine.reservation == Some(address);
        if success {
            let value = self.machine.registers.x(src);
            self.machine
                .memory
                .store(address, size, value)
                .map_err(|err| store_exception(err, address))?;
        }
        self.machine.reservation = None;
        let registers = &mut self.machine.registers;
        registers.set_x(dest, !success as u64);
        increment_pc(registers);
        Ok(())
    }

    pub fn amoswap(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amoswap {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |_, reg| reg)
    }

    pub fn amoadd(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amoadd {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem.wrapping_add(reg))
    }

    pub fn amoand(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amoand {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem & reg)
    }

    pub fn amoor(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amoor {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem | reg)
    }

    pub fn amoxor(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amoxor {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem ^ reg)
    }

    pub fn amomax(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amomax {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| {
            (mem as i64).max(reg as i64) as u64
        })
    }

    pub fn amomin(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amomin {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| {
            (mem as i64).min(reg as i64) as u64
        })
    }

    pub fn amomaxu(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amomaxu {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem.max(reg))
    }

    pub fn amominu(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amominu {dest}, {src}, ({addr})");
        self.amo_op(width, dest, src, addr, |mem, reg| mem.min(reg))
    }

    pub fn fence(
        &mut self,
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    ) -> ExecutionResult {
        trace!(predecessor:?, successor:?; "Executing fence");
        // Since only one hart is supported, this is equivalent to a nop instruction.
        let _ = predecessor;
        let _ = successor;
        increment_pc(&mut self.machine.registers);
        Ok(())
    }

    pub fn fence_i(&mut self) -> ExecutionResult {
        trace!("Executing fence.i");
        // No instruction cache to flush.
        increment_pc(&mut self.machine.registers);
        Ok(())
    }

    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        match self.machine.privilege_mode {
            PrivilegeLevel::User => Err(Exception::EnvironmentCallFromUMode),
            PrivilegeLevel::Machine => Err(Exception::EnvironmentCallFromMMode),
        }
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        Err(Exception::Breakpoint)
    }

    /// Executes a `csrrw` instruction.
    ///
    /// Corresponds to the assembly instruction `csrrw dest csr src`.
    ///
    /// > The CSRRW (Atomic Read/Write CSR) instruction atomically swaps values in the CSRs and
    /// > integer registers. CSRRW reads the old value of the CSR, zero-extends the value to XLEN
    /// > bits, then writes it to integer register rd. The initial value in rs1 is written to the
    /// > CSR. If rd=x0, then the instruction shall not read the CSR and shall not cause any of the
    /// > side effects that might occur on a CSR read.
    ///
    /// > Attempts to access a non-existent CSR raise an illegal instruction exception. Attempts to
    /// > access a CSR without appropriate privilege level or to write a read-only register also
    /// > raise illegal instruction exceptions.
    pub fn csrrw(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrw {dest} {csr} {src}");
        self.csr_reg_op(CsrOp::ReadWrite, dest, csr, src)
    }

    /// Executes a `csrrs` instruction.
    ///
    /// Corresponds to the assembly instruction `csrrs dest csr src`.
    ///
    /// > The CSRRS (Atomic Read and Set Bits in CSR) instruction reads the value of the CSR,
    /// > zero-extends the value to XLEN bits, and writes it to integer register rd. The initial
    /// > value in integer register rs1 is treated as a bit mask that specifies bit positions to be
    /// > set in the CSR.
    ///
    /// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR at
    /// > all, and so shall not cause any of the side effects that might otherwise occur on a CSR
    /// > write, such as raising illegal instruction exceptions on accesses to read-only CSRs.
    pub fn csrrs(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrs {dest} {csr} {src}");
        self.csr_reg_op(CsrOp::ReadSet, dest, csr, src)
    }

    /// Executes a `csrrc` instruction.
    ///
    /// Corresponds to the assembly instruction `csrrc dest csr src`.
    ///
    /// > The CSRRC (Atomic Read and Clear Bits in CSR) instruction reads the value of the CSR,
    /// > zero-extends the value to XLEN bits, and writes it to integer register rd. The initial
    /// > value in integer register rs1 is treated as a bit mask that specifies bit positions to be
    /// > cleared in the CSR.
    pub fn csrrc(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrc {dest} {csr} {src}");
        self.csr_reg_op(CsrOp::ReadClear, dest, csr, src)
    }

    /// Executes a `csrrwi` instruction.
    ///
    /// Corresponds to the assembly instruction `csrrwi dest csr immediate`.
    ///
    /// > The CSRRWI, CSRRSI, and CSRRCI variants are similar to CSRRW, CSRRS, and CSRRC
    /// > respectively, except they update the CSR using an XLEN-bit value obtained by
    /// > zero-extending a 5-bit unsigned immediate (uimm[4:0]) field encoded in the rs1 field
    /// > instead of a value from an integer register.
    pub fn csrrwi(&mut self, dest: Specifier, csr: CsrSpecifier, immediate: u64) -> ExecutionResult {
        trace!("Executing csrrwi {dest} {csr} {immediate}");
        self.csr_imm_op(CsrOp::ReadWrite, dest, csr, immediate)
    }

    /// Executes a `csrrsi` instruction. See also [`csrrwi`](Self::csrrwi).
    ///
    /// > For CSRRSI and CSRRCI, if the uimm[4:0] field is zero, then these instructions will not
    /// > write to the CSR, and shall not cause any of the side effects that might otherwise occur
    /// > on a CSR write.
    pub fn csrrsi(&mut self, dest: Specifier, csr: CsrSpecifier, immediate: u64) -> ExecutionResult {
        trace!("Executing csrrsi {dest} {csr} {immediate}");
        self.csr_imm_op(CsrOp::ReadSet, dest, csr, immediate)
    }

    /// Executes a `csrrci` instruction. See also [`csrrsi`](Self::csrrsi).
    pub fn csrrci(&mut self, dest: Specifier, csr: CsrSpecifier, immediate: u64) -> ExecutionResult {
        trace!("Executing csrrci {dest} {csr} {immediate}");
        self.csr_imm_op(CsrOp::ReadClear, dest, csr, immediate)
    }

    /// Executes an `mret` instruction.
    ///
    /// > An MRET or SRET instruction is used to return from a trap in M-mode or S-mode
    /// > respectively. When executing an xRET instruction, supposing xPP holds the value y, xIE is
    /// > set to xPIE; the privilege mode is changed to y; xPIE is set to 1; and xPP is set to the
    /// > least-privileged supported mode (U if U-mode is implemented, else M).
    pub fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        if self.machine.privilege_mode < PrivilegeLevel::Machine {
            return Err(Exception::IllegalInstruction(None));
        }
        let status = &mut self.machine.status;
        let pp = status.mpp();
        // Set MIE to MPIE.
        let mpie = status.mpie();
        status.set_mie(mpie);
        // Set MPIE = 1.
        status.set_mpie(true);
        // Set MPP to the lowest supported privilege level, which is U-mode.
        status.set_mpp(PrivilegeLevel::User);
        // Set the machine's privilege mode to the previous privilege mode.
        self.machine.privilege_mode = pp;
        // Set pc to mepc.
        let mepc = self.machine.trap.read_mepc();
        *self.machine.registers.pc_mut() = mepc;
        Ok(())
    }

    /// Executes a `wfi` instruction.
    ///
    /// Suspends instruction fetch until an interrupt becomes pending; the engine returns to the
    /// host instead of spinning. The optional host hook runs before fetch is suspended so the host
    /// can drive an interrupt source.
    pub fn wfi(&mut self) -> ExecutionResult {
        trace!("Executing wfi");
        self.machine.wfi = true;
        if let Some(hook) = self.machine.wfi_hook.clone() {
            hook(self.machine);
        }
        increment_pc(&mut self.machine.registers);
        Ok(())
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64, i64) -> u64,
    {
        let registers = &mut self.machine.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers);
        Ok(())
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64, u32) -> u64,
    {
        if shift_amount_u6 > 63 {
            panic!("out of range u6 used");
        }
        let registers = &mut self.machine.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u6));
        increment_pc(registers);
        Ok(())
    }

    fn reg_shamt32_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64, u32) -> u64,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let registers = &mut self.machine.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        increment_pc(registers);
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64, u64) -> u64,
    {
        let registers = &mut self.machine.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers);
        Ok(())
    }

    /// First argument of `op` is the value from memory, the second the value of `src`.
    ///
    /// For `.W` width both operands are canonicalized by sign-extending their low word, which
    /// preserves both the signed and the unsigned 32-bit orderings, so the same 64-bit combiner
    /// works for both widths. The store truncates back to the access size.
    fn amo_op<F>(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64, u64) -> u64,
    {
        let address = self.machine.registers.x(addr);
        let (size, alignment) = width_of(width);
        if !alignment.is_aligned(address) {
            return Err(Exception::LoadAddressMisaligned(address));
        }
        let mem_value = self
            .machine
            .memory
            .load(address, size)
            .map_err(|err| load_exception(err, address))?;
        let src_value = self.machine.registers.x(src);
        let (mem_value, src_value) = match width {
            AmoWidth::Word => (mem_value as i32 as u64, src_value as i32 as u64),
            AmoWidth::Doubleword => (mem_value, src_value),
        };
        let new_value = op(mem_value, src_value);
        self.machine
            .memory
            .store(address, size, new_value)
            .map_err(|err| store_exception(err, address))?;
        // Any AMO invalidates an outstanding reservation.
        self.machine.reservation = None;
        let registers = &mut self.machine.registers;
        registers.set_x(dest, mem_value);
        increment_pc(registers);
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u64,
    {
        let registers = &mut self.machine.registers;
        // Compute target pc
        let new_pc = compute_target(registers);
        // Check target pc is word-aligned
        if !Alignment::WORD.is_aligned(new_pc) {
            return Err(Exception::InstructionAddressMisaligned(new_pc));
        }
        // Update pc to target
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write incremented old pc to `dest` register
        registers.set_x(dest, old_pc.wrapping_add(4));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u64, u64) -> bool,
    {
        let registers = &mut self.machine.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset as i64);
            // Check target pc is word-aligned
            if !Alignment::WORD.is_aligned(new_pc) {
                return Err(Exception::InstructionAddressMisaligned(new_pc));
            }
            *registers.pc_mut() = new_pc;
        } else {
            increment_pc(registers);
        }
        Ok(())
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        size: u64,
        extend: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u64) -> u64,
    {
        let address = self.machine.registers.x(base).wrapping_add_signed(offset as i64);
        let value = self
            .machine
            .memory
            .load(address, size)
            .map_err(|err| load_exception(err, address))?;
        let registers = &mut self.machine.registers;
        registers.set_x(dest, extend(value));
        increment_pc(registers);
        Ok(())
    }

    fn store_op(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i32,
        size: u64,
    ) -> ExecutionResult {
        let registers = &self.machine.registers;
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset as i64);
        self.machine
            .memory
            .store(address, size, value)
            .map_err(|err| store_exception(err, address))?;
        increment_pc(&mut self.machine.registers);
        Ok(())
    }

    fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || src != Specifier::X0)
                .then(|| self.machine.registers.x(src)),
        )
    }

    fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u64,
    ) -> ExecutionResult {
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate),
        )
    }

    /// `src_value` is `Some` iff the instruction performs a write to the CSR.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u64>,
    ) -> ExecutionResult {
        // Writes to the read-only quarter of the CSR space (top two specifier bits `0b11`) raise
        // illegal-instruction, even for CSRs whose writes would otherwise be ignored.
        if src_value.is_some() && csr::is_read_only(csr) {
            return Err(Exception::IllegalInstruction(None));
        }
        if op != CsrOp::ReadWrite || dest != Specifier::X0 {
            let old_value = self
                .machine
                .read_csr(csr)
                .map_err(|_| Exception::IllegalInstruction(None))?;
            self.machine.registers.set_x(dest, old_value);
        };
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, u64::MAX),
                CsrOp::ReadSet => (u64::MAX, src_value),
                CsrOp::ReadClear => (0, src_value),
            };
            self.machine
                .write_csr(csr, value, mask)
                .map_err(|_| Exception::IllegalInstruction(None))?;
        }
        increment_pc(&mut self.machine.registers);
        Ok(())
    }
}

fn width_of(width: AmoWidth) -> (u64, Alignment) {
    match width {
        AmoWidth::Word => (4, Alignment::WORD),
        AmoWidth::Doubleword => (8, Alignment::DOUBLEWORD),
    }
}

fn load_exception(err: MemoryError, address: u64) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned(address),
        MemoryError::AccessFault => Exception::LoadAccessFault(address),
    }
}

fn store_exception(err: MemoryError, address: u64) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::StoreAddressMisaligned(address),
        MemoryError::AccessFault => Exception::StoreAccessFault(address),
    }
}

fn increment_pc(registers: &mut Registers) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(4);
}

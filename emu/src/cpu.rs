use std::cmp::Ordering;

use thiserror::Error;

use arch::inst::{DecodeError, Inst, Nixbpe};
use arch::op::Opcode;
use arch::reg::Reg;
use arch::word::{f48_to_f64, f64_to_f48, from_i24, sign_extend_12, to_i24, WORD_MASK};

use crate::hooks::Device;
use crate::memory::{Memory, MemoryError};
use crate::regs::{RegisterError, RegisterFile};

/// Engine lifecycle. `Halted` and `Faulted` are terminal until `reset` or
/// a new program is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuState {
    #[default]
    Idle,
    Ready,
    Running,
    Halted,
    Faulted,
}

/// Reasons the engine parks itself in `Faulted`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("register field {0} is not a valid register")]
    BadRegisterField(u8),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("store to an immediate operand")]
    StoreToImmediate,

    #[error("division by zero")]
    DivideByZero,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("no program loaded")]
    NoProgram,

    #[error("execution fault: {0}")]
    Fault(Fault),
}

/// The control unit: fetch-decode-execute over Memory and its own
/// RegisterFile, appending one trace record per completed instruction.
#[derive(Debug, Default)]
pub struct ControlUnit {
    state: CpuState,
    regs: RegisterFile,
    fault: Option<Fault>,
    trace: Vec<String>,
    steps: u64,
}

impl ControlUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// Last fault, kept for inspection after the engine parks.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Points the engine at a loaded program: registers cleared, PC set,
    /// state Ready. Memory is left to the loader.
    pub fn prepare(&mut self, start_address: u32) {
        self.regs.clear();
        self.regs.set_pc(start_address);
        self.fault = None;
        self.trace.clear();
        self.steps = 0;
        self.state = CpuState::Ready;
    }

    /// Back to Idle: clears registers and trace, keeps Memory contents.
    pub fn reset(&mut self) {
        self.regs.clear();
        self.fault = None;
        self.trace.clear();
        self.steps = 0;
        self.state = CpuState::Idle;
    }

    /// Executes one instruction. Valid in Ready/Running; a halted or
    /// faulted engine stays put (stepping past HLT is a no-op), an idle
    /// one reports `NoProgram`.
    pub fn step(&mut self, mem: &mut Memory, dev: &mut dyn Device) -> Result<CpuState, CpuError> {
        match self.state {
            CpuState::Idle => return Err(CpuError::NoProgram),
            CpuState::Halted | CpuState::Faulted => return Ok(self.state),
            CpuState::Ready | CpuState::Running => {}
        }
        match self.exec_one(mem, dev) {
            Ok(halted) => {
                self.state = if halted { CpuState::Halted } else { CpuState::Running };
                Ok(self.state)
            }
            Err(fault) => {
                self.state = CpuState::Faulted;
                self.fault = Some(fault.clone());
                Err(CpuError::Fault(fault))
            }
        }
    }

    fn exec_one(&mut self, mem: &mut Memory, dev: &mut dyn Device) -> Result<bool, Fault> {
        let pc = self.regs.pc();

        // Fetch up to four bytes; the first must exist, the rest are
        // best-effort and the decoder reports truncation.
        let mut buf = [0u8; 4];
        buf[0] = mem.read_byte(pc)?;
        let mut have = 1;
        while have < 4 {
            match mem.read_byte(pc + have as u32) {
                Ok(byte) => {
                    buf[have] = byte;
                    have += 1;
                }
                Err(_) => break,
            }
        }
        let (inst, len) = Inst::decode(&buf[..have])?;

        // Displacements are relative to the next instruction.
        self.regs.set_pc((pc + len as u32) & WORD_MASK);

        let halted = match inst {
            Inst::Fmt1(op) => self.exec_fmt1(op)?,
            Inst::Fmt2(op, r1, r2) => {
                self.exec_fmt2(op, r1, r2)?;
                false
            }
            Inst::Fmt34 { op, flags, disp } => {
                self.exec_mem(mem, dev, op, flags, disp)?;
                false
            }
        };

        self.steps += 1;
        self.trace.push(format!("[{:0>5}] {:06X}  {}", self.steps, pc, inst));
        Ok(halted)
    }

    fn exec_fmt1(&mut self, op: Opcode) -> Result<bool, Fault> {
        match op {
            Opcode::HLT => return Ok(true),
            Opcode::FLOAT => {
                let a = self.regs.get(Reg::A)?;
                self.regs.set_f(f64_to_f48(a as f64));
            }
            Opcode::FIX => {
                let value = f48_to_f64(self.regs.get_f()).trunc();
                self.regs.set(Reg::A, wrap24(value as i64))?;
            }
            _ => unreachable!("non-format-1 opcode dispatched as format 1"),
        }
        Ok(false)
    }

    fn exec_fmt2(&mut self, op: Opcode, r1: u8, r2: u8) -> Result<(), Fault> {
        let reg1 = reg_field(r1)?;
        match op {
            Opcode::CLEAR => self.regs.set(reg1, 0)?,
            Opcode::TIXR => {
                let x = self.regs.get(Reg::X)?.wrapping_add(1);
                self.regs.set(Reg::X, x)?;
                let x = self.regs.get(Reg::X)?;
                let against = self.regs.get(reg1)?;
                self.regs.set_cc(x.cmp(&against));
            }
            Opcode::SHIFTL => {
                let n = r2 as u32 + 1;
                let v = from_i24(self.regs.get(reg1)?);
                let shifted = ((v << n) | (v >> (24 - n))) & WORD_MASK;
                self.regs.set(reg1, to_i24(shifted))?;
            }
            Opcode::SHIFTR => {
                let n = r2 as u32 + 1;
                let v = self.regs.get(reg1)?;
                self.regs.set(reg1, v >> n)?;
            }
            Opcode::RMO => {
                let reg2 = reg_field(r2)?;
                let v = self.regs.get(reg1)?;
                self.regs.set(reg2, v)?;
            }
            Opcode::COMPR => {
                let reg2 = reg_field(r2)?;
                let a = self.regs.get(reg1)?;
                let b = self.regs.get(reg2)?;
                self.regs.set_cc(a.cmp(&b));
            }
            Opcode::ADDR | Opcode::SUBR | Opcode::MULR | Opcode::DIVR => {
                let reg2 = reg_field(r2)?;
                let a = self.regs.get(reg2)? as i64;
                let b = self.regs.get(reg1)? as i64;
                let result = match op {
                    Opcode::ADDR => a + b,
                    Opcode::SUBR => a - b,
                    Opcode::MULR => a * b,
                    Opcode::DIVR => {
                        if b == 0 {
                            return Err(Fault::DivideByZero);
                        }
                        a / b
                    }
                    _ => unreachable!(),
                };
                self.regs.set(reg2, wrap24(result))?;
            }
            _ => unreachable!("non-format-2 opcode dispatched as format 2"),
        }
        Ok(())
    }

    fn exec_mem(
        &mut self,
        mem: &mut Memory,
        dev: &mut dyn Device,
        op: Opcode,
        flags: Nixbpe,
        disp: u32,
    ) -> Result<(), Fault> {
        let ta = self.target_address(flags, disp)?;

        match op {
            Opcode::LDA => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::A, v)?;
            }
            Opcode::LDX => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::X, v)?;
            }
            Opcode::LDL => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::L, v)?;
            }
            Opcode::LDB => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::B, v)?;
            }
            Opcode::LDS => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::S, v)?;
            }
            Opcode::LDT => {
                let v = self.word_operand(mem, flags, ta)?;
                self.regs.set(Reg::T, v)?;
            }
            Opcode::LDCH => {
                let byte = self.byte_operand(mem, flags, ta)?;
                let a = self.regs.get(Reg::A)?;
                self.regs.set(Reg::A, (a & !0xFF) | byte as i32)?;
            }
            Opcode::LDF => {
                let addr = self.operand_address(mem, flags, ta)?;
                let f = mem.read_f48(addr)?;
                self.regs.set_f(f);
            }
            Opcode::STA => self.store_word(mem, flags, ta, Reg::A)?,
            Opcode::STX => self.store_word(mem, flags, ta, Reg::X)?,
            Opcode::STL => self.store_word(mem, flags, ta, Reg::L)?,
            Opcode::STB => self.store_word(mem, flags, ta, Reg::B)?,
            Opcode::STS => self.store_word(mem, flags, ta, Reg::S)?,
            Opcode::STT => self.store_word(mem, flags, ta, Reg::T)?,
            Opcode::STSW => self.store_word(mem, flags, ta, Reg::SW)?,
            Opcode::STCH => {
                let addr = self.store_address(mem, flags, ta)?;
                let a = self.regs.get(Reg::A)?;
                mem.write_byte(addr, a as u8)?;
            }
            Opcode::STF => {
                let addr = self.store_address(mem, flags, ta)?;
                mem.write_f48(addr, self.regs.get_f())?;
            }
            Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV => {
                let m = self.word_operand(mem, flags, ta)? as i64;
                let a = self.regs.get(Reg::A)? as i64;
                let result = match op {
                    Opcode::ADD => a + m,
                    Opcode::SUB => a - m,
                    Opcode::MUL => a * m,
                    Opcode::DIV => {
                        if m == 0 {
                            return Err(Fault::DivideByZero);
                        }
                        a / m
                    }
                    _ => unreachable!(),
                };
                self.regs.set(Reg::A, wrap24(result))?;
            }
            Opcode::AND | Opcode::OR => {
                let m = self.word_operand(mem, flags, ta)?;
                let a = self.regs.get(Reg::A)?;
                let result = if op == Opcode::AND { a & m } else { a | m };
                self.regs.set(Reg::A, result)?;
            }
            Opcode::COMP => {
                let m = self.word_operand(mem, flags, ta)?;
                let a = self.regs.get(Reg::A)?;
                self.regs.set_cc(a.cmp(&m));
            }
            Opcode::TIX => {
                let x = self.regs.get(Reg::X)?.wrapping_add(1);
                self.regs.set(Reg::X, x)?;
                let x = self.regs.get(Reg::X)?;
                let m = self.word_operand(mem, flags, ta)?;
                self.regs.set_cc(x.cmp(&m));
            }
            Opcode::J => {
                let target = self.operand_address(mem, flags, ta)?;
                self.regs.set_pc(target);
            }
            Opcode::JEQ | Opcode::JGT | Opcode::JLT => {
                let wanted = match op {
                    Opcode::JEQ => Ordering::Equal,
                    Opcode::JGT => Ordering::Greater,
                    _ => Ordering::Less,
                };
                let target = self.operand_address(mem, flags, ta)?;
                if self.regs.cc() == wanted {
                    self.regs.set_pc(target);
                }
            }
            Opcode::JSUB => {
                let target = self.operand_address(mem, flags, ta)?;
                let next = self.regs.pc();
                self.regs.set(Reg::L, to_i24(next))?;
                self.regs.set_pc(target);
            }
            Opcode::RSUB => {
                let l = from_i24(self.regs.get(Reg::L)?);
                self.regs.set_pc(l);
            }
            Opcode::TD => {
                let id = self.byte_operand(mem, flags, ta)?;
                let cc = if dev.test(id) { Ordering::Less } else { Ordering::Equal };
                self.regs.set_cc(cc);
            }
            Opcode::RD => {
                let id = self.byte_operand(mem, flags, ta)?;
                let byte = dev.read(id);
                let a = self.regs.get(Reg::A)?;
                self.regs.set(Reg::A, (a & !0xFF) | byte as i32)?;
            }
            Opcode::WD => {
                let id = self.byte_operand(mem, flags, ta)?;
                let a = self.regs.get(Reg::A)?;
                dev.write(id, a as u8);
            }
            _ => unreachable!("non-memory opcode dispatched as format 3/4"),
        }
        Ok(())
    }

    /// Computes the target address from the decoded flags. Addresses wrap
    /// within the 24-bit address space; memory bounds are enforced at the
    /// access itself.
    fn target_address(&self, flags: Nixbpe, disp: u32) -> Result<u32, Fault> {
        let mut ta: i64 = if flags.is_sic() {
            disp as i64 // 15-bit direct
        } else if flags.e {
            disp as i64 // 20-bit absolute
        } else if flags.p {
            self.regs.pc() as i64 + sign_extend_12(disp) as i64
        } else if flags.b {
            from_i24(self.regs.get(Reg::B)?) as i64 + disp as i64
        } else {
            disp as i64 // 12-bit direct
        };
        if flags.x {
            ta += self.regs.get(Reg::X)? as i64;
        }
        Ok((ta as u32) & WORD_MASK)
    }

    /// The memory address an operand refers to; immediate operands have
    /// none for stores, and for jumps the target IS the computed address.
    fn operand_address(&self, mem: &Memory, flags: Nixbpe, ta: u32) -> Result<u32, Fault> {
        if flags.is_immediate() {
            Ok(ta)
        } else if flags.is_indirect() {
            Ok(mem.read_word(ta)?)
        } else {
            Ok(ta)
        }
    }

    fn word_operand(&self, mem: &Memory, flags: Nixbpe, ta: u32) -> Result<i32, Fault> {
        if flags.is_immediate() {
            return Ok(to_i24(ta));
        }
        let addr = self.operand_address(mem, flags, ta)?;
        Ok(to_i24(mem.read_word(addr)?))
    }

    fn byte_operand(&self, mem: &Memory, flags: Nixbpe, ta: u32) -> Result<u8, Fault> {
        if flags.is_immediate() {
            return Ok(ta as u8);
        }
        let addr = self.operand_address(mem, flags, ta)?;
        Ok(mem.read_byte(addr)?)
    }

    fn store_address(&self, mem: &Memory, flags: Nixbpe, ta: u32) -> Result<u32, Fault> {
        if flags.is_immediate() {
            return Err(Fault::StoreToImmediate);
        }
        self.operand_address(mem, flags, ta)
    }

    fn store_word(
        &mut self,
        mem: &mut Memory,
        flags: Nixbpe,
        ta: u32,
        reg: Reg,
    ) -> Result<(), Fault> {
        let addr = self.store_address(mem, flags, ta)?;
        let value = from_i24(self.regs.get(reg)?);
        mem.write_word(addr, value)?;
        Ok(())
    }
}

fn reg_field(nibble: u8) -> Result<Reg, Fault> {
    Reg::try_from(nibble).map_err(|_| Fault::BadRegisterField(nibble))
}

/// Truncates a 64-bit intermediate to the 24-bit two's-complement result
/// register width.
fn wrap24(value: i64) -> i32 {
    to_i24((value as u32) & WORD_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullDevice;

    fn machine_with(code: &[u8]) -> (ControlUnit, Memory, NullDevice) {
        let mut mem = Memory::new(256);
        mem.write_slice(0, code).unwrap();
        let mut cpu = ControlUnit::new();
        cpu.prepare(0);
        (cpu, mem, NullDevice)
    }

    #[test]
    fn step_requires_a_program() {
        let mut cpu = ControlUnit::new();
        let mut mem = Memory::new(16);
        assert_eq!(cpu.step(&mut mem, &mut NullDevice), Err(CpuError::NoProgram));
    }

    #[test]
    fn lda_immediate_advances_pc() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[0x01, 0x00, 0x05]);
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Running));
        assert_eq!(cpu.registers().get(Reg::A), Ok(5));
        assert_eq!(cpu.registers().pc(), 3);
    }

    #[test]
    fn halt_is_terminal_and_sticky() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[0xFC]);
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Halted));
        let pc = cpu.registers().pc();
        // Stepping past halt is a no-op.
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Halted));
        assert_eq!(cpu.registers().pc(), pc);
        assert_eq!(cpu.trace().len(), 1);
    }

    #[test]
    fn illegal_opcode_faults() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[0xFB, 0x00]);
        let result = cpu.step(&mut mem, &mut dev);
        assert!(matches!(result, Err(CpuError::Fault(Fault::Decode(_)))));
        assert_eq!(cpu.state(), CpuState::Faulted);
        assert!(cpu.fault().is_some());
        // Faulted is sticky; the engine never silently continues.
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Faulted));
    }

    #[test]
    fn arithmetic_and_compare() {
        // LDA #40; ADD #2; COMP #42; JEQ done(pc-rel); LDA #0; done: HLT
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x01, 0x00, 0x28, // LDA #40
            0x19, 0x00, 0x02, // ADD #2
            0x29, 0x00, 0x2A, // COMP #42
            0x33, 0x20, 0x03, // JEQ +3
            0x01, 0x00, 0x00, // LDA #0 (skipped)
            0xFC, // HLT
        ]);
        for _ in 0..4 {
            cpu.step(&mut mem, &mut dev).unwrap();
        }
        assert_eq!(cpu.registers().pc(), 15);
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Halted));
        assert_eq!(cpu.registers().get(Reg::A), Ok(42));
    }

    #[test]
    fn store_and_indirect_load() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x01, 0x00, 0x63, // LDA #0x63
            0x0F, 0x00, 0x80, // STA 0x080 (direct)
            0x02, 0x00, 0x80, // LDA @0x080 -> m[m[0x80]] = m[0x63]
            0xFC,
        ]);
        mem.write_word(0x63, 0x001234).unwrap();
        for _ in 0..3 {
            cpu.step(&mut mem, &mut dev).unwrap();
        }
        assert_eq!(cpu.registers().get(Reg::A), Ok(0x1234));
    }

    #[test]
    fn jsub_rsub_round_trip() {
        // JSUB 0x06 (direct); HLT; sub: LDA #7; RSUB
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x4B, 0x10, 0x00, 0x06, // +JSUB 0x06
            0xFC, // HLT at 4
            0x00, // padding
            0x01, 0x00, 0x07, // LDA #7 at 6
            0x4F, 0x00, 0x00, // RSUB
        ]);
        cpu.step(&mut mem, &mut dev).unwrap();
        assert_eq!(cpu.registers().pc(), 6);
        assert_eq!(cpu.registers().get(Reg::L), Ok(4));
        cpu.step(&mut mem, &mut dev).unwrap();
        cpu.step(&mut mem, &mut dev).unwrap();
        assert_eq!(cpu.registers().pc(), 4);
        assert_eq!(cpu.step(&mut mem, &mut dev), Ok(CpuState::Halted));
        assert_eq!(cpu.registers().get(Reg::A), Ok(7));
    }

    #[test]
    fn format2_register_ops() {
        // CLEAR X; TIXR X?? -- use: LDA #5; RMO A,S; ADDR S,A => A = 10
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x01, 0x00, 0x05, // LDA #5
            0xAC, 0x04, // RMO A,S
            0x90, 0x40, // ADDR S,A
            0xA4, 0x01, // SHIFTL A,2
            0xFC,
        ]);
        for _ in 0..4 {
            cpu.step(&mut mem, &mut dev).unwrap();
        }
        assert_eq!(cpu.registers().get(Reg::A), Ok(40)); // (5+5) << 2
        assert_eq!(cpu.registers().get(Reg::S), Ok(5));
    }

    #[test]
    fn float_fix_round_trip() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x01, 0x00, 0x2A, // LDA #42
            0xC0, // FLOAT
            0x01, 0x00, 0x00, // LDA #0
            0xC4, // FIX
            0xFC,
        ]);
        for _ in 0..4 {
            cpu.step(&mut mem, &mut dev).unwrap();
        }
        assert_eq!(cpu.registers().get(Reg::A), Ok(42));
    }

    #[test]
    fn division_by_zero_faults() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x01, 0x00, 0x01, // LDA #1
            0x25, 0x00, 0x00, // DIV #0
        ]);
        cpu.step(&mut mem, &mut dev).unwrap();
        assert_eq!(
            cpu.step(&mut mem, &mut dev),
            Err(CpuError::Fault(Fault::DivideByZero))
        );
        assert_eq!(cpu.state(), CpuState::Faulted);
    }

    #[test]
    fn memory_fault_parks_engine() {
        // STA to an address beyond the 256-byte memory.
        let (mut cpu, mut mem, mut dev) = machine_with(&[
            0x0F, 0x11, 0x02, 0x00, // +STA 0x10200
        ]);
        assert!(matches!(
            cpu.step(&mut mem, &mut dev),
            Err(CpuError::Fault(Fault::Memory(_)))
        ));
        assert_eq!(cpu.state(), CpuState::Faulted);
    }

    #[test]
    fn reset_returns_to_idle_and_keeps_memory() {
        let (mut cpu, mut mem, mut dev) = machine_with(&[0xFC]);
        mem.write_byte(100, 0x77).unwrap();
        cpu.step(&mut mem, &mut dev).unwrap();
        cpu.reset();
        assert_eq!(cpu.state(), CpuState::Idle);
        assert!(cpu.trace().is_empty());
        assert_eq!(mem.read_byte(100), Ok(0x77));
    }
}

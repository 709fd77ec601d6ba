use std::cmp::Ordering;

use thiserror::Error;

use arch::reg::Reg;
use arch::word::{from_i24, to_i24, F48_MASK};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("unknown register `{0}`")]
    Unknown(String),

    #[error("register F has no integer view")]
    NotIntegerView,
}

/// Condition code kept in the status word, bits 6..7 style: 0x00 less,
/// 0x40 equal, 0x80 greater.
const CC_LT: i32 = 0x00;
const CC_EQ: i32 = 0x40;
const CC_GT: i32 = 0x80;

/// The register file. Integer registers hold 24-bit two's-complement
/// values (stored sign-extended); the floating accumulator F is a separate
/// 48-bit store and is never aliased with the integer bank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    a: i32,
    x: i32,
    l: i32,
    b: i32,
    s: i32,
    t: i32,
    pc: i32,
    sw: i32,
    f: u64,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Integer view. Fails for F, which only exposes the wide view.
    pub fn get(&self, reg: Reg) -> Result<i32, RegisterError> {
        match reg {
            Reg::A => Ok(self.a),
            Reg::X => Ok(self.x),
            Reg::L => Ok(self.l),
            Reg::B => Ok(self.b),
            Reg::S => Ok(self.s),
            Reg::T => Ok(self.t),
            Reg::PC => Ok(self.pc),
            Reg::SW => Ok(self.sw),
            Reg::F => Err(RegisterError::NotIntegerView),
        }
    }

    pub fn set(&mut self, reg: Reg, value: i32) -> Result<(), RegisterError> {
        let value = to_i24(from_i24(value));
        let slot = match reg {
            Reg::A => &mut self.a,
            Reg::X => &mut self.x,
            Reg::L => &mut self.l,
            Reg::B => &mut self.b,
            Reg::S => &mut self.s,
            Reg::T => &mut self.t,
            Reg::PC => &mut self.pc,
            Reg::SW => &mut self.sw,
            Reg::F => return Err(RegisterError::NotIntegerView),
        };
        *slot = value;
        Ok(())
    }

    /// Lookup by register name, for drivers and the presentation layer.
    pub fn get_by_name(&self, name: &str) -> Result<i32, RegisterError> {
        let reg = Reg::parse(name).map_err(|_| RegisterError::Unknown(name.to_string()))?;
        self.get(reg)
    }

    pub fn set_by_name(&mut self, name: &str, value: i32) -> Result<(), RegisterError> {
        let reg = Reg::parse(name).map_err(|_| RegisterError::Unknown(name.to_string()))?;
        self.set(reg, value)
    }

    /// Wide 48-bit view of the floating accumulator.
    pub fn get_f(&self) -> u64 {
        self.f
    }

    pub fn set_f(&mut self, value: u64) {
        self.f = value & F48_MASK;
    }

    pub fn pc(&self) -> u32 {
        from_i24(self.pc)
    }

    pub fn set_pc(&mut self, addr: u32) {
        self.pc = to_i24(addr);
    }

    pub fn cc(&self) -> Ordering {
        match self.sw & 0xC0 {
            CC_EQ => Ordering::Equal,
            CC_GT => Ordering::Greater,
            _ => Ordering::Less,
        }
    }

    pub fn set_cc(&mut self, ordering: Ordering) {
        let bits = match ordering {
            Ordering::Less => CC_LT,
            Ordering::Equal => CC_EQ,
            Ordering::Greater => CC_GT,
        };
        self.sw = (self.sw & !0xC0) | bits;
    }

    /// `(name, formatted value)` pairs; F renders as 12 hex digits, the
    /// integer registers as 6.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        Reg::all()
            .into_iter()
            .map(|reg| {
                let value = if reg.is_wide() {
                    format!("{:012X}", self.f)
                } else {
                    format!("{:06X}", from_i24(self.get(reg).unwrap_or(0)))
                };
                (reg.to_string(), value)
            })
            .collect()
    }
}

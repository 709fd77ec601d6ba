use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Instruction encoding lengths. Format 3 and 4 share an opcode space; the
/// `e` flag in the encoded instruction picks between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    One,
    Two,
    ThreeFour,
}

/// Operation codes with their architectural byte values. The low two bits
/// of the first instruction byte carry the `n`/`i` addressing flags, so
/// every opcode value is a multiple of 4.
///
/// HLT (0xFC) is this machine's explicit halt; the value is unassigned in
/// the standard opcode table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
pub enum Opcode {
    LDA = 0x00,
    LDX = 0x04,
    LDL = 0x08,
    STA = 0x0C,
    STX = 0x10,
    STL = 0x14,
    ADD = 0x18,
    SUB = 0x1C,
    MUL = 0x20,
    DIV = 0x24,
    COMP = 0x28,
    TIX = 0x2C,
    JEQ = 0x30,
    JGT = 0x34,
    JLT = 0x38,
    J = 0x3C,
    AND = 0x40,
    OR = 0x44,
    JSUB = 0x48,
    RSUB = 0x4C,
    LDCH = 0x50,
    STCH = 0x54,
    LDB = 0x68,
    LDS = 0x6C,
    LDF = 0x70,
    LDT = 0x74,
    STB = 0x78,
    STS = 0x7C,
    STF = 0x80,
    STT = 0x84,
    ADDR = 0x90,
    SUBR = 0x94,
    MULR = 0x98,
    DIVR = 0x9C,
    COMPR = 0xA0,
    SHIFTL = 0xA4,
    SHIFTR = 0xA8,
    RMO = 0xAC,
    CLEAR = 0xB4,
    TIXR = 0xB8,
    FLOAT = 0xC0,
    FIX = 0xC4,
    RD = 0xD8,
    WD = 0xDC,
    TD = 0xE0,
    STSW = 0xE8,
    HLT = 0xFC,
}

impl Opcode {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_ascii_uppercase().parse::<Self>() {
            Ok(op) => Ok(op),
            Err(_) => Err(format!("Unknown mnemonic: {s}")),
        }
    }

    pub fn format(self) -> Format {
        use Opcode::*;
        match self {
            FLOAT | FIX | HLT => Format::One,
            ADDR | SUBR | MULR | DIVR | COMPR | SHIFTL | SHIFTR | RMO | CLEAR | TIXR => Format::Two,
            _ => Format::ThreeFour,
        }
    }

    /// RSUB is the only memory-format instruction that takes no operand.
    pub fn takes_operand(self) -> bool {
        !matches!(self.format(), Format::One) && self != Opcode::RSUB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mnemonics() {
        assert_eq!(Opcode::parse("lda"), Ok(Opcode::LDA));
        assert_eq!(Opcode::parse("Shiftl"), Ok(Opcode::SHIFTL));
        assert!(Opcode::parse("hoge").is_err());
    }

    #[test]
    fn byte_values() {
        assert_eq!(u8::from(Opcode::JSUB), 0x48);
        assert_eq!(Opcode::try_from(0x3Cu8), Ok(Opcode::J));
        assert!(Opcode::try_from(0x58u8).is_err()); // not in the subset
    }

    #[test]
    fn formats() {
        assert_eq!(Opcode::HLT.format(), Format::One);
        assert_eq!(Opcode::CLEAR.format(), Format::Two);
        assert_eq!(Opcode::LDA.format(), Format::ThreeFour);
        assert!(!Opcode::RSUB.takes_operand());
        assert!(Opcode::STA.takes_operand());
    }
}

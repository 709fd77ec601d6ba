use std::fmt::{self, Display, Formatter};

use color_print::cformat;
use thiserror::Error;

use crate::op::{Format, Opcode};
use crate::reg::Reg;
use crate::word::sign_extend_12;

/// Addressing flags of a format-3/4 instruction. `n`/`i` select simple,
/// immediate, indirect or SIC-legacy addressing; `x` adds the index
/// register; `b`/`p` select base- or PC-relative displacement; `e` selects
/// the 4-byte extended format with a 20-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Nixbpe {
    pub n: bool,
    pub i: bool,
    pub x: bool,
    pub b: bool,
    pub p: bool,
    pub e: bool,
}

impl Nixbpe {
    pub fn simple() -> Self {
        Nixbpe { n: true, i: true, ..Default::default() }
    }

    pub fn immediate() -> Self {
        Nixbpe { n: false, i: true, ..Default::default() }
    }

    pub fn indirect() -> Self {
        Nixbpe { n: true, i: false, ..Default::default() }
    }

    pub fn is_immediate(&self) -> bool {
        !self.n && self.i
    }

    pub fn is_indirect(&self) -> bool {
        self.n && !self.i
    }

    /// Both `n` and `i` clear: the 15-bit direct addressing of the
    /// original SIC, kept for backward compatibility.
    pub fn is_sic(&self) -> bool {
        !self.n && !self.i
    }

    fn check(&self) -> Result<(), DecodeError> {
        let bad = (self.b && self.p)
            || (self.e && (self.b || self.p))
            || (self.x && (self.is_immediate() || self.is_indirect()))
            || (self.is_sic() && (self.b || self.p || self.e));
        if bad {
            Err(DecodeError::InvalidAddressing(*self))
        } else {
            Ok(())
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("illegal opcode byte 0x{0:02X}")]
    IllegalOpcode(u8),

    #[error("truncated instruction: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("invalid addressing flags: {0:?}")]
    InvalidAddressing(Nixbpe),
}

/// A decoded instruction. The closed set of (format, flags) shapes lives
/// here so that both the assembler and the control unit dispatch by
/// exhaustive match instead of flag arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Fmt1(Opcode),
    /// Raw register-field nibbles; SHIFTL/SHIFTR carry `count - 1` in the
    /// second field, so interpretation is left to the consumer.
    Fmt2(Opcode, u8, u8),
    /// Format 3 (12-bit displacement), format 4 (`e`, 20-bit address), or
    /// SIC-legacy (n=i=0, 15-bit address).
    Fmt34 { op: Opcode, flags: Nixbpe, disp: u32 },
}

impl Inst {
    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Inst::Fmt1(_) => 1,
            Inst::Fmt2(..) => 2,
            Inst::Fmt34 { flags, .. } => {
                if flags.e {
                    4
                } else {
                    3
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match *self {
            Inst::Fmt1(op) => buf.push(op.into()),
            Inst::Fmt2(op, r1, r2) => {
                buf.push(op.into());
                buf.push((r1 << 4) | (r2 & 0x0F));
            }
            Inst::Fmt34 { op, flags, disp } => {
                let opbyte: u8 = op.into();
                if flags.is_sic() {
                    buf.push(opbyte);
                    buf.push(((flags.x as u8) << 7) | ((disp >> 8) & 0x7F) as u8);
                    buf.push(disp as u8);
                    return;
                }
                buf.push(opbyte | ((flags.n as u8) << 1) | flags.i as u8);
                let mut second = ((flags.x as u8) << 7)
                    | ((flags.b as u8) << 6)
                    | ((flags.p as u8) << 5)
                    | ((flags.e as u8) << 4);
                if flags.e {
                    second |= ((disp >> 16) & 0x0F) as u8;
                    buf.push(second);
                    buf.push((disp >> 8) as u8);
                    buf.push(disp as u8);
                } else {
                    second |= ((disp >> 8) & 0x0F) as u8;
                    buf.push(second);
                    buf.push(disp as u8);
                }
            }
        }
    }

    /// Decodes one instruction from the start of `bytes`, returning it with
    /// its encoded length.
    pub fn decode(bytes: &[u8]) -> Result<(Inst, usize), DecodeError> {
        let first = *bytes.first().ok_or(DecodeError::Truncated { need: 1, have: 0 })?;
        let op = Opcode::try_from(first & 0xFC).map_err(|_| DecodeError::IllegalOpcode(first))?;
        let ni = first & 0x03;
        match op.format() {
            Format::One => {
                // Format 1/2 opcodes occupy the whole byte.
                if ni != 0 {
                    return Err(DecodeError::IllegalOpcode(first));
                }
                Ok((Inst::Fmt1(op), 1))
            }
            Format::Two => {
                if ni != 0 {
                    return Err(DecodeError::IllegalOpcode(first));
                }
                let second = need(bytes, 2)?[1];
                Ok((Inst::Fmt2(op, second >> 4, second & 0x0F), 2))
            }
            Format::ThreeFour => {
                let second = need(bytes, 2)?[1];
                if ni == 0 {
                    let rest = need(bytes, 3)?;
                    let flags = Nixbpe { x: second & 0x80 != 0, ..Default::default() };
                    let disp = (((second & 0x7F) as u32) << 8) | rest[2] as u32;
                    return Ok((Inst::Fmt34 { op, flags, disp }, 3));
                }
                let flags = Nixbpe {
                    n: ni & 0x02 != 0,
                    i: ni & 0x01 != 0,
                    x: second & 0x80 != 0,
                    b: second & 0x40 != 0,
                    p: second & 0x20 != 0,
                    e: second & 0x10 != 0,
                };
                flags.check()?;
                if flags.e {
                    let rest = need(bytes, 4)?;
                    let disp = (((second & 0x0F) as u32) << 16)
                        | ((rest[2] as u32) << 8)
                        | rest[3] as u32;
                    Ok((Inst::Fmt34 { op, flags, disp }, 4))
                } else {
                    let rest = need(bytes, 3)?;
                    let disp = (((second & 0x0F) as u32) << 8) | rest[2] as u32;
                    Ok((Inst::Fmt34 { op, flags, disp }, 3))
                }
            }
        }
    }

    pub fn cformat(&self) -> String {
        match self {
            Inst::Fmt1(op) => cformat!("<r>{}</>", op),
            Inst::Fmt2(..) | Inst::Fmt34 { .. } => {
                let text = self.to_string();
                match text.split_once(' ') {
                    Some((m, rest)) => cformat!("<r>{:<7}</><b>{}</>", m, rest.trim_start()),
                    None => cformat!("<r>{}</>", text),
                }
            }
        }
    }
}

fn need(bytes: &[u8], n: usize) -> Result<&[u8], DecodeError> {
    if bytes.len() < n {
        Err(DecodeError::Truncated { need: n, have: bytes.len() })
    } else {
        Ok(bytes)
    }
}

fn reg_name(nibble: u8) -> String {
    match Reg::try_from(nibble) {
        Ok(r) => r.to_string(),
        Err(_) => format!("{nibble}"),
    }
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Inst::Fmt1(op) => write!(f, "{op}"),
            Inst::Fmt2(op, r1, r2) => match op {
                Opcode::CLEAR | Opcode::TIXR => write!(f, "{:<7}{}", op, reg_name(r1)),
                Opcode::SHIFTL | Opcode::SHIFTR => {
                    write!(f, "{:<7}{},{}", op, reg_name(r1), r2 + 1)
                }
                _ => write!(f, "{:<7}{},{}", op, reg_name(r1), reg_name(r2)),
            },
            Inst::Fmt34 { op, flags, disp } => {
                if op == Opcode::RSUB {
                    return write!(f, "{op}");
                }
                let mnemonic =
                    if flags.e { format!("+{op}") } else { format!("{op}") };
                let mode = if flags.is_immediate() {
                    "#"
                } else if flags.is_indirect() {
                    "@"
                } else {
                    ""
                };
                let target = if flags.p {
                    format!("pc{:+}", sign_extend_12(disp))
                } else if flags.b {
                    format!("b+{disp}")
                } else {
                    format!("0x{disp:X}")
                };
                let index = if flags.x { ",x" } else { "" };
                write!(f, "{mnemonic:<7}{mode}{target}{index}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_round_trip {
        ($($name:ident: $inst:expr,)*) => {
            $(
                #[test]
                fn $name() {
                    let inst = $inst;
                    let bytes = inst.encode();
                    assert_eq!(bytes.len(), inst.len());
                    let (back, len) = Inst::decode(&bytes).unwrap();
                    assert_eq!(inst, back);
                    assert_eq!(len, bytes.len());
                }
            )*
        }
    }

    test_round_trip! {
        rt_hlt: Inst::Fmt1(Opcode::HLT),
        rt_float: Inst::Fmt1(Opcode::FLOAT),
        rt_clear: Inst::Fmt2(Opcode::CLEAR, 1, 0),
        rt_addr: Inst::Fmt2(Opcode::ADDR, 4, 0),
        rt_shiftl: Inst::Fmt2(Opcode::SHIFTL, 0, 3),
        rt_lda_pcrel: Inst::Fmt34 {
            op: Opcode::LDA,
            flags: Nixbpe { p: true, ..Nixbpe::simple() },
            disp: 0xFFD,
        },
        rt_sta_base_indexed: Inst::Fmt34 {
            op: Opcode::STA,
            flags: Nixbpe { b: true, x: true, ..Nixbpe::simple() },
            disp: 0x123,
        },
        rt_lda_immediate: Inst::Fmt34 { op: Opcode::LDA, flags: Nixbpe::immediate(), disp: 5 },
        rt_j_indirect: Inst::Fmt34 { op: Opcode::J, flags: Nixbpe::indirect(), disp: 0x030 },
        rt_jsub_fmt4: Inst::Fmt34 {
            op: Opcode::JSUB,
            flags: Nixbpe { e: true, ..Nixbpe::simple() },
            disp: 0x1036C,
        },
        rt_sic_legacy: Inst::Fmt34 { op: Opcode::LDA, flags: Nixbpe::default(), disp: 0x7FFF },
        rt_sic_indexed: Inst::Fmt34 {
            op: Opcode::STA,
            flags: Nixbpe { x: true, ..Nixbpe::default() },
            disp: 0x1234,
        },
        rt_rsub: Inst::Fmt34 { op: Opcode::RSUB, flags: Nixbpe::simple(), disp: 0 },
    }

    #[test]
    fn known_encoding() {
        // LDA #3 => 01 00 03
        let inst = Inst::Fmt34 { op: Opcode::LDA, flags: Nixbpe::immediate(), disp: 3 };
        assert_eq!(inst.encode(), vec![0x01, 0x00, 0x03]);
        // +JSUB 0x1036C => 4B 11 03 6C
        let inst = Inst::Fmt34 {
            op: Opcode::JSUB,
            flags: Nixbpe { e: true, ..Nixbpe::simple() },
            disp: 0x1036C,
        };
        assert_eq!(inst.encode(), vec![0x4B, 0x11, 0x03, 0x6C]);
    }

    #[test]
    fn decode_rejects_bad_opcode() {
        assert_eq!(Inst::decode(&[0x58, 0, 0]), Err(DecodeError::IllegalOpcode(0x58)));
        // Format-1 opcode with n/i bits set is not a valid instruction.
        assert_eq!(Inst::decode(&[0xC1]), Err(DecodeError::IllegalOpcode(0xC1)));
    }

    #[test]
    fn decode_rejects_bad_flags() {
        // b and p both set.
        let bytes = [0x03, 0x60, 0x00];
        assert!(matches!(Inst::decode(&bytes), Err(DecodeError::InvalidAddressing(_))));
        // Indexing combined with immediate addressing.
        let bytes = [0x01, 0x80, 0x00];
        assert!(matches!(Inst::decode(&bytes), Err(DecodeError::InvalidAddressing(_))));
    }

    #[test]
    fn decode_rejects_truncation() {
        let full = Inst::Fmt34 {
            op: Opcode::JSUB,
            flags: Nixbpe { e: true, ..Nixbpe::simple() },
            disp: 0x100,
        }
        .encode();
        assert_eq!(
            Inst::decode(&full[..2]),
            Err(DecodeError::Truncated { need: 4, have: 2 })
        );
    }
}

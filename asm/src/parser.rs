//! Line-level parsing of SIC/XE assembly source. A statement is
//! `[LABEL] MNEMONIC [OPERAND]`; `.` starts a comment, `+` requests the
//! extended format, `#`/`@` select immediate/indirect addressing and a
//! trailing `,X` requests indexing.

use arch::op::{Format, Opcode};
use arch::reg::Reg;
use strum::{Display, EnumString};

use crate::error::{AsmError, AsmErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Directive {
    START,
    END,
    BYTE,
    WORD,
    RESB,
    RESW,
    BASE,
    NOBASE,
    EXTDEF,
    EXTREF,
}

impl Directive {
    pub fn parse(s: &str) -> Option<Self> {
        s.to_ascii_uppercase().parse::<Self>().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrPrefix {
    Plain,
    Immediate,
    Indirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Symbol(String),
    Literal(i64),
}

/// Operand of a memory-format (3/4) instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub prefix: AddrPrefix,
    pub target: Target,
    pub indexed: bool,
}

/// Second field of a format-2 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fmt2Second {
    Reg(Reg),
    /// Shift count, stored as `count - 1` in the register field.
    Count(u8),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Fmt1(Opcode),
    Fmt2(Opcode, Reg, Fmt2Second),
    Mem { op: Opcode, extended: bool, operand: Option<Operand> },
    Dir(Directive, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based source line number.
    pub no: usize,
    pub raw: String,
    pub label: Option<String>,
    pub stmt: Option<Stmt>,
}

enum Mnemonic {
    Op(Opcode, bool),
    Dir(Directive),
}

fn classify(token: &str) -> Option<Mnemonic> {
    if let Some(rest) = token.strip_prefix('+') {
        return Opcode::parse(rest).ok().map(|op| Mnemonic::Op(op, true));
    }
    if let Some(dir) = Directive::parse(token) {
        return Some(Mnemonic::Dir(dir));
    }
    Opcode::parse(token).ok().map(|op| Mnemonic::Op(op, false))
}

pub fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Numeric literal with optional sign and 0x/0o/0b prefix.
pub fn parse_number(s: &str) -> Option<i64> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(oct) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8)
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else {
        body.parse::<i64>()
    }
    .ok()?;
    Some(if negative { -value } else { value })
}

/// BYTE operand: `C'...'` (character bytes), `X'...'` (hex, even digit
/// count) or a plain number in 0..=255.
pub fn parse_byte_operand(s: &str) -> Option<Vec<u8>> {
    if let Some(body) = s.strip_prefix("C'").or_else(|| s.strip_prefix("c'")) {
        let body = body.strip_suffix('\'')?;
        return Some(body.bytes().collect());
    }
    if let Some(body) = s.strip_prefix("X'").or_else(|| s.strip_prefix("x'")) {
        let body = body.strip_suffix('\'')?;
        if body.is_empty() || body.len() % 2 != 0 {
            return None;
        }
        let mut bytes = Vec::with_capacity(body.len() / 2);
        for pair in body.as_bytes().chunks(2) {
            let text = std::str::from_utf8(pair).ok()?;
            bytes.push(u8::from_str_radix(text, 16).ok()?);
        }
        return Some(bytes);
    }
    match parse_number(s)? {
        v @ 0..=255 => Some(vec![v as u8]),
        _ => None,
    }
}

impl Line {
    pub fn parse(no: usize, raw: &str) -> Result<Line, AsmError> {
        let err = |kind| AsmError::new(no, raw, kind);

        let mut tokens: Vec<&str> = Vec::new();
        for token in raw.split_whitespace() {
            if token.starts_with('.') {
                break;
            }
            tokens.push(token);
        }
        if tokens.is_empty() {
            return Ok(Line { no, raw: raw.to_string(), label: None, stmt: None });
        }

        let (label, mnemonic, rest) = match classify(tokens[0]) {
            Some(m) => (None, m, &tokens[1..]),
            None => {
                let label = tokens[0];
                if !is_ident(label) {
                    return Err(err(AsmErrorKind::BadLabel(label.to_string())));
                }
                match tokens.get(1) {
                    None => return Err(err(AsmErrorKind::DanglingLabel(label.to_string()))),
                    Some(tok) => match classify(tok) {
                        Some(m) => (Some(label.to_string()), m, &tokens[2..]),
                        None => return Err(err(AsmErrorKind::UnknownMnemonic(tok.to_string()))),
                    },
                }
            }
        };

        let operand = if rest.is_empty() { None } else { Some(rest.join(" ")) };

        let stmt = match mnemonic {
            Mnemonic::Dir(dir) => Stmt::Dir(dir, operand),
            Mnemonic::Op(op, extended) => match op.format() {
                Format::One => {
                    if extended {
                        return Err(err(AsmErrorKind::BadExtended(op.to_string())));
                    }
                    if let Some(text) = operand {
                        return Err(err(AsmErrorKind::BadOperand(text)));
                    }
                    Stmt::Fmt1(op)
                }
                Format::Two => {
                    if extended {
                        return Err(err(AsmErrorKind::BadExtended(op.to_string())));
                    }
                    let text = operand
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand(op.to_string())))?;
                    parse_fmt2(no, raw, op, &text)?
                }
                Format::ThreeFour => {
                    let operand = match operand {
                        None if op.takes_operand() => {
                            return Err(err(AsmErrorKind::MissingOperand(op.to_string())))
                        }
                        None => None,
                        Some(text) if !op.takes_operand() => {
                            return Err(err(AsmErrorKind::BadOperand(text)))
                        }
                        Some(text) => Some(parse_mem_operand(no, raw, &text)?),
                    };
                    Stmt::Mem { op, extended, operand }
                }
            },
        };

        Ok(Line { no, raw: raw.to_string(), label, stmt: Some(stmt) })
    }
}

fn parse_fmt2(no: usize, raw: &str, op: Opcode, text: &str) -> Result<Stmt, AsmError> {
    let err = |kind| AsmError::new(no, raw, kind);
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let reg = |s: &str| Reg::parse(s).map_err(|_| err(AsmErrorKind::BadRegister(s.to_string())));

    match op {
        Opcode::CLEAR | Opcode::TIXR => {
            if parts.len() != 1 {
                return Err(err(AsmErrorKind::BadOperand(text.to_string())));
            }
            Ok(Stmt::Fmt2(op, reg(parts[0])?, Fmt2Second::None))
        }
        Opcode::SHIFTL | Opcode::SHIFTR => {
            if parts.len() != 2 {
                return Err(err(AsmErrorKind::BadOperand(text.to_string())));
            }
            let count = parse_number(parts[1])
                .filter(|n| (1..=16).contains(n))
                .ok_or_else(|| err(AsmErrorKind::BadOperand(parts[1].to_string())))?;
            Ok(Stmt::Fmt2(op, reg(parts[0])?, Fmt2Second::Count(count as u8 - 1)))
        }
        _ => {
            if parts.len() != 2 {
                return Err(err(AsmErrorKind::BadOperand(text.to_string())));
            }
            Ok(Stmt::Fmt2(op, reg(parts[0])?, Fmt2Second::Reg(reg(parts[1])?)))
        }
    }
}

fn parse_mem_operand(no: usize, raw: &str, text: &str) -> Result<Operand, AsmError> {
    let err = |kind| AsmError::new(no, raw, kind);

    let (prefix, body) = if let Some(rest) = text.strip_prefix('#') {
        (AddrPrefix::Immediate, rest)
    } else if let Some(rest) = text.strip_prefix('@') {
        (AddrPrefix::Indirect, rest)
    } else {
        (AddrPrefix::Plain, text)
    };

    let (body, indexed) = match body
        .strip_suffix(",X")
        .or_else(|| body.strip_suffix(",x"))
    {
        Some(rest) => (rest, true),
        None => (body, false),
    };

    if indexed && prefix != AddrPrefix::Plain {
        return Err(err(AsmErrorKind::BadOperand(text.to_string())));
    }

    let target = if is_ident(body) {
        Target::Symbol(body.to_string())
    } else if let Some(value) = parse_number(body) {
        Target::Literal(value)
    } else {
        return Err(err(AsmErrorKind::BadOperand(text.to_string())));
    };

    Ok(Operand { prefix, target, indexed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labelled_instruction() {
        let line = Line::parse(1, "FIRST   LDA    #0 . grab zero").unwrap();
        assert_eq!(line.label.as_deref(), Some("FIRST"));
        assert_eq!(
            line.stmt,
            Some(Stmt::Mem {
                op: Opcode::LDA,
                extended: false,
                operand: Some(Operand {
                    prefix: AddrPrefix::Immediate,
                    target: Target::Literal(0),
                    indexed: false,
                }),
            })
        );
    }

    #[test]
    fn parses_extended_and_indexed() {
        let line = Line::parse(2, "  +STCH BUFFER,X").unwrap();
        assert_eq!(
            line.stmt,
            Some(Stmt::Mem {
                op: Opcode::STCH,
                extended: true,
                operand: Some(Operand {
                    prefix: AddrPrefix::Plain,
                    target: Target::Symbol("BUFFER".into()),
                    indexed: true,
                }),
            })
        );
    }

    #[test]
    fn parses_fmt2_shift_count() {
        let line = Line::parse(3, " SHIFTL A,4").unwrap();
        assert_eq!(line.stmt, Some(Stmt::Fmt2(Opcode::SHIFTL, Reg::A, Fmt2Second::Count(3))));
    }

    #[test]
    fn comment_and_blank_lines() {
        assert_eq!(Line::parse(4, ". full line comment").unwrap().stmt, None);
        assert_eq!(Line::parse(5, "   ").unwrap().stmt, None);
    }

    #[test]
    fn rejects_indexed_immediate() {
        let e = Line::parse(6, " LDA #TAB,X").unwrap_err();
        assert!(matches!(e.kind, AsmErrorKind::BadOperand(_)));
    }

    #[test]
    fn rejects_unknown_mnemonic() {
        let e = Line::parse(7, "LOOP FROB 12").unwrap_err();
        assert_eq!(e.kind, AsmErrorKind::UnknownMnemonic("FROB".into()));
    }

    #[test]
    fn byte_operands() {
        assert_eq!(parse_byte_operand("C'EOF'"), Some(vec![b'E', b'O', b'F']));
        assert_eq!(parse_byte_operand("X'F1'"), Some(vec![0xF1]));
        assert_eq!(parse_byte_operand("X'F1A'"), None);
        assert_eq!(parse_byte_operand("61"), Some(vec![61]));
    }
}

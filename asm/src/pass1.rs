//! Pass 1: assign addresses to labels while advancing the location
//! counter by each statement's encoded size.

use arch::obj::{Symbol, SymbolKind, SymbolTable};
use arch::word::WORD_MASK;

use crate::error::{AsmError, AsmErrorKind};
use crate::parser::{parse_byte_operand, parse_number, Directive, Line, Stmt};

pub struct Collected {
    pub lines: Vec<Line>,
    /// Location counter at the start of each parsed line.
    pub addrs: Vec<u32>,
    pub symbols: SymbolTable,
    pub program_name: String,
    pub start_address: u32,
    pub length: u32,
    pub end_label: Option<String>,
    /// Index (into `lines`) of the END directive.
    pub end_index: usize,
}

pub fn run(name: &str, source: &[String]) -> Result<Collected, AsmError> {
    let mut lines = Vec::with_capacity(source.len());
    for (idx, raw) in source.iter().enumerate() {
        lines.push(Line::parse(idx + 1, raw)?);
    }

    let mut symbols = SymbolTable::new();
    let mut addrs = vec![0u32; lines.len()];
    let mut locctr: u32 = 0;
    let mut start_address: u32 = 0;
    let mut program_name = name.to_string();
    let mut started = false;
    let mut exported: Vec<(usize, String)> = Vec::new();
    let mut end: Option<(usize, Option<String>)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let err = |kind| AsmError::new(line.no, &line.raw, kind);
        let stmt = match &line.stmt {
            Some(stmt) => stmt,
            None => {
                addrs[idx] = locctr;
                continue;
            }
        };

        // START rewinds the location counter before its label is placed.
        if let Stmt::Dir(Directive::START, operand) = stmt {
            if started || locctr != 0 {
                return Err(err(AsmErrorKind::MisplacedDirective("START".into())));
            }
            start_address = match operand {
                Some(text) => parse_number(text)
                    .filter(|v| (0..=WORD_MASK as i64).contains(v))
                    .ok_or_else(|| err(AsmErrorKind::BadOperand(text.clone())))?
                    as u32,
                None => 0,
            };
            locctr = start_address;
            started = true;
            if let Some(label) = &line.label {
                program_name = label.clone();
            }
        }

        addrs[idx] = locctr;

        if let Some(label) = &line.label {
            symbols
                .insert(Symbol {
                    name: label.clone(),
                    address: locctr,
                    kind: SymbolKind::Local,
                })
                .map_err(|_| err(AsmErrorKind::DuplicateSymbol(label.clone())))?;
        }

        let size = match stmt {
            Stmt::Fmt1(_) => 1,
            Stmt::Fmt2(..) => 2,
            Stmt::Mem { extended, .. } => 3 + *extended as u32,
            Stmt::Dir(dir, operand) => match dir {
                Directive::START | Directive::BASE | Directive::NOBASE => 0,
                Directive::END => {
                    end = Some((idx, operand.clone()));
                    break;
                }
                Directive::WORD => 3,
                Directive::BYTE => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand("BYTE".into())))?;
                    parse_byte_operand(text)
                        .ok_or_else(|| err(AsmErrorKind::BadOperand(text.clone())))?
                        .len() as u32
                }
                Directive::RESB | Directive::RESW => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand(dir.to_string())))?;
                    let count = parse_number(text)
                        .filter(|v| (0..=WORD_MASK as i64).contains(v))
                        .ok_or_else(|| err(AsmErrorKind::BadOperand(text.clone())))?
                        as u32;
                    if *dir == Directive::RESW {
                        count * 3
                    } else {
                        count
                    }
                }
                Directive::EXTDEF => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand("EXTDEF".into())))?;
                    for part in text.split(',').map(str::trim) {
                        exported.push((idx, part.to_string()));
                    }
                    0
                }
                Directive::EXTREF => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand("EXTREF".into())))?;
                    for part in text.split(',').map(str::trim) {
                        symbols
                            .insert(Symbol {
                                name: part.to_string(),
                                address: 0,
                                kind: SymbolKind::External,
                            })
                            .map_err(|_| err(AsmErrorKind::DuplicateSymbol(part.to_string())))?;
                    }
                    0
                }
            },
        };

        locctr = locctr
            .checked_add(size)
            .filter(|v| *v <= WORD_MASK)
            .ok_or_else(|| err(AsmErrorKind::LocationOverflow))?;
    }

    let (end_index, end_label) = match end {
        Some((idx, label)) => (idx, label),
        None => {
            let no = lines.len();
            let raw = source.last().map(String::as_str).unwrap_or("");
            return Err(AsmError::new(no, raw, AsmErrorKind::MissingEnd));
        }
    };

    // EXTDEF may name labels defined anywhere in the unit.
    for (idx, name) in exported {
        let line = &lines[idx];
        match symbols.get_mut(&name) {
            Some(symbol) if symbol.kind == SymbolKind::Local => {
                symbol.kind = SymbolKind::Exported;
            }
            Some(_) => {
                return Err(AsmError::new(
                    line.no,
                    &line.raw,
                    AsmErrorKind::BadOperand(name),
                ))
            }
            None => {
                return Err(AsmError::new(
                    line.no,
                    &line.raw,
                    AsmErrorKind::UndefinedSymbol(name),
                ))
            }
        }
    }

    Ok(Collected {
        lines,
        addrs,
        symbols,
        program_name,
        start_address,
        length: locctr - start_address,
        end_label,
        end_index,
    })
}

//! Pass 2: resolve operands against the symbol table, pick the smallest
//! expressible format for each memory instruction, emit code bytes and
//! relocation records.

use arch::inst::{Inst, Nixbpe};
use arch::obj::{ObjectModule, RelocState, RelocationRecord, SymbolKind};
use arch::op::Opcode;
use arch::word::{from_i24, write_u24};

use crate::error::{AsmError, AsmErrorKind};
use crate::parser::{
    parse_byte_operand, parse_number, AddrPrefix, Directive, Fmt2Second, Operand, Stmt, Target,
};
use crate::pass1::Collected;

pub fn run(collected: Collected, source: &[String]) -> Result<ObjectModule, AsmError> {
    let Collected {
        lines,
        addrs,
        mut symbols,
        program_name,
        start_address,
        length,
        end_label,
        end_index,
    } = collected;

    let mut code: Vec<u8> = Vec::with_capacity(length as usize);
    let mut relocations: Vec<RelocationRecord> = Vec::new();
    let mut base: Option<u32> = None;

    for (idx, line) in lines.iter().take(end_index).enumerate() {
        let err = |kind| AsmError::new(line.no, &line.raw, kind);
        let loc = addrs[idx];
        let stmt = match &line.stmt {
            Some(stmt) => stmt,
            None => continue,
        };

        match stmt {
            Stmt::Fmt1(op) => Inst::Fmt1(*op).encode_into(&mut code),
            Stmt::Fmt2(op, r1, second) => {
                let r2 = match second {
                    Fmt2Second::Reg(r) => u8::from(*r),
                    Fmt2Second::Count(n) => *n,
                    Fmt2Second::None => 0,
                };
                Inst::Fmt2(*op, u8::from(*r1), r2).encode_into(&mut code);
            }
            Stmt::Mem { op, extended, operand } => {
                let inst = encode_mem(
                    &err,
                    &symbols,
                    &mut relocations,
                    base,
                    *op,
                    *extended,
                    operand.as_ref(),
                    loc,
                    loc - start_address,
                )?;
                inst.encode_into(&mut code);
            }
            Stmt::Dir(dir, operand) => match dir {
                Directive::BYTE => {
                    // Validated in pass 1.
                    let text = operand.as_ref().expect("BYTE operand checked in pass 1");
                    code.extend(parse_byte_operand(text).expect("BYTE operand checked in pass 1"));
                }
                Directive::WORD => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand("WORD".into())))?;
                    let mut word = [0u8; 3];
                    if let Some(value) = parse_number(text) {
                        if !(-(1 << 23)..1 << 24).contains(&value) {
                            return Err(err(AsmErrorKind::BadOperand(text.clone())));
                        }
                        write_u24(&mut word, from_i24(value as i32));
                    } else if symbols.contains(text) {
                        // Field starts at zero; the symbol's final address
                        // is added when the module is placed.
                        relocations.push(RelocationRecord {
                            offset: loc - start_address,
                            length: 3,
                            symbol: text.clone(),
                            pc_relative: false,
                        });
                    } else {
                        return Err(err(AsmErrorKind::UndefinedSymbol(text.clone())));
                    }
                    code.extend_from_slice(&word);
                }
                Directive::RESB | Directive::RESW => {
                    let text = operand.as_ref().expect("reservation checked in pass 1");
                    let count = parse_number(text).expect("reservation checked in pass 1") as u32;
                    let bytes = if *dir == Directive::RESW { count * 3 } else { count };
                    code.resize(code.len() + bytes as usize, 0);
                }
                Directive::BASE => {
                    let text = operand
                        .as_ref()
                        .ok_or_else(|| err(AsmErrorKind::MissingOperand("BASE".into())))?;
                    base = Some(resolve_base(&err, &symbols, text)?);
                }
                Directive::NOBASE => base = None,
                Directive::START | Directive::EXTDEF | Directive::EXTREF => {}
                Directive::END => unreachable!("END terminates pass 1"),
            },
        }
    }

    debug_assert_eq!(code.len() as u32, length);

    let start_address = match &end_label {
        Some(name) => {
            let end_line = &lines[end_index];
            symbols.address_of(name).map_err(|_| {
                AsmError::new(
                    end_line.no,
                    &end_line.raw,
                    AsmErrorKind::UndefinedSymbol(name.clone()),
                )
            })?
        }
        None => start_address,
    };

    Ok(ObjectModule {
        program_name,
        code,
        start_address,
        symbols,
        relocations,
        raw_source: source.to_vec(),
        state: RelocState::Pending,
    })
}

fn resolve_base(
    err: &dyn Fn(AsmErrorKind) -> AsmError,
    symbols: &arch::obj::SymbolTable,
    text: &str,
) -> Result<u32, AsmError> {
    if let Some(value) = parse_number(text) {
        return match value {
            0..=0xFF_FFFF => Ok(value as u32),
            _ => Err(err(AsmErrorKind::BadOperand(text.to_string()))),
        };
    }
    match symbols.get(text) {
        Some(sym) if sym.kind != SymbolKind::External => Ok(sym.address),
        Some(_) => Err(err(AsmErrorKind::ExternalNeedsExtended(text.to_string()))),
        None => Err(err(AsmErrorKind::UndefinedSymbol(text.to_string()))),
    }
}

/// Builds the format-3/4 instruction for one memory operand, appending a
/// relocation record when the stored field depends on the module's final
/// placement (format-4 symbol fields and every external reference).
#[allow(clippy::too_many_arguments)]
fn encode_mem(
    err: &dyn Fn(AsmErrorKind) -> AsmError,
    symbols: &arch::obj::SymbolTable,
    relocations: &mut Vec<RelocationRecord>,
    base: Option<u32>,
    op: Opcode,
    extended: bool,
    operand: Option<&Operand>,
    loc: u32,
    code_offset: u32,
) -> Result<Inst, AsmError> {
    let operand = match operand {
        None => {
            return Ok(Inst::Fmt34 {
                op,
                flags: if extended {
                    Nixbpe { e: true, ..Nixbpe::simple() }
                } else {
                    Nixbpe::simple()
                },
                disp: 0,
            })
        }
        Some(operand) => operand,
    };

    let mut flags = match operand.prefix {
        AddrPrefix::Plain => Nixbpe::simple(),
        AddrPrefix::Immediate => Nixbpe::immediate(),
        AddrPrefix::Indirect => Nixbpe::indirect(),
    };
    flags.x = operand.indexed;

    match &operand.target {
        Target::Literal(value) => {
            // Plain numbers are absolute: no relocation, no relative
            // addressing.
            let value = *value;
            if value < 0 {
                return Err(err(AsmErrorKind::BadOperand(value.to_string())));
            }
            if !extended && value <= 0xFFF {
                Ok(Inst::Fmt34 { op, flags, disp: value as u32 })
            } else if extended && value <= 0xF_FFFF {
                flags.e = true;
                Ok(Inst::Fmt34 { op, flags, disp: value as u32 })
            } else {
                Err(err(AsmErrorKind::DisplacementOutOfRange {
                    mnemonic: op.to_string(),
                    target: value as u32,
                }))
            }
        }
        Target::Symbol(name) => {
            let symbol = symbols
                .get(name)
                .ok_or_else(|| err(AsmErrorKind::UndefinedSymbol(name.clone())))?;

            if symbol.kind == SymbolKind::External {
                if !extended {
                    return Err(err(AsmErrorKind::ExternalNeedsExtended(name.clone())));
                }
                flags.e = true;
                relocations.push(RelocationRecord {
                    offset: code_offset + 1,
                    length: 3,
                    symbol: name.clone(),
                    pc_relative: false,
                });
                return Ok(Inst::Fmt34 { op, flags, disp: 0 });
            }

            let target = symbol.address;
            if extended {
                // The 20-bit field holds the symbol's final address; emit
                // zero now and let relocation fill it in.
                flags.e = true;
                relocations.push(RelocationRecord {
                    offset: code_offset + 1,
                    length: 3,
                    symbol: name.clone(),
                    pc_relative: false,
                });
                return Ok(Inst::Fmt34 { op, flags, disp: 0 });
            }

            // Prefer PC-relative, then base-relative. Both displacements
            // are differences of module addresses, so they survive
            // relocation untouched.
            let pc_disp = target as i64 - (loc as i64 + 3);
            if (-2048..=2047).contains(&pc_disp) {
                flags.p = true;
                return Ok(Inst::Fmt34 { op, flags, disp: (pc_disp as u32) & 0xFFF });
            }
            if let Some(base) = base {
                let base_disp = target as i64 - base as i64;
                if (0..=4095).contains(&base_disp) {
                    flags.b = true;
                    return Ok(Inst::Fmt34 { op, flags, disp: base_disp as u32 });
                }
            }
            Err(err(AsmErrorKind::DisplacementOutOfRange {
                mnemonic: op.to_string(),
                target,
            }))
        }
    }
}

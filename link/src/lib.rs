//! Combines independently assembled control sections into one object
//! module, resolving cross-module references and renumbering addresses.
//! Modules are expected to be 0-origin (assembled with `START 0`); the
//! running code length of the preceding sections becomes each module's
//! offset in the merged image.

use thiserror::Error;

use arch::obj::{ObjError, ObjectModule, RelocState, SymbolKind};
use arch::word::WORD_MASK;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("no input modules")]
    NoModules,

    #[error("unresolved external symbol `{0}`")]
    UnresolvedSymbol(String),

    #[error("duplicate symbol `{0}` across modules")]
    DuplicateSymbol(String),

    #[error("layout 0x{load_address:06X}+{total} exceeds the 24-bit address space")]
    LayoutOverflow { load_address: u32, total: u64 },

    #[error(transparent)]
    Relocation(#[from] ObjError),
}

/// Links `modules` in input order. With `full_relocation` the output is an
/// absolute image for `load_address`: every record is applied now and the
/// module arrives `Applied`. Otherwise relocation is deferred to the
/// loader and the output stays `Pending`, placeable at any base.
pub fn link(
    modules: Vec<ObjectModule>,
    load_address: u32,
    full_relocation: bool,
    output_name: &str,
) -> Result<ObjectModule, LinkError> {
    if modules.is_empty() {
        return Err(LinkError::NoModules);
    }

    let total: u64 = modules.iter().map(|m| m.length() as u64).sum();
    if load_address as u64 + total > WORD_MASK as u64 + 1 {
        return Err(LinkError::LayoutOverflow { load_address, total });
    }

    let fixed = if full_relocation { load_address } else { 0 };
    let entry = modules[0].start_address + fixed;

    let mut code = Vec::with_capacity(total as usize);
    let mut symbols = arch::obj::SymbolTable::new();
    let mut relocations = Vec::new();
    let mut raw_source = Vec::new();
    let mut offset: u32 = 0;

    for module in &modules {
        for symbol in module.symbols.iter() {
            let mut merged = symbol.clone();
            if merged.kind == SymbolKind::External {
                // Placeholder; the defining module provides the address.
                if !symbols.contains(&merged.name) {
                    symbols.insert(merged.clone()).map_err(LinkError::from_obj)?;
                }
                continue;
            }
            merged.address = merged.address + offset + fixed;
            symbols.define(merged).map_err(LinkError::from_obj)?;
        }
        for record in &module.relocations {
            let mut merged = record.clone();
            merged.offset += offset;
            relocations.push(merged);
        }
        code.extend_from_slice(&module.code);
        raw_source.extend(module.raw_source.iter().cloned());
        offset += module.length();
    }

    // Every record must now point at a definition somewhere in the merge.
    for record in &relocations {
        match symbols.get(&record.symbol) {
            Some(symbol) if symbol.kind != SymbolKind::External => {}
            _ => return Err(LinkError::UnresolvedSymbol(record.symbol.clone())),
        }
    }

    let state = if full_relocation {
        for record in &relocations {
            let address = symbols
                .address_of(&record.symbol)
                .map_err(|_| LinkError::UnresolvedSymbol(record.symbol.clone()))?;
            record.apply_to(&mut code, address)?;
        }
        RelocState::Applied
    } else {
        RelocState::Pending
    };

    Ok(ObjectModule {
        program_name: output_name.to_string(),
        code,
        start_address: entry,
        symbols,
        relocations,
        raw_source,
        state,
    })
}

impl LinkError {
    fn from_obj(e: ObjError) -> Self {
        match e {
            ObjError::DuplicateSymbol(name) => LinkError::DuplicateSymbol(name),
            other => LinkError::Relocation(other),
        }
    }
}

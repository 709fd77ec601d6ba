//! Places a final object module into memory. Relocation is a one-shot
//! transition on the module itself: fixups and the symbol/start rebase
//! happen in place, `Pending` becomes `Applied`, and a later load of the
//! same module only copies bytes again.

use thiserror::Error;

use arch::obj::{ObjError, ObjectModule, RelocState};

use crate::memory::Memory;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("program does not fit: base 0x{base:06X} + length {length} > memory size {size}")]
    DoesNotFit { base: u32, length: u32, size: usize },

    #[error("unresolved symbol `{0}` in relocation records")]
    UnresolvedSymbol(String),

    #[error(transparent)]
    Relocation(#[from] ObjError),
}

/// Copies `module.code` into `memory` at `base` and resolves outstanding
/// relocations. Nothing is mutated until the fit and every record symbol
/// have been checked.
pub fn load(module: &mut ObjectModule, memory: &mut Memory, base: u32) -> Result<(), LoadError> {
    let length = module.length();
    if base as u64 + length as u64 > memory.size() as u64 {
        return Err(LoadError::DoesNotFit { base, length, size: memory.size() });
    }

    if module.state == RelocState::Pending {
        for record in &module.relocations {
            if !module.symbols.contains(&record.symbol) {
                return Err(LoadError::UnresolvedSymbol(record.symbol.clone()));
            }
        }

        // The module becomes a resident image: symbol addresses and the
        // entry point move to their final locations first, then every
        // record folds the final address into its stored field.
        module.symbols.rebase(base);
        module.start_address = module.start_address.wrapping_add(base);
        let relocations = std::mem::take(&mut module.relocations);
        for record in &relocations {
            let address = module
                .symbols
                .address_of(&record.symbol)
                .map_err(|_| LoadError::UnresolvedSymbol(record.symbol.clone()))?;
            record.apply_to(&mut module.code, address)?;
        }
        module.relocations = relocations;
        module.state = RelocState::Applied;
    }

    memory.write_slice(base, &module.code)?;
    Ok(())
}

impl From<crate::memory::MemoryError> for LoadError {
    fn from(e: crate::memory::MemoryError) -> Self {
        // Unreachable after the fit check; kept so `?` stays total.
        match e {
            crate::memory::MemoryError::OutOfBounds { addr, len, size } => {
                LoadError::DoesNotFit { base: addr, length: len, size }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arch::obj::{RelocationRecord, Symbol, SymbolKind, SymbolTable};

    fn module_with(code: Vec<u8>, symbols: Vec<(String, u32)>, recs: Vec<RelocationRecord>) -> ObjectModule {
        let mut table = SymbolTable::new();
        for (name, address) in symbols {
            table.insert(Symbol { name, address, kind: SymbolKind::Local }).unwrap();
        }
        ObjectModule {
            program_name: "T".into(),
            code,
            start_address: 0,
            symbols: table,
            relocations: recs,
            raw_source: vec![],
            state: RelocState::Pending,
        }
    }

    #[test]
    fn copies_code_and_rebases_symbols() {
        let mut module = module_with(vec![1, 2, 3], vec![("S".into(), 1)], vec![]);
        let mut mem = Memory::new(16);
        load(&mut module, &mut mem, 4).unwrap();
        assert_eq!(&mem.bytes()[4..7], &[1, 2, 3]);
        assert_eq!(module.symbols.address_of("S"), Ok(5));
        assert_eq!(module.state, RelocState::Applied);
    }

    #[test]
    fn does_not_fit_leaves_memory_untouched() {
        let mut module = module_with(vec![0xAA; 8], vec![], vec![]);
        let mut mem = Memory::new(8);
        assert_eq!(
            load(&mut module, &mut mem, 1),
            Err(LoadError::DoesNotFit { base: 1, length: 8, size: 8 })
        );
        assert!(mem.bytes().iter().all(|b| *b == 0));
        assert_eq!(module.state, RelocState::Pending);
    }

    #[test]
    fn unresolved_record_aborts_before_mutation() {
        let mut module = module_with(
            vec![0, 0, 0],
            vec![("S".into(), 1)],
            vec![RelocationRecord {
                offset: 0,
                length: 3,
                symbol: "GHOST".into(),
                pc_relative: false,
            }],
        );
        let mut mem = Memory::new(16);
        assert_eq!(
            load(&mut module, &mut mem, 2),
            Err(LoadError::UnresolvedSymbol("GHOST".into()))
        );
        assert!(mem.bytes().iter().all(|b| *b == 0));
        assert_eq!(module.symbols.address_of("S"), Ok(1));
        assert_eq!(module.state, RelocState::Pending);
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let mut module = module_with(
            vec![0x00, 0x00, 0x10],
            vec![("S".into(), 0x20)],
            vec![RelocationRecord { offset: 0, length: 3, symbol: "S".into(), pc_relative: false }],
        );
        let mut mem = Memory::new(64);
        load(&mut module, &mut mem, 8).unwrap();
        let first = mem.bytes().to_vec();
        // S rebased to 0x28; stored field = 0x10 + 0x28.
        assert_eq!(&first[8..11], &[0x00, 0x00, 0x38]);
        load(&mut module, &mut mem, 8).unwrap();
        assert_eq!(mem.bytes(), &first[..]);
    }
}

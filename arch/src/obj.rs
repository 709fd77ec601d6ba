//! The object-module intermediate representation shared by the assembler,
//! linker and loader. Modules are plain values: everything here derives
//! serde so a persistence layer can round-trip them without loss.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjError {
    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),

    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),

    #[error("relocation span {offset}+{length} outside code of length {code_len}")]
    RelocationOutOfRange { offset: u32, length: u8, code_len: usize },
}

/// Visibility of a symbol across module boundaries. `External` entries are
/// placeholders created by EXTREF; the linker replaces them with the real
/// definition from another module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Local,
    Exported,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    pub kind: SymbolKind,
}

/// Name-keyed symbol table. Iteration follows insertion order so listings
/// stay stable; lookups either succeed or fail, never default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol) -> Result<(), ObjError> {
        if self.symbols.contains_key(&symbol.name) {
            return Err(ObjError::DuplicateSymbol(symbol.name));
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Replaces an `External` placeholder with a real definition, or
    /// inserts. Used by the linker during table merging.
    pub fn define(&mut self, symbol: Symbol) -> Result<(), ObjError> {
        match self.symbols.get(&symbol.name) {
            Some(existing) if existing.kind != SymbolKind::External => {
                Err(ObjError::DuplicateSymbol(symbol.name))
            }
            _ => {
                self.symbols.insert(symbol.name.clone(), symbol);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    pub fn address_of(&self, name: &str) -> Result<u32, ObjError> {
        self.symbols
            .get(name)
            .map(|s| s.address)
            .ok_or_else(|| ObjError::UndefinedSymbol(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Symbol> {
        self.symbols.values_mut()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Shifts every address, e.g. by a module offset or a load base.
    pub fn rebase(&mut self, delta: u32) {
        for symbol in self.symbols.values_mut() {
            symbol.address = symbol.address.wrapping_add(delta);
        }
    }
}

/// A code location whose stored integer still depends on a symbol's final
/// address. `offset` is a byte offset into the module code, `length` the
/// width of the stored big-endian field (1..=4 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRecord {
    pub offset: u32,
    pub length: u8,
    pub symbol: String,
    pub pc_relative: bool,
}

impl RelocationRecord {
    /// Adds `symbol_address` to the stored field (minus the fixed 3 for
    /// PC-relative fixups), wrapping within the field width.
    pub fn apply_to(&self, code: &mut [u8], symbol_address: u32) -> Result<(), ObjError> {
        let start = self.offset as usize;
        let end = start + self.length as usize;
        if self.length == 0 || self.length > 4 || end > code.len() {
            return Err(ObjError::RelocationOutOfRange {
                offset: self.offset,
                length: self.length,
                code_len: code.len(),
            });
        }
        let span = &mut code[start..end];
        let mut value: u64 = 0;
        for byte in span.iter() {
            value = (value << 8) | *byte as u64;
        }
        let mut fixed = value.wrapping_add(symbol_address as u64);
        if self.pc_relative {
            fixed = fixed.wrapping_sub(3);
        }
        for byte in span.iter_mut().rev() {
            *byte = fixed as u8;
            fixed >>= 8;
        }
        Ok(())
    }
}

/// Relocation lifecycle tag. `Applied` guards the one-shot fixup: the
/// loader's relocation path is only reachable from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocState {
    Pending,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectModule {
    pub program_name: String,
    pub code: Vec<u8>,
    pub start_address: u32,
    pub symbols: SymbolTable,
    pub relocations: Vec<RelocationRecord>,
    /// Original source lines, kept for diagnostics only.
    pub raw_source: Vec<String>,
    pub state: RelocState,
}

impl ObjectModule {
    pub fn length(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn is_relocated(&self) -> bool {
        self.state == RelocState::Applied
    }
}

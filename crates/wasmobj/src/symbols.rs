//! Symbol table builder.
//!
//! Runs once every section has been parsed. Each linking symbol table entry
//! is resolved against the standard tables: function symbols to their
//! signature, global symbols to their global type, data symbols to their
//! address. The result keeps symbol table order.

use log::trace;

use crate::error::{IndexSpace, ParseError, Result};
use crate::object::WasmObject;
use crate::types::{
    Binding, GlobalType, InitExpr, Signature, SymbolInfo, SymbolKind, SymbolTarget, Visibility,
};

/// Where a global symbol's type lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GlobalRef {
    /// Position in the import list.
    Imported(usize),
    /// Position in the defined globals.
    Defined(usize),
}

/// Resolution computed for one symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SymbolEntry {
    pub signature: Option<u32>,
    pub global: Option<GlobalRef>,
    pub value: u64,
}

/// Read-only view of a resolved symbol, borrowed from its [`WasmObject`].
#[derive(Debug, Clone, Copy)]
pub struct Symbol<'o, 'a> {
    pub index: u32,
    pub info: &'o SymbolInfo<'a>,
    /// Set for function symbols.
    pub signature: Option<&'o Signature>,
    /// Set for global symbols.
    pub global_type: Option<&'o GlobalType>,
    pub(crate) value: u64,
}

impl<'o, 'a> Symbol<'o, 'a> {
    pub fn name(&self) -> &'a str {
        self.info.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.info.kind()
    }

    pub fn binding(&self) -> Binding {
        // Reserved bindings are rejected while parsing the symbol table.
        self.info.flags.binding().unwrap_or(Binding::Global)
    }

    pub fn visibility(&self) -> Visibility {
        self.info.flags.visibility()
    }

    pub fn is_defined(&self) -> bool {
        !self.is_undefined()
    }

    pub fn is_undefined(&self) -> bool {
        self.info.flags.is_undefined()
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility() == Visibility::Hidden
    }

    /// Element index for functions and globals, address for defined data,
    /// zero otherwise. Data in a segment without an `i32.const` base reports
    /// its offset within the segment.
    pub fn value(&self) -> u64 {
        self.value
    }
}

pub(crate) fn build_symbol_table(object: &WasmObject<'_>) -> Result<Vec<SymbolEntry>> {
    let Some(linking) = object.linking() else {
        return Ok(Vec::new());
    };

    linking
        .symbol_table
        .iter()
        .enumerate()
        .map(|(i, info)| {
            let entry = resolve_symbol(object, info).map_err(|e| e.at_entry(i as u32))?;
            trace!(
                "symbol {i}: {} {} value={}",
                info.kind(),
                info.name,
                entry.value
            );
            Ok(entry)
        })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| e.in_section("symbol table"))
}

fn resolve_symbol(object: &WasmObject<'_>, info: &SymbolInfo<'_>) -> Result<SymbolEntry> {
    let mut entry = SymbolEntry {
        signature: None,
        global: None,
        value: 0,
    };

    match info.target {
        SymbolTarget::Function(index) => {
            let space = object.function_space();
            let sig = match space.to_defined(index) {
                Some(defined) => object.function_types.get(defined).copied(),
                None => object.function_import(index).map(|(_, sig)| sig),
            }
            .ok_or_else(|| {
                ParseError::invalid_index(IndexSpace::Function, index, space.total() as usize)
            })?;
            if sig as usize >= object.signatures.len() {
                return Err(ParseError::invalid_index(
                    IndexSpace::Type,
                    sig,
                    object.signatures.len(),
                ));
            }
            entry.signature = Some(sig);
            entry.value = u64::from(index);
        }
        SymbolTarget::Global(index) => {
            let space = object.global_space();
            let global = match space.to_defined(index) {
                Some(defined) if defined < object.globals.len() => Some(GlobalRef::Defined(defined)),
                Some(_) => None,
                None => object
                    .global_import(index)
                    .map(|(pos, _, _)| GlobalRef::Imported(pos)),
            }
            .ok_or_else(|| {
                ParseError::invalid_index(IndexSpace::Global, index, space.total() as usize)
            })?;
            entry.global = Some(global);
            entry.value = u64::from(index);
        }
        SymbolTarget::Data(Some(data_ref)) => {
            let segment = object
                .data_segments
                .get(data_ref.segment as usize)
                .ok_or_else(|| {
                    ParseError::invalid_index(
                        IndexSpace::DataSegment,
                        data_ref.segment,
                        object.data_segments.len(),
                    )
                })?;
            // A segment placed by `global.get` has no static base, so the
            // value stays relative to the segment start.
            let base = match segment.offset {
                InitExpr::I32Const(v) => u64::from(v as u32),
                _ => 0,
            };
            entry.value = base + u64::from(data_ref.offset);
        }
        SymbolTarget::Data(None) => {}
        SymbolTarget::Section(index) => {
            if index as usize >= object.sections.len() {
                return Err(ParseError::invalid_index(
                    IndexSpace::Section,
                    index,
                    object.sections.len(),
                ));
            }
        }
    }

    Ok(entry)
}

//! Custom section parsers.
//!
//! Custom sections are dispatched by name. "name" and "linking" are split
//! into `(id, size)` framed sub-sections, `reloc.<TARGET>` attaches
//! relocations to an earlier section, and the contract sections are plain
//! string lists. Any other custom section is kept as opaque content.

use std::collections::HashSet;

use log::debug;

use super::{read_entries, ParseContext};
use crate::error::{ErrorKind, IndexSpace, ParseError, Result};
use crate::reader::ReadContext;
use crate::types::{
    Binding, CombinedIndexSpace, Comdat, ComdatEntry, ContractSection, DataRef, DataSegment,
    FunctionName, InitFunc, LinkingData, RelocTarget, RelocType, Relocation, SymbolFlags,
    SymbolInfo, SymbolKind, SymbolTarget, METADATA_VERSION,
};

const NAME_FUNCTION: u8 = 1;

const LINKING_SEGMENT_INFO: u8 = 5;
const LINKING_INIT_FUNCS: u8 = 6;
const LINKING_COMDAT_INFO: u8 = 7;
const LINKING_SYMBOL_TABLE: u8 = 8;

const COMDAT_DATA: u32 = 0;
const COMDAT_FUNCTION: u32 = 1;

const RELOC_PREFIX: &str = "reloc.";

/// Walk `(id u8, size varuint32, body)` sub-sections until `ctx` is
/// exhausted. Each body must be consumed exactly.
fn read_subsections<'a, F>(ctx: &mut ReadContext<'a>, what: &str, mut read: F) -> Result<()>
where
    F: FnMut(u8, &mut ReadContext<'a>) -> Result<()>,
{
    while !ctx.is_at_end() {
        let id = ctx.read_u8()?;
        let size = ctx.read_var_u32()? as usize;
        let mut sub = ctx.frame(size)?;
        debug!("{what} {id}: {size} bytes");
        read(id, &mut sub)
            .and_then(|()| sub.expect_end(what))
            .map_err(|e| e.overran_frame(what))?;
    }
    Ok(())
}

fn skip(ctx: &mut ReadContext<'_>) -> Result<()> {
    ctx.read_bytes(ctx.remaining()).map(|_| ())
}

/// The symbol at `index` must exist and be of `kind`.
fn check_symbol(symbols: &[SymbolInfo<'_>], index: u32, kind: SymbolKind) -> Result<()> {
    let symbol = symbols
        .get(index as usize)
        .ok_or_else(|| ParseError::invalid_index(IndexSpace::Symbol, index, symbols.len()))?;
    if symbol.kind() != kind {
        return Err(ParseError::malformed(format!(
            "symbol {index} is a {} symbol, expected {kind}",
            symbol.kind()
        )));
    }
    Ok(())
}

/// A function or global symbol's undefined flag must match whether its
/// element index names an import.
fn check_element(
    space: IndexSpace,
    indices: CombinedIndexSpace,
    index: u32,
    defined: bool,
) -> Result<()> {
    if !indices.contains(index) {
        return Err(ParseError::invalid_index(
            space,
            index,
            indices.total() as usize,
        ));
    }
    if indices.is_defined(index) != defined {
        let (flag, status) = if defined {
            ("defined", "imported")
        } else {
            ("undefined", "defined")
        };
        return Err(ParseError::malformed(format!(
            "{flag} symbol refers to {status} {space} {index}"
        )));
    }
    Ok(())
}

fn read_segment_info<'a>(ctx: &mut ReadContext<'a>, segment: &mut DataSegment<'a>) -> Result<()> {
    segment.name = Some(ctx.read_string()?);
    segment.alignment = ctx.read_var_u32()?;
    segment.flags = ctx.read_var_u32()?;
    Ok(())
}

fn parse_init_funcs(ctx: &mut ReadContext<'_>, linking: &mut LinkingData<'_>) -> Result<()> {
    read_entries(ctx, |ctx, _| {
        let priority = ctx.read_var_u32()?;
        let symbol = ctx.read_var_u32()?;
        check_symbol(&linking.symbol_table, symbol, SymbolKind::Function)?;
        linking.init_functions.push(InitFunc { priority, symbol });
        Ok(())
    })
}

fn join_comdat(slot: &mut Option<u32>, comdat: u32, what: impl FnOnce() -> String) -> Result<()> {
    if slot.is_some() {
        return Err(ParseError::duplicate(format!("{} in two COMDATs", what())));
    }
    *slot = Some(comdat);
    Ok(())
}

impl<'a> ParseContext<'a> {
    pub(super) fn parse_custom_section(
        &mut self,
        name: &'a str,
        ctx: &mut ReadContext<'a>,
    ) -> Result<()> {
        if name == "name" {
            self.parse_name_section(ctx)
        } else if name == "linking" {
            self.parse_linking_section(ctx)
        } else if let Some(target) = name.strip_prefix(RELOC_PREFIX) {
            self.parse_reloc_section(target, ctx)
        } else if let Some(which) = ContractSection::from_name(name) {
            self.parse_contract_section(name, which, ctx)
        } else {
            debug!("custom section {name} kept opaque");
            skip(ctx)
        }
    }

    fn parse_name_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        let mut seen = HashSet::new();
        read_subsections(ctx, "name sub-section", |id, sub| {
            if id != NAME_FUNCTION {
                return skip(sub);
            }
            read_entries(sub, |sub, _| {
                let index = sub.read_var_u32()?;
                let name = sub.read_string()?;
                let space = self.object.function_space();
                if !space.contains(index) {
                    return Err(ParseError::invalid_index(
                        IndexSpace::Function,
                        index,
                        space.total() as usize,
                    ));
                }
                if name.is_empty() {
                    return Err(ParseError::malformed(format!(
                        "function {index} has an empty name"
                    )));
                }
                if !seen.insert(index) {
                    return Err(ParseError::duplicate(format!("name for function {index}")));
                }
                self.object.debug_names.push(FunctionName { index, name });
                if let Some(function) = space
                    .to_defined(index)
                    .and_then(|d| self.object.functions.get_mut(d))
                {
                    function.debug_name = Some(name);
                }
                Ok(())
            })
        })
    }

    fn parse_linking_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        if self.object.linking.is_some() {
            return Err(ParseError::duplicate("linking section"));
        }
        if self.object.functions.len() != self.object.function_types.len() {
            return Err(ParseError::malformed(
                "linking section must come after the code section",
            ));
        }
        let version = ctx.read_var_u32()?;
        if version != METADATA_VERSION {
            return Err(ParseError::malformed(format!(
                "unexpected metadata version {version} (expected {METADATA_VERSION})"
            )));
        }

        let mut linking = LinkingData {
            version,
            ..LinkingData::default()
        };
        let mut has_symbol_table = false;
        read_subsections(ctx, "linking sub-section", |id, sub| match id {
            LINKING_SYMBOL_TABLE => {
                if has_symbol_table {
                    return Err(ParseError::duplicate("symbol table"));
                }
                has_symbol_table = true;
                self.parse_symbol_table(sub, &mut linking.symbol_table)
            }
            LINKING_SEGMENT_INFO => self.parse_segment_info(sub),
            LINKING_INIT_FUNCS => parse_init_funcs(sub, &mut linking),
            LINKING_COMDAT_INFO => self.parse_comdats(sub, &mut linking.comdats),
            _ => skip(sub),
        })?;

        debug!(
            "linking: {} symbols, {} init functions, {} comdats",
            linking.symbol_table.len(),
            linking.init_functions.len(),
            linking.comdats.len()
        );
        self.object.linking = Some(linking);
        Ok(())
    }

    fn parse_symbol_table(
        &mut self,
        ctx: &mut ReadContext<'a>,
        symbols: &mut Vec<SymbolInfo<'a>>,
    ) -> Result<()> {
        let mut names = HashSet::new();
        read_entries(ctx, |ctx, _| {
            let info = self.read_symbol(ctx)?;
            if info.flags.binding() != Some(Binding::Local) && !names.insert(info.name) {
                return Err(ParseError::duplicate(format!("symbol name \"{}\"", info.name)));
            }
            symbols.push(info);
            Ok(())
        })
    }

    fn read_symbol(&mut self, ctx: &mut ReadContext<'a>) -> Result<SymbolInfo<'a>> {
        let kind_byte = ctx.read_u8()?;
        let kind = SymbolKind::from_byte(kind_byte)
            .ok_or_else(|| ParseError::malformed(format!("invalid symbol type {kind_byte}")))?;
        let flags = SymbolFlags(ctx.read_var_u32()?);
        let binding = flags.binding().ok_or_else(|| {
            ParseError::malformed(format!("invalid symbol binding in flags 0x{:x}", flags.0))
        })?;
        let defined = !flags.is_undefined();

        let (name, module, target) = match kind {
            SymbolKind::Function => {
                let index = ctx.read_var_u32()?;
                let space = self.object.function_space();
                check_element(IndexSpace::Function, space, index, defined)?;
                let target = SymbolTarget::Function(index);
                match space.to_defined(index) {
                    Some(pos) => {
                        let name = ctx.read_string()?;
                        if let Some(function) = self.object.functions.get_mut(pos) {
                            function.symbol_name.get_or_insert(name);
                        }
                        (name, None, target)
                    }
                    None => {
                        let (import, _) = self.object.function_import(index).ok_or_else(|| {
                            ParseError::invalid_index(IndexSpace::Function, index, 0)
                        })?;
                        (import.field, Some(import.module), target)
                    }
                }
            }
            SymbolKind::Global => {
                let index = ctx.read_var_u32()?;
                let space = self.object.global_space();
                check_element(IndexSpace::Global, space, index, defined)?;
                if !defined && binding == Binding::Weak {
                    return Err(ParseError::malformed(format!(
                        "undefined weak global symbol for global {index}"
                    )));
                }
                let target = SymbolTarget::Global(index);
                match space.to_defined(index) {
                    Some(pos) => {
                        let name = ctx.read_string()?;
                        if let Some(global) = self.object.globals.get_mut(pos) {
                            global.symbol_name.get_or_insert(name);
                        }
                        (name, None, target)
                    }
                    None => {
                        let (_, import, _) = self.object.global_import(index).ok_or_else(|| {
                            ParseError::invalid_index(IndexSpace::Global, index, 0)
                        })?;
                        (import.field, Some(import.module), target)
                    }
                }
            }
            SymbolKind::Data => {
                let name = ctx.read_string()?;
                let data = if defined {
                    let segment = ctx.read_var_u32()?;
                    let offset = ctx.read_var_u32()?;
                    let size = ctx.read_var_u32()?;
                    let segments = &self.object.data_segments;
                    let content = segments
                        .get(segment as usize)
                        .map(|s| s.content)
                        .ok_or_else(|| {
                            ParseError::invalid_index(
                                IndexSpace::DataSegment,
                                segment,
                                segments.len(),
                            )
                        })?;
                    if u64::from(offset) + u64::from(size) > content.len() as u64 {
                        return Err(ParseError::malformed(format!(
                            "data symbol {name} ({size} bytes at offset {offset}) overruns \
                             segment {segment} of {} bytes",
                            content.len()
                        )));
                    }
                    Some(DataRef {
                        segment,
                        offset,
                        size,
                    })
                } else {
                    None
                };
                (name, None, SymbolTarget::Data(data))
            }
            SymbolKind::Section => {
                if binding != Binding::Local {
                    return Err(ParseError::malformed(
                        "section symbols must have local binding",
                    ));
                }
                let index = ctx.read_var_u32()?;
                let sections = &self.object.sections;
                let section = sections.get(index as usize).ok_or_else(|| {
                    ParseError::invalid_index(IndexSpace::Section, index, sections.len())
                })?;
                (section.label(), None, SymbolTarget::Section(index))
            }
        };

        Ok(SymbolInfo {
            name,
            flags,
            module,
            target,
        })
    }

    fn parse_segment_info(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        let count = ctx.read_var_u32()?;
        let num_segments = self.object.data_segments.len();
        if count as usize > num_segments {
            return Err(ParseError::malformed(format!(
                "segment info has {count} entries but there are {num_segments} data segments"
            )));
        }
        for (i, segment) in self
            .object
            .data_segments
            .iter_mut()
            .take(count as usize)
            .enumerate()
        {
            read_segment_info(ctx, segment).map_err(|e| e.at_entry(i as u32))?;
        }
        Ok(())
    }

    fn parse_comdats(
        &mut self,
        ctx: &mut ReadContext<'a>,
        comdats: &mut Vec<Comdat<'a>>,
    ) -> Result<()> {
        let mut names = HashSet::new();
        read_entries(ctx, |ctx, _| {
            let comdat = comdats.len() as u32;
            let name = ctx.read_string()?;
            if name.is_empty() {
                return Err(ParseError::malformed("empty COMDAT name"));
            }
            if !names.insert(name) {
                return Err(ParseError::duplicate(format!("COMDAT \"{name}\"")));
            }
            let flags = ctx.read_var_u32()?;
            if flags != 0 {
                return Err(ParseError::malformed(format!(
                    "unsupported COMDAT flags 0x{flags:x}"
                )));
            }

            let mut entries = Vec::new();
            read_entries(ctx, |ctx, _| {
                let kind = ctx.read_var_u32()?;
                let index = ctx.read_var_u32()?;
                let entry = match kind {
                    COMDAT_DATA => {
                        let segments = &mut self.object.data_segments;
                        let len = segments.len();
                        let segment = segments.get_mut(index as usize).ok_or_else(|| {
                            ParseError::invalid_index(IndexSpace::DataSegment, index, len)
                        })?;
                        join_comdat(&mut segment.comdat, comdat, || {
                            format!("data segment {index}")
                        })?;
                        ComdatEntry::Data(index)
                    }
                    COMDAT_FUNCTION => {
                        let space = self.object.function_space();
                        if !space.contains(index) {
                            return Err(ParseError::invalid_index(
                                IndexSpace::Function,
                                index,
                                space.total() as usize,
                            ));
                        }
                        let function = space
                            .to_defined(index)
                            .and_then(|d| self.object.functions.get_mut(d))
                            .ok_or_else(|| {
                                ParseError::malformed(format!(
                                    "COMDAT {name} names imported function {index}"
                                ))
                            })?;
                        join_comdat(&mut function.comdat, comdat, || {
                            format!("function {index}")
                        })?;
                        ComdatEntry::Function(index)
                    }
                    _ => {
                        return Err(ParseError::malformed(format!(
                            "invalid COMDAT entry type {kind}"
                        )))
                    }
                };
                entries.push(entry);
                Ok(())
            })?;

            comdats.push(Comdat { name, entries });
            Ok(())
        })
    }

    /// `reloc.<TARGET>`: target section index, then `(type, offset, index
    /// [, addend])` entries. The name suffix and the index must agree.
    fn parse_reloc_section(&mut self, target: &'a str, ctx: &mut ReadContext<'a>) -> Result<()> {
        if !self.object.sections.iter().any(|s| s.label() == target) {
            return Err(ParseError::new(ErrorKind::SectionNotFound(
                target.to_string(),
            )));
        }
        let section_index = ctx.read_var_u32()?;
        let sections = &self.object.sections;
        let section = sections.get(section_index as usize).ok_or_else(|| {
            ParseError::invalid_index(IndexSpace::Section, section_index, sections.len())
        })?;
        if section.label() != target {
            return Err(ParseError::malformed(format!(
                "relocations for {target} point at section {section_index} ({})",
                section.label()
            )));
        }
        if self.reloc_targets.contains(&section_index) {
            return Err(ParseError::duplicate(format!(
                "relocations for section {section_index} ({target})"
            )));
        }
        let section_len = section.content.len() as u64;

        let symbols = self
            .object
            .linking
            .as_ref()
            .map_or(&[][..], |linking| linking.symbol_table.as_slice());
        let num_types = self.object.signatures.len();
        let mut relocations = Vec::new();
        let mut last_offset = 0;
        read_entries(ctx, |ctx, _| {
            let code = ctx.read_var_u32()?;
            let ty = RelocType::from_u32(code)
                .ok_or_else(|| ParseError::malformed(format!("bad relocation type {code}")))?;
            let offset = ctx.read_var_u32()?;
            let index = ctx.read_var_u32()?;
            let addend = if ty.has_addend() {
                Some(ctx.read_var_i32()?)
            } else {
                None
            };

            match ty.target() {
                RelocTarget::Type if index as usize >= num_types => {
                    return Err(ParseError::invalid_index(IndexSpace::Type, index, num_types));
                }
                RelocTarget::Type => {}
                RelocTarget::Symbol(kind) => check_symbol(symbols, index, kind)?,
            }
            if offset < last_offset {
                return Err(ParseError::malformed(format!(
                    "relocation at offset {offset} follows one at offset {last_offset}"
                )));
            }
            if u64::from(offset) + u64::from(ty.patch_width()) > section_len {
                return Err(ParseError::malformed(format!(
                    "{} at offset {offset} patches past the end of {target} ({section_len} bytes)",
                    ty.name()
                )));
            }
            last_offset = offset;
            relocations.push(Relocation {
                ty,
                offset,
                index,
                addend,
            });
            Ok(())
        })?;

        debug!(
            "{} relocations for section {section_index} ({target})",
            relocations.len()
        );
        self.reloc_targets.push(section_index);
        self.object.sections[section_index as usize].relocations = relocations;
        Ok(())
    }

    fn parse_contract_section(
        &mut self,
        name: &str,
        which: ContractSection,
        ctx: &mut ReadContext<'a>,
    ) -> Result<()> {
        if self.contract_seen.contains(&which) {
            return Err(ParseError::duplicate(format!("{name} section")));
        }
        self.contract_seen.push(which);

        let contract = &mut self.object.contract;
        let list = match which {
            // One string per exported ABI, back to back without a count.
            ContractSection::Abi => {
                while !ctx.is_at_end() {
                    let entry = contract.abi.len() as u32;
                    let abi = ctx.read_string().map_err(|e| e.at_entry(entry))?;
                    contract.abi.push(abi);
                }
                debug!("{name}: {} entries", contract.abi.len());
                return Ok(());
            }
            ContractSection::AllowedImports => &mut contract.allowed_imports,
            ContractSection::Actions => &mut contract.actions,
            ContractSection::Notify => &mut contract.notify,
        };
        read_entries(ctx, |ctx, _| {
            list.push(ctx.read_string()?);
            Ok(())
        })?;
        debug!("{name}: {} entries", list.len());
        Ok(())
    }
}

//! WebAssembly object parser.
//!
//! One call to [`parse_object`] validates the header, frames every section in
//! stream order and hands each body to its section parser. The parsers share
//! a single [`ParseContext`] that accumulates the decoded tables; once the
//! input is exhausted the symbol table is resolved and the context is frozen
//! into a [`WasmObject`]. Any error aborts the whole parse.

mod custom;
mod standard;

use log::debug;

use crate::error::{ErrorKind, ParseError, Result};
use crate::object::WasmObject;
use crate::reader::ReadContext;
use crate::symbols::build_symbol_table;
use crate::types::{ContractSection, Header, Section, SectionKind, WASM_MAGIC, WASM_VERSION};

/// Parse a complete object file.
///
/// The returned object borrows section contents, names and code bodies from
/// `bytes`.
pub fn parse_object(bytes: &[u8]) -> Result<WasmObject<'_>> {
    let mut ctx = ReadContext::new(bytes);
    let header = parse_header(&mut ctx)?;
    let mut state = ParseContext::new(header);

    while !ctx.is_at_end() {
        let section = read_section(&mut ctx)?;
        state.parse_section(section)?;
    }

    state.finish()
}

fn parse_header(ctx: &mut ReadContext<'_>) -> Result<Header> {
    let magic = ctx.read_bytes(WASM_MAGIC.len())?;
    if magic != WASM_MAGIC {
        return Err(ParseError::new(ErrorKind::BadMagic));
    }
    let version = ctx.read_u32()?;
    if version != WASM_VERSION {
        return Err(ParseError::new(ErrorKind::BadVersion(version)));
    }
    Ok(Header {
        magic: WASM_MAGIC,
        version,
    })
}

/// Frame the next section: id byte, byte count, and (for custom sections) the
/// name. Relocations are attached later by the relocation section parser.
fn read_section<'a>(ctx: &mut ReadContext<'a>) -> Result<Section<'a>> {
    let offset = ctx.offset();
    let id = ctx.read_u8()?;
    let kind = SectionKind::from_id(id)
        .ok_or_else(|| ParseError::malformed(format!("bad section type {id} at offset {offset}")))?;
    let size = ctx.read_var_u32()? as usize;
    if size == 0 {
        return Err(ParseError::malformed("zero length section").in_section(kind.name()));
    }
    let mut body = ctx.frame(size).map_err(|e| e.in_section(kind.name()))?;

    let name = if kind == SectionKind::Custom {
        let name = body
            .read_string()
            .map_err(|e| e.overran_frame("custom section name").in_section(kind.name()))?;
        Some(name)
    } else {
        None
    };

    Ok(Section {
        kind,
        offset,
        content_offset: body.offset(),
        name,
        content: body.remaining_bytes(),
        relocations: Vec::new(),
    })
}

/// Read a count followed by that many entries, tagging errors with the entry
/// index.
pub(crate) fn read_entries<'a, F>(ctx: &mut ReadContext<'a>, mut read_entry: F) -> Result<()>
where
    F: FnMut(&mut ReadContext<'a>, u32) -> Result<()>,
{
    let count = ctx.read_var_u32()?;
    for i in 0..count {
        read_entry(ctx, i).map_err(|e| e.at_entry(i))?;
    }
    Ok(())
}

/// Mutable state of one parse.
pub(crate) struct ParseContext<'a> {
    pub(crate) object: WasmObject<'a>,
    last_standard: Option<SectionKind>,
    contract_seen: Vec<ContractSection>,
    /// Sections that already received a relocation section.
    reloc_targets: Vec<u32>,
}

impl<'a> ParseContext<'a> {
    fn new(header: Header) -> Self {
        Self {
            object: WasmObject::new(header),
            last_standard: None,
            contract_seen: Vec::new(),
            reloc_targets: Vec::new(),
        }
    }

    fn parse_section(&mut self, section: Section<'a>) -> Result<()> {
        let label = section.label();
        debug!(
            "section {} ({label}) at offset {}: {} bytes",
            self.object.sections.len(),
            section.offset,
            section.content.len()
        );

        self.check_order(section.kind)
            .map_err(|e| e.in_section(label))?;

        let mut body = ReadContext::with_base(section.content, section.content_offset);
        self.parse_section_body(&section, &mut body)
            .and_then(|()| body.expect_end("section"))
            .map_err(|e| e.overran_frame("section").in_section(label))?;

        self.object.sections.push(section);
        Ok(())
    }

    /// Standard sections must appear in id order, each at most once. Custom
    /// sections may appear anywhere.
    fn check_order(&mut self, kind: SectionKind) -> Result<()> {
        if kind == SectionKind::Custom {
            return Ok(());
        }
        match self.last_standard {
            Some(last) if last == kind => {
                return Err(ParseError::duplicate(format!("{kind} section")));
            }
            Some(last) if last > kind => {
                return Err(ParseError::malformed(format!(
                    "{kind} section out of order (after {last})"
                )));
            }
            _ => {}
        }
        self.last_standard = Some(kind);
        Ok(())
    }

    fn parse_section_body(&mut self, section: &Section<'a>, ctx: &mut ReadContext<'a>) -> Result<()> {
        match section.kind {
            SectionKind::Custom => self.parse_custom_section(section.label(), ctx),
            SectionKind::Type => self.parse_type_section(ctx),
            SectionKind::Import => self.parse_import_section(ctx),
            SectionKind::Function => self.parse_function_section(ctx),
            SectionKind::Table => self.parse_table_section(ctx),
            SectionKind::Memory => self.parse_memory_section(ctx),
            SectionKind::Global => self.parse_global_section(ctx),
            SectionKind::Export => self.parse_export_section(ctx),
            SectionKind::Start => self.parse_start_section(ctx),
            SectionKind::Elem => self.parse_elem_section(ctx),
            SectionKind::Code => self.parse_code_section(ctx),
            SectionKind::Data => self.parse_data_section(ctx),
        }
    }

    fn finish(mut self) -> Result<WasmObject<'a>> {
        if self.object.functions.len() != self.object.function_types.len() {
            return Err(ParseError::malformed(format!(
                "function section declares {} functions but the code section has {} bodies",
                self.object.function_types.len(),
                self.object.functions.len()
            )));
        }
        self.object.symbols = build_symbol_table(&self.object)?;
        Ok(self.object)
    }
}

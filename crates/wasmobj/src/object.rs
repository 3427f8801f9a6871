//! The decoded object and its read-only query surface.

use crate::symbols::{GlobalRef, Symbol, SymbolEntry};
use crate::types::{
    CombinedIndexSpace, ContractMetadata, DataSegment, ElemSegment, Export, Function,
    FunctionName, Global, GlobalType, Header, Import, ImportKind, Limits, LinkingData,
    Relocation, Section, Signature, TableType,
};

/// A parsed WebAssembly object file.
///
/// Built once by [`crate::parse_object`] and immutable afterwards. Byte and
/// string payloads borrow from the input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmObject<'a> {
    pub(crate) header: Header,
    pub(crate) sections: Vec<Section<'a>>,
    pub(crate) signatures: Vec<Signature>,
    /// Signature index of each defined function.
    pub(crate) function_types: Vec<u32>,
    pub(crate) imports: Vec<Import<'a>>,
    pub(crate) tables: Vec<TableType>,
    pub(crate) memories: Vec<Limits>,
    pub(crate) globals: Vec<Global<'a>>,
    pub(crate) exports: Vec<Export<'a>>,
    pub(crate) elem_segments: Vec<ElemSegment>,
    pub(crate) data_segments: Vec<DataSegment<'a>>,
    pub(crate) functions: Vec<Function<'a>>,
    pub(crate) debug_names: Vec<FunctionName<'a>>,
    pub(crate) start_function: Option<u32>,
    pub(crate) linking: Option<LinkingData<'a>>,
    pub(crate) contract: ContractMetadata<'a>,
    pub(crate) symbols: Vec<SymbolEntry>,
    pub(crate) num_imported_functions: u32,
    pub(crate) num_imported_globals: u32,
    pub(crate) num_imported_tables: u32,
    pub(crate) num_imported_memories: u32,
}

impl<'a> WasmObject<'a> {
    pub(crate) fn new(header: Header) -> Self {
        Self {
            header,
            sections: Vec::new(),
            signatures: Vec::new(),
            function_types: Vec::new(),
            imports: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            exports: Vec::new(),
            elem_segments: Vec::new(),
            data_segments: Vec::new(),
            functions: Vec::new(),
            debug_names: Vec::new(),
            start_function: None,
            linking: None,
            contract: ContractMetadata::default(),
            symbols: Vec::new(),
            num_imported_functions: 0,
            num_imported_globals: 0,
            num_imported_tables: 0,
            num_imported_memories: 0,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn sections(&self) -> &[Section<'a>] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section<'a>> {
        self.sections.get(index)
    }

    /// First section whose label (custom name or standard kind name) matches.
    pub fn section_by_name(&self, name: &str) -> Option<&Section<'a>> {
        self.sections.iter().find(|s| s.label() == name)
    }

    pub fn types(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn function_types(&self) -> &[u32] {
        &self.function_types
    }

    pub fn imports(&self) -> &[Import<'a>] {
        &self.imports
    }

    /// Tables defined in the table section (imports excluded).
    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    /// Memories defined in the memory section (imports excluded).
    pub fn memories(&self) -> &[Limits] {
        &self.memories
    }

    /// Globals defined in the global section (imports excluded).
    pub fn globals(&self) -> &[Global<'a>] {
        &self.globals
    }

    pub fn exports(&self) -> &[Export<'a>] {
        &self.exports
    }

    pub fn elements(&self) -> &[ElemSegment] {
        &self.elem_segments
    }

    pub fn data_segments(&self) -> &[DataSegment<'a>] {
        &self.data_segments
    }

    /// Defined functions, in code section order.
    pub fn functions(&self) -> &[Function<'a>] {
        &self.functions
    }

    pub fn debug_names(&self) -> &[FunctionName<'a>] {
        &self.debug_names
    }

    pub fn contract_metadata(&self) -> &ContractMetadata<'a> {
        &self.contract
    }

    /// The module's designated entry point, if it has a start section.
    pub fn start_function(&self) -> Option<u32> {
        self.start_function
    }

    pub fn linking(&self) -> Option<&LinkingData<'a>> {
        self.linking.as_ref()
    }

    /// Objects carrying a linking section are relocatable.
    pub fn is_relocatable(&self) -> bool {
        self.linking.is_some()
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.num_imported_functions
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.num_imported_globals
    }

    // ─── Index spaces ─────────────────────────────────────────────────────

    pub fn function_space(&self) -> CombinedIndexSpace {
        CombinedIndexSpace {
            imported: self.num_imported_functions,
            defined: self.function_types.len() as u32,
        }
    }

    pub fn global_space(&self) -> CombinedIndexSpace {
        CombinedIndexSpace {
            imported: self.num_imported_globals,
            defined: self.globals.len() as u32,
        }
    }

    pub fn table_space(&self) -> CombinedIndexSpace {
        CombinedIndexSpace {
            imported: self.num_imported_tables,
            defined: self.tables.len() as u32,
        }
    }

    pub fn memory_space(&self) -> CombinedIndexSpace {
        CombinedIndexSpace {
            imported: self.num_imported_memories,
            defined: self.memories.len() as u32,
        }
    }

    pub fn is_imported_function(&self, index: u32) -> bool {
        self.function_space().is_imported(index)
    }

    pub fn to_defined_function_index(&self, index: u32) -> Option<usize> {
        self.function_space().to_defined(index)
    }

    pub fn is_imported_global(&self, index: u32) -> bool {
        self.global_space().is_imported(index)
    }

    pub fn to_defined_global_index(&self, index: u32) -> Option<usize> {
        self.global_space().to_defined(index)
    }

    pub fn defined_function(&self, index: u32) -> Option<&Function<'a>> {
        self.to_defined_function_index(index)
            .and_then(|i| self.functions.get(i))
    }

    pub fn defined_global(&self, index: u32) -> Option<&Global<'a>> {
        self.to_defined_global_index(index)
            .and_then(|i| self.globals.get(i))
    }

    /// The `n`-th function import, i.e. combined function index `n`.
    pub fn function_import(&self, n: u32) -> Option<(&Import<'a>, u32)> {
        self.imports
            .iter()
            .filter_map(|import| match import.kind {
                ImportKind::Function(sig) => Some((import, sig)),
                _ => None,
            })
            .nth(n as usize)
    }

    /// The `n`-th global import, i.e. combined global index `n`.
    pub fn global_import(&self, n: u32) -> Option<(usize, &Import<'a>, &GlobalType)> {
        self.imports
            .iter()
            .enumerate()
            .filter_map(|(pos, import)| match &import.kind {
                ImportKind::Global(ty) => Some((pos, import, ty)),
                _ => None,
            })
            .nth(n as usize)
    }

    /// Signature of any function in the combined index space.
    pub fn function_signature(&self, index: u32) -> Option<&Signature> {
        let sig = match self.to_defined_function_index(index) {
            Some(defined) => *self.function_types.get(defined)?,
            None => self.function_import(index)?.1,
        };
        self.signatures.get(sig as usize)
    }

    /// Type of any global in the combined index space.
    pub fn global_type(&self, index: u32) -> Option<&GlobalType> {
        match self.to_defined_global_index(index) {
            Some(defined) => self.globals.get(defined).map(|g| &g.ty),
            None => self.global_import(index).map(|(_, _, ty)| ty),
        }
    }

    // ─── Symbols and relocations ──────────────────────────────────────────

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol(&self, index: usize) -> Option<Symbol<'_, 'a>> {
        let info = self.linking.as_ref()?.symbol_table.get(index)?;
        let entry = self.symbols.get(index)?;
        let global_type = entry.global.and_then(|global| match global {
            GlobalRef::Imported(pos) => match &self.imports.get(pos)?.kind {
                ImportKind::Global(ty) => Some(ty),
                _ => None,
            },
            GlobalRef::Defined(pos) => self.globals.get(pos).map(|g| &g.ty),
        });
        Some(Symbol {
            index: index as u32,
            info,
            signature: entry
                .signature
                .and_then(|sig| self.signatures.get(sig as usize)),
            global_type,
            value: entry.value,
        })
    }

    /// Symbols in symbol table order.
    pub fn symbols(&self) -> impl Iterator<Item = Symbol<'_, 'a>> + '_ {
        (0..self.symbols.len()).filter_map(move |i| self.symbol(i))
    }

    /// Every relocation, tagged with the index of the section it patches.
    pub fn relocations(&self) -> impl Iterator<Item = (usize, &Relocation)> + '_ {
        self.sections
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.relocations.iter().map(move |r| (i, r)))
    }
}

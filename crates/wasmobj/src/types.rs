//! Decoded representation of a WebAssembly object file.
//!
//! String and byte payloads borrow from the input buffer (`'a`); everything
//! else is owned. Index fields use the combined index space of their
//! category (imports first, then definitions) unless stated otherwise.

use std::fmt;

/// `\0asm`
pub const WASM_MAGIC: [u8; 4] = *b"\0asm";
pub const WASM_VERSION: u32 = 1;
/// Version of the "linking" custom section layout.
pub const METADATA_VERSION: u32 = 1;

pub(crate) const FUNC_FORM: u8 = 0x60;
pub(crate) const FUNCREF: u8 = 0x70;
pub(crate) const LIMITS_FLAG_HAS_MAX: u32 = 0x1;

pub(crate) mod opcode {
    pub const END: u8 = 0x0b;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const F32_CONST: u8 = 0x43;
    pub const F64_CONST: u8 = 0x44;
}

/// Module header: magic and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
}

/// Section id. Standard sections must appear in the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Elem,
    Code,
    Data,
}

impl SectionKind {
    const ALL: [SectionKind; 12] = [
        SectionKind::Custom,
        SectionKind::Type,
        SectionKind::Import,
        SectionKind::Function,
        SectionKind::Table,
        SectionKind::Memory,
        SectionKind::Global,
        SectionKind::Export,
        SectionKind::Start,
        SectionKind::Elem,
        SectionKind::Code,
        SectionKind::Data,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Upper-case name, as used in relocation section names (`reloc.CODE`).
    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Custom => "CUSTOM",
            SectionKind::Type => "TYPE",
            SectionKind::Import => "IMPORT",
            SectionKind::Function => "FUNCTION",
            SectionKind::Table => "TABLE",
            SectionKind::Memory => "MEMORY",
            SectionKind::Global => "GLOBAL",
            SectionKind::Export => "EXPORT",
            SectionKind::Start => "START",
            SectionKind::Elem => "ELEM",
            SectionKind::Code => "CODE",
            SectionKind::Data => "DATA",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One framed section of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub kind: SectionKind,
    /// Offset of the section id byte in the input.
    pub offset: usize,
    /// Offset of `content[0]` in the input.
    pub content_offset: usize,
    /// Custom sections only.
    pub name: Option<&'a str>,
    /// Section payload, after the header (and after the name for custom sections).
    pub content: &'a [u8],
    pub relocations: Vec<Relocation>,
}

impl<'a> Section<'a> {
    /// The custom name, or the standard kind name.
    pub fn label(&self) -> &'a str {
        self.name.unwrap_or(self.kind.name())
    }
}

/// WebAssembly value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
}

impl ValType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7f => Some(ValType::I32),
            0x7e => Some(ValType::I64),
            0x7d => Some(ValType::F32),
            0x7c => Some(ValType::F64),
            0x7b => Some(ValType::V128),
            _ => None,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::V128 => write!(f, "v128"),
        }
    }
}

/// Function signature from the type section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |tys: &[ValType]| {
            tys.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// Size limits of a table or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub flags: u32,
    pub initial: u32,
    pub maximum: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    /// Always `funcref` (0x70).
    pub elem_type: u8,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub val_type: ValType,
    pub mutable: bool,
}

/// Constant initializer expression: one instruction followed by `end`.
///
/// Float constants are kept as raw bits so decoded modules compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    /// Reads an imported global.
    GlobalGet(u32),
}

impl fmt::Display for InitExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitExpr::I32Const(v) => write!(f, "i32.const {v}"),
            InitExpr::I64Const(v) => write!(f, "i64.const {v}"),
            InitExpr::F32Const(bits) => write!(f, "f32.const {}", f32::from_bits(*bits)),
            InitExpr::F64Const(bits) => write!(f, "f64.const {}", f64::from_bits(*bits)),
            InitExpr::GlobalGet(idx) => write!(f, "global.get {idx}"),
        }
    }
}

/// A global defined in the global section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global<'a> {
    pub index: u32,
    pub ty: GlobalType,
    pub init: InitExpr,
    /// First symbol naming this global in the linking section.
    pub symbol_name: Option<&'a str>,
}

/// Kind tag shared by imports and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ExternalKind::Function),
            1 => Some(ExternalKind::Table),
            2 => Some(ExternalKind::Memory),
            3 => Some(ExternalKind::Global),
            _ => None,
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalKind::Function => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Signature index into the type section.
    Function(u32),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

impl ImportKind {
    pub fn external_kind(&self) -> ExternalKind {
        match self {
            ImportKind::Function(_) => ExternalKind::Function,
            ImportKind::Table(_) => ExternalKind::Table,
            ImportKind::Memory(_) => ExternalKind::Memory,
            ImportKind::Global(_) => ExternalKind::Global,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Import<'a> {
    pub module: &'a str,
    pub field: &'a str,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export<'a> {
    pub name: &'a str,
    pub kind: ExternalKind,
    pub index: u32,
}

/// Active element segment initializing a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElemSegment {
    pub table_index: u32,
    pub offset: InitExpr,
    pub functions: Vec<u32>,
}

/// Run of `count` locals sharing one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecl {
    pub count: u32,
    pub val_type: ValType,
}

/// A defined function: its code section entry plus linker-assigned names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function<'a> {
    /// Index in the combined function index space.
    pub index: u32,
    /// Offset of the entry (including its size field) within the code section.
    pub code_section_offset: u32,
    /// Size of the entry including its size field.
    pub size: u32,
    pub locals: Vec<LocalDecl>,
    /// Instruction bytes; not decoded at this layer.
    pub body: &'a [u8],
    pub debug_name: Option<&'a str>,
    pub symbol_name: Option<&'a str>,
    /// Index into [`LinkingData::comdats`].
    pub comdat: Option<u32>,
}

/// Active data segment initializing a memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment<'a> {
    /// Offset of the segment entry within the data section.
    pub section_offset: u32,
    pub memory_index: u32,
    pub offset: InitExpr,
    pub content: &'a [u8],
    /// The fields below come from the linking section's segment info.
    pub name: Option<&'a str>,
    pub alignment: u32,
    pub flags: u32,
    pub comdat: Option<u32>,
}

/// Entry of the "name" section's function-name map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionName<'a> {
    pub index: u32,
    pub name: &'a str,
}

/// Relocation types understood by this reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocType {
    FunctionIndexLeb,
    TableIndexSleb,
    TableIndexI32,
    MemoryAddrLeb,
    MemoryAddrSleb,
    MemoryAddrI32,
    TypeIndexLeb,
    GlobalIndexLeb,
    FunctionOffsetI32,
    SectionOffsetI32,
}

/// What a relocation's `index` field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    /// An entry of the type section.
    Type,
    /// A symbol of the given kind.
    Symbol(SymbolKind),
}

impl RelocType {
    pub fn from_u32(value: u32) -> Option<Self> {
        let ty = match value {
            0 => RelocType::FunctionIndexLeb,
            1 => RelocType::TableIndexSleb,
            2 => RelocType::TableIndexI32,
            3 => RelocType::MemoryAddrLeb,
            4 => RelocType::MemoryAddrSleb,
            5 => RelocType::MemoryAddrI32,
            6 => RelocType::TypeIndexLeb,
            7 => RelocType::GlobalIndexLeb,
            8 => RelocType::FunctionOffsetI32,
            9 => RelocType::SectionOffsetI32,
            _ => return None,
        };
        Some(ty)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            RelocType::FunctionIndexLeb => "R_WEBASSEMBLY_FUNCTION_INDEX_LEB",
            RelocType::TableIndexSleb => "R_WEBASSEMBLY_TABLE_INDEX_SLEB",
            RelocType::TableIndexI32 => "R_WEBASSEMBLY_TABLE_INDEX_I32",
            RelocType::MemoryAddrLeb => "R_WEBASSEMBLY_MEMORY_ADDR_LEB",
            RelocType::MemoryAddrSleb => "R_WEBASSEMBLY_MEMORY_ADDR_SLEB",
            RelocType::MemoryAddrI32 => "R_WEBASSEMBLY_MEMORY_ADDR_I32",
            RelocType::TypeIndexLeb => "R_WEBASSEMBLY_TYPE_INDEX_LEB",
            RelocType::GlobalIndexLeb => "R_WEBASSEMBLY_GLOBAL_INDEX_LEB",
            RelocType::FunctionOffsetI32 => "R_WEBASSEMBLY_FUNCTION_OFFSET_I32",
            RelocType::SectionOffsetI32 => "R_WEBASSEMBLY_SECTION_OFFSET_I32",
        }
    }

    pub fn target(self) -> RelocTarget {
        match self {
            RelocType::FunctionIndexLeb
            | RelocType::TableIndexSleb
            | RelocType::TableIndexI32
            | RelocType::FunctionOffsetI32 => RelocTarget::Symbol(SymbolKind::Function),
            RelocType::MemoryAddrLeb | RelocType::MemoryAddrSleb | RelocType::MemoryAddrI32 => {
                RelocTarget::Symbol(SymbolKind::Data)
            }
            RelocType::TypeIndexLeb => RelocTarget::Type,
            RelocType::GlobalIndexLeb => RelocTarget::Symbol(SymbolKind::Global),
            RelocType::SectionOffsetI32 => RelocTarget::Symbol(SymbolKind::Section),
        }
    }

    pub fn has_addend(self) -> bool {
        matches!(
            self,
            RelocType::MemoryAddrLeb
                | RelocType::MemoryAddrSleb
                | RelocType::MemoryAddrI32
                | RelocType::FunctionOffsetI32
                | RelocType::SectionOffsetI32
        )
    }

    /// Number of bytes patched at the relocation offset.
    pub fn patch_width(self) -> u32 {
        match self {
            RelocType::TableIndexI32
            | RelocType::MemoryAddrI32
            | RelocType::FunctionOffsetI32
            | RelocType::SectionOffsetI32 => 4,
            _ => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub ty: RelocType,
    /// Offset within the target section's content.
    pub offset: u32,
    /// Symbol index, or type index for [`RelocType::TypeIndexLeb`].
    pub index: u32,
    pub addend: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Data,
    Global,
    Section,
}

impl SymbolKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SymbolKind::Function),
            1 => Some(SymbolKind::Data),
            2 => Some(SymbolKind::Global),
            3 => Some(SymbolKind::Section),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Function => "FUNCTION",
            SymbolKind::Data => "DATA",
            SymbolKind::Global => "GLOBAL",
            SymbolKind::Section => "SECTION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Global,
    Weak,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Default,
    Hidden,
}

/// Raw symbol flags from the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolFlags(pub u32);

impl SymbolFlags {
    pub const BINDING_MASK: u32 = 0x3;
    pub const BINDING_GLOBAL: u32 = 0x0;
    pub const BINDING_WEAK: u32 = 0x1;
    pub const BINDING_LOCAL: u32 = 0x2;
    pub const VISIBILITY_MASK: u32 = 0x4;
    pub const VISIBILITY_HIDDEN: u32 = 0x4;
    pub const UNDEFINED: u32 = 0x10;

    /// `None` for the reserved binding value 3.
    pub fn binding(self) -> Option<Binding> {
        match self.0 & Self::BINDING_MASK {
            Self::BINDING_GLOBAL => Some(Binding::Global),
            Self::BINDING_WEAK => Some(Binding::Weak),
            Self::BINDING_LOCAL => Some(Binding::Local),
            _ => None,
        }
    }

    pub fn visibility(self) -> Visibility {
        if self.0 & Self::VISIBILITY_MASK == Self::VISIBILITY_HIDDEN {
            Visibility::Hidden
        } else {
            Visibility::Default
        }
    }

    pub fn is_undefined(self) -> bool {
        self.0 & Self::UNDEFINED != 0
    }
}

/// Location of a defined data symbol inside a data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRef {
    pub segment: u32,
    pub offset: u32,
    pub size: u32,
}

/// Kind-specific payload of a symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTarget {
    /// Combined function index.
    Function(u32),
    /// Combined global index.
    Global(u32),
    /// `None` for undefined data symbols.
    Data(Option<DataRef>),
    /// Index into the object's section list.
    Section(u32),
}

/// One entry of the linking section's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo<'a> {
    pub name: &'a str,
    pub flags: SymbolFlags,
    /// Import module, for undefined function symbols.
    pub module: Option<&'a str>,
    pub target: SymbolTarget,
}

impl SymbolInfo<'_> {
    pub fn kind(&self) -> SymbolKind {
        match self.target {
            SymbolTarget::Function(_) => SymbolKind::Function,
            SymbolTarget::Global(_) => SymbolKind::Global,
            SymbolTarget::Data(_) => SymbolKind::Data,
            SymbolTarget::Section(_) => SymbolKind::Section,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitFunc {
    pub priority: u32,
    /// Index of a function symbol.
    pub symbol: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComdatEntry {
    /// Data segment index.
    Data(u32),
    /// Combined function index of a defined function.
    Function(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comdat<'a> {
    pub name: &'a str,
    pub entries: Vec<ComdatEntry>,
}

/// Contents of the "linking" custom section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkingData<'a> {
    pub version: u32,
    pub symbol_table: Vec<SymbolInfo<'a>>,
    pub init_functions: Vec<InitFunc>,
    pub comdats: Vec<Comdat<'a>>,
}

/// The fixed set of contract metadata sections, each a plain string list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractSection {
    AllowedImports,
    Actions,
    Notify,
    Abi,
}

impl ContractSection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            ".imports" => Some(ContractSection::AllowedImports),
            ".snax_actions" => Some(ContractSection::Actions),
            ".snax_notify" => Some(ContractSection::Notify),
            ".snax_abi" => Some(ContractSection::Abi),
            _ => None,
        }
    }
}

/// Application metadata carried in the contract sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractMetadata<'a> {
    pub allowed_imports: Vec<&'a str>,
    pub actions: Vec<&'a str>,
    pub notify: Vec<&'a str>,
    /// One JSON document per `.snax_abi` string, in section order.
    pub abi: Vec<&'a str>,
}

/// Imported-then-defined index space of one entity category.
///
/// Indices `[0, imported)` name imports, `[imported, imported + defined)` name
/// local definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedIndexSpace {
    pub imported: u32,
    pub defined: u32,
}

impl CombinedIndexSpace {
    pub fn total(&self) -> u32 {
        self.imported + self.defined
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.total()
    }

    pub fn is_imported(&self, index: u32) -> bool {
        index < self.imported
    }

    pub fn is_defined(&self, index: u32) -> bool {
        self.contains(index) && !self.is_imported(index)
    }

    /// Position among the local definitions, if `index` names one.
    pub fn to_defined(&self, index: u32) -> Option<usize> {
        self.is_defined(index)
            .then(|| (index - self.imported) as usize)
    }
}

//! Byte-level encoders for building test inputs, including custom sections
//! the text format cannot express.

use crate::types::{SectionKind, SymbolFlags, WASM_MAGIC, WASM_VERSION};

pub(crate) fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn sleb(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// `value` as a five-byte LEB128, the fixed width linkers leave in section
/// headers so sizes can be patched in place.
pub(crate) fn padded_uleb32(value: u32) -> [u8; 5] {
    let mut out = [0u8; 5];
    for (i, byte) in out.iter_mut().enumerate() {
        let continuation = if i < 4 { 0x80 } else { 0x00 };
        *byte = ((value >> (7 * i)) & 0x7f) as u8 | continuation;
    }
    out
}

/// Chainable byte encoder.
#[derive(Debug, Default)]
pub(crate) struct Enc(Vec<u8>);

impl Enc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn uleb(mut self, v: u64) -> Self {
        self.0.extend(uleb(v));
        self
    }

    pub fn padded_uleb(mut self, v: u32) -> Self {
        self.0.extend(padded_uleb32(v));
        self
    }

    pub fn sleb(mut self, v: i64) -> Self {
        self.0.extend(sleb(v));
        self
    }

    pub fn str(self, s: &str) -> Self {
        self.uleb(s.len() as u64).bytes(s.as_bytes())
    }

    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.0.extend_from_slice(b);
        self
    }

    /// Sub-section framing used by the "name" and "linking" sections.
    pub fn sub(self, id: u8, body: Vec<u8>) -> Self {
        self.u8(id).uleb(body.len() as u64).bytes(&body)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

pub(crate) fn section(kind: SectionKind, body: Vec<u8>) -> Vec<u8> {
    Enc::new()
        .u8(kind.id())
        .uleb(body.len() as u64)
        .bytes(&body)
        .into_bytes()
}

pub(crate) fn custom_section(name: &str, content: Vec<u8>) -> Vec<u8> {
    let body = Enc::new().str(name).bytes(&content).into_bytes();
    section(SectionKind::Custom, body)
}

/// Split a framed section into its id and body (name included for custom
/// sections).
pub(crate) fn split_section(part: &[u8]) -> (u8, Vec<u8>) {
    let mut ctx = crate::reader::ReadContext::new(&part[1..]);
    let size = ctx.read_var_u32().unwrap() as usize;
    (part[0], ctx.read_bytes(size).unwrap().to_vec())
}

pub(crate) fn module(sections: &[&[u8]]) -> Vec<u8> {
    let mut out = WASM_MAGIC.to_vec();
    out.extend(WASM_VERSION.to_le_bytes());
    for s in sections {
        out.extend_from_slice(s);
    }
    out
}

/// `() -> ()` type, one function of that type, one empty body.
pub(crate) const MINIMAL_MODULE: [u8; 24] = [
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
    0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type
    0x03, 0x02, 0x01, 0x00, // function
    0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b, // code
];

/// Code section with `n` bodies containing only `end`.
pub(crate) fn empty_body_code_section(n: u32) -> Vec<u8> {
    let mut body = Enc::new().uleb(u64::from(n));
    for _ in 0..n {
        body = body.bytes(&[0x02, 0x00, 0x0b]);
    }
    section(SectionKind::Code, body.into_bytes())
}

pub(crate) const LOCAL: u64 = SymbolFlags::BINDING_LOCAL as u64;
pub(crate) const HIDDEN: u64 = SymbolFlags::VISIBILITY_HIDDEN as u64;
pub(crate) const UNDEFINED: u64 = SymbolFlags::UNDEFINED as u64;

pub(crate) fn type_section() -> Vec<u8> {
    section(
        SectionKind::Type,
        Enc::new()
            .uleb(2)
            .bytes(&[0x60, 0x00, 0x00])
            .bytes(&[0x60, 0x01, 0x7f, 0x01, 0x7f])
            .into_bytes(),
    )
}

pub(crate) fn import_section() -> Vec<u8> {
    section(
        SectionKind::Import,
        Enc::new()
            .uleb(3)
            .str("env")
            .str("ext_func")
            .u8(0)
            .uleb(1)
            .str("env")
            .str("__stack_pointer")
            .u8(3)
            .bytes(&[0x7f, 0x01])
            .str("env")
            .str("memory")
            .u8(2)
            .bytes(&[0x00, 0x01])
            .into_bytes(),
    )
}

pub(crate) fn code_section() -> Vec<u8> {
    // func 1: i32.const 42; call 0 (padded LEB); drop; end
    let body0 = [
        0x00, 0x41, 0x2a, 0x10, 0x80, 0x80, 0x80, 0x80, 0x00, 0x1a, 0x0b,
    ];
    // func 2: one i64 local; local.get 0; end
    let body1 = [0x01, 0x01, 0x7e, 0x20, 0x00, 0x0b];
    section(
        SectionKind::Code,
        Enc::new()
            .uleb(2)
            .uleb(body0.len() as u64)
            .bytes(&body0)
            .uleb(body1.len() as u64)
            .bytes(&body1)
            .into_bytes(),
    )
}

pub(crate) fn data_section() -> Vec<u8> {
    section(
        SectionKind::Data,
        Enc::new()
            .uleb(1)
            .uleb(0)
            .bytes(&[0x41, 0x10, 0x0b])
            .str("hello\0")
            .into_bytes(),
    )
}

/// Symbol table: main, ext_func (undefined), helper (local hidden),
/// greeting (data), __stack_pointer (undefined global), counter (local
/// global), CODE (section), extern_data (undefined data).
pub(crate) fn symbol_table() -> Vec<u8> {
    Enc::new()
        .uleb(8)
        .u8(0)
        .uleb(0)
        .uleb(1)
        .str("main")
        .u8(0)
        .uleb(UNDEFINED)
        .uleb(0)
        .u8(0)
        .uleb(LOCAL | HIDDEN)
        .uleb(2)
        .str("helper")
        .u8(1)
        .uleb(0)
        .str("greeting")
        .uleb(0)
        .uleb(0)
        .uleb(6)
        .u8(2)
        .uleb(UNDEFINED)
        .uleb(0)
        .u8(2)
        .uleb(LOCAL)
        .uleb(1)
        .str("counter")
        .u8(3)
        .uleb(LOCAL)
        .uleb(5)
        .u8(1)
        .uleb(UNDEFINED)
        .str("extern_data")
        .into_bytes()
}

pub(crate) fn linking_section() -> Vec<u8> {
    let segment_info = Enc::new()
        .uleb(1)
        .str(".rodata.greeting")
        .uleb(0)
        .uleb(0)
        .into_bytes();
    let init_funcs = Enc::new().uleb(1).uleb(65535).uleb(2).into_bytes();
    let comdats = Enc::new()
        .uleb(1)
        .str("comdat_helper")
        .uleb(0)
        .uleb(1)
        .uleb(1)
        .uleb(2)
        .into_bytes();
    custom_section(
        "linking",
        Enc::new()
            .uleb(1)
            .sub(8, symbol_table())
            .sub(5, segment_info)
            .sub(6, init_funcs)
            .sub(7, comdats)
            .into_bytes(),
    )
}

/// A relocatable object exercising every section parser. Section indices:
/// 0 TYPE, 1 IMPORT, 2 FUNCTION, 3 GLOBAL, 4 EXPORT, 5 CODE, 6 DATA,
/// 7 name, 8 linking, 9 reloc.CODE, 10 reloc.DATA, 11-13 contract metadata.
pub(crate) fn relocatable_object_parts() -> Vec<Vec<u8>> {
    let names = Enc::new()
        .sub(
            1,
            Enc::new()
                .uleb(2)
                .uleb(1)
                .str("main")
                .uleb(2)
                .str("helper")
                .into_bytes(),
        )
        .sub(2, vec![0x00])
        .into_bytes();
    let reloc_code = Enc::new()
        .uleb(5)
        .uleb(2)
        .uleb(4)
        .uleb(4)
        .uleb(3)
        .sleb(0)
        .uleb(0)
        .uleb(6)
        .uleb(1)
        .into_bytes();
    let reloc_data = Enc::new()
        .uleb(6)
        .uleb(1)
        .uleb(5)
        .uleb(6)
        .uleb(3)
        .sleb(4)
        .into_bytes();

    vec![
        type_section(),
        import_section(),
        section(SectionKind::Function, vec![0x02, 0x00, 0x01]),
        section(
            SectionKind::Global,
            vec![0x01, 0x7f, 0x00, 0x41, 0x07, 0x0b],
        ),
        section(
            SectionKind::Export,
            Enc::new().uleb(1).str("main").u8(0).uleb(1).into_bytes(),
        ),
        code_section(),
        data_section(),
        custom_section("name", names),
        linking_section(),
        custom_section("reloc.CODE", reloc_code),
        custom_section("reloc.DATA", reloc_data),
        custom_section(
            ".snax_actions",
            Enc::new().uleb(2).str("transfer").str("issue").into_bytes(),
        ),
        custom_section(".imports", Enc::new().uleb(1).str("env.ext_func").into_bytes()),
        custom_section(
            ".snax_abi",
            Enc::new().str("{\"version\":\"snax::abi/1.1\"}").into_bytes(),
        ),
    ]
}

pub(crate) fn relocatable_object() -> Vec<u8> {
    let parts = relocatable_object_parts();
    let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    module(&refs)
}

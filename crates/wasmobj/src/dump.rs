//! Human-readable listings of a parsed object, in the spirit of
//! `objdump -h -t -r`.

use crate::object::WasmObject;
use crate::symbols::Symbol;
use crate::types::{Binding, RelocTarget, Relocation, Visibility};

/// Which listings [`dump`] renders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    pub headers: bool,
    pub symbols: bool,
    pub relocs: bool,
}

impl DumpOptions {
    pub fn all() -> Self {
        Self {
            headers: true,
            symbols: true,
            relocs: true,
        }
    }
}

/// Render the selected listings. Section headers are shown when nothing is
/// selected.
pub fn dump(obj: &WasmObject<'_>, options: &DumpOptions) -> String {
    let options = if *options == DumpOptions::default() {
        DumpOptions {
            headers: true,
            ..DumpOptions::default()
        }
    } else {
        *options
    };

    let mut out = format!(
        "file format wasm version {}{}\n",
        obj.header().version,
        if obj.is_relocatable() {
            " (relocatable)"
        } else {
            ""
        }
    );
    if options.headers {
        out.push('\n');
        out.push_str(&section_headers(obj));
    }
    if options.symbols {
        out.push('\n');
        out.push_str(&symbol_table(obj));
    }
    if options.relocs {
        out.push_str(&relocations(obj));
    }
    out
}

pub fn section_headers(obj: &WasmObject<'_>) -> String {
    let mut out = String::from("Sections:\nIdx Name               Size     Offset   Relocs\n");
    for (idx, section) in obj.sections().iter().enumerate() {
        out.push_str(&format!(
            "{idx:>3} {:<18} {:08x} {:08x} {:>6}\n",
            section.label(),
            section.content.len(),
            section.content_offset,
            section.relocations.len()
        ));
    }
    out
}

pub fn symbol_table(obj: &WasmObject<'_>) -> String {
    let mut out = String::from("SYMBOL TABLE:\n");
    for symbol in obj.symbols() {
        out.push_str(&symbol_line(&symbol));
        out.push('\n');
    }
    out
}

fn symbol_line(symbol: &Symbol<'_, '_>) -> String {
    let binding = match symbol.binding() {
        Binding::Global => "global",
        Binding::Weak => "weak",
        Binding::Local => "local",
    };
    let visibility = match symbol.visibility() {
        Visibility::Default => "default",
        Visibility::Hidden => "hidden",
    };
    let status = if symbol.is_defined() {
        "defined"
    } else {
        "undefined"
    };

    let mut line = format!(
        "{:>3} {:<8} {binding:<6} {visibility:<7} {status:<9} {:>8} {}",
        symbol.index,
        symbol.kind().to_string(),
        symbol.value(),
        symbol.name()
    );
    if let Some(sig) = symbol.signature {
        line.push_str(&format!(" {sig}"));
    }
    if let Some(ty) = symbol.global_type {
        let mutability = if ty.mutable { " mut" } else { "" };
        line.push_str(&format!(" {}{mutability}", ty.val_type));
    }
    if let Some(module) = symbol.info.module {
        line.push_str(&format!(" (from {module})"));
    }
    line
}

/// One block per section that carries relocations.
pub fn relocations(obj: &WasmObject<'_>) -> String {
    let mut out = String::new();
    for section in obj.sections() {
        if section.relocations.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "\nRELOCATION RECORDS FOR [{}]:\nOFFSET   TYPE                               VALUE\n",
            section.label()
        ));
        for reloc in &section.relocations {
            out.push_str(&format!(
                "{:08x} {:<34} {}\n",
                reloc.offset,
                reloc.ty.name(),
                reloc_value(obj, reloc)
            ));
        }
    }
    out
}

fn reloc_value(obj: &WasmObject<'_>, reloc: &Relocation) -> String {
    let target = match reloc.ty.target() {
        RelocTarget::Type => format!("type {}", reloc.index),
        RelocTarget::Symbol(_) => obj
            .symbol(reloc.index as usize)
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| format!("symbol {}", reloc.index)),
    };
    match reloc.addend {
        Some(addend) => format!("{target}{addend:+}"),
        None => target,
    }
}

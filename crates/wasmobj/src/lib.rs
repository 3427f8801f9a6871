//! wasmobj: reader for relocatable WebAssembly object files.
//!
//! Decodes the standard module sections together with the metadata a linker
//! needs: the "linking" section (symbol table, segment info, init functions,
//! COMDAT groups), `reloc.*` relocation sections, the "name" section and the
//! contract metadata sections. Every cross-reference is validated while
//! parsing; the first inconsistency aborts the parse with a [`ParseError`]
//! naming the section and entry at fault.
//!
//! # Example
//! ```no_run
//! let bytes = std::fs::read("input.o").unwrap();
//! let obj = wasmobj::parse_object(&bytes).unwrap();
//! for symbol in obj.symbols() {
//!     println!("{} {} = {}", symbol.kind(), symbol.name(), symbol.value());
//! }
//! ```

pub mod dump;
pub mod error;
pub mod object;
pub mod parser;
pub mod reader;
pub mod symbols;
pub mod types;

#[cfg(test)]
mod testutil;

pub use dump::{dump, DumpOptions};
pub use error::{ErrorCategory, ErrorKind, IndexSpace, Location, ParseError, Result};
pub use object::WasmObject;
pub use parser::parse_object;
pub use symbols::Symbol;

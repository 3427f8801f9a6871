//! Standard section parsers.
//!
//! Each reads a count and then that many fixed-shape entries, validating
//! indices against the tables built by earlier sections.

use std::collections::HashSet;

use super::{read_entries, ParseContext};
use crate::error::{IndexSpace, ParseError, Result};
use crate::reader::ReadContext;
use crate::types::{
    opcode, DataSegment, ElemSegment, Export, ExternalKind, Function, Global, GlobalType, Import,
    ImportKind, InitExpr, Limits, LocalDecl, Signature, TableType, ValType, FUNCREF, FUNC_FORM,
    LIMITS_FLAG_HAS_MAX,
};

fn read_val_type(ctx: &mut ReadContext<'_>) -> Result<ValType> {
    let offset = ctx.offset();
    let byte = ctx.read_u8()?;
    ValType::from_byte(byte).ok_or_else(|| {
        ParseError::malformed(format!("invalid value type 0x{byte:02x} at offset {offset}"))
    })
}

fn read_val_types(ctx: &mut ReadContext<'_>) -> Result<Vec<ValType>> {
    let mut types = Vec::new();
    read_entries(ctx, |ctx, _| {
        types.push(read_val_type(ctx)?);
        Ok(())
    })?;
    Ok(types)
}

fn read_limits(ctx: &mut ReadContext<'_>) -> Result<Limits> {
    let flags = ctx.read_var_u32()?;
    let initial = ctx.read_var_u32()?;
    let maximum = if flags & LIMITS_FLAG_HAS_MAX != 0 {
        let max = ctx.read_var_u32()?;
        if max < initial {
            return Err(ParseError::malformed(format!(
                "limits maximum {max} is below minimum {initial}"
            )));
        }
        Some(max)
    } else {
        None
    };
    Ok(Limits {
        flags,
        initial,
        maximum,
    })
}

fn read_table_type(ctx: &mut ReadContext<'_>) -> Result<TableType> {
    let elem_type = ctx.read_u8()?;
    if elem_type != FUNCREF {
        return Err(ParseError::malformed(format!(
            "invalid table element type 0x{elem_type:02x}"
        )));
    }
    Ok(TableType {
        elem_type,
        limits: read_limits(ctx)?,
    })
}

fn read_global_type(ctx: &mut ReadContext<'_>) -> Result<GlobalType> {
    Ok(GlobalType {
        val_type: read_val_type(ctx)?,
        mutable: ctx.read_var_u1()?,
    })
}

fn check_index(space: IndexSpace, index: u32, limit: u32) -> Result<u32> {
    if index < limit {
        Ok(index)
    } else {
        Err(ParseError::invalid_index(space, index, limit as usize))
    }
}

impl<'a> ParseContext<'a> {
    /// One constant instruction followed by `end`. `global.get` may only read
    /// an imported global.
    fn read_init_expr(&self, ctx: &mut ReadContext<'a>) -> Result<InitExpr> {
        let offset = ctx.offset();
        let expr = match ctx.read_u8()? {
            opcode::I32_CONST => InitExpr::I32Const(ctx.read_var_i32()?),
            opcode::I64_CONST => InitExpr::I64Const(ctx.read_var_i64()?),
            opcode::F32_CONST => InitExpr::F32Const(ctx.read_u32()?),
            opcode::F64_CONST => InitExpr::F64Const(ctx.read_u64()?),
            opcode::GLOBAL_GET => {
                let index = ctx.read_var_u32()?;
                InitExpr::GlobalGet(check_index(
                    IndexSpace::Global,
                    index,
                    self.object.num_imported_globals,
                )?)
            }
            op => {
                return Err(ParseError::malformed(format!(
                    "invalid opcode 0x{op:02x} in init expression at offset {offset}"
                )))
            }
        };
        if ctx.read_u8()? != opcode::END {
            return Err(ParseError::malformed(format!(
                "init expression at offset {offset} is not a single constant followed by end"
            )));
        }
        Ok(expr)
    }

    pub(super) fn parse_type_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let form = ctx.read_u8()?;
            if form != FUNC_FORM {
                return Err(ParseError::malformed(format!(
                    "invalid signature type 0x{form:02x}"
                )));
            }
            let params = read_val_types(ctx)?;
            let results = read_val_types(ctx)?;
            self.object.signatures.push(Signature { params, results });
            Ok(())
        })
    }

    pub(super) fn parse_import_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let module = ctx.read_string()?;
            let field = ctx.read_string()?;
            let obj = &mut self.object;
            let kind = match ExternalKind::from_byte(ctx.read_u8()?) {
                Some(ExternalKind::Function) => {
                    let sig = ctx.read_var_u32()?;
                    check_index(IndexSpace::Type, sig, obj.signatures.len() as u32)?;
                    obj.num_imported_functions += 1;
                    ImportKind::Function(sig)
                }
                Some(ExternalKind::Table) => {
                    let table = read_table_type(ctx)?;
                    obj.num_imported_tables += 1;
                    ImportKind::Table(table)
                }
                Some(ExternalKind::Memory) => {
                    let limits = read_limits(ctx)?;
                    obj.num_imported_memories += 1;
                    ImportKind::Memory(limits)
                }
                Some(ExternalKind::Global) => {
                    let ty = read_global_type(ctx)?;
                    obj.num_imported_globals += 1;
                    ImportKind::Global(ty)
                }
                None => return Err(ParseError::malformed("unexpected import kind")),
            };
            obj.imports.push(Import {
                module,
                field,
                kind,
            });
            Ok(())
        })
    }

    pub(super) fn parse_function_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let sig = ctx.read_var_u32()?;
            let num_types = self.object.signatures.len() as u32;
            self.object
                .function_types
                .push(check_index(IndexSpace::Type, sig, num_types)?);
            Ok(())
        })
    }

    pub(super) fn parse_table_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let table = read_table_type(ctx)?;
            self.object.tables.push(table);
            Ok(())
        })
    }

    pub(super) fn parse_memory_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let limits = read_limits(ctx)?;
            self.object.memories.push(limits);
            Ok(())
        })
    }

    pub(super) fn parse_global_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let ty = read_global_type(ctx)?;
            let init = self.read_init_expr(ctx)?;
            let index = self.object.num_imported_globals + self.object.globals.len() as u32;
            self.object.globals.push(Global {
                index,
                ty,
                init,
                symbol_name: None,
            });
            Ok(())
        })
    }

    pub(super) fn parse_export_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        let mut names = HashSet::new();
        read_entries(ctx, |ctx, _| {
            let name = ctx.read_string()?;
            let kind = ExternalKind::from_byte(ctx.read_u8()?)
                .ok_or_else(|| ParseError::malformed("unexpected export kind"))?;
            let index = ctx.read_var_u32()?;
            let (space, limit) = match kind {
                ExternalKind::Function => (IndexSpace::Function, self.object.function_space()),
                ExternalKind::Table => (IndexSpace::Table, self.object.table_space()),
                ExternalKind::Memory => (IndexSpace::Memory, self.object.memory_space()),
                ExternalKind::Global => (IndexSpace::Global, self.object.global_space()),
            };
            check_index(space, index, limit.total())?;
            if !names.insert(name) {
                return Err(ParseError::duplicate(format!("export name \"{name}\"")));
            }
            self.object.exports.push(Export { name, kind, index });
            Ok(())
        })
    }

    pub(super) fn parse_start_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        let index = ctx.read_var_u32()?;
        let total = self.object.function_space().total();
        self.object.start_function = Some(check_index(IndexSpace::Function, index, total)?);
        Ok(())
    }

    pub(super) fn parse_elem_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let table_index = ctx.read_var_u32()?;
            check_index(
                IndexSpace::Table,
                table_index,
                self.object.table_space().total(),
            )?;
            let offset = self.read_init_expr(ctx)?;
            let num_functions = self.object.function_space().total();
            let mut functions = Vec::new();
            read_entries(ctx, |ctx, _| {
                let index = ctx.read_var_u32()?;
                functions.push(check_index(IndexSpace::Function, index, num_functions)?);
                Ok(())
            })?;
            self.object.elem_segments.push(ElemSegment {
                table_index,
                offset,
                functions,
            });
            Ok(())
        })
    }

    pub(super) fn parse_code_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        let count = ctx.read_var_u32()?;
        let declared = self.object.function_types.len();
        if count as usize != declared {
            return Err(ParseError::malformed(format!(
                "code section has {count} bodies but the function section declared {declared}"
            )));
        }

        for i in 0..count {
            self.parse_code_entry(ctx, i)
                .map_err(|e| e.overran_frame("function body").at_entry(i))?;
        }
        Ok(())
    }

    fn parse_code_entry(&mut self, ctx: &mut ReadContext<'a>, i: u32) -> Result<()> {
        let start = ctx.position();
        let size = ctx.read_var_u32()? as usize;
        let mut entry = ctx.frame(size)?;

        let mut locals = Vec::new();
        read_entries(&mut entry, |entry, _| {
            let count = entry.read_var_u32()?;
            let val_type = read_val_type(entry)?;
            locals.push(LocalDecl { count, val_type });
            Ok(())
        })?;

        self.object.functions.push(Function {
            index: self.object.num_imported_functions + i,
            code_section_offset: start as u32,
            size: (ctx.position() - start) as u32,
            locals,
            body: entry.remaining_bytes(),
            debug_name: None,
            symbol_name: None,
            comdat: None,
        });
        Ok(())
    }

    pub(super) fn parse_data_section(&mut self, ctx: &mut ReadContext<'a>) -> Result<()> {
        read_entries(ctx, |ctx, _| {
            let section_offset = ctx.position() as u32;
            let memory_index = ctx.read_var_u32()?;
            check_index(
                IndexSpace::Memory,
                memory_index,
                self.object.memory_space().total(),
            )?;
            let offset = self.read_init_expr(ctx)?;
            let content = ctx.read_byte_vec()?;
            self.object.data_segments.push(DataSegment {
                section_offset,
                memory_index,
                offset,
                content,
                name: None,
                alignment: 0,
                flags: 0,
                comdat: None,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorCategory, ErrorKind, IndexSpace};
    use crate::parse_object;
    use crate::testutil::{
        code_section, data_section, empty_body_code_section, import_section, module, section,
        type_section, Enc,
    };
    use crate::types::{ImportKind, InitExpr, SectionKind, ValType};

    fn parse_err(sections: &[&[u8]]) -> crate::ParseError {
        parse_object(&module(sections)).unwrap_err()
    }

    #[test]
    fn rejects_bad_signature_form() {
        let types = section(SectionKind::Type, vec![0x01, 0x50, 0x00, 0x00]);
        let err = parse_err(&[&types]);
        assert_eq!(err.category(), ErrorCategory::Malformed);
        assert_eq!(err.location().entry, Some(0));
    }

    #[test]
    fn rejects_unknown_value_type() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x01, 0x6f, 0x00]);
        assert_eq!(parse_err(&[&types]).category(), ErrorCategory::Malformed);
    }

    #[test]
    fn multi_value_results_are_kept() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x02, 0x7f, 0x7c]);
        let obj_bytes = module(&[&types]);
        let obj = parse_object(&obj_bytes).unwrap();
        assert_eq!(obj.types()[0].results, vec![ValType::I32, ValType::F64]);
    }

    #[test]
    fn function_type_index_out_of_range() {
        let func = section(SectionKind::Function, vec![0x01, 0x02]);
        let err = parse_err(&[&type_section(), &func]);
        assert_eq!(
            err.kind(),
            &ErrorKind::InvalidIndex {
                space: IndexSpace::Type,
                index: 2,
                limit: 2
            }
        );
        assert_eq!(err.location().section.as_deref(), Some("FUNCTION"));
    }

    #[test]
    fn imports_fill_low_end_of_index_spaces() {
        let func = section(SectionKind::Function, vec![0x01, 0x00]);
        let bytes = module(&[
            &type_section(),
            &import_section(),
            &func,
            &empty_body_code_section(1),
        ]);
        let obj = parse_object(&bytes).unwrap();
        assert_eq!(obj.imports().len(), 3);
        assert_eq!(obj.num_imported_functions(), 1);
        assert_eq!(obj.num_imported_globals(), 1);
        assert!(obj.is_imported_function(0));
        assert!(!obj.is_imported_function(1));
        assert_eq!(obj.to_defined_function_index(1), Some(0));
        assert_eq!(obj.functions()[0].index, 1);
        assert_eq!(obj.memory_space().total(), 1);
        assert!(matches!(obj.imports()[2].kind, ImportKind::Memory(l) if l.initial == 1));
        assert_eq!(obj.function_signature(0).unwrap().params, vec![ValType::I32]);
        assert!(obj.global_type(0).unwrap().mutable);
    }

    #[test]
    fn import_with_bad_signature_index() {
        let imports = section(
            SectionKind::Import,
            Enc::new().uleb(1).str("env").str("f").u8(0).uleb(9).into_bytes(),
        );
        let err = parse_err(&[&type_section(), &imports]);
        assert_eq!(err.category(), ErrorCategory::InvalidReference);
    }

    #[test]
    fn limits_maximum_below_minimum() {
        let memory = section(SectionKind::Memory, vec![0x01, 0x01, 0x04, 0x02]);
        assert_eq!(parse_err(&[&memory]).category(), ErrorCategory::Malformed);

        let ok = section(SectionKind::Memory, vec![0x01, 0x01, 0x02, 0x04]);
        let bytes = module(&[&ok]);
        let obj = parse_object(&bytes).unwrap();
        assert_eq!(obj.memories()[0].maximum, Some(4));
    }

    #[test]
    fn table_requires_funcref() {
        let table = section(SectionKind::Table, vec![0x01, 0x6f, 0x00, 0x01]);
        assert_eq!(parse_err(&[&table]).category(), ErrorCategory::Malformed);
    }

    #[test]
    fn global_init_expressions() {
        let globals = section(
            SectionKind::Global,
            Enc::new()
                .uleb(3)
                .bytes(&[0x7e, 0x00, 0x42])
                .sleb(-5)
                .u8(0x0b)
                .bytes(&[0x7d, 0x01, 0x43])
                .bytes(&1.5f32.to_bits().to_le_bytes())
                .u8(0x0b)
                .bytes(&[0x7f, 0x00, 0x23, 0x00, 0x0b])
                .into_bytes(),
        );
        let bytes = module(&[&type_section(), &import_section(), &globals]);
        let obj = parse_object(&bytes).unwrap();
        assert_eq!(obj.globals().len(), 3);
        assert_eq!(obj.globals()[0].init, InitExpr::I64Const(-5));
        assert_eq!(obj.globals()[0].index, 1);
        assert_eq!(obj.globals()[1].init, InitExpr::F32Const(1.5f32.to_bits()));
        assert!(obj.globals()[1].ty.mutable);
        assert_eq!(obj.globals()[2].init, InitExpr::GlobalGet(0));
    }

    #[test]
    fn global_init_rejects_non_constant_and_long_expressions() {
        // i32.add is not a constant instruction.
        let op = section(SectionKind::Global, vec![0x01, 0x7f, 0x00, 0x6a, 0x0b]);
        assert_eq!(parse_err(&[&op]).category(), ErrorCategory::Malformed);

        // Two constants before end.
        let long = section(
            SectionKind::Global,
            vec![0x01, 0x7f, 0x00, 0x41, 0x01, 0x41, 0x02, 0x0b],
        );
        assert_eq!(parse_err(&[&long]).category(), ErrorCategory::Malformed);

        // global.get of a global that is not imported.
        let get = section(SectionKind::Global, vec![0x01, 0x7f, 0x00, 0x23, 0x00, 0x0b]);
        assert_eq!(parse_err(&[&get]).category(), ErrorCategory::InvalidReference);
    }

    #[test]
    fn mutability_flag_must_be_boolean() {
        let globals = section(SectionKind::Global, vec![0x01, 0x7f, 0x02, 0x41, 0x00, 0x0b]);
        assert_eq!(parse_err(&[&globals]).category(), ErrorCategory::Malformed);
    }

    #[test]
    fn export_indices_checked_per_kind() {
        let func = section(SectionKind::Function, vec![0x01, 0x00]);
        let export = |kind: u8, index: u64| {
            section(
                SectionKind::Export,
                Enc::new().uleb(1).str("x").u8(kind).uleb(index).into_bytes(),
            )
        };
        let code = empty_body_code_section(1);
        let check = |exp: Vec<u8>| {
            parse_object(&module(&[
                &type_section(),
                &import_section(),
                &func,
                &exp,
                &code,
            ]))
            .map(|_| ())
            .map_err(|e| e.kind().clone())
        };

        assert!(check(export(0, 1)).is_ok());
        assert!(check(export(3, 0)).is_ok());
        assert!(check(export(2, 0)).is_ok());
        assert!(matches!(
            check(export(0, 2)),
            Err(ErrorKind::InvalidIndex { space: IndexSpace::Function, .. })
        ));
        assert!(matches!(
            check(export(3, 1)),
            Err(ErrorKind::InvalidIndex { space: IndexSpace::Global, .. })
        ));
        assert!(matches!(
            check(export(1, 0)),
            Err(ErrorKind::InvalidIndex { space: IndexSpace::Table, .. })
        ));
        assert!(matches!(check(export(4, 0)), Err(ErrorKind::Malformed(_))));
    }

    #[test]
    fn duplicate_export_names() {
        let func = section(SectionKind::Function, vec![0x01, 0x00]);
        let exports = section(
            SectionKind::Export,
            Enc::new()
                .uleb(2)
                .str("a")
                .u8(0)
                .uleb(0)
                .str("a")
                .u8(0)
                .uleb(0)
                .into_bytes(),
        );
        let err = parse_err(&[
            &section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x00]),
            &func,
            &exports,
            &empty_body_code_section(1),
        ]);
        assert_eq!(err.category(), ErrorCategory::Duplicate);
        assert_eq!(err.location().entry, Some(1));
    }

    #[test]
    fn start_function() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x00]);
        let func = section(SectionKind::Function, vec![0x01, 0x00]);
        let code = empty_body_code_section(1);

        let start = section(SectionKind::Start, vec![0x00]);
        let bytes = module(&[&types, &func, &start, &code]);
        assert_eq!(parse_object(&bytes).unwrap().start_function(), Some(0));

        let bad = section(SectionKind::Start, vec![0x01]);
        let err = parse_err(&[&types, &func, &bad, &code]);
        assert_eq!(err.category(), ErrorCategory::InvalidReference);
    }

    #[test]
    fn element_segments() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x00]);
        let func = section(SectionKind::Function, vec![0x02, 0x00, 0x00]);
        let table = section(SectionKind::Table, vec![0x01, 0x70, 0x00, 0x02]);
        let code = empty_body_code_section(2);

        let elem = section(
            SectionKind::Elem,
            vec![0x01, 0x00, 0x41, 0x01, 0x0b, 0x02, 0x01, 0x00],
        );
        let bytes = module(&[&types, &func, &table, &elem, &code]);
        let obj = parse_object(&bytes).unwrap();
        assert_eq!(obj.elements().len(), 1);
        assert_eq!(obj.elements()[0].table_index, 0);
        assert_eq!(obj.elements()[0].offset, InitExpr::I32Const(1));
        assert_eq!(obj.elements()[0].functions, vec![1, 0]);

        let bad_func = section(
            SectionKind::Elem,
            vec![0x01, 0x00, 0x41, 0x00, 0x0b, 0x01, 0x02],
        );
        let err = parse_err(&[&types, &func, &table, &bad_func, &code]);
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidIndex { space: IndexSpace::Function, index: 2, .. }
        ));

        let no_table = section(SectionKind::Elem, vec![0x01, 0x00, 0x41, 0x00, 0x0b, 0x00]);
        let err = parse_err(&[&types, &func, &no_table, &code]);
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidIndex { space: IndexSpace::Table, .. }
        ));
    }

    #[test]
    fn code_entries_record_locals_and_offsets() {
        let func = section(SectionKind::Function, vec![0x02, 0x00, 0x01]);
        let bytes = module(&[&type_section(), &import_section(), &func, &code_section()]);
        let obj = parse_object(&bytes).unwrap();
        let f0 = &obj.functions()[0];
        assert_eq!(f0.index, 1);
        assert_eq!(f0.code_section_offset, 1);
        assert_eq!(f0.size, 12);
        assert!(f0.locals.is_empty());
        assert_eq!(f0.body.first(), Some(&0x41));
        assert_eq!(f0.body.last(), Some(&0x0b));

        let f1 = &obj.functions()[1];
        assert_eq!(f1.code_section_offset, 13);
        assert_eq!(f1.locals.len(), 1);
        assert_eq!(f1.locals[0].val_type, ValType::I64);
        assert_eq!(f1.body, &[0x20, 0x00, 0x0b]);
    }

    #[test]
    fn code_count_must_match_function_count() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x00]);
        let func = section(SectionKind::Function, vec![0x02, 0x00, 0x00]);
        let err = parse_err(&[&types, &func, &empty_body_code_section(1)]);
        assert_eq!(err.category(), ErrorCategory::Malformed);
        assert_eq!(err.location().section.as_deref(), Some("CODE"));
    }

    #[test]
    fn code_entry_size_past_section_end() {
        let types = section(SectionKind::Type, vec![0x01, 0x60, 0x00, 0x00]);
        let func = section(SectionKind::Function, vec![0x01, 0x00]);
        let code = section(SectionKind::Code, vec![0x01, 0x09, 0x00, 0x0b]);
        let err = parse_err(&[&types, &func, &code]);
        assert_eq!(err.category(), ErrorCategory::Malformed);
        assert_eq!(err.location().entry, Some(0));
    }

    #[test]
    fn data_segments() {
        let func = section(SectionKind::Function, vec![0x00]);
        let code = section(SectionKind::Code, vec![0x00]);
        let bytes = module(&[
            &type_section(),
            &import_section(),
            &func,
            &code,
            &data_section(),
        ]);
        let obj = parse_object(&bytes).unwrap();
        let seg = &obj.data_segments()[0];
        assert_eq!(seg.section_offset, 1);
        assert_eq!(seg.memory_index, 0);
        assert_eq!(seg.offset, InitExpr::I32Const(16));
        assert_eq!(seg.content, b"hello\0");

        // No memory to target.
        let err = parse_err(&[&data_section()]);
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidIndex { space: IndexSpace::Memory, .. }
        ));
    }
}

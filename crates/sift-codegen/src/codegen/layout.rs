//! Record storage layout: member access and the null bitmap.
//!
//! A record with any nullable field is laid out as
//! `{ i64 null_bitmap, member types... }`; bit `i` of the bitmap is set
//! when field ordinal `i` is NULL. Records without nullable fields omit
//! the bitmap entirely. All member and null-bit access funnels through
//! here so the bit layout is never known anywhere else.

use std::rc::Rc;

use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, StructType};
use inkwell::values::{IntValue, PointerValue};

use sift_common::{CodegenError, RecordSchema};

use super::types::llvm_type;
use super::CodeGen;

/// The bitmap is a single machine word; schemas needing null tracking for
/// more than this many fields are rejected at layout time.
const BITMAP_BITS: usize = 64;

/// LLVM layout of one record schema, shared behind `Rc` by every lvalue
/// that points into a record of this type.
#[derive(Debug)]
pub struct RecordLayout<'ctx> {
    schema: Rc<RecordSchema>,
    struct_ty: StructType<'ctx>,
    has_bitmap: bool,
}

impl<'ctx> RecordLayout<'ctx> {
    pub(crate) fn new(
        context: &'ctx Context,
        schema: Rc<RecordSchema>,
    ) -> Result<Self, CodegenError> {
        let has_bitmap = schema.has_nullable_fields();
        if has_bitmap && schema.len() > BITMAP_BITS {
            return Err(CodegenError::internal(
                "record layout",
                format!(
                    "{} needs null tracking for {} fields, bitmap holds {BITMAP_BITS}",
                    schema.name(),
                    schema.len()
                ),
            ));
        }

        let name = format!("sift.rec.{}", schema.name());
        let struct_ty = match context.get_struct_type(&name) {
            Some(ty) => ty,
            None => {
                let mut members: Vec<BasicTypeEnum<'ctx>> = Vec::with_capacity(schema.len() + 1);
                if has_bitmap {
                    members.push(context.i64_type().into());
                }
                for field in schema.fields() {
                    members.push(llvm_type(context, &field.ty.kind));
                }
                let ty = context.opaque_struct_type(&name);
                ty.set_body(&members, false);
                ty
            }
        };

        Ok(Self { schema, struct_ty, has_bitmap })
    }

    pub fn schema(&self) -> &Rc<RecordSchema> {
        &self.schema
    }

    pub fn struct_type(&self) -> StructType<'ctx> {
        self.struct_ty
    }

    pub fn has_bitmap(&self) -> bool {
        self.has_bitmap
    }

    fn ordinal(&self, member: &str) -> Result<usize, CodegenError> {
        self.schema.ordinal(member).ok_or_else(|| {
            CodegenError::internal(
                "member access",
                format!("record {} has no member {member}", self.schema.name()),
            )
        })
    }

    /// Pointer to a member's storage inside the record.
    pub fn member_ptr(
        &self,
        cg: &CodeGen<'ctx>,
        base: PointerValue<'ctx>,
        member: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let idx = self.ordinal(member)? + usize::from(self.has_bitmap);
        cg.builder
            .build_struct_gep(self.struct_ty, base, idx as u32, member)
            .map_err(|e| CodegenError::llvm("member gep", e))
    }

    /// Load the member's null bit as an `i1`; true means NULL.
    pub fn member_null(
        &self,
        cg: &CodeGen<'ctx>,
        base: PointerValue<'ctx>,
        member: &str,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        let bit = self.bitmap_bit(member)?;
        let word = self.load_bitmap(cg, base)?;
        let i64_ty = cg.context.i64_type();
        let masked = cg
            .builder
            .build_and(word, i64_ty.const_int(1 << bit, false), "null_bit")
            .map_err(|e| CodegenError::llvm("mask null bit", e))?;
        cg.builder
            .build_int_compare(
                inkwell::IntPredicate::NE,
                masked,
                i64_ty.const_zero(),
                "is_null",
            )
            .map_err(|e| CodegenError::llvm("test null bit", e))
    }

    /// Set or clear the member's null bit with a read-modify-write of the
    /// bitmap word.
    pub fn member_set_null(
        &self,
        cg: &CodeGen<'ctx>,
        base: PointerValue<'ctx>,
        member: &str,
        is_null: bool,
    ) -> Result<(), CodegenError> {
        let bit = self.bitmap_bit(member)?;
        let word = self.load_bitmap(cg, base)?;
        let i64_ty = cg.context.i64_type();
        let updated = if is_null {
            cg.builder
                .build_or(word, i64_ty.const_int(1 << bit, false), "set_null")
        } else {
            cg.builder
                .build_and(word, i64_ty.const_int(!(1 << bit), false), "clear_null")
        }
        .map_err(|e| CodegenError::llvm("update null bit", e))?;
        let word_ptr = self.bitmap_ptr(cg, base)?;
        cg.builder
            .build_store(word_ptr, updated)
            .map_err(|e| CodegenError::llvm("store null bitmap", e))?;
        Ok(())
    }

    fn bitmap_bit(&self, member: &str) -> Result<u64, CodegenError> {
        let ordinal = self.ordinal(member)?;
        let field = &self.schema.fields()[ordinal];
        if !field.ty.nullable {
            return Err(CodegenError::internal(
                "null bit",
                format!("member {member} of {} is not nullable", self.schema.name()),
            ));
        }
        Ok(ordinal as u64)
    }

    fn bitmap_ptr(
        &self,
        cg: &CodeGen<'ctx>,
        base: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        if !self.has_bitmap {
            return Err(CodegenError::internal(
                "null bitmap",
                format!("record {} has no null bitmap", self.schema.name()),
            ));
        }
        cg.builder
            .build_struct_gep(self.struct_ty, base, 0, "null_bitmap")
            .map_err(|e| CodegenError::llvm("bitmap gep", e))
    }

    fn load_bitmap(
        &self,
        cg: &CodeGen<'ctx>,
        base: PointerValue<'ctx>,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        let word_ptr = self.bitmap_ptr(cg, base)?;
        Ok(cg
            .builder
            .build_load(cg.context.i64_type(), word_ptr, "null_word")
            .map_err(|e| CodegenError::llvm("load null bitmap", e))?
            .into_int_value())
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use sift_common::{FieldDecl, FieldType};

    use super::*;

    fn decl(name: &str, ty: FieldType) -> FieldDecl {
        FieldDecl { name: name.to_string(), ty }
    }

    fn transfer_cg<'ctx>(context: &'ctx Context) -> CodeGen<'ctx> {
        let mut cg = CodeGen::new(context, "layout_test").unwrap();
        let output = Rc::new(RecordSchema::new("out", vec![]));
        cg.start_transfer_function("test_fn", &[], output).unwrap();
        cg
    }

    #[test]
    fn bitmap_word_leads_when_any_field_is_nullable() {
        let context = Context::create();
        let schema = Rc::new(RecordSchema::new(
            "r",
            vec![
                decl("a", FieldType::int32()),
                decl("b", FieldType::int32().nullable()),
            ],
        ));
        let layout = RecordLayout::new(&context, schema).unwrap();
        assert!(layout.has_bitmap());
        assert_eq!(layout.struct_type().count_fields(), 3);
        assert!(layout.struct_type().get_field_type_at_index(0).unwrap().is_int_type());
    }

    #[test]
    fn all_non_nullable_records_have_no_bitmap() {
        let context = Context::create();
        let schema = Rc::new(RecordSchema::new(
            "plain",
            vec![decl("a", FieldType::int32()), decl("b", FieldType::double())],
        ));
        let layout = RecordLayout::new(&context, schema).unwrap();
        assert!(!layout.has_bitmap());
        assert_eq!(layout.struct_type().count_fields(), 2);
    }

    #[test]
    fn null_bit_access_masks_the_leading_word() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let schema = Rc::new(RecordSchema::new(
            "r",
            vec![
                decl("a", FieldType::int32()),
                decl("b", FieldType::int32().nullable()),
            ],
        ));
        let layout = cg.layout_for(&schema).unwrap();
        let base = cg
            .build_entry_alloca(layout.struct_type().into(), "rec")
            .unwrap();

        layout.member_null(&cg, base, "b").unwrap();
        layout.member_set_null(&cg, base, "b", true).unwrap();
        layout.member_set_null(&cg, base, "b", false).unwrap();

        let ir = cg.module().print_to_string().to_string();
        // Field "b" is ordinal 1, so its mask is bit 1.
        assert!(ir.contains("and i64"), "null test masks the word:\n{ir}");
        assert!(ir.contains("icmp ne i64"), "null test compares to zero:\n{ir}");
        assert!(ir.contains("or i64"), "set_null(true) ors the bit in:\n{ir}");
    }

    #[test]
    fn null_bit_on_non_nullable_member_is_rejected() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let schema = Rc::new(RecordSchema::new(
            "r",
            vec![
                decl("a", FieldType::int32()),
                decl("b", FieldType::int32().nullable()),
            ],
        ));
        let layout = cg.layout_for(&schema).unwrap();
        let base = cg
            .build_entry_alloca(layout.struct_type().into(), "rec")
            .unwrap();
        let err = layout.member_null(&cg, base, "a").unwrap_err();
        assert!(matches!(err, CodegenError::Internal { .. }));
    }

    #[test]
    fn bitmap_overflow_is_rejected() {
        let context = Context::create();
        let fields = (0..65)
            .map(|i| decl(&format!("f{i}"), FieldType::int32().nullable()))
            .collect();
        let schema = Rc::new(RecordSchema::new("wide", fields));
        let err = RecordLayout::new(&context, schema).unwrap_err();
        assert!(matches!(err, CodegenError::Internal { .. }));
    }
}

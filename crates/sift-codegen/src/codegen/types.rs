//! Mapping from field types to their LLVM storage types.
//!
//! With opaque pointers the IR carries no usable type identity for by-ref
//! data, so this module is the single place that decides how each field
//! kind is stored: sizes, struct bodies, and the named types shared across
//! a module. Everything downstream (layouts, casts, the runtime catalog)
//! goes through these helpers rather than building types inline.

use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, StructType};
use inkwell::AddressSpace;

use sift_common::FieldKind;

/// Storage type for one field kind.
///
/// CHAR(n) reserves one extra byte for the NUL terminator. BOOLEAN, DATE
/// and intervals are 32-bit integers; DATETIME is a 64-bit second count.
pub fn llvm_type<'ctx>(context: &'ctx Context, kind: &FieldKind) -> BasicTypeEnum<'ctx> {
    match kind {
        FieldKind::Int32 => context.i32_type().into(),
        FieldKind::Int64 => context.i64_type().into(),
        FieldKind::Double => context.f64_type().into(),
        FieldKind::Decimal => decimal_type(context).into(),
        FieldKind::Char(n) => context.i8_type().array_type(n + 1).into(),
        FieldKind::Varchar => varchar_type(context).into(),
        FieldKind::Boolean => context.i32_type().into(),
        FieldKind::Date => context.i32_type().into(),
        FieldKind::Datetime => context.i64_type().into(),
        FieldKind::Interval(_) => context.i32_type().into(),
    }
}

/// The 16-byte small-string-optimized VARCHAR header: `{ i32, i32, ptr }`.
///
/// Small form: bit 0 of the first byte is clear, the length lives in the
/// remaining bits of that byte and the data starts at byte 1. Large form:
/// bit 0 of the first dword is set, the length lives in its remaining bits
/// and the third member points at heap data.
pub fn varchar_type(context: &Context) -> StructType<'_> {
    if let Some(ty) = context.get_struct_type("sift.varchar") {
        return ty;
    }
    let ty = context.opaque_struct_type("sift.varchar");
    ty.set_body(
        &[
            context.i32_type().into(),
            context.i32_type().into(),
            context.ptr_type(AddressSpace::default()).into(),
        ],
        false,
    );
    ty
}

/// The 16-byte packed-decimal payload, opaque to generated code. Every
/// decimal operation goes through the runtime library.
pub fn decimal_type(context: &Context) -> StructType<'_> {
    if let Some(ty) = context.get_struct_type("sift.decimal") {
        return ty;
    }
    let ty = context.opaque_struct_type("sift.decimal");
    ty.set_body(&[context.i32_type().array_type(4).into()], false);
    ty
}

/// Stored size in bytes, used when copying by-ref data with memcpy.
pub fn store_size(kind: &FieldKind) -> u64 {
    match kind {
        FieldKind::Int32 | FieldKind::Boolean | FieldKind::Date | FieldKind::Interval(_) => 4,
        FieldKind::Int64 | FieldKind::Datetime | FieldKind::Double => 8,
        FieldKind::Decimal | FieldKind::Varchar => 16,
        FieldKind::Char(n) => u64::from(*n) + 1,
    }
}

/// Alignment for memcpy of by-ref data. CHAR is a byte array, DECIMAL is
/// dword-aligned, VARCHAR carries a pointer.
pub fn store_align(kind: &FieldKind) -> u32 {
    match kind {
        FieldKind::Char(_) => 1,
        FieldKind::Decimal => 4,
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_reserves_a_terminator_byte() {
        let context = Context::create();
        let ty = llvm_type(&context, &FieldKind::Char(10));
        assert_eq!(ty.into_array_type().len(), 11);
        assert_eq!(store_size(&FieldKind::Char(10)), 11);
    }

    #[test]
    fn varchar_is_a_three_member_struct() {
        let context = Context::create();
        let ty = varchar_type(&context);
        assert_eq!(ty.count_fields(), 3);
        assert_eq!(store_size(&FieldKind::Varchar), 16);
    }

    #[test]
    fn named_structs_are_interned() {
        let context = Context::create();
        assert_eq!(varchar_type(&context), varchar_type(&context));
        assert_eq!(decimal_type(&context), decimal_type(&context));
    }

    #[test]
    fn time_kinds_are_plain_integers() {
        let context = Context::create();
        assert!(llvm_type(&context, &FieldKind::Date).is_int_type());
        assert!(llvm_type(&context, &FieldKind::Datetime).is_int_type());
        assert!(llvm_type(&context, &FieldKind::Boolean).is_int_type());
    }
}

//! Implicit-conversion lattice and cast emission.
//!
//! Two layers: a pure widening lattice (`can_cast` / `least_common_type`)
//! that decides which implicit conversions binary operators may insert,
//! and the cast catalog (`build_cast`) that emits the IR. The catalog is
//! wider than the lattice because explicit CAST expressions reach it
//! directly.
//!
//! Native LLVM instructions cover integer and float widenings; everything
//! touching DECIMAL, VARCHAR, CHAR, DATE or DATETIME goes through the
//! runtime library with an out-parameter result slot.

use inkwell::values::{BasicValueEnum, PointerValue};
use tracing::instrument;

use sift_common::{CodegenError, FieldKind, FieldType};

use super::types::llvm_type;
use super::value::{Storage, ValueId};
use super::CodeGen;

// ── Lattice ──────────────────────────────────────────────────────────

/// Whether `from` may be implicitly widened to `to`.
///
/// Integers widen to wider integers, DOUBLE and DECIMAL; DECIMAL widens
/// to DOUBLE; CHAR widens to VARCHAR. Everything else requires an exact
/// match.
pub fn can_cast(from: &FieldKind, to: &FieldKind) -> bool {
    use FieldKind::*;
    match (from, to) {
        (a, b) if a == b => true,
        (Int32, Int64 | Double | Decimal) => true,
        (Int64, Double | Decimal) => true,
        (Decimal, Double) => true,
        (Char(_), Varchar) => true,
        _ => false,
    }
}

/// The least common type of two operand kinds, or `None` when no implicit
/// conversion relates them.
pub fn least_common_type(a: &FieldKind, b: &FieldKind) -> Option<FieldKind> {
    if can_cast(a, b) {
        Some(*b)
    } else if can_cast(b, a) {
        Some(*a)
    } else {
        None
    }
}

// ── Conversion emission ──────────────────────────────────────────────

impl<'ctx> CodeGen<'ctx> {
    /// Bring two operands to their least common type.
    ///
    /// The result type is nullable when either operand is; null flags ride
    /// along with each converted operand unchanged.
    pub fn binary_conversion(
        &mut self,
        op: &str,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, ValueId, FieldType), CodegenError> {
        let common = least_common_type(&lhs_ty.kind, &rhs_ty.kind).ok_or_else(|| {
            CodegenError::IncompatibleTypes {
                op: op.to_string(),
                lhs: lhs_ty.to_string(),
                rhs: rhs_ty.to_string(),
            }
        })?;
        let target = FieldType { kind: common, nullable: lhs_ty.nullable || rhs_ty.nullable };
        let l = self.convert_to(lhs, lhs_ty, &target)?;
        let r = self.convert_to(rhs, rhs_ty, &target)?;
        Ok((l, r, target))
    }

    /// Convert a value along the implicit lattice. Same-kind values and
    /// the literal NULL pass through untouched; a conversion outside the
    /// lattice means the type checker let something bad through.
    pub fn convert_to(
        &mut self,
        value: ValueId,
        from: &FieldType,
        to: &FieldType,
    ) -> Result<ValueId, CodegenError> {
        if self.values.get(value).is_literal_null() || from.kind == to.kind {
            return Ok(value);
        }
        if !can_cast(&from.kind, &to.kind) {
            return Err(CodegenError::internal(
                "convert",
                format!("no implicit conversion from {from} to {to}"),
            ));
        }
        self.build_cast(value, from, to)
    }

    /// Emit a cast into a fresh entry-block slot and return the slot as an
    /// address-flavored value carrying the source's null flag.
    #[instrument(level = "debug", skip(self, value))]
    pub fn build_cast(
        &mut self,
        value: ValueId,
        from: &FieldType,
        to: &FieldType,
    ) -> Result<ValueId, CodegenError> {
        if from.kind == to.kind {
            return Ok(value);
        }
        let src = self.rvalue(value, from)?;
        let tv = self.values.get(src);
        let Some(payload) = tv.payload() else {
            return Ok(value);
        };
        let flag = tv.null_flag();

        let slot = self.build_entry_alloca(llvm_type(self.context, &to.kind), "casttmp")?;
        match to.kind {
            FieldKind::Int32 => self.cast_int32(payload, from, to, slot)?,
            FieldKind::Int64 => self.cast_int64(payload, from, to, slot)?,
            FieldKind::Double => self.cast_double(payload, from, to, slot)?,
            FieldKind::Decimal => self.cast_decimal(payload, from, to, slot)?,
            FieldKind::Varchar => self.cast_varchar(payload, from, to, slot)?,
            FieldKind::Date => self.cast_date(payload, from, to, slot)?,
            FieldKind::Datetime => self.cast_datetime(payload, from, to, slot)?,
            _ => return Err(CodegenError::unimplemented(from, to)),
        }
        Ok(self.values.alloc(Some(slot.into()), flag, Storage::Local))
    }

    fn cast_int32(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        match from.kind {
            FieldKind::Int64 => {
                let t = self
                    .builder
                    .build_int_truncate(payload.into_int_value(), self.context.i32_type(), "trunctmp")
                    .map_err(|e| CodegenError::llvm("trunc", e))?;
                self.store_scalar(slot, t.into())
            }
            FieldKind::Double => {
                let t = self
                    .builder
                    .build_float_to_signed_int(
                        payload.into_float_value(),
                        self.context.i32_type(),
                        "fptositmp",
                    )
                    .map_err(|e| CodegenError::llvm("fptosi", e))?;
                self.store_scalar(slot, t.into())
            }
            FieldKind::Decimal => self.call_runtime_into("sift_i32_from_decimal", &[payload], slot),
            FieldKind::Varchar => self.call_runtime_into("sift_i32_from_varchar", &[payload], slot),
            FieldKind::Char(_) => self.call_runtime_into("sift_i32_from_char", &[payload], slot),
            FieldKind::Date => self.call_runtime_into("sift_i32_from_date", &[payload], slot),
            FieldKind::Datetime => {
                self.call_runtime_into("sift_i32_from_datetime", &[payload], slot)
            }
            _ => Err(CodegenError::unimplemented(from, to)),
        }
    }

    fn cast_int64(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        match from.kind {
            FieldKind::Int32 => {
                let t = self
                    .builder
                    .build_int_s_extend(payload.into_int_value(), self.context.i64_type(), "sexttmp")
                    .map_err(|e| CodegenError::llvm("sext", e))?;
                self.store_scalar(slot, t.into())
            }
            FieldKind::Double => {
                let t = self
                    .builder
                    .build_float_to_signed_int(
                        payload.into_float_value(),
                        self.context.i64_type(),
                        "fptositmp",
                    )
                    .map_err(|e| CodegenError::llvm("fptosi", e))?;
                self.store_scalar(slot, t.into())
            }
            FieldKind::Decimal => self.call_runtime_into("sift_i64_from_decimal", &[payload], slot),
            FieldKind::Varchar => self.call_runtime_into("sift_i64_from_varchar", &[payload], slot),
            FieldKind::Char(_) => self.call_runtime_into("sift_i64_from_char", &[payload], slot),
            FieldKind::Date => self.call_runtime_into("sift_i64_from_date", &[payload], slot),
            FieldKind::Datetime => {
                self.call_runtime_into("sift_i64_from_datetime", &[payload], slot)
            }
            _ => Err(CodegenError::unimplemented(from, to)),
        }
    }

    fn cast_double(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        match from.kind {
            FieldKind::Int32 | FieldKind::Int64 => {
                let t = self
                    .builder
                    .build_signed_int_to_float(
                        payload.into_int_value(),
                        self.context.f64_type(),
                        "sitofptmp",
                    )
                    .map_err(|e| CodegenError::llvm("sitofp", e))?;
                self.store_scalar(slot, t.into())
            }
            FieldKind::Decimal => {
                self.call_runtime_into("sift_double_from_decimal", &[payload], slot)
            }
            FieldKind::Varchar => {
                self.call_runtime_into("sift_double_from_varchar", &[payload], slot)
            }
            FieldKind::Char(_) => self.call_runtime_into("sift_double_from_char", &[payload], slot),
            _ => Err(CodegenError::unimplemented(from, to)),
        }
    }

    fn cast_decimal(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        let symbol = match from.kind {
            FieldKind::Int32 => "sift_decimal_from_i32",
            FieldKind::Int64 => "sift_decimal_from_i64",
            FieldKind::Double => "sift_decimal_from_double",
            FieldKind::Varchar => "sift_decimal_from_varchar",
            FieldKind::Char(_) => "sift_decimal_from_char",
            _ => return Err(CodegenError::unimplemented(from, to)),
        };
        self.call_runtime_into(symbol, &[payload], slot)
    }

    fn cast_varchar(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        let symbol = match from.kind {
            FieldKind::Char(_) => "sift_varchar_from_char",
            FieldKind::Int32 => "sift_varchar_from_i32",
            FieldKind::Int64 => "sift_varchar_from_i64",
            FieldKind::Double => "sift_varchar_from_double",
            FieldKind::Decimal => "sift_varchar_from_decimal",
            FieldKind::Date => "sift_varchar_from_date",
            FieldKind::Datetime => "sift_varchar_from_datetime",
            _ => return Err(CodegenError::unimplemented(from, to)),
        };
        self.call_runtime_into(symbol, &[payload], slot)
    }

    fn cast_date(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        match from.kind {
            FieldKind::Varchar => self.call_runtime_into("sift_date_from_varchar", &[payload], slot),
            _ => Err(CodegenError::unimplemented(from, to)),
        }
    }

    fn cast_datetime(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        from: &FieldType,
        to: &FieldType,
        slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        match from.kind {
            FieldKind::Varchar => {
                self.call_runtime_into("sift_datetime_from_varchar", &[payload], slot)
            }
            _ => Err(CodegenError::unimplemented(from, to)),
        }
    }

    fn store_scalar(
        &self,
        slot: PointerValue<'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<(), CodegenError> {
        self.builder
            .build_store(slot, value)
            .map_err(|e| CodegenError::llvm("store cast result", e))?;
        Ok(())
    }
}

//! Expression emitters: stores, arithmetic, comparison, date math,
//! array construction, and varchar header decoding.
//!
//! Numeric operators are native LLVM instructions after both operands
//! reach their common type; DECIMAL and VARCHAR operators call into the
//! runtime. NULL propagates: a literal NULL operand absorbs the whole
//! expression, runtime flags are OR-ed into the result.

use inkwell::module::Linkage;
use inkwell::types::{ArrayType, BasicType, BasicTypeEnum};
use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};

use sift_common::{CodegenError, FieldKind, FieldType};

use super::types::{llvm_type, store_align, store_size, varchar_type};
use super::value::{LValue, Storage, ValueId};
use super::CodeGen;

/// Comparison operators, all null-propagating.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn int_predicate(self) -> IntPredicate {
        match self {
            Self::Eq => IntPredicate::EQ,
            Self::Ne => IntPredicate::NE,
            Self::Lt => IntPredicate::SLT,
            Self::Le => IntPredicate::SLE,
            Self::Gt => IntPredicate::SGT,
            Self::Ge => IntPredicate::SGE,
        }
    }

    fn float_predicate(self) -> FloatPredicate {
        match self {
            Self::Eq => FloatPredicate::OEQ,
            Self::Ne => FloatPredicate::ONE,
            Self::Lt => FloatPredicate::OLT,
            Self::Le => FloatPredicate::OLE,
            Self::Gt => FloatPredicate::OGT,
            Self::Ge => FloatPredicate::OGE,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Copy, Clone)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn label(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    fn decimal_symbol(self) -> &'static str {
        match self {
            Self::Add => "sift_decimal_add",
            Self::Sub => "sift_decimal_sub",
            Self::Mul => "sift_decimal_mul",
            Self::Div => "sift_decimal_div",
        }
    }
}

impl<'ctx> CodeGen<'ctx> {
    // ── Stores ───────────────────────────────────────────────────────

    /// Store a value into a location, null state included. The value must
    /// already have the location's kind.
    ///
    /// A runtime null flag forks into set-null and store-payload paths; a
    /// flag-free value clears the location's null bit (when it has one)
    /// and stores straight through. The literal NULL only sets the bit.
    pub fn store_value(
        &mut self,
        target: &LValue<'ctx>,
        value: ValueId,
        value_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let tv = self.values.get(value);
        if tv.is_literal_null() {
            if !target.is_nullable() {
                return Err(CodegenError::internal(
                    "store",
                    "NULL stored into a non-nullable location",
                ));
            }
            return target.write_null(self, true);
        }

        match tv.null_flag() {
            Some(flag) => {
                if !target.is_nullable() {
                    return Err(CodegenError::internal(
                        "store",
                        "nullable value stored into a non-nullable location",
                    ));
                }
                let fn_val = self.current_function()?;
                let null_bb = self.context.append_basic_block(fn_val, "store_null");
                let value_bb = self.context.append_basic_block(fn_val, "store_value");
                let merge_bb = self.context.append_basic_block(fn_val, "store_merge");

                self.builder
                    .build_conditional_branch(flag, null_bb, value_bb)
                    .map_err(|e| CodegenError::llvm("store null branch", e))?;

                self.builder.position_at_end(null_bb);
                target.write_null(self, true)?;
                self.builder
                    .build_unconditional_branch(merge_bb)
                    .map_err(|e| CodegenError::llvm("branch", e))?;

                self.builder.position_at_end(value_bb);
                target.write_null(self, false)?;
                self.store_payload(target, value, value_ty)?;
                self.builder
                    .build_unconditional_branch(merge_bb)
                    .map_err(|e| CodegenError::llvm("branch", e))?;

                self.builder.position_at_end(merge_bb);
                Ok(())
            }
            None => {
                if target.is_nullable() {
                    target.write_null(self, false)?;
                }
                self.store_payload(target, value, value_ty)
            }
        }
    }

    fn store_payload(
        &mut self,
        target: &LValue<'ctx>,
        value: ValueId,
        value_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let dest = target.address(self)?;
        match value_ty.kind {
            // Varchar assignment hands ownership of any heap data to the
            // destination, so it goes through the runtime.
            FieldKind::Varchar => {
                let src = self.pointer_payload(value, "varchar store")?;
                self.call_runtime_into("sift_varchar_copy", &[src.into()], dest)
            }
            k if k.is_by_ref() => {
                let src = self.pointer_payload(value, "by-ref store")?;
                let size = self.context.i64_type().const_int(store_size(&k), false);
                self.builder
                    .build_memcpy(dest, store_align(&k), src, store_align(&k), size)
                    .map_err(|e| CodegenError::llvm("memcpy", e))?;
                Ok(())
            }
            _ => {
                let loaded = self.rvalue(value, value_ty)?;
                let payload = self.values.get(loaded).payload().ok_or_else(|| {
                    CodegenError::internal("store", "value has no payload")
                })?;
                self.builder
                    .build_store(dest, payload)
                    .map_err(|e| CodegenError::llvm("store", e))?;
                Ok(())
            }
        }
    }

    pub(crate) fn pointer_payload(
        &self,
        value: ValueId,
        what: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        match self.values.get(value).payload() {
            Some(BasicValueEnum::PointerValue(p)) => Ok(p),
            _ => Err(CodegenError::internal(what, "expected a by-ref payload pointer")),
        }
    }

    // ── Arithmetic ───────────────────────────────────────────────────

    /// Addition. DATE or DATETIME plus an interval routes to the calendar
    /// helpers; VARCHAR plus VARCHAR concatenates; numeric operands meet
    /// at their common type first.
    pub fn build_add(
        &mut self,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        if is_interval(rhs_ty) && is_time(lhs_ty) || is_interval(lhs_ty) && is_time(rhs_ty) {
            return self.build_date_add(lhs, lhs_ty, rhs, rhs_ty);
        }
        let (l, r, ty) = self.binary_conversion("+", lhs, lhs_ty, rhs, rhs_ty)?;
        self.arith_binary(ArithOp::Add, l, r, &ty)
    }

    /// Subtraction. DATE or DATETIME minus an interval negates the
    /// interval and adds it.
    pub fn build_sub(
        &mut self,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        if is_time(lhs_ty) && is_interval(rhs_ty) {
            let (neg, neg_ty) = self.build_neg(rhs, rhs_ty)?;
            return self.build_date_add(lhs, lhs_ty, neg, &neg_ty);
        }
        let (l, r, ty) = self.binary_conversion("-", lhs, lhs_ty, rhs, rhs_ty)?;
        self.arith_binary(ArithOp::Sub, l, r, &ty)
    }

    pub fn build_mul(
        &mut self,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        let (l, r, ty) = self.binary_conversion("*", lhs, lhs_ty, rhs, rhs_ty)?;
        self.arith_binary(ArithOp::Mul, l, r, &ty)
    }

    pub fn build_div(
        &mut self,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        let (l, r, ty) = self.binary_conversion("/", lhs, lhs_ty, rhs, rhs_ty)?;
        self.arith_binary(ArithOp::Div, l, r, &ty)
    }

    fn arith_binary(
        &mut self,
        op: ArithOp,
        lhs: ValueId,
        rhs: ValueId,
        ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        if self.values.get(lhs).is_literal_null() || self.values.get(rhs).is_literal_null() {
            return Ok((self.null_value(), *ty));
        }
        let lhs = self.rvalue(lhs, ty)?;
        let rhs = self.rvalue(rhs, ty)?;
        let ltv = self.values.get(lhs);
        let rtv = self.values.get(rhs);
        let flag = self.merge_null_flags(ltv.null_flag(), rtv.null_flag())?;

        match ty.kind {
            FieldKind::Int32 | FieldKind::Int64 => {
                let a = ltv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
                    CodegenError::internal("arithmetic", "missing integer payload")
                })?;
                let b = rtv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
                    CodegenError::internal("arithmetic", "missing integer payload")
                })?;
                let res = match op {
                    ArithOp::Add => self.builder.build_int_add(a, b, "addtmp"),
                    ArithOp::Sub => self.builder.build_int_sub(a, b, "subtmp"),
                    ArithOp::Mul => self.builder.build_int_mul(a, b, "multmp"),
                    ArithOp::Div => self.builder.build_int_signed_div(a, b, "divtmp"),
                }
                .map_err(|e| CodegenError::llvm("integer arithmetic", e))?;
                Ok((self.values.alloc(Some(res.into()), flag, Storage::Local), *ty))
            }
            FieldKind::Double => {
                let a = ltv.payload().map(BasicValueEnum::into_float_value).ok_or_else(|| {
                    CodegenError::internal("arithmetic", "missing float payload")
                })?;
                let b = rtv.payload().map(BasicValueEnum::into_float_value).ok_or_else(|| {
                    CodegenError::internal("arithmetic", "missing float payload")
                })?;
                let res = match op {
                    ArithOp::Add => self.builder.build_float_add(a, b, "addtmp"),
                    ArithOp::Sub => self.builder.build_float_sub(a, b, "subtmp"),
                    ArithOp::Mul => self.builder.build_float_mul(a, b, "multmp"),
                    ArithOp::Div => self.builder.build_float_div(a, b, "divtmp"),
                }
                .map_err(|e| CodegenError::llvm("float arithmetic", e))?;
                Ok((self.values.alloc(Some(res.into()), flag, Storage::Local), *ty))
            }
            FieldKind::Decimal => {
                let a = self.pointer_payload(lhs, "decimal arithmetic")?;
                let b = self.pointer_payload(rhs, "decimal arithmetic")?;
                let slot = self.build_entry_alloca(llvm_type(self.context, &ty.kind), "dectmp")?;
                self.call_runtime_into(op.decimal_symbol(), &[a.into(), b.into()], slot)?;
                Ok((self.values.alloc(Some(slot.into()), flag, Storage::Local), *ty))
            }
            FieldKind::Varchar if matches!(op, ArithOp::Add) => {
                let a = self.pointer_payload(lhs, "varchar concat")?;
                let b = self.pointer_payload(rhs, "varchar concat")?;
                let slot = self.build_entry_alloca(varchar_type(self.context).into(), "concattmp")?;
                self.call_runtime_into("sift_varchar_concat", &[a.into(), b.into()], slot)?;
                Ok((self.values.alloc(Some(slot.into()), flag, Storage::Local), *ty))
            }
            _ => Err(CodegenError::internal(
                "arithmetic",
                format!("unexpected type {ty} in {}", op.label()),
            )),
        }
    }

    /// Arithmetic negation, also used to turn `date - interval` into an
    /// addition of the negated interval.
    pub fn build_neg(
        &mut self,
        value: ValueId,
        ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        if self.values.get(value).is_literal_null() {
            return Ok((self.null_value(), *ty));
        }
        let value = self.rvalue(value, ty)?;
        let tv = self.values.get(value);
        let flag = tv.null_flag();

        match ty.kind {
            FieldKind::Int32 | FieldKind::Int64 | FieldKind::Interval(_) => {
                let v = tv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
                    CodegenError::internal("negate", "missing integer payload")
                })?;
                let res = self
                    .builder
                    .build_int_neg(v, "negtmp")
                    .map_err(|e| CodegenError::llvm("neg", e))?;
                Ok((self.values.alloc(Some(res.into()), flag, Storage::Local), *ty))
            }
            FieldKind::Double => {
                let v = tv.payload().map(BasicValueEnum::into_float_value).ok_or_else(|| {
                    CodegenError::internal("negate", "missing float payload")
                })?;
                let res = self
                    .builder
                    .build_float_neg(v, "fnegtmp")
                    .map_err(|e| CodegenError::llvm("fneg", e))?;
                Ok((self.values.alloc(Some(res.into()), flag, Storage::Local), *ty))
            }
            FieldKind::Decimal => {
                let v = self.pointer_payload(value, "decimal negate")?;
                let slot = self.build_entry_alloca(llvm_type(self.context, &ty.kind), "dectmp")?;
                self.call_runtime_into("sift_decimal_neg", &[v.into()], slot)?;
                Ok((self.values.alloc(Some(slot.into()), flag, Storage::Local), *ty))
            }
            _ => Err(CodegenError::internal("negate", format!("unexpected type {ty}"))),
        }
    }

    // ── Comparison ───────────────────────────────────────────────────

    /// Comparison producing a BOOLEAN (a 32-bit 0/1). Integer-backed
    /// kinds compare natively; DOUBLE uses ordered predicates; DECIMAL,
    /// VARCHAR and CHAR call the runtime and compare its three-way
    /// result against zero.
    pub fn build_compare(
        &mut self,
        op: CmpOp,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        let (l, r, ty) = self.binary_conversion(op.label(), lhs, lhs_ty, rhs, rhs_ty)?;
        let bool_ty = FieldType { kind: FieldKind::Boolean, nullable: ty.nullable };
        if self.values.get(l).is_literal_null() || self.values.get(r).is_literal_null() {
            return Ok((self.null_value(), bool_ty));
        }
        let l = self.rvalue(l, &ty)?;
        let r = self.rvalue(r, &ty)?;
        let ltv = self.values.get(l);
        let rtv = self.values.get(r);
        let flag = self.merge_null_flags(ltv.null_flag(), rtv.null_flag())?;

        let bit = match ty.kind {
            FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::Boolean
            | FieldKind::Date
            | FieldKind::Datetime
            | FieldKind::Interval(_) => {
                let a = ltv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
                    CodegenError::internal("compare", "missing integer payload")
                })?;
                let b = rtv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
                    CodegenError::internal("compare", "missing integer payload")
                })?;
                self.builder
                    .build_int_compare(op.int_predicate(), a, b, "cmptmp")
                    .map_err(|e| CodegenError::llvm("icmp", e))?
            }
            FieldKind::Double => {
                let a = ltv.payload().map(BasicValueEnum::into_float_value).ok_or_else(|| {
                    CodegenError::internal("compare", "missing float payload")
                })?;
                let b = rtv.payload().map(BasicValueEnum::into_float_value).ok_or_else(|| {
                    CodegenError::internal("compare", "missing float payload")
                })?;
                self.builder
                    .build_float_compare(op.float_predicate(), a, b, "cmptmp")
                    .map_err(|e| CodegenError::llvm("fcmp", e))?
            }
            FieldKind::Decimal => {
                let a = self.pointer_payload(l, "decimal compare")?;
                let b = self.pointer_payload(r, "decimal compare")?;
                let slot = self.build_entry_alloca(self.context.i32_type().into(), "deccmp")?;
                self.call_runtime_into("sift_decimal_compare", &[a.into(), b.into()], slot)?;
                let three_way = self
                    .builder
                    .build_load(self.context.i32_type(), slot, "deccmp")
                    .map_err(|e| CodegenError::llvm("load compare result", e))?
                    .into_int_value();
                self.three_way_to_bit(op, three_way)?
            }
            FieldKind::Varchar => {
                let a = self.pointer_payload(l, "varchar compare")?;
                let b = self.pointer_payload(r, "varchar compare")?;
                let three_way = self
                    .call_runtime_direct("sift_varchar_compare", &[a.into(), b.into()])?
                    .into_int_value();
                self.three_way_to_bit(op, three_way)?
            }
            FieldKind::Char(n) => {
                let a = self.pointer_payload(l, "char compare")?;
                let b = self.pointer_payload(r, "char compare")?;
                let len = self.context.i32_type().const_int(u64::from(n), false);
                let three_way = self
                    .call_runtime_direct("sift_char_compare", &[a.into(), b.into(), len.into()])?
                    .into_int_value();
                self.three_way_to_bit(op, three_way)?
            }
        };

        let word = self
            .builder
            .build_int_z_extend(bit, self.context.i32_type(), "booltmp")
            .map_err(|e| CodegenError::llvm("zext", e))?;
        Ok((self.values.alloc(Some(word.into()), flag, Storage::Local), bool_ty))
    }

    fn three_way_to_bit(
        &self,
        op: CmpOp,
        three_way: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        self.builder
            .build_int_compare(
                op.int_predicate(),
                three_way,
                self.context.i32_type().const_zero(),
                "cmptmp",
            )
            .map_err(|e| CodegenError::llvm("icmp", e))
    }

    // ── Date arithmetic ──────────────────────────────────────────────

    /// DATE or DATETIME plus an interval, with the interval on either
    /// side. Resolved directly by symbol name, one runtime helper per
    /// (kind, unit) pair; units a kind does not support surface as a
    /// missing symbol.
    pub fn build_date_add(
        &mut self,
        lhs: ValueId,
        lhs_ty: &FieldType,
        rhs: ValueId,
        rhs_ty: &FieldType,
    ) -> Result<(ValueId, FieldType), CodegenError> {
        let (date, date_ty, interval, interval_ty) = if is_interval(lhs_ty) {
            (rhs, rhs_ty, lhs, lhs_ty)
        } else {
            (lhs, lhs_ty, rhs, rhs_ty)
        };
        let unit = match interval_ty.kind {
            FieldKind::Interval(unit) => unit,
            _ => {
                return Err(CodegenError::internal(
                    "date arithmetic",
                    format!("{interval_ty} is not an interval"),
                ))
            }
        };
        let root = match date_ty.kind {
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            _ => {
                return Err(CodegenError::internal(
                    "date arithmetic",
                    format!("{date_ty} is not a date or datetime"),
                ))
            }
        };
        let symbol = format!("sift_{root}_add_{}", unit.name());
        let callee = self.module.get_function(&symbol).ok_or_else(|| {
            CodegenError::MissingSymbol {
                name: format!("{root} + interval {}", unit.name()),
                symbol: symbol.clone(),
            }
        })?;

        let result_ty = FieldType {
            kind: date_ty.kind,
            nullable: date_ty.nullable || interval_ty.nullable,
        };
        if self.values.get(date).is_literal_null() || self.values.get(interval).is_literal_null() {
            return Ok((self.null_value(), result_ty));
        }
        let date = self.rvalue(date, date_ty)?;
        let interval = self.rvalue(interval, interval_ty)?;
        let dtv = self.values.get(date);
        let itv = self.values.get(interval);
        let flag = self.merge_null_flags(dtv.null_flag(), itv.null_flag())?;

        let d = dtv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
            CodegenError::internal("date arithmetic", "missing date payload")
        })?;
        let i = itv.payload().map(BasicValueEnum::into_int_value).ok_or_else(|| {
            CodegenError::internal("date arithmetic", "missing interval payload")
        })?;
        let result = self
            .builder
            .build_call(callee, &[d.into(), i.into()], "datetmp")
            .map_err(|e| CodegenError::llvm("call", e))?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| CodegenError::internal("date arithmetic", "helper returned void"))?;
        Ok((self.values.alloc(Some(result), flag, Storage::Local), result_ty))
    }

    // ── Arrays ───────────────────────────────────────────────────────

    /// Materialize an N-element array of one element type, yielding a
    /// pointer to its storage.
    ///
    /// All-constant element lists become an internal read-only global;
    /// anything else is an entry-block alloca with per-index stores.
    /// Nullable element types are rejected.
    // TODO: constant elements promote the array to a read-only global, but
    // nothing stops a program from assigning into it later; the front end
    // needs a mutability check before that is safe.
    pub fn build_array(
        &mut self,
        values: &[ValueId],
        elem_ty: &FieldType,
    ) -> Result<ValueId, CodegenError> {
        if elem_ty.nullable {
            return Err(CodegenError::NullableArrayElement { elem: elem_ty.to_string() });
        }
        let llvm_elem = llvm_type(self.context, &elem_ty.kind);
        let arr_ty = llvm_elem.array_type(values.len() as u32);

        if let Some(consts) = self.array_constants(values) {
            return self.build_const_array(&consts, elem_ty, arr_ty);
        }

        let slot = self.build_entry_alloca(arr_ty.into(), "arraytmp")?;
        let i64_ty = self.context.i64_type();
        for (i, v) in values.iter().enumerate() {
            let idx = [i64_ty.const_zero(), i64_ty.const_int(i as u64, false)];
            let elem_ptr = unsafe { self.builder.build_gep(arr_ty, slot, &idx, "arrayelem") }
                .map_err(|e| CodegenError::llvm("array gep", e))?;
            let elem_vid = self.values.alloc(Some(elem_ptr.into()), None, Storage::Local);
            let target = LValue::local(elem_vid, None);
            self.store_value(&target, *v, elem_ty)?;
        }
        Ok(self.values.alloc(Some(slot.into()), None, Storage::Local))
    }

    /// All elements as LLVM constants, or `None` when any element needs a
    /// runtime store.
    fn array_constants(&self, values: &[ValueId]) -> Option<Vec<BasicValueEnum<'ctx>>> {
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            let tv = self.values.get(*v);
            if tv.null_flag().is_some() {
                return None;
            }
            match tv.payload()? {
                BasicValueEnum::IntValue(iv) if iv.is_const() => out.push(iv.into()),
                BasicValueEnum::FloatValue(fv) if fv.is_const() => out.push(fv.into()),
                _ => return None,
            }
        }
        Some(out)
    }

    fn build_const_array(
        &mut self,
        consts: &[BasicValueEnum<'ctx>],
        elem_ty: &FieldType,
        arr_ty: ArrayType<'ctx>,
    ) -> Result<ValueId, CodegenError> {
        let init = match llvm_type(self.context, &elem_ty.kind) {
            BasicTypeEnum::IntType(t) => {
                let vals: Vec<IntValue<'ctx>> =
                    consts.iter().map(|c| c.into_int_value()).collect();
                t.const_array(&vals)
            }
            BasicTypeEnum::FloatType(t) => {
                let vals: Vec<inkwell::values::FloatValue<'ctx>> =
                    consts.iter().map(|c| c.into_float_value()).collect();
                t.const_array(&vals)
            }
            _ => {
                return Err(CodegenError::internal(
                    "const array",
                    format!("unsupported constant element type {elem_ty}"),
                ))
            }
        };
        let global = self.module.add_global(arr_ty, None, "const_array");
        global.set_initializer(&init);
        global.set_constant(true);
        global.set_linkage(Linkage::Internal);
        global.set_alignment(16);
        Ok(self.values.alloc(Some(global.as_pointer_value().into()), None, Storage::Global))
    }

    // ── Varchar headers ──────────────────────────────────────────────

    /// Whether a varchar header is in its small form: bit 0 of the first
    /// byte clear.
    pub(crate) fn varchar_is_small(
        &self,
        header: PointerValue<'ctx>,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        let i8_ty = self.context.i8_type();
        let byte = self
            .builder
            .build_load(i8_ty, header, "vc_byte0")
            .map_err(|e| CodegenError::llvm("load varchar byte", e))?
            .into_int_value();
        let tag = self
            .builder
            .build_and(byte, i8_ty.const_int(1, false), "vc_tag")
            .map_err(|e| CodegenError::llvm("mask varchar tag", e))?;
        self.builder
            .build_int_compare(IntPredicate::EQ, tag, i8_ty.const_zero(), "vc_is_small")
            .map_err(|e| CodegenError::llvm("test varchar tag", e))
    }

    /// Byte length of a varchar, decoded from whichever form the header
    /// is in. Small form keeps a 7-bit length in byte 0; large form keeps
    /// a 31-bit length in dword 0. Both shift the tag bit out.
    pub fn varchar_size(&mut self, value: ValueId) -> Result<ValueId, CodegenError> {
        let header = self.pointer_payload(value, "varchar size")?;
        let flag = self.values.get(value).null_flag();
        let fn_val = self.current_function()?;
        let small_bb = self.context.append_basic_block(fn_val, "varchar_small");
        let large_bb = self.context.append_basic_block(fn_val, "varchar_large");
        let merge_bb = self.context.append_basic_block(fn_val, "varchar_merge");
        let i8_ty = self.context.i8_type();
        let i32_ty = self.context.i32_type();
        let slot = self.build_entry_alloca(i32_ty.into(), "vc_size")?;

        let is_small = self.varchar_is_small(header)?;
        self.builder
            .build_conditional_branch(is_small, small_bb, large_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(small_bb);
        let byte = self
            .builder
            .build_load(i8_ty, header, "vc_byte0")
            .map_err(|e| CodegenError::llvm("load varchar byte", e))?
            .into_int_value();
        let bits = self
            .builder
            .build_and(byte, i8_ty.const_int(0xfe, false), "vc_small_bits")
            .map_err(|e| CodegenError::llvm("mask varchar size", e))?;
        let len8 = self
            .builder
            .build_right_shift(bits, i8_ty.const_int(1, false), true, "vc_small_len")
            .map_err(|e| CodegenError::llvm("shift varchar size", e))?;
        let small_size = self
            .builder
            .build_int_s_extend(len8, i32_ty, "vc_small_size")
            .map_err(|e| CodegenError::llvm("extend varchar size", e))?;
        self.builder
            .build_store(slot, small_size)
            .map_err(|e| CodegenError::llvm("store", e))?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(large_bb);
        let dword = self
            .builder
            .build_load(i32_ty, header, "vc_dword0")
            .map_err(|e| CodegenError::llvm("load varchar dword", e))?
            .into_int_value();
        let bits32 = self
            .builder
            .build_and(dword, i32_ty.const_int(0xffff_fffe, false), "vc_large_bits")
            .map_err(|e| CodegenError::llvm("mask varchar size", e))?;
        let large_size = self
            .builder
            .build_right_shift(bits32, i32_ty.const_int(1, false), true, "vc_large_size")
            .map_err(|e| CodegenError::llvm("shift varchar size", e))?;
        self.builder
            .build_store(slot, large_size)
            .map_err(|e| CodegenError::llvm("store", e))?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(merge_bb);
        let size = self
            .builder
            .build_load(i32_ty, slot, "vc_size")
            .map_err(|e| CodegenError::llvm("load", e))?;
        Ok(self.values.alloc(Some(size), flag, Storage::Local))
    }

    /// Pointer to a varchar's character data: byte 1 of the header for
    /// the small form, the stored heap pointer for the large form. The
    /// result carries the varchar's kind so it can feed a function call.
    pub fn varchar_data_ptr(&mut self, value: ValueId) -> Result<ValueId, CodegenError> {
        let header = self.pointer_payload(value, "varchar data")?;
        let flag = self.values.get(value).null_flag();
        let fn_val = self.current_function()?;
        let small_bb = self.context.append_basic_block(fn_val, "varchar_small");
        let large_bb = self.context.append_basic_block(fn_val, "varchar_large");
        let merge_bb = self.context.append_basic_block(fn_val, "varchar_merge");
        let ptr_ty = self.context.ptr_type(inkwell::AddressSpace::default());
        let slot = self.build_entry_alloca(ptr_ty.into(), "vc_data")?;

        let is_small = self.varchar_is_small(header)?;
        self.builder
            .build_conditional_branch(is_small, small_bb, large_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(small_bb);
        let one = [self.context.i64_type().const_int(1, false)];
        let small_data =
            unsafe { self.builder.build_gep(self.context.i8_type(), header, &one, "vc_small_data") }
                .map_err(|e| CodegenError::llvm("varchar data gep", e))?;
        self.builder
            .build_store(slot, small_data)
            .map_err(|e| CodegenError::llvm("store", e))?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(large_bb);
        let ptr_slot = self
            .builder
            .build_struct_gep(varchar_type(self.context), header, 2, "vc_large_ptr")
            .map_err(|e| CodegenError::llvm("varchar data gep", e))?;
        let large_data = self
            .builder
            .build_load(ptr_ty, ptr_slot, "vc_large_data")
            .map_err(|e| CodegenError::llvm("load", e))?;
        self.builder
            .build_store(slot, large_data)
            .map_err(|e| CodegenError::llvm("store", e))?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(|e| CodegenError::llvm("branch", e))?;

        self.builder.position_at_end(merge_bb);
        let data = self
            .builder
            .build_load(ptr_ty, slot, "vc_data")
            .map_err(|e| CodegenError::llvm("load", e))?;
        Ok(self.values.alloc(Some(data), flag, Storage::Local))
    }

    // ── Null flags ───────────────────────────────────────────────────

    fn merge_null_flags(
        &self,
        a: Option<IntValue<'ctx>>,
        b: Option<IntValue<'ctx>>,
    ) -> Result<Option<IntValue<'ctx>>, CodegenError> {
        match (a, b) {
            (Some(x), Some(y)) => Ok(Some(
                self.builder
                    .build_or(x, y, "null_or")
                    .map_err(|e| CodegenError::llvm("merge null flags", e))?,
            )),
            (Some(x), None) | (None, Some(x)) => Ok(Some(x)),
            (None, None) => Ok(None),
        }
    }
}

fn is_interval(ty: &FieldType) -> bool {
    matches!(ty.kind, FieldKind::Interval(_))
}

fn is_time(ty: &FieldType) -> bool {
    matches!(ty.kind, FieldKind::Date | FieldKind::Datetime)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use inkwell::context::Context;

    use sift_common::{FieldDecl, IntervalUnit, RecordSchema};

    use super::*;

    fn transfer_cg<'ctx>(context: &'ctx Context) -> CodeGen<'ctx> {
        let mut cg = CodeGen::new(context, "expr_test").unwrap();
        let output = Rc::new(RecordSchema::new(
            "out",
            vec![FieldDecl { name: "c".to_string(), ty: FieldType::int32().nullable() }],
        ));
        cg.start_transfer_function("test_fn", &[], output).unwrap();
        cg
    }

    fn i32_val<'ctx>(cg: &mut CodeGen<'ctx>, context: &'ctx Context, n: u64) -> ValueId {
        cg.value(context.i32_type().const_int(n, false).into(), None, Storage::Local)
    }

    #[test]
    fn integer_add_is_native() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let a = i32_val(&mut cg, &context, 1);
        let b = i32_val(&mut cg, &context, 2);
        let (_, ty) = cg.build_add(a, &FieldType::int32(), b, &FieldType::int32()).unwrap();
        assert_eq!(ty.kind, FieldKind::Int32);
    }

    #[test]
    fn mixed_numeric_add_meets_at_double() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        // A slot-backed operand keeps the widening from constant-folding away.
        let a = cg.declare_local("a", &FieldType::int32()).unwrap().read(&mut cg).unwrap();
        let b = cg.value(context.f64_type().const_float(0.5).into(), None, Storage::Local);
        let (_, ty) = cg.build_add(a, &FieldType::int32(), b, &FieldType::double()).unwrap();
        assert_eq!(ty.kind, FieldKind::Double);

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("sitofp"), "int operand widens first:\n{ir}");
        assert!(ir.contains("fadd double"), "{ir}");
    }

    #[test]
    fn literal_null_absorbs_arithmetic() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let a = i32_val(&mut cg, &context, 1);
        let n = cg.null_value();
        let (res, _) = cg
            .build_add(a, &FieldType::int32(), n, &FieldType::int32().nullable())
            .unwrap();
        assert!(cg.values.get(res).is_literal_null());
    }

    #[test]
    fn runtime_flags_or_together() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        // Nullable locals read their flags out of slots, so the OR of the
        // two flags survives into the IR instead of folding.
        let nullable = FieldType::int32().nullable();
        let a = cg.declare_local("a", &nullable).unwrap().read(&mut cg).unwrap();
        let b = cg.declare_local("b", &nullable).unwrap().read(&mut cg).unwrap();
        let (res, ty) = cg.build_add(a, &nullable, b, &nullable).unwrap();
        assert!(ty.nullable);
        assert!(cg.values.get(res).null_flag().is_some());
        assert!(cg.get_llvm_ir().contains("null_or"));
    }

    #[test]
    fn decimal_arithmetic_calls_the_runtime() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let dec_ty = crate::codegen::types::decimal_type(&context);
        let pa = cg.build_entry_alloca(dec_ty.into(), "a").unwrap();
        let pb = cg.build_entry_alloca(dec_ty.into(), "b").unwrap();
        let a = cg.value(pa.into(), None, Storage::Local);
        let b = cg.value(pb.into(), None, Storage::Local);
        cg.build_mul(a, &FieldType::decimal(), b, &FieldType::decimal()).unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("call void @sift_decimal_mul"), "{ir}");
    }

    #[test]
    fn comparisons_produce_a_32_bit_boolean() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let a = cg.declare_local("a", &FieldType::int32()).unwrap().read(&mut cg).unwrap();
        let b = i32_val(&mut cg, &context, 2);
        let (_, ty) = cg
            .build_compare(CmpOp::Lt, a, &FieldType::int32(), b, &FieldType::int32())
            .unwrap();
        assert_eq!(ty.kind, FieldKind::Boolean);

        let da = cg.declare_local("d", &FieldType::double()).unwrap().read(&mut cg).unwrap();
        let db = cg.value(context.f64_type().const_float(2.0).into(), None, Storage::Local);
        cg.build_compare(CmpOp::Ge, da, &FieldType::double(), db, &FieldType::double())
            .unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("icmp slt i32"), "{ir}");
        assert!(ir.contains("fcmp oge double"), "{ir}");
        assert!(ir.contains("zext i1"), "boolean widens to its stored form:\n{ir}");
    }

    #[test]
    fn varchar_compare_tests_the_three_way_result() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let vty = varchar_type(&context);
        let pa = cg.build_entry_alloca(vty.into(), "a").unwrap();
        let pb = cg.build_entry_alloca(vty.into(), "b").unwrap();
        let a = cg.value(pa.into(), None, Storage::Local);
        let b = cg.value(pb.into(), None, Storage::Local);
        cg.build_compare(CmpOp::Eq, a, &FieldType::varchar(), b, &FieldType::varchar())
            .unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("call i32 @sift_varchar_compare"), "{ir}");
        assert!(ir.contains("icmp eq i32"), "three-way result compared to zero:\n{ir}");
    }

    #[test]
    fn date_plus_interval_uses_the_unit_helper() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let d = i32_val(&mut cg, &context, 19_000);
        let i = i32_val(&mut cg, &context, 3);
        let (_, ty) = cg
            .build_add(
                d,
                &FieldType::date(),
                i,
                &FieldType::interval(IntervalUnit::Day),
            )
            .unwrap();
        assert_eq!(ty.kind, FieldKind::Date);
        assert!(cg.get_llvm_ir().contains("call i32 @sift_date_add_day"));
    }

    #[test]
    fn date_minus_interval_negates_first() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let d = i32_val(&mut cg, &context, 19_000);
        let i = i32_val(&mut cg, &context, 2);
        cg.build_sub(d, &FieldType::date(), i, &FieldType::interval(IntervalUnit::Month))
            .unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("call i32 @sift_date_add_month"), "{ir}");
    }

    #[test]
    fn unsupported_date_unit_is_a_missing_symbol() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let d = i32_val(&mut cg, &context, 19_000);
        let i = i32_val(&mut cg, &context, 5);
        let err = cg
            .build_add(d, &FieldType::date(), i, &FieldType::interval(IntervalUnit::Hour))
            .unwrap_err();
        match err {
            CodegenError::MissingSymbol { symbol, .. } => {
                assert_eq!(symbol, "sift_date_add_hour");
            }
            other => panic!("expected MissingSymbol, got {other}"),
        }
    }

    #[test]
    fn constant_arrays_become_internal_globals() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let vals: Vec<ValueId> =
            (1..=4).map(|n| i32_val(&mut cg, &context, n)).collect();
        cg.build_array(&vals, &FieldType::int32()).unwrap();

        // Sharing the global assumes the array is never written through.
        let ir = cg.get_llvm_ir();
        assert!(ir.contains("@const_array"), "{ir}");
        assert!(ir.contains("internal constant [4 x i32]"), "{ir}");
        assert!(ir.contains("align 16"), "{ir}");
        assert!(!ir.contains("store i32"), "no per-element stores:\n{ir}");
    }

    #[test]
    fn non_constant_arrays_store_per_index() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let lv = cg.declare_local("x", &FieldType::int32()).unwrap();
        let x = lv.read(&mut cg).unwrap();
        let c = i32_val(&mut cg, &context, 9);
        cg.build_array(&[x, c], &FieldType::int32()).unwrap();

        let ir = cg.get_llvm_ir();
        assert!(!ir.contains("@const_array"), "{ir}");
        assert!(ir.contains("alloca [2 x i32]"), "{ir}");
        assert!(ir.contains("getelementptr"), "{ir}");
        assert_eq!(ir.matches("store i32").count(), 2, "one store per element:\n{ir}");
    }

    #[test]
    fn nullable_array_elements_are_rejected() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let v = i32_val(&mut cg, &context, 1);
        let err = cg.build_array(&[v], &FieldType::int32().nullable()).unwrap_err();
        assert!(matches!(err, CodegenError::NullableArrayElement { .. }));
    }

    #[test]
    fn varchar_size_decodes_both_forms() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let header = cg.build_entry_alloca(varchar_type(&context).into(), "s").unwrap();
        let v = cg.value(header.into(), None, Storage::Local);
        cg.varchar_size(v).unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("varchar_small"), "{ir}");
        assert!(ir.contains("varchar_large"), "{ir}");
        assert!(ir.contains("varchar_merge"), "{ir}");
        assert!(ir.contains("and i8"), "small form masks the tag byte:\n{ir}");
        assert!(ir.contains("ashr"), "length shifts the tag bit out:\n{ir}");
        assert!(ir.contains("sext i8"), "small length widens to i32:\n{ir}");
        assert!(ir.contains("and i32"), "large form masks the dword:\n{ir}");
    }

    #[test]
    fn varchar_data_ptr_loads_the_large_pointer() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let header = cg.build_entry_alloca(varchar_type(&context).into(), "s").unwrap();
        let v = cg.value(header.into(), None, Storage::Local);
        cg.varchar_data_ptr(v).unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("vc_small_data"), "small data is header byte 1:\n{ir}");
        assert!(ir.contains("vc_large_ptr"), "large data ptr is member 2:\n{ir}");
    }

    #[test]
    fn nullable_store_forks_on_the_flag() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let flag = context.bool_type().const_int(0, false);
        let v = cg.value(context.i32_type().const_int(7, false).into(), Some(flag), Storage::Local);
        let target = cg.output_field("c").unwrap();
        cg.store_value(&target, v, &FieldType::int32().nullable()).unwrap();
        cg.finish_transfer_function().unwrap();

        let ir = cg.get_llvm_ir();
        assert!(ir.contains("store_null"), "{ir}");
        assert!(ir.contains("store_value"), "{ir}");
        assert!(ir.contains("store_merge"), "{ir}");
        assert!(ir.contains("or i64"), "null path sets the bitmap bit:\n{ir}");
        cg.verify().unwrap();
    }

    #[test]
    fn nullable_value_cannot_enter_a_non_nullable_slot() {
        let context = Context::create();
        let mut cg = transfer_cg(&context);
        let flag = context.bool_type().const_int(1, false);
        let v = cg.value(context.i32_type().const_int(7, false).into(), Some(flag), Storage::Local);
        let target = cg.declare_local("plain", &FieldType::int32()).unwrap();
        let err = cg.store_value(&target, v, &FieldType::int32().nullable()).unwrap_err();
        assert!(matches!(err, CodegenError::Internal { .. }));
    }
}

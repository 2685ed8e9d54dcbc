//! The runtime catalog and the calling-convention bridge.
//!
//! Generated code never allocates or manipulates DECIMAL, VARCHAR or
//! calendar values inline; it calls C helpers declared here. Two shapes
//! exist. Out-param helpers take `(args..., ptr result, ptr ctx)` and
//! return void, with the runtime context pointer reloaded from its stack
//! slot immediately before every call. Plain helpers return a scalar and
//! take no context.
//!
//! [`CodeGen::bind_external_function`] extends the same machinery to
//! user-supplied functions: a language-level name maps to a module
//! symbol plus its return convention, and [`CodeGen::build_call`]
//! marshals arguments accordingly.

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, PointerValue};
use inkwell::AddressSpace;

use sift_common::{CodegenError, FieldKind, FieldType};

use tracing::instrument;

use super::types::llvm_type;
use super::value::{Storage, ValueId};
use super::CodeGen;

/// Name of the stack slot holding the runtime context pointer, and the
/// symbol it is bound to in the function's scope.
pub const RUNTIME_CONTEXT_NAME: &str = "__RuntimeContext__";

// ── Catalog ──────────────────────────────────────────────────────────

/// LLVM-level shape of a runtime helper.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Sig {
    /// `(i32, ptr result, ptr ctx) -> void`
    SlotI32,
    /// `(i64, ptr result, ptr ctx) -> void`
    SlotI64,
    /// `(f64, ptr result, ptr ctx) -> void`
    SlotF64,
    /// `(ptr, ptr result, ptr ctx) -> void`
    SlotPtr,
    /// `(ptr, ptr, ptr result, ptr ctx) -> void`
    SlotPtrPtr,
    /// `(ptr, ptr) -> i32`
    CmpPtr,
    /// `(ptr, ptr, i32 len) -> i32`
    CmpChar,
    /// `(i32 date, i32 n) -> i32`
    DateShift,
    /// `(i64 datetime, i32 n) -> i64`
    DatetimeShift,
}

impl Sig {
    fn returns_via_slot(self) -> bool {
        matches!(
            self,
            Self::SlotI32 | Self::SlotI64 | Self::SlotF64 | Self::SlotPtr | Self::SlotPtrPtr
        )
    }
}

/// Every helper the emitters may reference, with its shape and the kind
/// it produces. Also installed as default bindings so generated programs
/// can call the helpers by name.
const CATALOG: &[(&str, Sig, FieldType)] = &[
    // Conversions into INTEGER.
    ("sift_i32_from_decimal", Sig::SlotPtr, FieldType::int32()),
    ("sift_i32_from_varchar", Sig::SlotPtr, FieldType::int32()),
    ("sift_i32_from_char", Sig::SlotPtr, FieldType::int32()),
    ("sift_i32_from_date", Sig::SlotI32, FieldType::int32()),
    ("sift_i32_from_datetime", Sig::SlotI64, FieldType::int32()),
    // Conversions into BIGINT.
    ("sift_i64_from_decimal", Sig::SlotPtr, FieldType::int64()),
    ("sift_i64_from_varchar", Sig::SlotPtr, FieldType::int64()),
    ("sift_i64_from_char", Sig::SlotPtr, FieldType::int64()),
    ("sift_i64_from_date", Sig::SlotI32, FieldType::int64()),
    ("sift_i64_from_datetime", Sig::SlotI64, FieldType::int64()),
    // Conversions into DOUBLE PRECISION.
    ("sift_double_from_decimal", Sig::SlotPtr, FieldType::double()),
    ("sift_double_from_varchar", Sig::SlotPtr, FieldType::double()),
    ("sift_double_from_char", Sig::SlotPtr, FieldType::double()),
    // Conversions into DECIMAL.
    ("sift_decimal_from_i32", Sig::SlotI32, FieldType::decimal()),
    ("sift_decimal_from_i64", Sig::SlotI64, FieldType::decimal()),
    ("sift_decimal_from_double", Sig::SlotF64, FieldType::decimal()),
    ("sift_decimal_from_varchar", Sig::SlotPtr, FieldType::decimal()),
    ("sift_decimal_from_char", Sig::SlotPtr, FieldType::decimal()),
    // Conversions into VARCHAR.
    ("sift_varchar_from_char", Sig::SlotPtr, FieldType::varchar()),
    ("sift_varchar_from_i32", Sig::SlotI32, FieldType::varchar()),
    ("sift_varchar_from_i64", Sig::SlotI64, FieldType::varchar()),
    ("sift_varchar_from_double", Sig::SlotF64, FieldType::varchar()),
    ("sift_varchar_from_decimal", Sig::SlotPtr, FieldType::varchar()),
    ("sift_varchar_from_date", Sig::SlotI32, FieldType::varchar()),
    ("sift_varchar_from_datetime", Sig::SlotI64, FieldType::varchar()),
    // Conversions into the calendar kinds.
    ("sift_date_from_varchar", Sig::SlotPtr, FieldType::date()),
    ("sift_datetime_from_varchar", Sig::SlotPtr, FieldType::datetime()),
    // DECIMAL arithmetic.
    ("sift_decimal_add", Sig::SlotPtrPtr, FieldType::decimal()),
    ("sift_decimal_sub", Sig::SlotPtrPtr, FieldType::decimal()),
    ("sift_decimal_mul", Sig::SlotPtrPtr, FieldType::decimal()),
    ("sift_decimal_div", Sig::SlotPtrPtr, FieldType::decimal()),
    ("sift_decimal_neg", Sig::SlotPtr, FieldType::decimal()),
    ("sift_decimal_compare", Sig::SlotPtrPtr, FieldType::int32()),
    // VARCHAR assignment, concatenation and comparison. The copy takes
    // (src, dest, ctx) so the runtime owns any heap duplication.
    ("sift_varchar_copy", Sig::SlotPtr, FieldType::varchar()),
    ("sift_varchar_concat", Sig::SlotPtrPtr, FieldType::varchar()),
    ("sift_varchar_compare", Sig::CmpPtr, FieldType::int32()),
    ("sift_char_compare", Sig::CmpChar, FieldType::int32()),
    // Calendar shifts, one per (kind, unit) pair a kind supports.
    ("sift_date_add_day", Sig::DateShift, FieldType::date()),
    ("sift_date_add_month", Sig::DateShift, FieldType::date()),
    ("sift_date_add_year", Sig::DateShift, FieldType::date()),
    ("sift_datetime_add_second", Sig::DatetimeShift, FieldType::datetime()),
    ("sift_datetime_add_minute", Sig::DatetimeShift, FieldType::datetime()),
    ("sift_datetime_add_hour", Sig::DatetimeShift, FieldType::datetime()),
    ("sift_datetime_add_day", Sig::DatetimeShift, FieldType::datetime()),
    ("sift_datetime_add_month", Sig::DatetimeShift, FieldType::datetime()),
    ("sift_datetime_add_year", Sig::DatetimeShift, FieldType::datetime()),
];

/// Declare every catalog symbol in the module with external linkage.
pub(crate) fn declare_runtime<'ctx>(context: &'ctx Context, module: &Module<'ctx>) {
    let ptr = context.ptr_type(AddressSpace::default());
    let i32_ty = context.i32_type();
    let i64_ty = context.i64_type();
    let f64_ty = context.f64_type();
    let void = context.void_type();

    for (symbol, sig, _) in CATALOG {
        let fn_ty = match sig {
            Sig::SlotI32 => void.fn_type(&[i32_ty.into(), ptr.into(), ptr.into()], false),
            Sig::SlotI64 => void.fn_type(&[i64_ty.into(), ptr.into(), ptr.into()], false),
            Sig::SlotF64 => void.fn_type(&[f64_ty.into(), ptr.into(), ptr.into()], false),
            Sig::SlotPtr => void.fn_type(&[ptr.into(), ptr.into(), ptr.into()], false),
            Sig::SlotPtrPtr => {
                void.fn_type(&[ptr.into(), ptr.into(), ptr.into(), ptr.into()], false)
            }
            Sig::CmpPtr => i32_ty.fn_type(&[ptr.into(), ptr.into()], false),
            Sig::CmpChar => i32_ty.fn_type(&[ptr.into(), ptr.into(), i32_ty.into()], false),
            Sig::DateShift => i32_ty.fn_type(&[i32_ty.into(), i32_ty.into()], false),
            Sig::DatetimeShift => i64_ty.fn_type(&[i64_ty.into(), i32_ty.into()], false),
        };
        module.add_function(symbol, fn_ty, Some(Linkage::External));
    }
}

/// Register every catalog helper under its own name.
pub(crate) fn install_default_bindings(cg: &mut CodeGen<'_>) {
    for (symbol, sig, ret) in CATALOG {
        if let Some(function) = cg.module.get_function(symbol) {
            cg.extern_functions.insert(
                (*symbol).to_string(),
                ExternBinding {
                    function,
                    symbol: (*symbol).to_string(),
                    ret: *ret,
                    returns_via_slot: sig.returns_via_slot(),
                },
            );
        }
    }
}

// ── Bindings ─────────────────────────────────────────────────────────

/// A function callable from generated code.
#[derive(Clone)]
pub struct ExternBinding<'ctx> {
    /// The declared module function.
    pub(crate) function: FunctionValue<'ctx>,
    /// Module-level symbol the name is bound to.
    pub(crate) symbol: String,
    /// Kind the callee produces in the result slot (or returns).
    pub(crate) ret: FieldType,
    /// Whether the callee takes `(args..., ptr result, ptr ctx)` and
    /// returns void.
    pub(crate) returns_via_slot: bool,
}

impl<'ctx> CodeGen<'ctx> {
    /// Register `symbol` as the implementation of the language-level
    /// function `name`, declaring it in the module when absent.
    ///
    /// With `returns_via_slot` the callee receives a result slot and the
    /// runtime context pointer after its declared arguments; otherwise it
    /// must return a scalar.
    pub fn bind_external_function(
        &mut self,
        name: &str,
        symbol: &str,
        arg_types: &[FieldType],
        ret: &FieldType,
        returns_via_slot: bool,
    ) -> Result<(), CodegenError> {
        let function = match self.module.get_function(symbol) {
            Some(f) => f,
            None => {
                let ptr = self.context.ptr_type(AddressSpace::default());
                let mut params: Vec<BasicMetadataTypeEnum<'ctx>> = arg_types
                    .iter()
                    .map(|ty| abi_param(self.context, &ty.kind))
                    .collect();
                let fn_ty = if returns_via_slot {
                    params.push(ptr.into());
                    params.push(ptr.into());
                    self.context.void_type().fn_type(&params, false)
                } else {
                    match llvm_type(self.context, &ret.kind) {
                        BasicTypeEnum::IntType(t) => t.fn_type(&params, false),
                        BasicTypeEnum::FloatType(t) => t.fn_type(&params, false),
                        _ => {
                            return Err(CodegenError::internal(
                                "bind function",
                                format!(
                                    "{ret} cannot be returned by value; use the result-slot \
                                     convention"
                                ),
                            ))
                        }
                    }
                };
                self.module.add_function(symbol, fn_ty, Some(Linkage::External))
            }
        };
        self.extern_functions.insert(
            name.to_string(),
            ExternBinding {
                function,
                symbol: symbol.to_string(),
                ret: *ret,
                returns_via_slot,
            },
        );
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Call a bound function, writing its result into `ret_slot`.
    ///
    /// Arguments must already have the callee's declared types; by-ref
    /// kinds pass their payload pointer, by-value kinds are loaded. The
    /// slot's kind must match the callee's declared return kind, except
    /// that CHAR slots of any length alias.
    #[instrument(level = "debug", skip(self, args, ret_slot))]
    pub fn build_call(
        &mut self,
        name: &str,
        args: &[ValueId],
        arg_types: &[FieldType],
        ret_slot: PointerValue<'ctx>,
        ret_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let binding = self
            .extern_functions
            .get(name)
            .cloned()
            .ok_or_else(|| CodegenError::UnboundFunction { name: name.to_string() })?;
        if args.len() != arg_types.len() {
            return Err(CodegenError::internal(
                "call",
                format!("{} arguments with {} declared types", args.len(), arg_types.len()),
            ));
        }
        if binding.ret.kind != ret_ty.kind && !chars_alias(&binding.ret.kind, &ret_ty.kind) {
            return Err(CodegenError::ResultSlotMismatch {
                callee: name.to_string(),
                declared: binding.ret.to_string(),
                slot: ret_ty.to_string(),
            });
        }
        let expected = args.len() + if binding.returns_via_slot { 2 } else { 0 };
        let params = binding.function.count_params() as usize;
        if params != expected {
            return Err(CodegenError::internal(
                "call",
                format!("{} takes {params} parameters, call supplies {expected}", binding.symbol),
            ));
        }
        if binding.returns_via_slot {
            // The two trailing parameters are the result slot and the
            // context pointer.
            let trailing_ptrs = binding
                .function
                .get_param_iter()
                .skip(args.len())
                .all(|p| p.is_pointer_value());
            if !trailing_ptrs {
                return Err(CodegenError::internal(
                    "call",
                    format!("{} does not follow the result-slot convention", binding.symbol),
                ));
            }
        }

        let mut call_args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(expected);
        for (v, ty) in args.iter().zip(arg_types) {
            if self.values.get(*v).is_literal_null() {
                return Err(CodegenError::internal(
                    "call",
                    format!("NULL argument in call to {name}"),
                ));
            }
            if ty.kind.is_by_ref() {
                call_args.push(self.pointer_payload(*v, "call argument")?.into());
            } else {
                let rv = self.rvalue(*v, ty)?;
                let payload = self.values.get(rv).payload().ok_or_else(|| {
                    CodegenError::internal("call", "argument has no payload")
                })?;
                call_args.push(payload.into());
            }
        }

        if binding.returns_via_slot {
            let ctx = self.runtime_context()?;
            call_args.push(ret_slot.into());
            call_args.push(ctx.into());
            self.builder
                .build_call(binding.function, &call_args, "")
                .map_err(|e| CodegenError::llvm("call", e))?;
        } else {
            let out = self
                .builder
                .build_call(binding.function, &call_args, "calltmp")
                .map_err(|e| CodegenError::llvm("call", e))?
                .try_as_basic_value()
                .basic()
                .ok_or_else(|| {
                    CodegenError::internal("call", format!("{} returned void", binding.symbol))
                })?;
            self.builder
                .build_store(ret_slot, out)
                .map_err(|e| CodegenError::llvm("store call result", e))?;
        }
        Ok(())
    }

    /// Call a bound function, materializing its result in a fresh entry
    /// slot. The returned value is address-flavored over that slot.
    pub fn call_function(
        &mut self,
        name: &str,
        args: &[ValueId],
        arg_types: &[FieldType],
        ret_ty: &FieldType,
    ) -> Result<ValueId, CodegenError> {
        let slot = self.build_entry_alloca(llvm_type(self.context, &ret_ty.kind), "calltmp")?;
        self.build_call(name, args, arg_types, slot, ret_ty)?;
        Ok(self.values.alloc(Some(slot.into()), None, Storage::Local))
    }

    /// Emit a call to a catalog helper that fills `ret_slot`, appending
    /// the slot and a freshly reloaded context pointer to `args`.
    pub(crate) fn call_runtime_into(
        &mut self,
        symbol: &str,
        args: &[BasicValueEnum<'ctx>],
        ret_slot: PointerValue<'ctx>,
    ) -> Result<(), CodegenError> {
        let callee = self.module.get_function(symbol).ok_or_else(|| {
            CodegenError::MissingSymbol { name: symbol.to_string(), symbol: symbol.to_string() }
        })?;
        let ctx = self.runtime_context()?;
        let mut call_args: Vec<BasicMetadataValueEnum<'ctx>> =
            args.iter().map(|a| (*a).into()).collect();
        call_args.push(ret_slot.into());
        call_args.push(ctx.into());
        self.builder
            .build_call(callee, &call_args, "")
            .map_err(|e| CodegenError::llvm("runtime call", e))?;
        Ok(())
    }

    /// Emit a call to a value-returning catalog helper.
    pub(crate) fn call_runtime_direct(
        &mut self,
        symbol: &str,
        args: &[BasicValueEnum<'ctx>],
    ) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        let callee = self.module.get_function(symbol).ok_or_else(|| {
            CodegenError::MissingSymbol { name: symbol.to_string(), symbol: symbol.to_string() }
        })?;
        let call_args: Vec<BasicMetadataValueEnum<'ctx>> =
            args.iter().map(|a| (*a).into()).collect();
        self.builder
            .build_call(callee, &call_args, "calltmp")
            .map_err(|e| CodegenError::llvm("runtime call", e))?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| CodegenError::internal("runtime call", format!("{symbol} returned void")))
    }

    /// Reload the runtime context pointer for an imminent call. The
    /// pointer lives in a stack slot and is re-read before every call,
    /// never cached in a register across calls.
    fn runtime_context(&self) -> Result<PointerValue<'ctx>, CodegenError> {
        let slot = self.context_arg_ref()?;
        let ptr = self.context.ptr_type(AddressSpace::default());
        Ok(self
            .builder
            .build_load(ptr, slot, "runtime_ctx")
            .map_err(|e| CodegenError::llvm("load runtime context", e))?
            .into_pointer_value())
    }
}

fn abi_param<'ctx>(context: &'ctx Context, kind: &FieldKind) -> BasicMetadataTypeEnum<'ctx> {
    if kind.is_by_ref() {
        context.ptr_type(AddressSpace::default()).into()
    } else {
        llvm_type(context, kind).into()
    }
}

fn chars_alias(a: &FieldKind, b: &FieldKind) -> bool {
    matches!((a, b), (FieldKind::Char(_), FieldKind::Char(_)))
}

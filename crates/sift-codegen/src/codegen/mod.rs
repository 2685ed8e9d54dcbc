//! LLVM IR generation for record transfer programs.
//!
//! This module implements the code generation context that lowers typed
//! transfer programs into LLVM IR using Inkwell 0.8.0.
//!
//! ## Architecture
//!
//! - [`CodeGen`]: generation context holding LLVM context, module, builder
//! - [`value`]: arena values, lvalues, and the symbol table
//! - [`layout`]: record struct layout and the null bitmap
//! - [`types`]: field kind to LLVM storage type mapping
//! - [`convert`]: the implicit-conversion lattice and cast emission
//! - [`flow`]: WHILE and CASE protocols plus null-aware branching
//! - [`expr`]: arithmetic, comparison, array and varchar emitters
//! - [`runtime`]: runtime symbol catalog and the external call bridge

pub mod convert;
pub mod expr;
pub mod flow;
pub mod layout;
pub mod runtime;
pub mod types;
pub mod value;

use std::mem;
use std::rc::Rc;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target};
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::AddressSpace;
use rustc_hash::FxHashMap;
use tracing::instrument;

use sift_common::{CodegenError, FieldType, RecordSchema};

use self::flow::{CaseFrame, LoopFrame};
use self::layout::RecordLayout;
use self::runtime::ExternBinding;
use self::types::llvm_type;
use self::value::{LValue, Storage, SymbolTable, ValueArena, ValueId};

// ── CodeGen ──────────────────────────────────────────────────────────

/// The code generation context.
///
/// Holds the LLVM module and builder, the value arena, the symbol table,
/// the control-flow stacks, and the registries that outlive any single
/// function (external bindings and record layouts).
pub struct CodeGen<'ctx> {
    /// The LLVM context (lifetime anchor for all LLVM values).
    pub(crate) context: &'ctx Context,
    /// The LLVM module being built.
    pub(crate) module: Module<'ctx>,
    /// The LLVM IR builder.
    pub(crate) builder: Builder<'ctx>,

    // ── Values and names ─────────────────────────────────────────────

    /// Every value created during generation, addressed by [`ValueId`].
    pub(crate) values: ValueArena<'ctx>,
    /// Name to location bindings for the current function.
    pub(crate) symbols: SymbolTable<'ctx>,
    /// Alloca reuse cache: one entry-block slot per name in the current
    /// function.
    pub(crate) local_slots: FxHashMap<String, PointerValue<'ctx>>,

    // ── Function state ───────────────────────────────────────────────

    /// The function currently being generated.
    pub(crate) current_fn: Option<FunctionValue<'ctx>>,
    /// The output record parameter of the current transfer function.
    pub(crate) output_record: Option<PointerValue<'ctx>>,
    /// Layout of the output record.
    pub(crate) output_layout: Option<Rc<RecordLayout<'ctx>>>,
    /// Input record registry: record name -> (argument name, schema).
    pub(crate) record_args: FxHashMap<String, (String, Rc<RecordSchema>)>,

    // ── Control-flow stacks ──────────────────────────────────────────

    /// Enclosing WHILE frames, innermost last.
    pub(crate) loop_stack: Vec<LoopFrame<'ctx>>,
    /// Enclosing CASE frames, innermost last. Kept separate from
    /// `loop_stack` so loops inside CASE arms nest cleanly.
    pub(crate) case_stack: Vec<CaseFrame<'ctx>>,

    // ── Module-level registries ──────────────────────────────────────

    /// Functions callable from generated code, by language-level name.
    pub(crate) extern_functions: FxHashMap<String, ExternBinding<'ctx>>,
    /// Record layouts, cached by schema name.
    pub(crate) layouts: FxHashMap<String, Rc<RecordLayout<'ctx>>>,
}

impl<'ctx> CodeGen<'ctx> {
    /// Create a new generation context and declare the runtime catalog
    /// into a fresh module.
    ///
    /// # Errors
    ///
    /// Returns an error if native target initialization fails.
    pub fn new(context: &'ctx Context, module_name: &str) -> Result<Self, CodegenError> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| CodegenError::llvm("initialize native target", e))?;

        let module = context.create_module(module_name);
        let builder = context.create_builder();

        let mut cg = CodeGen {
            context,
            module,
            builder,
            values: ValueArena::default(),
            symbols: SymbolTable::default(),
            local_slots: FxHashMap::default(),
            current_fn: None,
            output_record: None,
            output_layout: None,
            record_args: FxHashMap::default(),
            loop_stack: Vec::new(),
            case_stack: Vec::new(),
            extern_functions: FxHashMap::default(),
            layouts: FxHashMap::default(),
        };

        runtime::declare_runtime(cg.context, &cg.module);
        runtime::install_default_bindings(&mut cg);
        Ok(cg)
    }

    // ── Values ───────────────────────────────────────────────────────

    /// Wrap an IR payload as an arena value.
    pub fn value(
        &mut self,
        payload: BasicValueEnum<'ctx>,
        null_flag: Option<IntValue<'ctx>>,
        storage: Storage,
    ) -> ValueId {
        self.values.alloc(Some(payload), null_flag, storage)
    }

    /// The literal NULL constant.
    pub fn null_value(&mut self) -> ValueId {
        self.values.alloc(None, None, Storage::Local)
    }

    /// Collapse an address-flavored value to its loadable payload.
    ///
    /// By-value kinds held behind a pointer (record members, cast result
    /// slots) are loaded; by-ref kinds pass through because their payload
    /// is exactly the pointer consumers want. The literal NULL also
    /// passes through.
    pub(crate) fn rvalue(&mut self, id: ValueId, ty: &FieldType) -> Result<ValueId, CodegenError> {
        let tv = self.values.get(id);
        let Some(payload) = tv.payload() else {
            return Ok(id);
        };
        if ty.kind.is_by_ref() {
            return Ok(id);
        }
        match payload {
            BasicValueEnum::PointerValue(p) => {
                let loaded = self
                    .builder
                    .build_load(llvm_type(self.context, &ty.kind), p, "rval")
                    .map_err(|e| CodegenError::llvm("load rvalue", e))?;
                Ok(self.values.alloc(Some(loaded), tv.null_flag(), Storage::Local))
            }
            _ => Ok(id),
        }
    }

    // ── Variables ────────────────────────────────────────────────────

    /// Bind a name to a local location. The value carries no null flag of
    /// its own; nullability lives entirely in the optional null slot.
    pub fn define_variable(
        &mut self,
        name: &str,
        value: ValueId,
        null_slot: Option<PointerValue<'ctx>>,
    ) {
        self.symbols.add(name, LValue::local(value, null_slot));
    }

    /// Create (or reuse) a stack slot for a named local, with a null slot
    /// when the declared type is nullable, and bind it.
    pub fn declare_local(
        &mut self,
        name: &str,
        ty: &FieldType,
    ) -> Result<LValue<'ctx>, CodegenError> {
        let slot = self.cached_local(llvm_type(self.context, &ty.kind), name)?;
        let vid = self.values.alloc(Some(slot.into()), None, Storage::Local);
        let null_slot = if ty.nullable {
            Some(self.cached_local(self.context.bool_type().into(), &format!("{name}.null"))?)
        } else {
            None
        };
        let lv = LValue::local(vid, null_slot);
        self.symbols.add(name, lv.clone());
        Ok(lv)
    }

    /// Look up a name, cloning the binding out of the table.
    pub fn lookup(&self, name: &str) -> Result<LValue<'ctx>, CodegenError> {
        self.symbols
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::UndefinedVariable { name: name.to_string() })
    }

    /// Store a value of `value_ty` into a named variable. The caller has
    /// already converted the value to the variable's declared type.
    pub fn set_variable(
        &mut self,
        name: &str,
        value: ValueId,
        value_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let target = self.lookup(name)?;
        self.store_value(&target, value, value_ty)
    }

    /// An assignable lvalue for a member of the output record.
    pub fn output_field(&self, member: &str) -> Result<LValue<'ctx>, CodegenError> {
        let base = self.output_record.ok_or_else(|| {
            CodegenError::internal("output field", "no transfer function is active")
        })?;
        let layout = self.output_layout.as_ref().ok_or_else(|| {
            CodegenError::internal("output field", "no transfer function is active")
        })?;
        Ok(LValue::field(Rc::clone(layout), member, base))
    }

    // ── Record binding ───────────────────────────────────────────────

    /// Layout for a schema, cached by record name.
    pub fn layout_for(
        &mut self,
        schema: &Rc<RecordSchema>,
    ) -> Result<Rc<RecordLayout<'ctx>>, CodegenError> {
        if let Some(layout) = self.layouts.get(schema.name()) {
            return Ok(Rc::clone(layout));
        }
        let layout = Rc::new(RecordLayout::new(self.context, Rc::clone(schema))?);
        self.layouts.insert(schema.name().to_string(), Rc::clone(&layout));
        Ok(layout)
    }

    /// Bind every member of an input record under both its qualified name
    /// (`record.member`) and its bare name. The record's base pointer must
    /// already be bound under `arg_name`.
    pub fn add_input_record(
        &mut self,
        record_name: &str,
        arg_name: &str,
        schema: &Rc<RecordSchema>,
    ) -> Result<(), CodegenError> {
        let mask = vec![true; schema.len()];
        self.add_input_record_masked(record_name, arg_name, schema, &mask)
    }

    /// Masked record binding: member `i` is bound only when `mask[i]` is
    /// set. Used when an upstream projection has pruned members the
    /// program never touches.
    pub fn add_input_record_masked(
        &mut self,
        record_name: &str,
        arg_name: &str,
        schema: &Rc<RecordSchema>,
        mask: &[bool],
    ) -> Result<(), CodegenError> {
        if mask.len() != schema.len() {
            return Err(CodegenError::internal(
                "record binding",
                format!(
                    "mask has {} entries for {} members of {}",
                    mask.len(),
                    schema.len(),
                    schema.name()
                ),
            ));
        }
        let base = self.lookup(arg_name)?.address(self)?;
        let layout = self.layout_for(schema)?;
        for (field, bound) in schema.fields().iter().zip(mask) {
            if !*bound {
                continue;
            }
            self.symbols.add_qualified(
                record_name,
                &field.name,
                LValue::field(Rc::clone(&layout), field.name.clone(), base),
            );
        }
        self.record_args
            .insert(record_name.to_string(), (arg_name.to_string(), Rc::clone(schema)));
        Ok(())
    }

    // ── Transfer functions ───────────────────────────────────────────

    /// Open a transfer function `void name(ptr in..., ptr out, ptr ctx)`
    /// and bind its arguments.
    ///
    /// Input record pointers are bound directly; no stack slot is
    /// interposed. The runtime context pointer goes through a slot so call
    /// sites can reload it immediately before every runtime call.
    #[instrument(level = "debug", skip(self, inputs, output))]
    pub fn start_transfer_function(
        &mut self,
        name: &str,
        inputs: &[(&str, Rc<RecordSchema>)],
        output: Rc<RecordSchema>,
    ) -> Result<FunctionValue<'ctx>, CodegenError> {
        self.reinitialize_for_transfer();

        let ptr_ty = self.context.ptr_type(AddressSpace::default());
        let params: Vec<BasicMetadataTypeEnum<'ctx>> =
            (0..inputs.len() + 2).map(|_| ptr_ty.into()).collect();
        let fn_ty = self.context.void_type().fn_type(&params, false);
        let fn_val = self.module.add_function(name, fn_ty, None);
        self.current_fn = Some(fn_val);

        let entry = self.context.append_basic_block(fn_val, "entry");
        self.builder.position_at_end(entry);

        for (i, (rec_name, schema)) in inputs.iter().enumerate() {
            let param = self.nth_param(fn_val, i)?;
            param.set_name(rec_name);
            let vid = self.values.alloc(Some(param.into()), None, Storage::Global);
            self.define_variable(rec_name, vid, None);
            self.add_input_record(rec_name, rec_name, schema)?;
        }

        let out_param = self.nth_param(fn_val, inputs.len())?;
        out_param.set_name("out");
        self.output_record = Some(out_param);
        self.output_layout = Some(self.layout_for(&output)?);

        let ctx_param = self.nth_param(fn_val, inputs.len() + 1)?;
        ctx_param.set_name("ctx");
        let ctx_slot = self.build_entry_alloca(ptr_ty.into(), runtime::RUNTIME_CONTEXT_NAME)?;
        self.builder
            .build_store(ctx_slot, ctx_param)
            .map_err(|e| CodegenError::llvm("store runtime context", e))?;
        let ctx_vid = self.values.alloc(Some(ctx_slot.into()), None, Storage::Local);
        self.define_variable(runtime::RUNTIME_CONTEXT_NAME, ctx_vid, None);

        Ok(fn_val)
    }

    /// Terminate the current transfer function with `ret void` (unless an
    /// earlier statement already terminated the block) and verify it.
    pub fn finish_transfer_function(&mut self) -> Result<(), CodegenError> {
        let fn_val = self.current_function()?;
        let block = self.builder.get_insert_block().ok_or_else(|| {
            CodegenError::internal("finish transfer", "builder has no insertion point")
        })?;
        if block.get_terminator().is_none() {
            self.builder
                .build_return(None)
                .map_err(|e| CodegenError::llvm("return", e))?;
        }
        if !fn_val.verify(false) {
            return Err(CodegenError::llvm(
                "function verification",
                format!("{} is malformed", fn_val.get_name().to_string_lossy()),
            ));
        }
        Ok(())
    }

    /// The stack slot holding the runtime context pointer. Callers load
    /// from it immediately before every runtime call; the pointer is never
    /// cached in a register across calls.
    pub(crate) fn context_arg_ref(&self) -> Result<PointerValue<'ctx>, CodegenError> {
        let lv = self
            .symbols
            .lookup(runtime::RUNTIME_CONTEXT_NAME)
            .ok_or_else(|| CodegenError::UndefinedVariable {
                name: runtime::RUNTIME_CONTEXT_NAME.to_string(),
            })?;
        lv.address(self)
    }

    // ── Context lifecycle ────────────────────────────────────────────

    /// Reset per-program state between programs compiled into the same
    /// module: name bindings, the current function, and the input record
    /// registry.
    pub fn reinitialize(&mut self) {
        self.symbols.clear();
        self.current_fn = None;
        self.record_args.clear();
    }

    /// [`reinitialize`] plus a fresh alloca cache, so stack-slot reuse
    /// never crosses a function boundary.
    ///
    /// [`reinitialize`]: CodeGen::reinitialize
    pub fn reinitialize_for_transfer(&mut self) {
        self.reinitialize();
        self.local_slots.clear();
    }

    /// Detach the per-function state so a nested function can be
    /// generated, leaving this context with a fresh builder and empty
    /// bindings.
    ///
    /// The value arena, extern-function registry, record layouts and
    /// control-flow stacks stay in place: values and layouts live as long
    /// as the context, and the stacks must be empty at any point where a
    /// nested function can start.
    pub fn save_function_context(&mut self) -> FunctionContext<'ctx> {
        FunctionContext {
            builder: mem::replace(&mut self.builder, self.context.create_builder()),
            symbols: mem::take(&mut self.symbols),
            local_slots: mem::take(&mut self.local_slots),
            record_args: mem::take(&mut self.record_args),
            current_fn: self.current_fn.take(),
            output_record: self.output_record.take(),
            output_layout: self.output_layout.take(),
        }
    }

    /// Put back state detached by [`save_function_context`], including the
    /// saved builder with its insertion point.
    ///
    /// [`save_function_context`]: CodeGen::save_function_context
    pub fn restore_function_context(&mut self, saved: FunctionContext<'ctx>) {
        self.builder = saved.builder;
        self.symbols = saved.symbols;
        self.local_slots = saved.local_slots;
        self.record_args = saved.record_args;
        self.current_fn = saved.current_fn;
        self.output_record = saved.output_record;
        self.output_layout = saved.output_layout;
    }

    // ── Module access ────────────────────────────────────────────────

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    /// Get the LLVM IR as a string (for testing).
    pub fn get_llvm_ir(&self) -> String {
        self.module.print_to_string().to_string()
    }

    /// Verify the whole module, as a last check before handing the IR to
    /// a JIT.
    pub fn verify(&self) -> Result<(), CodegenError> {
        self.module
            .verify()
            .map_err(|e| CodegenError::llvm("module verification", e.to_string()))
    }

    /// Consume the context and return the underlying LLVM module, for
    /// handing to an execution engine.
    pub fn into_module(self) -> Module<'ctx> {
        self.module
    }

    // ── Helpers ──────────────────────────────────────────────────────

    pub(crate) fn current_function(&self) -> Result<FunctionValue<'ctx>, CodegenError> {
        self.current_fn.ok_or_else(|| {
            CodegenError::internal("current function", "no function is being generated")
        })
    }

    fn nth_param(
        &self,
        fn_val: FunctionValue<'ctx>,
        i: usize,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        Ok(fn_val
            .get_nth_param(i as u32)
            .ok_or_else(|| {
                CodegenError::internal("transfer signature", format!("missing parameter {i}"))
            })?
            .into_pointer_value())
    }

    /// Build an alloca in the function's entry block.
    ///
    /// Allocas inside loop bodies would grow the stack on each iteration,
    /// so every slot is placed in the entry block regardless of where the
    /// builder currently sits.
    pub fn build_entry_alloca(
        &self,
        ty: BasicTypeEnum<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let fn_val = self.current_function()?;
        let entry_bb = fn_val
            .get_first_basic_block()
            .ok_or_else(|| CodegenError::internal("entry alloca", "function has no entry block"))?;

        // Save the current insertion point.
        let current_bb = self.builder.get_insert_block();

        // Position at the start of the entry block, before any existing
        // instructions.
        if let Some(first_inst) = entry_bb.get_first_instruction() {
            self.builder.position_before(&first_inst);
        } else {
            self.builder.position_at_end(entry_bb);
        }

        let alloca = self
            .builder
            .build_alloca(ty, name)
            .map_err(|e| CodegenError::llvm("alloca", e))?;

        // Restore the original insertion point.
        if let Some(bb) = current_bb {
            self.builder.position_at_end(bb);
        }

        Ok(alloca)
    }

    /// Entry alloca with per-name reuse, so repeated statement groups in
    /// one function share slots instead of growing the frame.
    pub(crate) fn cached_local(
        &mut self,
        ty: BasicTypeEnum<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        if let Some(slot) = self.local_slots.get(name) {
            return Ok(*slot);
        }
        let slot = self.build_entry_alloca(ty, name)?;
        self.local_slots.insert(name.to_string(), slot);
        Ok(slot)
    }
}

// ── Function context save/restore ────────────────────────────────────

/// Per-function generation state detached by
/// [`CodeGen::save_function_context`] and put back by
/// [`CodeGen::restore_function_context`].
pub struct FunctionContext<'ctx> {
    builder: Builder<'ctx>,
    symbols: SymbolTable<'ctx>,
    local_slots: FxHashMap<String, PointerValue<'ctx>>,
    record_args: FxHashMap<String, (String, Rc<RecordSchema>)>,
    current_fn: Option<FunctionValue<'ctx>>,
    output_record: Option<PointerValue<'ctx>>,
    output_layout: Option<Rc<RecordLayout<'ctx>>>,
}

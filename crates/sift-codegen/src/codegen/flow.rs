//! WHILE and CASE statement protocols plus null-aware branching.
//!
//! Both statements are built through begin / condition / arm / finish
//! call sequences driven by the front end, with per-statement state held
//! on stacks in the context so they nest. Branching on a BOOLEAN follows
//! SQL tri-state logic: a NULL condition takes the false edge, never the
//! true one.

use inkwell::basic_block::BasicBlock;
use inkwell::values::{BasicValueEnum, PointerValue};
use inkwell::IntPredicate;

use sift_common::{CodegenError, FieldType};

use super::types::llvm_type;
use super::value::{LValue, Storage, ValueId};
use super::CodeGen;

/// Basic blocks of one WHILE statement.
#[derive(Copy, Clone)]
pub struct LoopFrame<'ctx> {
    pub(crate) cond_bb: BasicBlock<'ctx>,
    pub(crate) body_bb: BasicBlock<'ctx>,
    pub(crate) merge_bb: BasicBlock<'ctx>,
}

/// State of one CASE expression under construction.
pub struct CaseFrame<'ctx> {
    /// Result slot every arm stores into.
    pub(crate) slot: PointerValue<'ctx>,
    /// Null-flag slot, present when the result type is nullable.
    pub(crate) null_slot: Option<PointerValue<'ctx>>,
    /// Declared result type of the whole CASE.
    pub(crate) ty: FieldType,
    /// Block every arm jumps to after storing its result.
    pub(crate) merge_bb: BasicBlock<'ctx>,
    /// The not-taken block of the arm currently being generated.
    pub(crate) next_bb: Option<BasicBlock<'ctx>>,
}

impl<'ctx> CodeGen<'ctx> {
    // ── WHILE ────────────────────────────────────────────────────────

    /// Open a WHILE statement: create its three blocks, branch into the
    /// condition block and position there. The condition expression is
    /// generated next, re-evaluated on every iteration.
    pub fn while_begin(&mut self) -> Result<(), CodegenError> {
        let fn_val = self.current_function()?;
        let cond_bb = self.context.append_basic_block(fn_val, "while_cond");
        let body_bb = self.context.append_basic_block(fn_val, "while_body");
        let merge_bb = self.context.append_basic_block(fn_val, "while_merge");
        self.builder
            .build_unconditional_branch(cond_bb)
            .map_err(|e| CodegenError::llvm("branch to loop condition", e))?;
        self.builder.position_at_end(cond_bb);
        self.loop_stack.push(LoopFrame { cond_bb, body_bb, merge_bb });
        Ok(())
    }

    /// End the condition expression: branch on it into the body (NULL and
    /// false exit to merge) and position at the body.
    pub fn while_statement_block(
        &mut self,
        cond: ValueId,
        cond_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let frame = *self
            .loop_stack
            .last()
            .ok_or(CodegenError::EmptyStack { which: "while" })?;
        self.conditional_branch(cond, cond_ty, frame.body_bb, frame.merge_bb)?;
        self.builder.position_at_end(frame.body_bb);
        Ok(())
    }

    /// Close the loop: branch back to the condition (unless the body
    /// already terminated its block) and continue in the merge block.
    pub fn while_finish(&mut self) -> Result<(), CodegenError> {
        let frame = self
            .loop_stack
            .pop()
            .ok_or(CodegenError::EmptyStack { which: "while" })?;
        let block = self.builder.get_insert_block().ok_or_else(|| {
            CodegenError::internal("while finish", "builder has no insertion point")
        })?;
        if block.get_terminator().is_none() {
            self.builder
                .build_unconditional_branch(frame.cond_bb)
                .map_err(|e| CodegenError::llvm("loop back edge", e))?;
        }
        self.builder.position_at_end(frame.merge_bb);
        Ok(())
    }

    // ── Branching ────────────────────────────────────────────────────

    /// Branch on a BOOLEAN value with tri-state semantics.
    ///
    /// A nullable condition first branches on its null flag, with NULL
    /// going straight to `on_false`; the non-null path then compares the
    /// 32-bit payload against zero. The literal NULL branches to
    /// `on_false` unconditionally.
    pub fn conditional_branch(
        &mut self,
        cond: ValueId,
        cond_ty: &FieldType,
        on_true: BasicBlock<'ctx>,
        on_false: BasicBlock<'ctx>,
    ) -> Result<(), CodegenError> {
        let cond = self.rvalue(cond, cond_ty)?;
        let tv = self.values.get(cond);
        let Some(payload) = tv.payload() else {
            self.builder
                .build_unconditional_branch(on_false)
                .map_err(|e| CodegenError::llvm("null condition branch", e))?;
            return Ok(());
        };
        let payload = match payload {
            BasicValueEnum::IntValue(iv) => iv,
            _ => {
                return Err(CodegenError::internal(
                    "conditional branch",
                    "condition payload is not an integer",
                ))
            }
        };

        if let Some(flag) = tv.null_flag() {
            let fn_val = self.current_function()?;
            let not_null_bb = self.context.append_basic_block(fn_val, "not_null");
            self.builder
                .build_conditional_branch(flag, on_false, not_null_bb)
                .map_err(|e| CodegenError::llvm("null flag branch", e))?;
            self.builder.position_at_end(not_null_bb);
        }

        let bool_val = self
            .builder
            .build_int_compare(
                IntPredicate::NE,
                payload,
                self.context.i32_type().const_zero(),
                "bool_cast",
            )
            .map_err(|e| CodegenError::llvm("boolean test", e))?;
        self.builder
            .build_conditional_branch(bool_val, on_true, on_false)
            .map_err(|e| CodegenError::llvm("conditional branch", e))?;
        Ok(())
    }

    // ── CASE ─────────────────────────────────────────────────────────

    /// Open a CASE expression with its declared result type. All arms
    /// store into one shared entry-block slot; a nullable result gets a
    /// second slot for the null flag.
    pub fn case_begin(&mut self, ty: &FieldType) -> Result<(), CodegenError> {
        let fn_val = self.current_function()?;
        let slot = self.build_entry_alloca(llvm_type(self.context, &ty.kind), "casetmp")?;
        let null_slot = if ty.nullable {
            Some(self.build_entry_alloca(self.context.bool_type().into(), "casetmp.null")?)
        } else {
            None
        };
        let merge_bb = self.context.append_basic_block(fn_val, "case_merge");
        self.case_stack.push(CaseFrame { slot, null_slot, ty: *ty, merge_bb, next_bb: None });
        Ok(())
    }

    /// End one arm's WHEN expression: branch into the arm body on true,
    /// to the next arm on false or NULL. Positions at the arm body.
    pub fn case_block_condition(
        &mut self,
        cond: ValueId,
        cond_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        if self.case_stack.is_empty() {
            return Err(CodegenError::EmptyStack { which: "case" });
        }
        let fn_val = self.current_function()?;
        let then_bb = self.context.append_basic_block(fn_val, "case_then");
        let else_bb = self.context.append_basic_block(fn_val, "case_else");
        self.conditional_branch(cond, cond_ty, then_bb, else_bb)?;
        self.builder.position_at_end(then_bb);
        if let Some(frame) = self.case_stack.last_mut() {
            frame.next_bb = Some(else_bb);
        }
        Ok(())
    }

    /// End one arm's result expression: convert it to the CASE result
    /// type, store it into the shared slot, and jump to the merge block.
    /// Positions at the next arm's block when one is pending (the final
    /// ELSE arm has none).
    pub fn case_block_then(
        &mut self,
        value: ValueId,
        value_ty: &FieldType,
    ) -> Result<(), CodegenError> {
        let (slot, null_slot, ty, merge_bb, next_bb) = {
            let frame = self
                .case_stack
                .last_mut()
                .ok_or(CodegenError::EmptyStack { which: "case" })?;
            (frame.slot, frame.null_slot, frame.ty, frame.merge_bb, frame.next_bb.take())
        };

        let converted = self.convert_to(value, value_ty, &ty)?;
        let slot_vid = self.values.alloc(Some(slot.into()), None, Storage::Local);
        let target = LValue::local(slot_vid, null_slot);
        self.store_value(&target, converted, &ty)?;

        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(|e| CodegenError::llvm("branch to case merge", e))?;
        if let Some(bb) = next_bb {
            self.builder.position_at_end(bb);
        }
        Ok(())
    }

    /// Close the CASE: position at the merge block and produce the result
    /// as an address-flavored value over the shared slot, with the null
    /// flag reloaded from its slot when the result is nullable.
    pub fn case_finish(&mut self) -> Result<ValueId, CodegenError> {
        let frame = self
            .case_stack
            .pop()
            .ok_or(CodegenError::EmptyStack { which: "case" })?;
        self.builder.position_at_end(frame.merge_bb);
        let flag = match frame.null_slot {
            Some(ns) => Some(
                self.builder
                    .build_load(self.context.bool_type(), ns, "case_null")
                    .map_err(|e| CodegenError::llvm("load case null flag", e))?
                    .into_int_value(),
            ),
            None => None,
        };
        Ok(self.values.alloc(Some(frame.slot.into()), flag, Storage::Local))
    }
}

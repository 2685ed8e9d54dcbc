//! Arena-owned values, assignable locations, and the symbol table.
//!
//! A [`TypedValue`] wraps the IR handle for a computed value together with
//! its runtime null flag and a storage-class tag. Values are created through
//! the context's arena and referenced by [`ValueId`]; nothing is ever freed
//! individually, the arena drops as one block with the context.
//!
//! An [`LValue`] is an assignable location: either a named member of a
//! record reached through a base pointer, or a function-local stack slot
//! with an independent null-flag slot. Both variants expose the same
//! read / write_null / is_nullable contract and are dispatched by tag.

use std::rc::Rc;

use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use rustc_hash::FxHashMap;

use sift_common::CodegenError;

use super::layout::RecordLayout;
use super::CodeGen;

// ── Values ───────────────────────────────────────────────────────────

/// Where a value's storage lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Points into caller-owned record storage.
    Global,
    /// A function-local temporary or stack slot.
    Local,
}

/// A generated value: IR payload, optional runtime null flag, storage tag.
///
/// `payload == None` is the literal NULL marker: the value denotes the NULL
/// constant regardless of the flag. An absent `null_flag` on a present
/// payload means statically known non-null.
#[derive(Copy, Clone, Debug)]
pub struct TypedValue<'ctx> {
    payload: Option<BasicValueEnum<'ctx>>,
    null_flag: Option<IntValue<'ctx>>,
    storage: Storage,
}

impl<'ctx> TypedValue<'ctx> {
    pub fn payload(&self) -> Option<BasicValueEnum<'ctx>> {
        self.payload
    }

    pub fn null_flag(&self) -> Option<IntValue<'ctx>> {
        self.null_flag
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    pub fn is_literal_null(&self) -> bool {
        self.payload.is_none()
    }
}

/// Handle into a context's value arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValueId(u32);

/// Bulk-owned storage for every value a generation context creates.
///
/// The single mutation allowed after creation is [`set_null_flag`], which
/// exists for deferred null materialization of record fields: the member
/// pointer is produced first, the flag attached once the member is known
/// to be nullable.
///
/// [`set_null_flag`]: ValueArena::set_null_flag
#[derive(Default)]
pub struct ValueArena<'ctx> {
    values: Vec<TypedValue<'ctx>>,
}

impl<'ctx> ValueArena<'ctx> {
    pub fn alloc(
        &mut self,
        payload: Option<BasicValueEnum<'ctx>>,
        null_flag: Option<IntValue<'ctx>>,
        storage: Storage,
    ) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(TypedValue { payload, null_flag, storage });
        id
    }

    pub fn get(&self, id: ValueId) -> TypedValue<'ctx> {
        self.values[id.0 as usize]
    }

    pub fn set_null_flag(&mut self, id: ValueId, flag: IntValue<'ctx>) {
        self.values[id.0 as usize].null_flag = Some(flag);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ── LValues ──────────────────────────────────────────────────────────

/// A named member inside a record. The base pointer refers to record
/// storage owned by the caller, never by codegen.
#[derive(Clone, Debug)]
pub struct FieldLValue<'ctx> {
    pub(crate) layout: Rc<RecordLayout<'ctx>>,
    pub(crate) member: String,
    pub(crate) base: PointerValue<'ctx>,
}

/// A stack slot plus an independent boolean null-flag slot. A missing
/// null slot means the local can never hold NULL.
#[derive(Clone)]
pub struct LocalLValue<'ctx> {
    pub(crate) value: ValueId,
    pub(crate) null_slot: Option<PointerValue<'ctx>>,
}

/// An assignable location, dispatched by tag over its two variants.
#[derive(Clone)]
pub enum LValue<'ctx> {
    Field(FieldLValue<'ctx>),
    Local(LocalLValue<'ctx>),
}

impl<'ctx> LValue<'ctx> {
    pub fn field(
        layout: Rc<RecordLayout<'ctx>>,
        member: impl Into<String>,
        base: PointerValue<'ctx>,
    ) -> Self {
        Self::Field(FieldLValue { layout, member: member.into(), base })
    }

    pub fn local(value: ValueId, null_slot: Option<PointerValue<'ctx>>) -> Self {
        Self::Local(LocalLValue { value, null_slot })
    }

    /// Materialize the location as a value.
    ///
    /// Fields yield the member pointer (tagged [`Storage::Global`], it
    /// points into caller-owned storage) with the member's null flag
    /// attached when the member is nullable. Non-nullable locals return the
    /// stored value unchanged; nullable locals reload the flag from the
    /// null slot on every read, since local nullness is mutable and must
    /// never be cached.
    pub fn read(&self, cg: &mut CodeGen<'ctx>) -> Result<ValueId, CodegenError> {
        match self {
            Self::Field(fl) => {
                let ptr = fl.layout.member_ptr(cg, fl.base, &fl.member)?;
                let id = cg.values.alloc(Some(ptr.into()), None, Storage::Global);
                let nullable = fl
                    .layout
                    .schema()
                    .field(&fl.member)
                    .is_some_and(|f| f.ty.nullable);
                if nullable {
                    let flag = fl.layout.member_null(cg, fl.base, &fl.member)?;
                    cg.values.set_null_flag(id, flag);
                }
                Ok(id)
            }
            Self::Local(ll) => match ll.null_slot {
                None => Ok(ll.value),
                Some(slot) => {
                    let flag = cg
                        .builder
                        .build_load(cg.context.bool_type(), slot, "null_flag")
                        .map_err(|e| CodegenError::llvm("load null flag", e))?
                        .into_int_value();
                    let stored = cg.values.get(ll.value);
                    Ok(cg.values.alloc(stored.payload(), Some(flag), stored.storage()))
                }
            },
        }
    }

    /// Set the location's null state to a compile-time-known value.
    ///
    /// Fields delegate to the record layout's null-bit setter; this code
    /// does not know the bit layout. Locals store a boolean literal into
    /// the null slot.
    pub fn write_null(&self, cg: &mut CodeGen<'ctx>, is_null: bool) -> Result<(), CodegenError> {
        match self {
            Self::Field(fl) => fl.layout.member_set_null(cg, fl.base, &fl.member, is_null),
            Self::Local(ll) => {
                let slot = ll.null_slot.ok_or_else(|| {
                    CodegenError::internal("write_null", "local has no null slot")
                })?;
                let flag = cg.context.bool_type().const_int(u64::from(is_null), false);
                cg.builder
                    .build_store(slot, flag)
                    .map_err(|e| CodegenError::llvm("store null flag", e))?;
                Ok(())
            }
        }
    }

    /// Whether the location can hold NULL at all. Callers must check this
    /// before relying on a null flag being present: a non-nullable location
    /// always yields values with an absent flag.
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Field(fl) => fl
                .layout
                .schema()
                .field(&fl.member)
                .is_some_and(|f| f.ty.nullable),
            Self::Local(ll) => ll.null_slot.is_some(),
        }
    }

    /// The address this location writes through: the member pointer for
    /// fields, the storage slot for locals.
    pub(crate) fn address(&self, cg: &CodeGen<'ctx>) -> Result<PointerValue<'ctx>, CodegenError> {
        match self {
            Self::Field(fl) => fl.layout.member_ptr(cg, fl.base, &fl.member),
            Self::Local(ll) => match cg.values.get(ll.value).payload() {
                Some(BasicValueEnum::PointerValue(p)) => Ok(p),
                _ => Err(CodegenError::internal(
                    "lvalue address",
                    "local is not backed by a storage slot",
                )),
            },
        }
    }
}

// ── Symbol table ─────────────────────────────────────────────────────

/// Scoped name to location mapping.
///
/// Keys are unique and the last write wins; the type checker has already
/// rejected illegal redefinitions. The table owns every lvalue added to it,
/// and `clear` (or drop) releases them all at once.
#[derive(Default)]
pub struct SymbolTable<'ctx> {
    symbols: FxHashMap<String, LValue<'ctx>>,
}

impl<'ctx> SymbolTable<'ctx> {
    pub fn add(&mut self, name: &str, lvalue: LValue<'ctx>) {
        self.symbols.insert(name.to_string(), lvalue);
    }

    /// Register a record member under both its qualified name
    /// (`prefix.name`, for disambiguating fields of multiple input records)
    /// and its bare name.
    pub fn add_qualified(&mut self, prefix: &str, name: &str, lvalue: LValue<'ctx>) {
        self.symbols.insert(format!("{prefix}.{name}"), lvalue.clone());
        self.symbols.insert(name.to_string(), lvalue);
    }

    pub fn lookup(&self, name: &str) -> Option<&LValue<'ctx>> {
        self.symbols.get(name)
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

//! LLVM IR generation for Sift transfer functions.
//!
//! This crate is the backend of the Sift record-transformation language: it
//! takes the type-checked statement/expression tree (driven node by node by
//! the tree walker) and emits LLVM IR for a JIT-compiled function that reads
//! one or more input records and writes an output record. It owns the four
//! hard parts of that translation:
//!
//! - tri-state (true/false/NULL) logic on every conditional branch,
//! - the numeric/decimal/string type-promotion lattice and its coercions,
//! - the calling-convention bridge to the external runtime library,
//! - decoding of the small/large dual representation of varchar values.
//!
//! ## Architecture
//!
//! - [`codegen::CodeGen`]: the generation context (module, builder, symbol
//!   table, control-flow stacks, record and extern registries)
//! - [`codegen::value`]: arena-owned values, lvalues, the symbol table
//! - [`codegen::convert`]: the promotion lattice and cast emission
//! - [`codegen::flow`]: tri-state branches, while and CASE protocols
//! - [`codegen::expr`]: arithmetic/comparison/array/varchar emitters
//! - [`codegen::runtime`]: runtime symbol catalog and the call bridge
//! - [`codegen::layout`]: record schema to LLVM struct layout
//!
//! ## Pipeline
//!
//! ```text
//! typed tree -> [sift-codegen] -> LLVM IR -> JIT -> transfer(in*, out, ctx)
//! ```

pub mod codegen;

pub use codegen::expr::CmpOp;
pub use codegen::layout::RecordLayout;
pub use codegen::runtime::{ExternBinding, RUNTIME_CONTEXT_NAME};
pub use codegen::value::{LValue, Storage, SymbolTable, TypedValue, ValueId};
pub use codegen::{CodeGen, FunctionContext};
pub use sift_common::{CodegenError, FieldDecl, FieldKind, FieldType, IntervalUnit, RecordSchema};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call more than once; only the first call does anything, and
/// nothing is installed unless `RUST_LOG` is set. Enable with
/// `RUST_LOG=sift_codegen=debug` or `RUST_LOG=sift_codegen=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

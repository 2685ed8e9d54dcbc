//! Shared types for the Sift compiler.
//!
//! Sift is a small record-transformation query language: a transfer statement
//! reads one or more typed input records and produces an output record. This
//! crate holds the pieces every phase agrees on and that carry no LLVM
//! dependency:
//!
//! - [`ty`]: the closed set of semantic field types and the nullability flag
//! - [`schema`]: ordered, named record schemas
//! - [`error`]: the fatal code-generation error type

pub mod error;
pub mod schema;
pub mod ty;

pub use error::CodegenError;
pub use schema::{FieldDecl, RecordSchema};
pub use ty::{FieldKind, FieldType, IntervalUnit};

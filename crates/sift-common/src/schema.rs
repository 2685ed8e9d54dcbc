//! Record schemas: ordered, named, typed fields.
//!
//! A schema only describes names, types, and declaration order. Physical
//! layout (member offsets, null bit positions) is decided by the code
//! generator's record layout, so schemas stay backend-free and cheap to
//! share between the type checker and codegen.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::ty::FieldType;

/// A single record member declaration.
#[derive(Clone, Debug, Serialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// An ordered record schema with by-name member lookup.
///
/// Duplicate member names are not rejected here; the type checker owns that
/// rule, and on duplicates the last declaration wins.
#[derive(Clone, Debug, Serialize)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldDecl>,
    ordinals: FxHashMap<String, usize>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDecl>) -> Self {
        let mut ordinals = FxHashMap::default();
        for (i, f) in fields.iter().enumerate() {
            ordinals.insert(f.name.clone(), i);
        }
        Self { name: name.into(), fields, ordinals }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The declaration position of a member, if present.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.ordinals.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.ordinal(name).map(|i| &self.fields[i])
    }

    /// True when at least one member is nullable. Layouts use this to decide
    /// whether a null bitmap word is present at all.
    pub fn has_nullable_fields(&self) -> bool {
        self.fields.iter().any(|f| f.ty.nullable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_lookup() {
        let schema = RecordSchema::new(
            "input",
            vec![
                FieldDecl::new("a", FieldType::int32()),
                FieldDecl::new("b", FieldType::varchar().nullable()),
            ],
        );
        assert_eq!(schema.ordinal("a"), Some(0));
        assert_eq!(schema.ordinal("b"), Some(1));
        assert_eq!(schema.ordinal("c"), None);
        assert!(schema.has_nullable_fields());
    }

    #[test]
    fn duplicate_names_last_wins() {
        let schema = RecordSchema::new(
            "r",
            vec![
                FieldDecl::new("x", FieldType::int32()),
                FieldDecl::new("x", FieldType::double()),
            ],
        );
        assert_eq!(schema.ordinal("x"), Some(1));
        assert_eq!(schema.field("x").unwrap().ty, FieldType::double());
    }

    #[test]
    fn all_non_nullable() {
        let schema = RecordSchema::new("r", vec![FieldDecl::new("x", FieldType::int64())]);
        assert!(!schema.has_nullable_fields());
    }
}

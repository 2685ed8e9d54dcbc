//! Code generation errors.
//!
//! Every failure here is fatal to the compilation unit being generated;
//! there is no recovery or partial emission. Two classes exist:
//!
//! - internal-consistency failures: states the type checker should have made
//!   impossible (no common type, empty control-flow stack, bad result slot);
//!   these point at a checker bug and carry the operation and type names
//!   needed to diagnose it;
//! - unimplemented conversions: casts with no defined rule, reported with
//!   both type names as a gap to fill rather than a user error.

use std::fmt;

use serde::Serialize;

/// A fatal code-generation failure.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum CodegenError {
    /// Codegen reached a state the type checker should have prevented.
    Internal { op: String, detail: String },
    /// No common type exists for a pair of operand types.
    IncompatibleTypes { op: String, lhs: String, rhs: String },
    /// A control-flow protocol call arrived with no matching begin.
    EmptyStack { which: &'static str },
    /// Array element types may not be nullable.
    NullableArrayElement { elem: String },
    /// An out-parameter result slot does not match the callee's declared
    /// result type (byte-array aliasing is the only legal mismatch).
    ResultSlotMismatch {
        callee: String,
        declared: String,
        slot: String,
    },
    /// A language-level function name with no registered implementation.
    UnboundFunction { name: String },
    /// A registered implementation symbol that is absent from the module.
    MissingSymbol { name: String, symbol: String },
    /// A name lookup failed in the symbol table.
    UndefinedVariable { name: String },
    /// A conversion between two types with no defined rule.
    Unimplemented { from: String, to: String },
    /// An LLVM builder or verifier failure, wrapped with the operation name.
    Llvm { op: String, message: String },
}

impl CodegenError {
    pub fn internal(op: &str, detail: impl Into<String>) -> Self {
        Self::Internal { op: op.to_string(), detail: detail.into() }
    }

    pub fn unimplemented(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::Unimplemented { from: from.to_string(), to: to.to_string() }
    }

    pub fn llvm(op: &str, message: impl fmt::Display) -> Self {
        Self::Llvm { op: op.to_string(), message: message.to_string() }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal { op, detail } => {
                write!(f, "internal error in {op}: {detail}")
            }
            Self::IncompatibleTypes { op, lhs, rhs } => {
                write!(f, "no common type for {op}: {lhs} vs {rhs}")
            }
            Self::EmptyStack { which } => {
                write!(f, "{which} operation with no enclosing {which} begin")
            }
            Self::NullableArrayElement { elem } => {
                write!(f, "array elements may not be nullable: {elem}")
            }
            Self::ResultSlotMismatch { callee, declared, slot } => {
                write!(
                    f,
                    "result slot for {callee} holds {slot} but the callee returns {declared}"
                )
            }
            Self::UnboundFunction { name } => {
                write!(f, "no implementation registered for function {name}")
            }
            Self::MissingSymbol { name, symbol } => {
                write!(
                    f,
                    "function {name} is bound to {symbol} but the module has no such symbol"
                )
            }
            Self::UndefinedVariable { name } => {
                write!(f, "undefined variable: {name}")
            }
            Self::Unimplemented { from, to } => {
                write!(f, "cast from {from} to {to} not implemented")
            }
            Self::Llvm { op, message } => {
                write!(f, "{op}: {message}")
            }
        }
    }
}

impl std::error::Error for CodegenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_incompatible_types() {
        let err = CodegenError::IncompatibleTypes {
            op: "subtract".to_string(),
            lhs: "varchar".to_string(),
            rhs: "double".to_string(),
        };
        assert_eq!(err.to_string(), "no common type for subtract: varchar vs double");
    }

    #[test]
    fn display_unimplemented_names_both_types() {
        let err = CodegenError::unimplemented("double", "char(8)");
        assert_eq!(err.to_string(), "cast from double to char(8) not implemented");
    }

    #[test]
    fn display_binding_errors() {
        let err = CodegenError::UnboundFunction { name: "frobnicate".to_string() };
        assert_eq!(
            err.to_string(),
            "no implementation registered for function frobnicate"
        );
        let err = CodegenError::MissingSymbol {
            name: "upper".to_string(),
            symbol: "sift_upper".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "function upper is bound to sift_upper but the module has no such symbol"
        );
    }

    #[test]
    fn display_empty_stack() {
        let err = CodegenError::EmptyStack { which: "while" };
        assert_eq!(err.to_string(), "while operation with no enclosing while begin");
    }
}

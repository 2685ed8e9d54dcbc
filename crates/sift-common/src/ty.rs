//! Semantic field types for Sift values and record members.
//!
//! The type checker resolves every expression and record member to a
//! [`FieldType`]: a physical kind plus a nullability flag. Code generation
//! dispatches on these tags alone; it never inspects LLVM type handles to
//! recover language-level type information.

use std::fmt;

use serde::Serialize;

/// Units for interval values used in date/datetime arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum IntervalUnit {
    Day,
    Hour,
    Minute,
    Month,
    Second,
    Year,
}

impl IntervalUnit {
    /// The lowercase unit name, as used in runtime symbol names
    /// (`sift_date_add_day` etc.).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Month => "month",
            Self::Second => "second",
            Self::Year => "year",
        }
    }
}

/// The closed set of physical kinds a Sift value can have.
///
/// The first six entries form the promotion lattice (see the conversion
/// engine in `sift-codegen`); the rest only ever match themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Double-precision float.
    Double,
    /// Arbitrary-precision decimal, stored as an opaque 16-byte block and
    /// manipulated only through runtime library calls.
    Decimal,
    /// Fixed-length character string of `n` characters, stored
    /// NUL-terminated in `n + 1` bytes.
    Char(u32),
    /// Variable-length character string with a small/large dual
    /// representation (see the varchar decoding in `sift-codegen`).
    Varchar,
    /// Boolean, stored as a 32-bit integer (zero = false).
    Boolean,
    /// Calendar date, stored as a 32-bit day count.
    Date,
    /// Date and time, stored as a 64-bit second count.
    Datetime,
    /// A date/datetime arithmetic offset in a fixed unit, stored as a
    /// 32-bit integer.
    Interval(IntervalUnit),
}

impl FieldKind {
    /// True for the two integer kinds.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    /// True for floating-point kinds.
    pub fn is_floating_point(&self) -> bool {
        matches!(self, Self::Double)
    }

    /// True for kinds whose values are passed and stored by reference
    /// (a pointer to storage) rather than as a register value.
    pub fn is_by_ref(&self) -> bool {
        matches!(self, Self::Decimal | Self::Char(_) | Self::Varchar)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Double => write!(f, "double"),
            Self::Decimal => write!(f, "decimal"),
            Self::Char(n) => write!(f, "char({n})"),
            Self::Varchar => write!(f, "varchar"),
            Self::Boolean => write!(f, "boolean"),
            Self::Date => write!(f, "date"),
            Self::Datetime => write!(f, "datetime"),
            Self::Interval(u) => write!(f, "interval {}", u.name()),
        }
    }
}

/// A resolved semantic type: a physical kind plus nullability.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldType {
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldType {
    pub fn new(kind: FieldKind, nullable: bool) -> Self {
        Self { kind, nullable }
    }

    pub const fn int32() -> Self {
        Self { kind: FieldKind::Int32, nullable: false }
    }

    pub const fn int64() -> Self {
        Self { kind: FieldKind::Int64, nullable: false }
    }

    pub const fn double() -> Self {
        Self { kind: FieldKind::Double, nullable: false }
    }

    pub const fn decimal() -> Self {
        Self { kind: FieldKind::Decimal, nullable: false }
    }

    pub const fn char(n: u32) -> Self {
        Self { kind: FieldKind::Char(n), nullable: false }
    }

    pub const fn varchar() -> Self {
        Self { kind: FieldKind::Varchar, nullable: false }
    }

    pub const fn boolean() -> Self {
        Self { kind: FieldKind::Boolean, nullable: false }
    }

    pub const fn date() -> Self {
        Self { kind: FieldKind::Date, nullable: false }
    }

    pub const fn datetime() -> Self {
        Self { kind: FieldKind::Datetime, nullable: false }
    }

    pub const fn interval(unit: IntervalUnit) -> Self {
        Self { kind: FieldKind::Interval(unit), nullable: false }
    }

    /// The same type with the nullable flag set.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{} null", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

//! Atomic type identities and the relations defined over them.

use core::fmt;

pub mod arithmetic;
pub mod casting;
pub mod comparison;

/// The fixed set of atomic types.
///
/// `Atomic` is the top of the hierarchy; no item has it as dynamic type and
/// it is never a legal cast target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    Atomic,
    Null,
    Boolean,
    Integer,
    Decimal,
    Double,
    String,
    DateTime,
    Date,
    Time,
    HexBinary,
    Base64Binary,
}

impl AtomicType {
    pub const ALL: [AtomicType; 12] = [
        AtomicType::Atomic,
        AtomicType::Null,
        AtomicType::Boolean,
        AtomicType::Integer,
        AtomicType::Decimal,
        AtomicType::Double,
        AtomicType::String,
        AtomicType::DateTime,
        AtomicType::Date,
        AtomicType::Time,
        AtomicType::HexBinary,
        AtomicType::Base64Binary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::Atomic => "atomic",
            AtomicType::Null => "null",
            AtomicType::Boolean => "boolean",
            AtomicType::Integer => "integer",
            AtomicType::Decimal => "decimal",
            AtomicType::Double => "double",
            AtomicType::String => "string",
            AtomicType::DateTime => "dateTime",
            AtomicType::Date => "date",
            AtomicType::Time => "time",
            AtomicType::HexBinary => "hexBinary",
            AtomicType::Base64Binary => "base64Binary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AtomicType::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AtomicType::Integer | AtomicType::Decimal | AtomicType::Double)
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target of `cast as` / `castable as`: an atomic type plus the `?`
/// zero-or-one allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SingleType {
    pub atomic: AtomicType,
    pub allows_empty: bool,
}

impl SingleType {
    pub fn new(atomic: AtomicType) -> Self {
        Self {
            atomic,
            allows_empty: false,
        }
    }

    pub fn optional(atomic: AtomicType) -> Self {
        Self {
            atomic,
            allows_empty: true,
        }
    }
}

impl fmt::Display for SingleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allows_empty {
            write!(f, "{}?", self.atomic)
        } else {
            write!(f, "{}", self.atomic)
        }
    }
}

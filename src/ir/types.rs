//! First-class types, constants and operand values.

use serde::Serialize;
use std::fmt;

use super::{BlockId, InstId};

/// IR type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    Void,
    /// Integer of the given bit width (`i1`, `i8`, `i32`, ...)
    Int(u32),
    Float,
    Double,
    /// Opaque pointer
    Ptr,
    Label,
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    /// Parse a type keyword such as `i32` or `ptr`.
    pub fn from_keyword(s: &str) -> Option<Type> {
        match s {
            "void" => Some(Type::Void),
            "float" => Some(Type::Float),
            "double" => Some(Type::Double),
            "ptr" => Some(Type::Ptr),
            "label" => Some(Type::Label),
            _ => {
                let bits: u32 = s.strip_prefix('i')?.parse().ok()?;
                if (1..=64).contains(&bits) {
                    Some(Type::Int(bits))
                } else {
                    None
                }
            }
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    /// Bit width of an integer type.
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr => write!(f, "ptr"),
            Type::Label => write!(f, "label"),
        }
    }
}

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int { ty: Type, value: i64 },
    /// Floating-point constant, stored as `f64` bits so the enum stays `Eq`
    Float { ty: Type, bits: u64 },
    Null,
    Undef(Type),
}

impl Constant {
    pub fn int(ty: Type, value: i64) -> Self {
        Constant::Int { ty, value }
    }

    pub fn float(ty: Type, value: f64) -> Self {
        Constant::Float { ty, bits: value.to_bits() }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { ty, .. } | Constant::Float { ty, .. } | Constant::Undef(ty) => *ty,
            Constant::Null => Type::Ptr,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { ty: Type::Int(1), value } => {
                write!(f, "{}", if *value != 0 { "true" } else { "false" })
            }
            Constant::Int { value, .. } => write!(f, "{}", value),
            Constant::Float { bits, .. } => {
                let value = f64::from_bits(*bits);
                if value.is_finite() {
                    write!(f, "{:?}", value)
                } else {
                    write!(f, "0x{:016X}", bits)
                }
            }
            Constant::Null => write!(f, "null"),
            Constant::Undef(_) => write!(f, "undef"),
        }
    }
}

/// An operand: a non-owning reference to an instruction result, a
/// parameter, a constant or a function symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Inst(InstId),
    /// Function parameter by position
    Param(u32),
    Const(Constant),
    /// Address of a function (`@name`)
    Function(String),
}

impl Value {
    pub fn int(ty: Type, value: i64) -> Self {
        Value::Const(Constant::int(ty, value))
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Value::Const(Constant::Int { value, .. }) => Some(*value),
            _ => None,
        }
    }

    pub fn is_inst(&self, id: InstId) -> bool {
        matches!(self, Value::Inst(i) if *i == id)
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

/// Incoming `(value, predecessor)` pair of a phi node.
pub type Incoming = (Value, BlockId);

//! Constant values and the abstract-value lattice.
//!
//! [`ConstValue`] represents materializable compile-time constants;
//! [`AbstractValue`] is the lattice the analyses track per SSA value:
//!
//! ```text
//!              Top (no information)
//!               |
//!        +------+------+
//!        |             |
//!     Constant      NonNull
//!        |             |
//!        +------+------+
//!               |
//!            Bottom (conflicting info)
//! ```
//!
//! Two distinct SSA values with abstract-value-equal constants denote the
//! same runtime value; phi simplification relies on exactly this.

use std::fmt;

use crate::model::{StrId, TypeId, ValueType};

/// A materializable compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// 32-bit integer (also booleans and sub-int primitives).
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// The null reference.
    Null,
    /// An interned string literal.
    Str(StrId),
    /// A class constant (`Foo.class`).
    Class(TypeId),
}

impl ConstValue {
    /// Returns `true` if this is the null constant.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for reference-typed constants.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Null | Self::Str(_) | Self::Class(_))
    }

    /// The zero/null default for a computational type.
    ///
    /// Used to synthesize fake results when a call is rewritten into a
    /// throwing helper but the verifier still expects a value.
    #[must_use]
    pub const fn default_for(ty: ValueType) -> Self {
        match ty {
            ValueType::Int => Self::Int(0),
            ValueType::Long => Self::Long(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::Double => Self::Double(0.0),
            ValueType::Reference(_) => Self::Null,
        }
    }

    /// Computational type of this constant; `None` for null (which adopts
    /// the context's reference type).
    #[must_use]
    pub const fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Int(_) => Some(ValueType::Int),
            Self::Long(_) => Some(ValueType::Long),
            Self::Float(_) => Some(ValueType::Float),
            Self::Double(_) => Some(ValueType::Double),
            Self::Null | Self::Str(_) | Self::Class(_) => None,
        }
    }

    /// Attempts to add two constants.
    #[must_use]
    pub fn add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(Self::Int(a.wrapping_add(*b))),
            (Self::Long(a), Self::Long(b)) => Some(Self::Long(a.wrapping_add(*b))),
            (Self::Float(a), Self::Float(b)) => Some(Self::Float(a + b)),
            (Self::Double(a), Self::Double(b)) => Some(Self::Double(a + b)),
            _ => None,
        }
    }

    /// Attempts to subtract two constants.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(Self::Int(a.wrapping_sub(*b))),
            (Self::Long(a), Self::Long(b)) => Some(Self::Long(a.wrapping_sub(*b))),
            (Self::Float(a), Self::Float(b)) => Some(Self::Float(a - b)),
            (Self::Double(a), Self::Double(b)) => Some(Self::Double(a - b)),
            _ => None,
        }
    }

    /// Attempts to multiply two constants.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(Self::Int(a.wrapping_mul(*b))),
            (Self::Long(a), Self::Long(b)) => Some(Self::Long(a.wrapping_mul(*b))),
            (Self::Float(a), Self::Float(b)) => Some(Self::Float(a * b)),
            (Self::Double(a), Self::Double(b)) => Some(Self::Double(a * b)),
            _ => None,
        }
    }

    /// Attempts to negate this constant.
    #[must_use]
    pub fn negate(&self) -> Option<Self> {
        match self {
            Self::Int(v) => Some(Self::Int(v.wrapping_neg())),
            Self::Long(v) => Some(Self::Long(v.wrapping_neg())),
            Self::Float(v) => Some(Self::Float(-v)),
            Self::Double(v) => Some(Self::Double(-v)),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v}f"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
            Self::Str(id) => write!(f, "str@{id}"),
            Self::Class(t) => write!(f, "class({t})"),
        }
    }
}

/// Abstract state of an SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AbstractValue {
    /// No information yet (top of lattice).
    #[default]
    Top,
    /// Known constant value.
    Constant(ConstValue),
    /// Known to be non-null (for references).
    NonNull,
    /// Conflicting information (bottom of lattice).
    Bottom,
}

impl AbstractValue {
    /// Returns `true` if this is a known constant.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns the constant value if known.
    #[must_use]
    pub const fn as_constant(&self) -> Option<&ConstValue> {
        match self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Returns `true` if the value is provably non-null.
    #[must_use]
    pub const fn is_non_null(&self) -> bool {
        match self {
            Self::NonNull => true,
            Self::Constant(c) => !c.is_null(),
            _ => false,
        }
    }

    /// Meet operation (greatest lower bound), used at control-flow joins.
    #[must_use]
    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, x) | (x, Self::Top) => *x,
            (Self::Bottom, _) | (_, Self::Bottom) => Self::Bottom,
            (Self::Constant(a), Self::Constant(b)) if a == b => Self::Constant(*a),
            (Self::Constant(_), Self::Constant(_)) => Self::Bottom,
            (Self::NonNull, Self::NonNull) => Self::NonNull,
            (Self::NonNull, Self::Constant(c)) | (Self::Constant(c), Self::NonNull) => {
                if c.is_null() {
                    Self::Bottom
                } else {
                    Self::Constant(*c)
                }
            }
        }
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => write!(f, "⊤"),
            Self::Constant(c) => write!(f, "{c}"),
            Self::NonNull => write!(f, "!null"),
            Self::Bottom => write!(f, "⊥"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_arithmetic() {
        let a = ConstValue::Int(10);
        let b = ConstValue::Int(3);

        assert_eq!(a.add(&b), Some(ConstValue::Int(13)));
        assert_eq!(a.sub(&b), Some(ConstValue::Int(7)));
        assert_eq!(a.mul(&b), Some(ConstValue::Int(30)));
        assert_eq!(a.negate(), Some(ConstValue::Int(-10)));
    }

    #[test]
    fn test_const_mixed_types_do_not_fold() {
        assert_eq!(ConstValue::Int(1).add(&ConstValue::Long(2)), None);
        assert_eq!(ConstValue::Null.negate(), None);
    }

    #[test]
    fn test_default_values() {
        assert_eq!(ConstValue::default_for(ValueType::Int), ConstValue::Int(0));
        assert_eq!(ConstValue::default_for(ValueType::Long), ConstValue::Long(0));
        assert!(ConstValue::default_for(ValueType::Reference(
            crate::model::TypeId::new(0)
        ))
        .is_null());
    }

    #[test]
    fn test_meet_constants() {
        let five = AbstractValue::Constant(ConstValue::Int(5));
        let ten = AbstractValue::Constant(ConstValue::Int(10));

        assert_eq!(AbstractValue::Top.meet(&five), five);
        assert_eq!(five.meet(&five), five);
        assert_eq!(five.meet(&ten), AbstractValue::Bottom);
        assert_eq!(AbstractValue::Bottom.meet(&five), AbstractValue::Bottom);
    }

    #[test]
    fn test_meet_non_null() {
        let non_null = AbstractValue::NonNull;
        let five = AbstractValue::Constant(ConstValue::Int(5));
        let null = AbstractValue::Constant(ConstValue::Null);

        assert_eq!(non_null.meet(&non_null), non_null);
        assert_eq!(non_null.meet(&five), five);
        assert_eq!(non_null.meet(&null), AbstractValue::Bottom);
    }

    #[test]
    fn test_non_null_queries() {
        assert!(AbstractValue::NonNull.is_non_null());
        assert!(AbstractValue::Constant(ConstValue::Int(0)).is_non_null());
        assert!(!AbstractValue::Constant(ConstValue::Null).is_non_null());
        assert!(!AbstractValue::Top.is_non_null());
    }
}

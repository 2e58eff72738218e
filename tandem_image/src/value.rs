//! Typed scalar values stored in boxes.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Box identifier: a name or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoxId {
    /// Symbolic id, e.g. `"speed_left"`.
    Name(String),
    /// Numeric id, e.g. a register number.
    Num(i64),
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Num(n) => write!(f, "#{n}"),
        }
    }
}

impl From<&str> for BoxId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for BoxId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for BoxId {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

/// Runtime type tag of a [`Value`]. Fixed per box at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// `f64`
    Float,
    /// `i64`
    Int,
    /// `bool`
    Bool,
    /// `String`
    Text,
    /// Enumeration discriminant.
    Enum,
    /// Shared opaque object.
    Opaque,
}

impl ValueKind {
    /// Float or Int.
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Value held by a box.
///
/// `Opaque` values are shared by reference, compare by identity and are not
/// serializable; they never cross a process boundary.
#[derive(Clone, Serialize, Deserialize)]
pub enum Value {
    /// Floating-point scalar.
    Float(f64),
    /// Integer scalar.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Text.
    Text(String),
    /// Enumeration discriminant.
    Enum(u32),
    /// Any shared object.
    #[serde(skip)]
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Type tag.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Float(_) => ValueKind::Float,
            Self::Int(_) => ValueKind::Int,
            Self::Bool(_) => ValueKind::Bool,
            Self::Text(_) => ValueKind::Text,
            Self::Enum(_) => ValueKind::Enum,
            Self::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// Numeric view (`Float` or `Int`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Replace the magnitude of a numeric value, keeping its kind.
    ///
    /// Integers are rounded to nearest. Non-numeric values are returned as is.
    pub fn with_f64(&self, x: f64) -> Value {
        match self {
            Self::Float(_) => Self::Float(x),
            Self::Int(_) => Self::Int(x.round() as i64),
            other => other.clone(),
        }
    }

    /// Wrap an arbitrary shared object.
    pub fn opaque<T: Any + Send + Sync>(object: T) -> Self {
        Self::Opaque(Arc::new(object))
    }

    /// Downcast an `Opaque` value.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Opaque(object) => Arc::clone(object).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Enum(d) => write!(f, "Enum({d})"),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(x) => write!(f, "{x}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
            Self::Enum(d) => write!(f, "<{d}>"),
            Self::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    /// Kind this type is read from.
    const KIND: ValueKind;

    /// `None` if `value` has a different kind.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Float;
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for i64 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Text;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for u32 {
    const KIND: ValueKind = ValueKind::Enum;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Enum(d) => Some(*d),
            _ => None,
        }
    }
}

//! Typed values carried by call and result envelopes.
//!
//! Every argument and return value travels as a [`TypedValue`]: the value
//! itself plus the type the caller declared for it. Method lookup on the
//! server side matches on the declared types, so two overloads that differ
//! only in argument types stay distinguishable.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// No value (a procedure's return type).
    Unit,
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    Text,
    /// Opaque bytes.
    Bytes,
    /// Homogeneous list.
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value of any non-unit type.
    Null,
    /// The unit value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    Text(String),
    /// Opaque bytes.
    Bytes(Bytes),
    /// List of values.
    List(Vec<Value>),
}

impl Value {
    /// Whether this value may be passed where `ty` is declared.
    #[must_use]
    pub const fn conforms_to(&self, ty: ValueType) -> bool {
        match self {
            Self::Null => !matches!(ty, ValueType::Unit),
            Self::Unit => matches!(ty, ValueType::Unit),
            Self::Bool(_) => matches!(ty, ValueType::Bool),
            Self::Int(_) => matches!(ty, ValueType::Int),
            Self::Long(_) => matches!(ty, ValueType::Long),
            Self::Double(_) => matches!(ty, ValueType::Double),
            Self::Text(_) => matches!(ty, ValueType::Text),
            Self::Bytes(_) => matches!(ty, ValueType::Bytes),
            Self::List(_) => matches!(ty, ValueType::List),
        }
    }

    /// Convert into a Rust value.
    #[must_use]
    pub fn into_typed<T: Typed>(self) -> Option<T> {
        T::from_value(self)
    }
}

/// A value together with its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    value: Value,
    declared: ValueType,
}

impl TypedValue {
    /// Wrap a Rust value, declaring its natural type.
    pub fn of<T: Typed>(value: T) -> Self {
        Self {
            value: value.into_value(),
            declared: T::TYPE,
        }
    }

    /// Pair a raw value with an explicit declared type.
    ///
    /// Returns `None` if the value does not conform to the declared type.
    #[must_use]
    pub fn new(value: Value, declared: ValueType) -> Option<Self> {
        if value.conforms_to(declared) {
            Some(Self { value, declared })
        } else {
            None
        }
    }

    /// The unit value.
    #[must_use]
    pub const fn unit() -> Self {
        Self {
            value: Value::Unit,
            declared: ValueType::Unit,
        }
    }

    /// The value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// The declared type.
    #[must_use]
    pub const fn declared(&self) -> ValueType {
        self.declared
    }

    /// Drop the type annotation.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Rust types that map onto [`Value`].
pub trait Typed: Sized + Send + 'static {
    /// The declared type used on the wire.
    const TYPE: ValueType;

    /// Convert into a value.
    fn into_value(self) -> Value;

    /// Convert from a value, if the variant matches.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_typed {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Typed for $ty {
                const TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_typed!(
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f64 => Double,
    String => Text,
    Bytes => Bytes,
);

impl Typed for () {
    const TYPE: ValueType = ValueType::Unit;

    fn into_value(self) -> Value {
        Value::Unit
    }

    fn from_value(value: Value) -> Option<Self> {
        matches!(value, Value::Unit).then_some(())
    }
}

impl<T: Typed> Typed for Vec<T> {
    const TYPE: ValueType = ValueType::List;

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(Typed::into_value).collect())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<T: Typed> Typed for Option<T> {
    const TYPE: ValueType = T::TYPE;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, Typed::into_value)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

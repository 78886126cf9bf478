//! Dynamic property values.
//!
//! Entities expose their persisted properties as [`Value`]s so that the convention resolver and the
//! persistence engines can work on any entity without knowing its concrete type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The storage kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// A boolean flag.
    Bool,
    /// A 32 bit signed integer.
    Int32,
    /// A 64 bit signed integer.
    Int64,
    /// A globally unique identifier.
    Guid,
    /// A text value.
    String,
    /// A binary value, typically a row version.
    Bytes,
    /// A UTC timestamp.
    DateTime,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int32 => "i32",
            ValueKind::Int64 => "i64",
            ValueKind::Guid => "Uuid",
            ValueKind::String => "String",
            ValueKind::Bytes => "Vec<u8>",
            ValueKind::DateTime => "DateTime<Utc>",
        };
        f.write_str(name)
    }
}

/// A property value read from, or written to, an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Null,
    /// See [`ValueKind::Bool`].
    Bool(bool),
    /// See [`ValueKind::Int32`].
    Int32(i32),
    /// See [`ValueKind::Int64`].
    Int64(i64),
    /// See [`ValueKind::Guid`].
    Guid(Uuid),
    /// See [`ValueKind::String`].
    String(String),
    /// See [`ValueKind::Bytes`].
    Bytes(Vec<u8>),
    /// See [`ValueKind::DateTime`].
    DateTime(DateTime<Utc>),
}

impl Value {
    /// The kind of this value, `None` for [`Value::Null`].
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int32(_) => Some(ValueKind::Int32),
            Value::Int64(_) => Some(ValueKind::Int64),
            Value::Guid(_) => Some(ValueKind::Guid),
            Value::String(_) => Some(ValueKind::String),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::DateTime(_) => Some(ValueKind::DateTime),
        }
    }

    /// Returns `true` when this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` when the value equals the zero value of its type: `0`, the nil uuid, an
    /// empty string or byte array, `false`, the unix epoch, or null.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(v) => !v,
            Value::Int32(v) => *v == 0,
            Value::Int64(v) => *v == 0,
            Value::Guid(v) => v.is_nil(),
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
            Value::DateTime(v) => *v == DateTime::<Utc>::default(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Guid(v) => write!(f, "{}", v.hyphenated()),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => f.write_str(&hex::encode_upper(v)),
            Value::DateTime(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

/// Errors produced when converting a [`Value`] back into a field type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// The value has a different kind than the field.
    #[error("expected a {expected} value, found {found:?}")]
    TypeMismatch {
        /// The kind the field stores.
        expected: ValueKind,
        /// The value that was supplied.
        found: Value,
    },
    /// A null value was supplied for a field that is not nullable.
    #[error("expected a {expected} value, found null")]
    UnexpectedNull {
        /// The kind the field stores.
        expected: ValueKind,
    },
    /// A conversion error scoped to a named property.
    #[error("property \"{property}\": {source}")]
    Property {
        /// The property name.
        property: String,
        /// The underlying conversion error.
        #[source]
        source: Box<ValueError>,
    },
}

impl ValueError {
    /// Attaches the property name to this error.
    pub fn in_property(self, property: &str) -> Self {
        ValueError::Property {
            property: property.to_owned(),
            source: Box::new(self),
        }
    }
}

/// A Rust type that can be stored as an entity property.
pub trait PropertyValue: Sized {
    /// The storage kind of the type.
    const KIND: ValueKind;
    /// Whether the type admits null.
    const NULLABLE: bool = false;

    /// Converts the field into a value.
    fn to_value(&self) -> Value;

    /// Rebuilds the field from a value.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

macro_rules! property_value {
    ($ty:ty, $kind:ident, $variant:ident, $copy:expr) => {
        impl PropertyValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn to_value(&self) -> Value {
                Value::$variant($copy(self))
            }

            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    Value::Null => Err(ValueError::UnexpectedNull {
                        expected: Self::KIND,
                    }),
                    found => Err(ValueError::TypeMismatch {
                        expected: Self::KIND,
                        found,
                    }),
                }
            }
        }
    };
}

property_value!(bool, Bool, Bool, |v: &bool| *v);
property_value!(i32, Int32, Int32, |v: &i32| *v);
property_value!(i64, Int64, Int64, |v: &i64| *v);
property_value!(Uuid, Guid, Guid, |v: &Uuid| *v);
property_value!(String, String, String, |v: &String| v.clone());
property_value!(Vec<u8>, Bytes, Bytes, |v: &Vec<u8>| v.clone());
property_value!(DateTime<Utc>, DateTime, DateTime, |v: &DateTime<Utc>| *v);

impl<T: PropertyValue> PropertyValue for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }
}

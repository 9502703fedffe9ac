//! Type descriptors for component values.
//!
//! A component registered with a [`Type`] carries data; one registered
//! without is a tag. Descriptors are used to default-construct column
//! values, to validate values passed to `set`, and by the reflection cursor
//! to navigate nested members and elements.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::collections::PersistentVec;
use crate::error::{Error, Result};
use crate::id::EntityId;
use crate::value::Value;

/// Type descriptor for a component value.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// String type.
    String,
    /// Entity reference type.
    Entity,
    /// Growable homogeneous list.
    List(Box<Type>),
    /// Fixed-size homogeneous array.
    Array(Box<Type>, usize),
    /// Struct with named members, stored positionally.
    Struct(Vec<Member>),
    /// Optional type (value or nil).
    Option(Box<Type>),
    /// Any type (accepts any value).
    Any,
}

/// A named struct member.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Member {
    /// Member name.
    pub name: Arc<str>,
    /// Member type.
    pub ty: Type,
    /// Explicit default, used instead of the type's zero value.
    pub default: Option<Value>,
}

impl Member {
    /// Creates a member with the type's zero value as default.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Sets an explicit default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Returns the value a freshly constructed member holds.
    #[must_use]
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.ty.default_value())
    }
}

impl Type {
    /// Creates a list type with the given element type.
    #[must_use]
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    /// Creates a fixed-size array type.
    #[must_use]
    pub fn array(element: Type, len: usize) -> Self {
        Self::Array(Box::new(element), len)
    }

    /// Creates a struct type from its members.
    #[must_use]
    pub fn structure(members: impl IntoIterator<Item = Member>) -> Self {
        Self::Struct(members.into_iter().collect())
    }

    /// Creates an optional type.
    #[must_use]
    pub fn option(inner: Type) -> Self {
        Self::Option(Box::new(inner))
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if values of this type have members or elements.
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::List(_) | Self::Array(..) | Self::Struct(_))
    }

    /// Returns the position of a named struct member.
    #[must_use]
    pub fn member_index(&self, name: &str) -> Option<usize> {
        match self {
            Self::Struct(members) => members.iter().position(|m| &*m.name == name),
            _ => None,
        }
    }

    /// Returns the struct members, if this is a struct type.
    #[must_use]
    pub fn members(&self) -> Option<&[Member]> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Returns the type of the member or element at `index`.
    ///
    /// Lists accept any index since they grow on write; arrays and structs
    /// are bounded.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<&Type> {
        match self {
            Self::List(element) => Some(element),
            Self::Array(element, len) if index < *len => Some(element),
            Self::Struct(members) => members.get(index).map(|m| &m.ty),
            _ => None,
        }
    }

    /// Builds the zero value for this type.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::String => Value::String("".into()),
            Self::Entity => Value::Entity(EntityId::NULL),
            Self::List(_) => Value::List(PersistentVec::new()),
            Self::Array(element, len) => {
                Value::List((0..*len).map(|_| element.default_value()).collect())
            }
            Self::Struct(members) => Value::Struct(members.iter().map(Member::default_value).collect()),
            Self::Option(_) | Self::Any => Value::Nil,
        }
    }

    /// Checks if a value is accepted by this type.
    ///
    /// - `Any` accepts all values
    /// - `Option(T)` accepts nil and anything `T` accepts
    /// - `Float` accepts ints (numeric promotion)
    /// - Composite types check members and elements recursively
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int | Self::Float, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::String, Value::String(_))
            | (Self::Entity, Value::Entity(_)) => true,
            (Self::Option(inner), v) => v.is_nil() || inner.accepts(v),
            (Self::List(element), Value::List(items)) => items.iter().all(|v| element.accepts(v)),
            (Self::Array(element, len), Value::List(items)) => {
                items.len() == *len && items.iter().all(|v| element.accepts(v))
            }
            (Self::Struct(members), Value::Struct(values)) => {
                members.len() == values.len()
                    && members
                        .iter()
                        .zip(values.iter())
                        .all(|(m, v)| m.ty.accepts(v))
            }
            _ => false,
        }
    }

    /// Converts a value to the canonical representation of this type.
    ///
    /// Ints stored into float slots become floats, recursively.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value is not accepted by this type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if !self.accepts(&value) {
            return Err(Error::type_mismatch(self, &value));
        }
        Ok(self.coerce_accepted(value))
    }

    #[allow(clippy::cast_precision_loss)]
    fn coerce_accepted(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Float, Value::Int(n)) => Value::Float(n as f64),
            (Self::Option(inner), v) if !v.is_nil() => inner.coerce_accepted(v),
            (Self::List(element) | Self::Array(element, _), Value::List(items)) => {
                Value::List(items.into_iter().map(|v| element.coerce_accepted(v)).collect())
            }
            (Self::Struct(members), Value::Struct(values)) => Value::Struct(
                members
                    .iter()
                    .zip(values)
                    .map(|(m, v)| m.ty.coerce_accepted(v))
                    .collect(),
            ),
            (_, v) => v,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Entity => write!(f, "entity"),
            Self::List(t) => write!(f, "list<{t:?}>"),
            Self::Array(t, n) => write!(f, "array<{t:?}; {n}>"),
            Self::Struct(members) => {
                write!(f, "struct {{")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {:?}", m.name, m.ty)?;
                }
                write!(f, " }}")
            }
            Self::Option(t) => write!(f, "option<{t:?}>"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

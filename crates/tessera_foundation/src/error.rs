//! Error types for the Tessera engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Every caller-visible failure is one of the [`ErrorKind`] categories;
//! adding an id an entity already has, or removing one it lacks, is not an
//! error.

use std::fmt;

use thiserror::Error;

use crate::id::{EntityId, Id};
use crate::types::Type;
use crate::value::Value;

/// Convenience alias used by every fallible operation.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Tessera operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates an invalid parameter error.
    #[must_use]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter(message.into()))
    }

    /// Creates an error for an operation on a dead or unknown entity.
    #[must_use]
    pub fn not_alive(id: EntityId) -> Self {
        Self::new(ErrorKind::NotAlive(id))
    }

    /// Creates an error for a duplicate registration.
    #[must_use]
    pub fn already_defined(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyDefined(what.into()))
    }

    /// Creates an error for redefining something already used by tables.
    #[must_use]
    pub fn already_in_use(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyInUse(what.into()))
    }

    /// Creates an out of range error.
    #[must_use]
    pub fn out_of_range(index: usize, length: usize) -> Self {
        Self::new(ErrorKind::OutOfRange { index, length })
    }

    /// Creates an invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation(message.into()))
    }

    /// Creates a type mismatch error for a value rejected by a type.
    #[must_use]
    pub fn type_mismatch(expected: &Type, actual: &Value) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.kind_name().to_string(),
        })
    }

    /// Creates a member not found error.
    #[must_use]
    pub fn member_not_found(member: impl Into<String>, ty: &Type) -> Self {
        Self::new(ErrorKind::MemberNotFound {
            member: member.into(),
            ty: ty.to_string(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true if this error reports a dead entity.
    #[must_use]
    pub const fn is_not_alive(&self) -> bool {
        matches!(self.kind, ErrorKind::NotAlive(_))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Malformed id, missing argument or nonsensical term.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation on a dead or never-allocated entity.
    #[error("entity not alive: {0:?}")]
    NotAlive(EntityId),

    /// A name or id was registered twice.
    #[error("already defined: {0}")]
    AlreadyDefined(String),

    /// Redefinition of something tables already depend on.
    #[error("already in use: {0}")]
    AlreadyInUse(String),

    /// Row, column, member or element index outside bounds.
    #[error("index out of range: {index} (length {length})")]
    OutOfRange {
        /// The index that was accessed.
        index: usize,
        /// The actual length.
        length: usize,
    },

    /// Operation not allowed in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Value does not fit the component's type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: String,
        /// The kind of value encountered.
        actual: String,
    },

    /// Struct member lookup failed.
    #[error("member not found: {member} in {ty}")]
    MemberNotFound {
        /// The member name that was not found.
        member: String,
        /// The type that was searched.
        ty: String,
    },

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Name of the world operation that failed.
    pub operation: Option<&'static str>,
    /// Entity the operation targeted.
    pub entity: Option<EntityId>,
    /// Id the operation targeted.
    pub id: Option<Id>,
}

impl ErrorContext {
    /// Creates a context naming the failed operation.
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation: Some(operation),
            entity: None,
            id: None,
        }
    }

    /// Sets the target entity.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the target id.
    #[must_use]
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(op) = self.operation {
            write!(f, "in {op}")?;
        }
        if let Some(entity) = self.entity {
            write!(f, " on {entity}")?;
        }
        if let Some(id) = self.id {
            write!(f, " with {id}")?;
        }
        Ok(())
    }
}

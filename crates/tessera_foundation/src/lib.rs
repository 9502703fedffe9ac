//! Core ids, values, type descriptors and errors for Tessera.
//!
//! This crate provides:
//! - [`EntityId`] - Generational entity identifiers and the builtin entities
//! - [`Id`] - Component, tag and relationship-pair ids with wildcard matching
//! - [`Value`] - The dynamically typed value stored in table columns
//! - [`Type`] - Type descriptors used for construction, validation and reflection
//! - [`Error`] - Rich error types with context
//! - Persistent collections ([`PersistentVec`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod id;
pub mod types;
pub mod value;

pub use collections::PersistentVec;
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use id::{EntityId, Id};
pub use types::{Member, Type};
pub use value::Value;

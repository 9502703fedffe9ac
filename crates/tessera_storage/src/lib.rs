//! Archetype storage for Tessera.
//!
//! This crate provides:
//! - [`EntityIndex`] - Generational entity allocation and locations
//! - [`Table`] - Column storage for one archetype, with transition edges
//! - [`IdIndex`] - Reverse index from ids and wildcard patterns to tables
//! - [`ComponentRegistry`] - Component and relationship schemas
//! - [`TableStore`] - The table arena and the move engine

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod component;
pub mod entity;
pub mod id_index;
pub mod schema;
pub mod store;
pub mod table;

pub use component::{Archetype, ColumnType, ComponentRegistry};
pub use entity::{EntityIndex, Location};
pub use id_index::{IdIndex, IdRecord, TableRecord};
pub use schema::{
    ComponentHooks, ComponentSchema, DefaultHooks, OnDelete, OnInstantiate, RelationshipSchema,
};
pub use store::{StoreStats, TableEvent, TableStore};
pub use table::{Column, Table, TableId};

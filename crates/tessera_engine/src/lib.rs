//! World, deferred commands, cached queries and observers for Tessera.
//!
//! This crate provides:
//! - [`World`] - Entities, components, relationships and cleanup policies
//! - [`Commands`] and [`Stage`] - Deferred structural changes
//! - [`QueryDesc`] and [`QueryIter`] - Cached queries with change detection
//! - [`ObserverDesc`] - Observers, monitors and custom events
//! - [`Cursor`] - Reflection over component values

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod commands;
pub mod config;
pub mod cursor;
pub mod observer;
pub mod query;
pub mod world;

pub use commands::{Command, Commands, Stage};
pub use config::{WorldConfig, WorldStats};
pub use cursor::Cursor;
pub use observer::{EventDesc, ObserverCallback, ObserverDesc, ObserverId, ObserverIter};
pub use query::{
    FieldMatch, FieldSource, InOut, OrderByFn, QueryDesc, QueryId, QueryIter, RunIter, Term,
    TermOper, TermSource,
};
pub use world::World;

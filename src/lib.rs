//! Tessera - In-process entity-component data engine
//!
//! This crate re-exports all layers of the Tessera system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: tessera_engine     - World, deferred commands, queries, observers
//! Layer 1: tessera_storage    - Entity index, archetype tables, id index
//! Layer 0: tessera_foundation - Core types (Value, Type, EntityId, Id, Error)
//! ```

pub use tessera_engine as engine;
pub use tessera_foundation as foundation;
pub use tessera_storage as storage;

//! Integration tests for Layer 1: Storage
//!
//! Tests the entity index, the table store's move engine and the id index.

mod entities;
mod index;
mod tables;

//! Integration tests for Layer 2: Engine
//!
//! Tests the world API end to end: queries, observers, deferred commands
//! and relationship cleanup.

mod commands;
mod observers;
mod queries;

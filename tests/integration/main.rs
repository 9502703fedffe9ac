//! Integration tests across all layers
//!
//! Tests complete scenarios and randomized operation sequences.

mod cache_consistency;
mod properties;
mod scenarios;

//! Integration tests for Layer 0: Foundation
//!
//! Tests ids, values, type descriptors and errors working together.

mod ids;
mod types;
mod values;

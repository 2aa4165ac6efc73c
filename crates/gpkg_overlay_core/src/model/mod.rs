//! Domain model for the overlay editor.
//!
//! # Responsibility
//! - Define the value, schema, plan and working-table shapes every other
//!   layer exchanges.
//!
//! # Invariants
//! - Base rows are never mutated; edits live in the overlay only.
//! - Every feature is identified by a stable `FeatureId`.

pub mod plan;
pub mod schema;
pub mod table;
pub mod value;

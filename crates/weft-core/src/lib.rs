//! Weft Core — shared types, field specifications, and errors.
//!
//! This crate provides the foundational types used across all Weft crates.
//! It has no internal Weft dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`ids`]: Model-type and document identifier types
//! - [`fields`]: Declarative searchable-field specifications and registry

pub mod error;
pub mod fields;
pub mod ids;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
pub use fields::{FieldKind, FieldName, FieldSpec, IndexMode, SearchableField, SpecRegistry};
pub use ids::{DocumentId, ModelType};

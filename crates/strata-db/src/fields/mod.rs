//! Field descriptors for model declarations.

pub mod types;

pub use types::{now, FieldDef, FieldDefault, FieldType, OnDelete};

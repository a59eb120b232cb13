//! # strata-core
//!
//! Foundation types shared by every strata crate: the error taxonomy,
//! settings loading, and tracing setup. This crate has no database
//! dependencies.
//!
//! ## Modules
//!
//! - [`error`] - [`StrataError`] and the [`StrataResult`] alias
//! - [`settings`] - [`Settings`] and [`DatabaseSettings`]
//! - [`settings_loader`] - TOML/JSON loading with `STRATA_*` environment overrides
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{StrataError, StrataResult};
pub use settings::{DatabaseSettings, Settings};

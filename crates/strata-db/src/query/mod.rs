//! Query building, compilation, and execution.
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`compiler`] - Query AST and SQL compilation
//! - [`resolver`] - Field paths to columns and joins
//! - [`queryset`] - QuerySet and Manager for lazy query building
//! - [`prefetch`] - Batched loading of related collections
//! - [`bulk`] - Multi-row inserts

pub(crate) mod builder;
pub mod bulk;
pub mod compiler;
pub(crate) mod hydrate;
pub mod lookups;
pub mod prefetch;
pub mod queryset;
pub mod resolver;

pub use bulk::BulkCreateOptions;
pub use compiler::{DatabaseBackendType, Row, SqlCompiler};
pub use lookups::{and_, not_, or_, Lookup, Q};
pub use prefetch::Prefetch;
pub use queryset::{Manager, QuerySet, ValuesOptions};

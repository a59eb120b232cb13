//! # strata-db
//!
//! The ORM core. A [`Registry`] of [`ModelMeta`] descriptors is the schema;
//! a [`QuerySet`] accumulates filters, ordering, slicing and eager-loading
//! directives without touching the database and compiles them into one
//! parameterized statement when a terminal method is awaited with a
//! [`DbExecutor`]. Result rows are hydrated into [`Instance`]s, including
//! rows of joined relations, and `prefetch_related` collections are loaded
//! with one batched query per relation hop.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`] enum
//! - [`fields`] - Field descriptors and types
//! - [`model`] - Model metadata and the frozen [`Registry`]
//! - [`instance`] - Hydrated rows and relation handles
//! - [`query`] - Expressions, join resolution, compilation and the queryset
//! - [`executor`] - The async connection-layer contract
//! - [`transactions`] - Transactions, savepoints and `atomic()`
//! - [`connection`] - The [`Database`] handle and force-rollback mode

// - too_many_lines: the SQL compiler and builder are large match-driven functions
// - result_large_err: StrataError is used consistently across the workspace
// - format_push_string: format! with push_str is clearer than write! for SQL generation
// - return_self_not_must_use: builder methods are self-documenting
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
// significant_drop_tightening: false positives with Mutex guards
#![allow(clippy::significant_drop_tightening)]

pub mod connection;
pub mod executor;
pub mod fields;
pub mod instance;
pub mod model;
pub mod query;
pub mod transactions;
pub mod value;

pub use connection::Database;
pub use executor::DbExecutor;
pub use fields::{FieldDef, FieldDefault, FieldType, OnDelete};
pub use instance::{Instance, Related};
pub use model::{ModelMeta, Registry, Relation, RelationKind};
pub use query::{
    and_, not_, or_, BulkCreateOptions, DatabaseBackendType, Lookup, Manager, Prefetch, QuerySet, Row,
    SqlCompiler, ValuesOptions, Q,
};
pub use transactions::{atomic, atomic_with_isolation, IsolationLevel, Transaction};
pub use value::Value;

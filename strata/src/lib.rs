//! # strata
//!
//! An async ORM core. Models are declared once into a [`Registry`];
//! querysets built from it are lazy until a terminal operation runs them
//! against any [`DbExecutor`]: a pool, a [`Database`] handle or an open
//! [`Transaction`].
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on the
//! individual crates for finer-grained control.
//!
//! ```rust,no_run
//! use strata::prelude::*;
//!
//! async fn example() -> StrataResult<()> {
//!     let registry = Registry::builder()
//!         .model(
//!             ModelMeta::builder("Album")
//!                 .field(FieldDef::new("name", FieldType::Char).max_length(100))
//!                 .build()?,
//!         )
//!         .build()?;
//!
//!     let settings = strata::core::settings_loader::from_toml_file_with_env("strata.toml")?;
//!     let db = strata::db_backends::connect(&settings.database).await?;
//!     db.connect().await?;
//!
//!     let albums = registry.query("Album")?;
//!     albums.create([("name", "Blue")], &db).await?;
//!     let recent = albums.order_by(["-id"]).limit(10).all(&db).await?;
//!     println!("{} albums", recent.len());
//!
//!     db.disconnect().await
//! }
//! ```

/// Error types, settings and logging setup.
pub use strata_core as core;

/// Models, querysets, instances and transactions.
pub use strata_db as db;

/// Connection pools: `SQLite` and `PostgreSQL`.
pub use strata_db_backends as db_backends;

/// Test database and query-count assertions.
#[cfg(feature = "testing")]
pub use strata_test as test;

// Third-party re-exports
pub use async_trait;
pub use chrono;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use uuid;

/// The names most programs need.
pub mod prelude {
    pub use strata_core::{StrataError, StrataResult};
    pub use strata_db::{
        atomic, atomic_with_isolation, Database, DbExecutor, FieldDef, FieldType, Instance, IsolationLevel,
        Manager, ModelMeta, OnDelete, Prefetch, QuerySet, Registry, Transaction, Value, ValuesOptions, Q,
    };
}

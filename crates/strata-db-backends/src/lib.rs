//! # strata-db-backends
//!
//! Connection-layer implementations of [`DbExecutor`](strata_db::DbExecutor):
//! a pooled SQLite backend (feature `sqlite`, on by default) and a pooled
//! PostgreSQL backend (feature `postgres`). [`connect`] turns the
//! `[database]` settings into a ready [`Database`] handle.

#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use strata_core::{DatabaseSettings, StrataError, StrataResult};
use strata_db::{Database, DatabaseBackendType, DbExecutor};

pub use config::DatabaseConfig;
#[cfg(feature = "postgres")]
pub use postgresql::PostgresPool;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePool;

/// Opens a connection pool for `config`.
pub fn open(config: &DatabaseConfig) -> StrataResult<Arc<dyn DbExecutor>> {
    match config.backend {
        #[cfg(feature = "sqlite")]
        DatabaseBackendType::SQLite => Ok(Arc::new(SqlitePool::open(config)?)),
        #[cfg(feature = "postgres")]
        DatabaseBackendType::PostgreSQL => Ok(Arc::new(PostgresPool::from_config(config)?)),
        #[allow(unreachable_patterns)]
        other => Err(StrataError::ImproperlyConfigured(format!(
            "Backend {other:?} is not enabled; rebuild with its cargo feature"
        ))),
    }
}

/// Builds a connected [`Database`] from settings, honoring
/// `force_rollback`.
pub async fn connect(settings: &DatabaseSettings) -> StrataResult<Database> {
    let config = DatabaseConfig::from_settings(settings)?;
    let database = Database::new(open(&config)?).with_force_rollback(settings.force_rollback);
    database.connect().await?;
    tracing::info!(engine = %settings.engine, name = %settings.name, "database ready");
    Ok(database)
}

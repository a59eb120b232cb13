//! Backend connection configuration.

use std::collections::HashMap;

use strata_core::{DatabaseSettings, StrataError, StrataResult};
use strata_db::DatabaseBackendType;

/// Connection parameters for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackendType,
    /// The database name or file path (`:memory:` for in-memory SQLite).
    pub name: String,
    /// Maximum pooled connections. Forced to 1 for in-memory SQLite, where
    /// every connection would otherwise see its own empty database.
    pub pool_size: usize,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Creates a configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::sqlite_file(":memory:")
    }

    /// Creates a configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            backend: DatabaseBackendType::SQLite,
            name: path.into(),
            pool_size: 5,
            host: None,
            port: None,
            user: None,
            password: None,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: DatabaseBackendType::PostgreSQL,
            name: name.into(),
            pool_size: 10,
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Builds a configuration from the `[database]` settings table.
    pub fn from_settings(settings: &DatabaseSettings) -> StrataResult<Self> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let backend = match settings.engine.as_str() {
            "sqlite" | "sqlite3" => DatabaseBackendType::SQLite,
            "postgres" | "postgresql" => DatabaseBackendType::PostgreSQL,
            other => {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "Unsupported database engine '{other}'"
                )))
            }
        };
        if settings.pool_size == 0 {
            return Err(StrataError::ImproperlyConfigured(
                "database.pool_size must be at least 1".into(),
            ));
        }
        Ok(Self {
            backend,
            name: settings.name.clone(),
            pool_size: settings.pool_size,
            host: non_empty(&settings.host),
            port: (settings.port != 0).then_some(settings.port),
            user: non_empty(&settings.user),
            password: non_empty(&settings.password),
            options: settings.options.clone(),
        })
    }

    pub fn is_memory(&self) -> bool {
        self.backend == DatabaseBackendType::SQLite && self.name == ":memory:"
    }

    /// The pool size actually used.
    pub fn effective_pool_size(&self) -> usize {
        if self.is_memory() {
            1
        } else {
            self.pool_size.max(1)
        }
    }
}

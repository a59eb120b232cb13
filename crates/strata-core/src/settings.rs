//! Settings for strata.
//!
//! [`Settings`] holds logging and database configuration. Values are normally
//! produced by [`settings_loader`](crate::settings_loader), which merges a TOML
//! or JSON document and environment overrides over [`Settings::default`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The backend engine: `"sqlite"` or `"postgres"`.
    pub engine: String,
    /// The database name, or the file path for SQLite (`":memory:"` for an
    /// in-memory database).
    pub name: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Wrap the whole connection lifetime in a transaction that is always
    /// rolled back. Intended for tests.
    pub force_rollback: bool,
    /// Optional default schema applied to every query.
    pub schema: Option<String>,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: ":memory:".to_string(),
            pool_size: 5,
            force_rollback: false,
            schema: None,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            options: HashMap::new(),
        }
    }
}

/// The complete set of strata settings.
///
/// ```
/// use strata_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.database.engine, "sqlite");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode is enabled. Selects the pretty log format.
    pub debug: bool,
    /// A `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
    /// The default database.
    pub database: DatabaseSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
        }
    }
}

impl Settings {
    /// Returns `true` when the configured database lives in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database.engine == "sqlite" && self.database.name == ":memory:"
    }
}

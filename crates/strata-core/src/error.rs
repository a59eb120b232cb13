//! Core error types for strata.
//!
//! [`StrataError`] covers every failure the ORM can surface: compile-time
//! lookup and relation errors, `get()` cardinality errors, structural misuse of
//! a queryset, and errors reported by the database driver.

use thiserror::Error;

/// The error type shared by all strata crates.
///
/// Compile-time variants (`FieldLookup`, `RelationResolution`, `QuerySet`,
/// `Value`) are always raised before a statement reaches the connection layer.
/// Database variants carry the driver's message verbatim.
#[derive(Debug, Error)]
pub enum StrataError {
    // ── Query compilation ───────────────────────────────────────────

    /// Unknown field, unknown lookup operator, or an unusable filter.
    #[error("Field lookup error: {0}")]
    FieldLookup(String),

    /// A path segment does not name a relation field.
    #[error("Relation resolution error: {0}")]
    RelationResolution(String),

    /// Structural misuse of a queryset operation.
    #[error("QuerySet error: {0}")]
    QuerySet(String),

    /// An argument had the right type but an invalid value.
    #[error("Value error: {0}")]
    Value(String),

    // ── Query results ────────────────────────────────────────────────

    /// `get()` matched zero rows.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// `get()` matched more than one row.
    #[error("Multiple objects returned: {0}")]
    MultipleObjectsReturned(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// An operational database error (connection failure, pool exhaustion).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// Misuse of a transaction handle.
    #[error("Transaction error: {0}")]
    Transaction(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The model registry is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StrataError {
    /// Returns `true` for errors raised while compiling a query, before any
    /// statement was sent to the database.
    pub const fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::FieldLookup(_) | Self::RelationResolution(_) | Self::QuerySet(_) | Self::Value(_)
        )
    }

    /// Returns `true` for errors reported by the database driver.
    pub const fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::IntegrityError(_) | Self::OperationalError(_)
        )
    }
}

/// A convenience type alias for `Result<T, StrataError>`.
pub type StrataResult<T> = Result<T, StrataError>;

//! SQLite backend using `rusqlite`.
//!
//! [`SqlitePool`] keeps a bounded set of connections. Every statement checks
//! a connection out through a guard that returns it to the pool on drop, so
//! a cancelled future never leaks a connection. A connection returned
//! mid-transaction (its handle was dropped without commit or rollback) is
//! rolled back at its next checkout.
//!
//! `rusqlite` is synchronous; all driver calls run in
//! `tokio::task::spawn_blocking`.
//!
//! Features:
//! - WAL mode and foreign keys enabled for file databases
//! - In-memory databases (`:memory:`) use a single shared connection

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use strata_core::{StrataError, StrataResult};
use strata_db::value::DATETIME_FORMAT;
use strata_db::{DatabaseBackendType, DbExecutor, Row, Value};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::DatabaseConfig;

type SharedConnection = Arc<Mutex<Connection>>;
type IdleList = Arc<std::sync::Mutex<Vec<SharedConnection>>>;

/// A pool of SQLite connections to one database.
pub struct SqlitePool {
    path: String,
    size: usize,
    idle: IdleList,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl SqlitePool {
    /// Opens a pool for the configured database. The first connection is
    /// opened eagerly so a bad path fails here.
    pub fn open(config: &DatabaseConfig) -> StrataResult<Self> {
        if config.backend != DatabaseBackendType::SQLite {
            return Err(StrataError::ImproperlyConfigured(format!(
                "SqlitePool cannot serve a {:?} configuration",
                config.backend
            )));
        }
        let size = config.effective_pool_size();
        let first = open_connection(&config.name)?;
        tracing::debug!(path = %config.name, size, "sqlite pool opened");
        Ok(Self {
            path: config.name.clone(),
            size,
            idle: Arc::new(std::sync::Mutex::new(vec![Arc::new(Mutex::new(first))])),
            permits: Arc::new(Semaphore::new(size)),
        })
    }

    /// Opens a single-connection in-memory database.
    pub fn memory() -> StrataResult<Self> {
        Self::open(&DatabaseConfig::sqlite_memory())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }

    async fn checkout(&self) -> StrataResult<PooledConnection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StrataError::OperationalError("SQLite pool is closed".into()))?;
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        // Guard the connection before the next await so a cancelled
        // checkout still returns it to the pool.
        let pooled = match idle {
            Some(conn) => PooledConnection {
                conn: Some(conn),
                idle: Arc::clone(&self.idle),
                _permit: permit,
            },
            None => {
                let path = self.path.clone();
                let conn = run_blocking(move || open_connection(&path)).await?;
                PooledConnection {
                    conn: Some(Arc::new(Mutex::new(conn))),
                    idle: Arc::clone(&self.idle),
                    _permit: permit,
                }
            }
        };

        let reset = Arc::clone(pooled.shared()?);
        run_blocking(move || {
            let conn = reset.blocking_lock();
            if !conn.is_autocommit() {
                tracing::warn!("rolling back transaction abandoned on a pooled connection");
                conn.execute_batch("ROLLBACK").map_err(map_error)?;
            }
            Ok(())
        })
        .await?;

        tracing::trace!(path = %self.path, "sqlite connection checked out");
        Ok(pooled)
    }
}

/// A checked-out connection. Returns itself to the pool on drop.
struct PooledConnection {
    conn: Option<SharedConnection>,
    idle: IdleList,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn shared(&self) -> StrataResult<&SharedConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StrataError::OperationalError("connection already returned".into()))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
        }
    }
}

/// One connection pinned for as long as any clone is held. Returned by
/// [`DbExecutor::acquire`] and used to run transactions.
#[derive(Clone)]
pub struct SqliteConnection {
    pooled: Arc<PooledConnection>,
}

fn open_connection(path: &str) -> StrataResult<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    }
    .map_err(|e| StrataError::OperationalError(format!("SQLite open failed: {e}")))?;

    conn.busy_timeout(Duration::from_secs(5)).map_err(map_error)?;
    let pragmas = if path == ":memory:" {
        "PRAGMA foreign_keys=ON;"
    } else {
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
    };
    conn.execute_batch(pragmas)
        .map_err(|e| StrataError::OperationalError(format!("Failed to set pragmas: {e}")))?;
    Ok(conn)
}

/// Maps a driver error, keeping its message.
fn map_error(e: rusqlite::Error) -> StrataError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StrataError::IntegrityError(e.to_string()),
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull,
        ) => StrataError::OperationalError(e.to_string()),
        _ => StrataError::DatabaseError(e.to_string()),
    }
}

async fn run_blocking<T, F>(f: F) -> StrataResult<T>
where
    F: FnOnce() -> StrataResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StrataError::OperationalError(format!("Task join error: {e}")))?
}

/// Binds ORM values to a prepared statement.
fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> StrataResult<()> {
    for (i, param) in params.iter().enumerate() {
        let idx = i + 1;
        match param {
            Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
            Value::Bool(b) => stmt.raw_bind_parameter(idx, i64::from(*b)),
            Value::Int(v) => stmt.raw_bind_parameter(idx, v),
            Value::Float(v) => stmt.raw_bind_parameter(idx, v),
            Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
            Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
            Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
            Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.format(DATETIME_FORMAT).to_string()),
            Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339()),
            Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
            Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
            Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
            Value::List(_) => {
                return Err(StrataError::Value(format!(
                    "Parameter {idx} is a list; lists are only valid as 'in' operands"
                )))
            }
        }
        .map_err(map_error)?;
    }
    Ok(())
}

fn convert_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn execute_on(conn: &Connection, sql: &str, params: &[Value]) -> StrataResult<u64> {
    let mut stmt = conn.prepare(sql).map_err(map_error)?;
    bind_params(&mut stmt, params)?;
    let count = stmt.raw_execute().map_err(map_error)?;
    Ok(count as u64)
}

fn fetch_on(conn: &Connection, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(map_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    bind_params(&mut stmt, params)?;

    let mut raw_rows = stmt.raw_query();
    let mut rows = Vec::new();
    while let Some(row) = raw_rows.next().map_err(map_error)? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(convert_value).map_err(map_error))
            .collect::<StrataResult<Vec<_>>>()?;
        rows.push(Row::new(columns.clone(), values));
    }
    Ok(rows)
}

async fn with_connection<T, F>(conn: &SharedConnection, sql: &str, params: &[Value], f: F) -> StrataResult<T>
where
    F: FnOnce(&Connection, &str, &[Value]) -> StrataResult<T> + Send + 'static,
    T: Send + 'static,
{
    tracing::debug!(sql = %sql, params = params.len(), "sqlite");
    let conn = Arc::clone(conn);
    let sql = sql.to_string();
    let params = params.to_vec();
    run_blocking(move || {
        let conn = conn.blocking_lock();
        f(&conn, &sql, &params)
    })
    .await
}

/// Runs the insert and reads the rowid on the same connection, under the
/// same lock, so no other statement can interleave.
fn insert_on(conn: &Connection, sql: &str, params: &[Value]) -> StrataResult<Value> {
    execute_on(conn, sql, params)?;
    Ok(Value::Int(conn.last_insert_rowid()))
}

#[async_trait::async_trait]
impl DbExecutor for SqlitePool {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        let pooled = self.checkout().await?;
        with_connection(pooled.shared()?, sql, params, execute_on).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        let pooled = self.checkout().await?;
        with_connection(pooled.shared()?, sql, params, fetch_on).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        let pooled = self.checkout().await?;
        with_connection(pooled.shared()?, sql, params, insert_on).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        let pooled = self.checkout().await?;
        Ok(Arc::new(SqliteConnection {
            pooled: Arc::new(pooled),
        }))
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        with_connection(self.pooled.shared()?, sql, params, execute_on).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        with_connection(self.pooled.shared()?, sql, params, fetch_on).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        with_connection(self.pooled.shared()?, sql, params, insert_on).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        Ok(Arc::new(self.clone()))
    }
}

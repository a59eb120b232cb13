//! Transaction support for the ORM.
//!
//! A [`Transaction`] pins one connection for its lifetime and implements
//! [`DbExecutor`], so querysets awaited with it run inside the transaction.
//! Beginning a transaction on an executor that is already a transaction
//! creates a savepoint on the same connection instead.
//!
//! [`atomic()`] is the usual entry point: it commits when the closure returns
//! `Ok` and rolls back when it returns `Err`.
//!
//! ```ignore
//! use strata_db::transactions::atomic;
//!
//! let album = atomic(&db, |tx| async move {
//!     let album = albums.create([("name", "Holland")], &tx).await?;
//!     tracks.create([("album", album.pk().clone()), ("title", "Sail On")], &tx).await?;
//!     Ok(album)
//! })
//! .await?;
//! ```
//!
//! A handle dropped without `commit` or `rollback` leaves its connection
//! mid-transaction; pools roll such connections back at their next checkout.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use strata_core::{StrataError, StrataResult};

use crate::executor::DbExecutor;
use crate::query::compiler::{DatabaseBackendType, Row};
use crate::value::Value;

/// Counter for generating unique savepoint names.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// READ UNCOMMITTED - lowest isolation level.
    ReadUncommitted,
    /// READ COMMITTED - prevents dirty reads. PostgreSQL default.
    ReadCommitted,
    RepeatableRead,
    /// SERIALIZABLE - strictest isolation level. SQLite always runs here.
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// The statement that selects this level on `backend`.
    pub fn set_sql(&self, backend: DatabaseBackendType) -> String {
        match backend {
            // SQLite only distinguishes dirty reads of shared-cache tables.
            DatabaseBackendType::SQLite => match self {
                Self::ReadUncommitted => "PRAGMA read_uncommitted = 1".to_string(),
                _ => "PRAGMA read_uncommitted = 0".to_string(),
            },
            DatabaseBackendType::PostgreSQL => {
                format!("SET TRANSACTION ISOLATION LEVEL {}", self.as_sql())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    RolledBack,
}

type OnCommit = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    conn: Arc<dyn DbExecutor>,
    savepoint: Option<String>,
    parent: Option<Transaction>,
    status: Mutex<Status>,
    on_commit: Mutex<Vec<OnCommit>>,
}

/// An open transaction or savepoint. Clones share the same scope.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("savepoint", &self.inner.savepoint)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    fn from_parts(conn: Arc<dyn DbExecutor>, savepoint: Option<String>, parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn,
                savepoint,
                parent,
                status: Mutex::new(Status::Active),
                on_commit: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begins a transaction on a dedicated connection from `db`, or a
    /// savepoint when `db` already runs inside a transaction.
    pub async fn begin(db: &dyn DbExecutor) -> StrataResult<Self> {
        if let Some(parent) = db.current_transaction() {
            return parent.savepoint().await;
        }
        let conn = db.acquire().await?;
        conn.execute("BEGIN", &[]).await?;
        tracing::debug!("transaction begun");
        Ok(Self::from_parts(conn, None, None))
    }

    /// Begins an outermost transaction at `level`.
    ///
    /// Savepoints inherit the level of their transaction, so this fails with
    /// `Transaction` when `db` is already a transaction.
    pub async fn begin_with_isolation(db: &dyn DbExecutor, level: IsolationLevel) -> StrataResult<Self> {
        if db.current_transaction().is_some() {
            return Err(StrataError::Transaction(
                "Isolation level can only be set on the outermost transaction".into(),
            ));
        }
        let conn = db.acquire().await?;
        let backend = conn.backend_type();
        match backend {
            // The pragma must precede BEGIN on SQLite; PostgreSQL requires
            // SET TRANSACTION to be the first statement inside it.
            DatabaseBackendType::SQLite => {
                conn.execute(&level.set_sql(backend), &[]).await?;
                conn.execute("BEGIN", &[]).await?;
            }
            DatabaseBackendType::PostgreSQL => {
                conn.execute("BEGIN", &[]).await?;
                conn.execute(&level.set_sql(backend), &[]).await?;
            }
        }
        tracing::debug!(isolation = level.as_sql(), "transaction begun");
        Ok(Self::from_parts(conn, None, None))
    }

    async fn savepoint(&self) -> StrataResult<Self> {
        self.ensure_active()?;
        let name = format!("sp_{}", SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed));
        self.inner.conn.execute(&format!("SAVEPOINT {name}"), &[]).await?;
        tracing::debug!(savepoint = %name, "savepoint created");
        Ok(Self::from_parts(
            Arc::clone(&self.inner.conn),
            Some(name),
            Some(self.clone()),
        ))
    }

    fn status(&self) -> Status {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: Status) {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn take_callbacks(&self) -> Vec<OnCommit> {
        std::mem::take(&mut *self.inner.on_commit.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn ensure_active(&self) -> StrataResult<()> {
        match self.status() {
            Status::Active => Ok(()),
            Status::Committed => Err(StrataError::Transaction(
                "Transaction has already been committed".into(),
            )),
            Status::RolledBack => Err(StrataError::Transaction(
                "Transaction has already been rolled back".into(),
            )),
        }
    }

    /// `true` until `commit` or `rollback` succeeds.
    pub fn is_active(&self) -> bool {
        self.status() == Status::Active
    }

    /// `true` for a savepoint inside another transaction.
    pub fn is_nested(&self) -> bool {
        self.inner.savepoint.is_some()
    }

    /// Commits the transaction, or releases the savepoint.
    ///
    /// `on_commit` callbacks run once the outermost transaction commits;
    /// a released savepoint hands its callbacks to its parent.
    pub async fn commit(&self) -> StrataResult<()> {
        self.ensure_active()?;
        match &self.inner.savepoint {
            Some(name) => {
                self.inner
                    .conn
                    .execute(&format!("RELEASE SAVEPOINT {name}"), &[])
                    .await?;
                self.set_status(Status::Committed);
                tracing::debug!(savepoint = %name, "savepoint released");
                if let Some(parent) = &self.inner.parent {
                    let callbacks = self.take_callbacks();
                    parent
                        .inner
                        .on_commit
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(callbacks);
                }
            }
            None => {
                self.inner.conn.execute("COMMIT", &[]).await?;
                self.set_status(Status::Committed);
                tracing::debug!("transaction committed");
                for callback in self.take_callbacks() {
                    callback();
                }
            }
        }
        Ok(())
    }

    /// Rolls back the transaction, or back to the savepoint. Pending
    /// `on_commit` callbacks are discarded.
    pub async fn rollback(&self) -> StrataResult<()> {
        self.ensure_active()?;
        match &self.inner.savepoint {
            Some(name) => {
                self.inner
                    .conn
                    .execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
                    .await?;
                self.inner
                    .conn
                    .execute(&format!("RELEASE SAVEPOINT {name}"), &[])
                    .await?;
                tracing::debug!(savepoint = %name, "rolled back to savepoint");
            }
            None => {
                self.inner.conn.execute("ROLLBACK", &[]).await?;
                tracing::debug!("transaction rolled back");
            }
        }
        self.set_status(Status::RolledBack);
        self.take_callbacks();
        Ok(())
    }

    /// Registers a callback to run after the outermost transaction commits.
    /// It never runs if the transaction rolls back.
    pub fn on_commit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .on_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Number of callbacks waiting for commit.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.on_commit.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait::async_trait]
impl DbExecutor for Transaction {
    fn backend_type(&self) -> DatabaseBackendType {
        self.inner.conn.backend_type()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        self.ensure_active()?;
        self.inner.conn.execute(sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        self.ensure_active()?;
        self.inner.conn.fetch_all(sql, params).await
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> StrataResult<Option<Row>> {
        self.ensure_active()?;
        self.inner.conn.fetch_one(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        self.ensure_active()?;
        self.inner.conn.insert_returning_id(sql, params).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        self.ensure_active()?;
        Ok(Arc::new(self.clone()))
    }

    fn current_transaction(&self) -> Option<Transaction> {
        Some(self.clone())
    }
}

/// Runs `f` inside a transaction (or a savepoint when `db` is already a
/// transaction): commit on `Ok`, rollback on `Err`.
///
/// If `f` finishes the transaction itself, it is left as is.
pub async fn atomic<F, Fut, T>(db: &dyn DbExecutor, f: F) -> StrataResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = StrataResult<T>>,
{
    let tx = Transaction::begin(db).await?;
    run_atomic(tx, f).await
}

/// Like [`atomic()`], with the isolation level set before the first
/// statement. Not available for nested scopes.
pub async fn atomic_with_isolation<F, Fut, T>(
    db: &dyn DbExecutor,
    level: IsolationLevel,
    f: F,
) -> StrataResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = StrataResult<T>>,
{
    let tx = Transaction::begin_with_isolation(db, level).await?;
    run_atomic(tx, f).await
}

async fn run_atomic<F, Fut, T>(tx: Transaction, f: F) -> StrataResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = StrataResult<T>>,
{
    match f(tx.clone()).await {
        Ok(value) => {
            if tx.is_active() {
                tx.commit().await?;
            }
            Ok(value)
        }
        Err(e) => {
            if tx.is_active() {
                // The original error wins over a failed rollback.
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
            }
            Err(e)
        }
    }
}

//! The `Database` handle.
//!
//! Wraps a backend executor and adds connection lifecycle plus the
//! force-rollback test mode: once connected, every statement runs on a
//! single connection inside an outer transaction that `disconnect` always
//! rolls back. Transactions begun on the handle in that mode become
//! savepoints of the outer transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use strata_core::{StrataError, StrataResult};

use crate::executor::DbExecutor;
use crate::query::compiler::{DatabaseBackendType, Row};
use crate::transactions::Transaction;
use crate::value::Value;

pub struct Database {
    backend: Arc<dyn DbExecutor>,
    force_rollback: bool,
    connected: AtomicBool,
    /// The outer transaction of force-rollback mode.
    held: Mutex<Option<Transaction>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend.backend_type())
            .field("force_rollback", &self.force_rollback)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Database {
    pub fn new(backend: Arc<dyn DbExecutor>) -> Self {
        Self {
            backend,
            force_rollback: false,
            connected: AtomicBool::new(false),
            held: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_force_rollback(mut self, force_rollback: bool) -> Self {
        self.force_rollback = force_rollback;
        self
    }

    pub fn force_rollback(&self) -> bool {
        self.force_rollback
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn held(&self) -> Option<Transaction> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Marks the handle connected; in force-rollback mode also pins a
    /// connection and begins the outer transaction. Idempotent.
    pub async fn connect(&self) -> StrataResult<()> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.force_rollback {
            match Transaction::begin(self.backend.as_ref()).await {
                Ok(tx) => {
                    *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
                }
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            backend = ?self.backend.backend_type(),
            force_rollback = self.force_rollback,
            "database connected"
        );
        Ok(())
    }

    /// Rolls back the outer transaction of force-rollback mode and releases
    /// its connection. Idempotent.
    pub async fn disconnect(&self) -> StrataResult<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = held {
            if tx.is_active() {
                tx.rollback().await?;
            }
        }
        tracing::debug!("database disconnected");
        Ok(())
    }

    /// Begins a transaction scope, or a savepoint of the outer transaction
    /// in force-rollback mode.
    pub async fn transaction(&self) -> StrataResult<Transaction> {
        Transaction::begin(self).await
    }

    fn ensure_connected(&self) -> StrataResult<()> {
        if self.force_rollback && !self.is_connected() {
            return Err(StrataError::OperationalError(
                "Database in force-rollback mode must be connected before use".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbExecutor for Database {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend.backend_type()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        self.ensure_connected()?;
        match self.held() {
            Some(tx) => tx.execute(sql, params).await,
            None => self.backend.execute(sql, params).await,
        }
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        self.ensure_connected()?;
        match self.held() {
            Some(tx) => tx.fetch_all(sql, params).await,
            None => self.backend.fetch_all(sql, params).await,
        }
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> StrataResult<Option<Row>> {
        self.ensure_connected()?;
        match self.held() {
            Some(tx) => tx.fetch_one(sql, params).await,
            None => self.backend.fetch_one(sql, params).await,
        }
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        self.ensure_connected()?;
        match self.held() {
            Some(tx) => tx.insert_returning_id(sql, params).await,
            None => self.backend.insert_returning_id(sql, params).await,
        }
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        self.ensure_connected()?;
        match self.held() {
            Some(tx) => tx.acquire().await,
            None => self.backend.acquire().await,
        }
    }

    fn current_transaction(&self) -> Option<Transaction> {
        self.held()
    }
}

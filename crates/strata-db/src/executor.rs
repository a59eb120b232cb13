//! The connection-layer contract.
//!
//! [`DbExecutor`] is the minimal async interface the ORM needs from a
//! database: run a statement, fetch rows, insert and report the new key, and
//! pin a dedicated connection for a transaction. Pools, single connections,
//! open transactions and the [`Database`](crate::connection::Database) handle
//! all implement it, so every terminal queryset operation takes
//! `&dyn DbExecutor` and runs unchanged inside or outside a transaction.
//!
//! Backends live in the `strata-db-backends` crate.

use std::sync::Arc;

use strata_core::StrataResult;

use crate::query::compiler::{DatabaseBackendType, Row};
use crate::transactions::Transaction;
use crate::value::Value;

/// Minimal async database executor trait.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// The dialect statements must be compiled for.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a statement that does not return rows and reports the number of
    /// rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64>;

    /// Runs a query and returns every row.
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>>;

    /// Runs a query and returns its first row, if any.
    async fn fetch_one(&self, sql: &str, params: &[Value]) -> StrataResult<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Runs an INSERT and returns the primary key the database assigned.
    ///
    /// Implementations must read the key on the same connection that ran
    /// the insert.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value>;

    /// An executor bound to one connection for as long as it is held.
    ///
    /// Statements issued through the returned handle never interleave with
    /// other work on that connection; dropping the handle returns the
    /// connection.
    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>>;

    /// The transaction this executor runs inside, if any.
    ///
    /// Beginning a transaction on an executor that reports one creates a
    /// savepoint instead of a new transaction.
    fn current_transaction(&self) -> Option<Transaction> {
        None
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! An in-process executor that records statements and replays canned
    //! result sets.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Clones share one statement log and result queue, so a handle
    /// returned by `acquire` records into its parent.
    #[derive(Default, Clone)]
    pub(crate) struct MockDb {
        pub statements: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
        results: Arc<Mutex<VecDeque<Vec<Row>>>>,
        pub backend: Option<DatabaseBackendType>,
    }

    impl MockDb {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn postgres() -> Arc<Self> {
            Arc::new(Self {
                backend: Some(DatabaseBackendType::PostgreSQL),
                ..Self::default()
            })
        }

        /// Queues the rows returned by the next `fetch_all`.
        pub(crate) fn push_rows(&self, rows: Vec<Row>) {
            self.results.lock().unwrap().push_back(rows);
        }

        pub(crate) fn sql(&self) -> Vec<String> {
            self.statements
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }

        pub(crate) fn params(&self, idx: usize) -> Vec<Value> {
            self.statements.lock().unwrap()[idx].1.clone()
        }

        fn record(&self, sql: &str, params: &[Value]) {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
        }
    }

    /// Builds a row from `(column, value)` pairs.
    pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
        Row::new(
            pairs.iter().map(|(c, _)| (*c).to_string()).collect(),
            pairs.iter().map(|(_, v)| v.clone()).collect(),
        )
    }

    #[async_trait::async_trait]
    impl DbExecutor for MockDb {
        fn backend_type(&self) -> DatabaseBackendType {
            self.backend.unwrap_or(DatabaseBackendType::SQLite)
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
            self.record(sql, params);
            Ok(1)
        }

        async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
            self.record(sql, params);
            Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
            self.record(sql, params);
            Ok(Value::Int(1))
        }

        async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
            Ok(Arc::new(self.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{row, MockDb};
    use super::*;

    fn _assert_object_safe(_: &dyn DbExecutor) {}

    #[tokio::test]
    async fn test_fetch_one_defaults_to_first_row() {
        let db = MockDb::new();
        db.push_rows(vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])]);
        let first = db.fetch_one("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(first.unwrap().get("id"), Some(&Value::Int(1)));
        assert!(db.fetch_one("SELECT id FROM t", &[]).await.unwrap().is_none());
        assert!(db.current_transaction().is_none());
    }
}

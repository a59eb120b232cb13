//! Test database utilities.
//!
//! Provides [`TestDatabase`], an in-memory SQLite database for tests. It
//! implements [`DbExecutor`] so every queryset and transaction operation
//! runs against it unchanged, creates tables straight from a [`Registry`],
//! and counts the statements it executes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata_db::{FieldDef, FieldType, ModelMeta, Registry};
//! use strata_test::TestDatabase;
//!
//! async fn example() -> strata_core::StrataResult<()> {
//!     let registry = Registry::builder()
//!         .model(
//!             ModelMeta::builder("Album")
//!                 .field(FieldDef::new("name", FieldType::Char).max_length(100))
//!                 .build()?,
//!         )
//!         .build()?;
//!     let db = TestDatabase::new(&registry)?;
//!     db.create_all().await?;
//!     registry.query("Album")?.create([("name", "Blue")], &db).await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_core::StrataResult;
use strata_db::{DatabaseBackendType, DbExecutor, FieldDef, FieldType, ModelMeta, Registry, Row, Transaction, Value};
use strata_db_backends::sqlite::SqlitePool;

/// Counts every statement passed to the wrapped executor, including those
/// run on connections it hands out.
struct CountingExecutor {
    inner: Arc<dyn DbExecutor>,
    count: Arc<AtomicUsize>,
}

impl CountingExecutor {
    fn tick(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl DbExecutor for CountingExecutor {
    fn backend_type(&self) -> DatabaseBackendType {
        self.inner.backend_type()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        self.tick();
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        self.tick();
        self.inner.fetch_all(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        self.tick();
        self.inner.insert_returning_id(sql, params).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        Ok(Arc::new(Self {
            inner: self.inner.acquire().await?,
            count: Arc::clone(&self.count),
        }))
    }

    fn current_transaction(&self) -> Option<Transaction> {
        self.inner.current_transaction()
    }
}

/// An in-memory SQLite database for testing.
///
/// Every `TestDatabase::new()` call opens a fresh database, so tests are
/// isolated from each other. Clones share the database and the counter.
/// Transaction control statements (`BEGIN`, `COMMIT`, savepoints) are
/// counted like any other statement.
#[derive(Clone)]
pub struct TestDatabase {
    executor: Arc<CountingExecutor>,
    registry: Registry,
}

impl std::fmt::Debug for TestDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDatabase")
            .field("registry", &self.registry)
            .field("query_count", &self.query_count())
            .finish()
    }
}

impl TestDatabase {
    /// Opens a new in-memory database for the models of `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot open the database.
    pub fn new(registry: &Registry) -> StrataResult<Self> {
        let pool = SqlitePool::memory()?;
        Ok(Self {
            executor: Arc::new(CountingExecutor {
                inner: Arc::new(pool),
                count: Arc::new(AtomicUsize::new(0)),
            }),
            registry: registry.clone(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a table for every registered model, join tables included,
    /// referenced tables first. Resets the query counter afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub async fn create_all(&self) -> StrataResult<()> {
        for meta in self.registry.models_in_dependency_order() {
            let sql = create_table_sql(&self.registry, &meta)?;
            tracing::debug!(table = %meta.table, "creating test table");
            self.execute_raw(&sql).await?;
        }
        self.reset_query_count();
        Ok(())
    }

    /// Drops every registered model's table, referencing tables first.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub async fn drop_all(&self) -> StrataResult<()> {
        for meta in self.registry.models_in_dependency_order().iter().rev() {
            self.execute_raw(&format!("DROP TABLE IF EXISTS \"{}\"", meta.table))
                .await?;
        }
        Ok(())
    }

    /// Executes a raw SQL string with no parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub async fn execute_raw(&self, sql: &str) -> StrataResult<u64> {
        self.executor.execute(sql, &[]).await
    }

    /// Returns the current query count.
    pub fn query_count(&self) -> usize {
        self.executor.count.load(Ordering::Relaxed)
    }

    /// Resets the query counter to zero.
    pub fn reset_query_count(&self) {
        self.executor.count.store(0, Ordering::Relaxed);
    }
}

/// The SQLite column type of `field`. Relations take the type of the
/// target's primary key.
fn column_type(registry: &Registry, field: &FieldDef) -> StrataResult<&'static str> {
    Ok(match &field.field_type {
        FieldType::Auto | FieldType::Integer | FieldType::BigInteger | FieldType::Boolean => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Binary => "BLOB",
        FieldType::ForeignKey { to, .. } | FieldType::OneToOne { to, .. } => {
            let target = registry.model(to)?;
            let pk = target.pk_field();
            if pk.is_relation() {
                "INTEGER"
            } else {
                column_type(registry, pk)?
            }
        }
        _ => "TEXT",
    })
}

/// Generates a `CREATE TABLE IF NOT EXISTS` statement from model metadata.
fn create_table_sql(registry: &Registry, meta: &ModelMeta) -> StrataResult<String> {
    let mut col_defs: Vec<String> = Vec::new();

    for field in meta.concrete_fields() {
        let mut parts = vec![format!("\"{}\" {}", field.column, column_type(registry, field)?)];

        if field.primary_key {
            parts.push("PRIMARY KEY".to_string());
            if field.is_auto() {
                parts.push("AUTOINCREMENT".to_string());
            }
        } else if !field.null {
            parts.push("NOT NULL".to_string());
        }

        if field.unique && !field.primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let FieldType::ForeignKey { to, on_delete, .. } | FieldType::OneToOne { to, on_delete, .. } =
            &field.field_type
        {
            let target = registry.model(to)?;
            parts.push(format!(
                "REFERENCES \"{}\" (\"{}\") ON DELETE {}",
                target.table,
                target.pk_column(),
                on_delete.as_sql()
            ));
        }

        col_defs.push(parts.join(" "));
    }

    for group in &meta.unique_together {
        let columns = group
            .iter()
            .filter_map(|name| meta.field(name))
            .map(|f| format!("\"{}\"", f.column))
            .collect::<Vec<_>>()
            .join(", ");
        col_defs.push(format!("UNIQUE ({columns})"));
    }

    let body = col_defs.join(", ");
    Ok(format!("CREATE TABLE IF NOT EXISTS \"{}\" ({body})", meta.table))
}

#[async_trait::async_trait]
impl DbExecutor for TestDatabase {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        self.executor.execute(sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        self.executor.fetch_all(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        self.executor.insert_returning_id(sql, params).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        self.executor.acquire().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{atomic, OnDelete};

    fn registry() -> Registry {
        Registry::builder()
            .model(
                ModelMeta::builder("Author")
                    .field(FieldDef::new("name", FieldType::Char).max_length(50).unique())
                    .build()
                    .unwrap(),
            )
            .model(
                ModelMeta::builder("Book")
                    .field(FieldDef::foreign_key("author", "Author").on_delete(OnDelete::SetNull).nullable())
                    .field(FieldDef::new("title", FieldType::Text))
                    .field(FieldDef::new("price", FieldType::Float).nullable())
                    .field(FieldDef::many_to_many("shelves", "Shelf"))
                    .build()
                    .unwrap(),
            )
            .model(
                ModelMeta::builder("Shelf")
                    .field(FieldDef::new("label", FieldType::Char))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_table_sql() {
        let registry = registry();
        let book = registry.model("Book").unwrap();
        let sql = create_table_sql(&registry, &book).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"books\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"author\" INTEGER REFERENCES \"authors\" (\"id\") ON DELETE SET NULL, \
             \"title\" TEXT NOT NULL, \"price\" REAL)"
        );
    }

    #[test]
    fn test_join_table_sql_has_unique_pair() {
        let registry = registry();
        let join = registry.model("Book_shelves").unwrap();
        let sql = create_table_sql(&registry, &join).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"books_shelves\""));
        assert!(sql.ends_with("UNIQUE (\"book\", \"shelf\"))"));
    }

    #[tokio::test]
    async fn test_create_all_and_drop_all() {
        let db = TestDatabase::new(&registry()).unwrap();
        db.create_all().await.unwrap();
        assert_eq!(db.query_count(), 0);

        let tables = db
            .fetch_all(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await
            .unwrap();
        let names: Vec<_> = tables.iter().map(|r| r.get("name").cloned().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                Value::from("authors"),
                Value::from("books"),
                Value::from("books_shelves"),
                Value::from("shelfs"),
            ]
        );

        db.drop_all().await.unwrap();
        let tables = db
            .fetch_all("SELECT name FROM sqlite_master WHERE name = 'books'", &[])
            .await
            .unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_query_counter() {
        let db = TestDatabase::new(&registry()).unwrap();
        db.create_all().await.unwrap();
        let authors = db.registry().query("Author").unwrap();
        authors.create([("name", "Le Guin")], &db).await.unwrap();
        authors.count(&db).await.unwrap();
        assert_eq!(db.query_count(), 2);
        db.reset_query_count();
        assert_eq!(db.query_count(), 0);
    }

    #[tokio::test]
    async fn test_transaction_statements_are_counted() {
        let db = TestDatabase::new(&registry()).unwrap();
        db.create_all().await.unwrap();
        let registry = db.registry().clone();
        atomic(&db, |tx| async move {
            registry.query("Author")?.create([("name", "Herbert")], &tx).await?;
            Ok(())
        })
        .await
        .unwrap();
        // BEGIN, INSERT, COMMIT
        assert_eq!(db.query_count(), 3);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let db = TestDatabase::new(&registry()).unwrap();
        db.create_all().await.unwrap();
        let other = db.clone();
        other.execute_raw("DELETE FROM authors").await.unwrap();
        assert_eq!(db.query_count(), 1);
    }
}

//! PostgreSQL backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! Connections are recycled with a `ROLLBACK`, so a pinned connection
//! dropped mid-transaction returns to the pool clean.

use std::error::Error;
use std::sync::Arc;

use bytes::BytesMut;
use deadpool_postgres::{ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use strata_core::{StrataError, StrataResult};
use strata_db::{DatabaseBackendType, DbExecutor, Row, Value};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

use crate::config::DatabaseConfig;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// A pool of PostgreSQL connections.
pub struct PostgresPool {
    pool: Pool,
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl PostgresPool {
    pub const fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a pool from a [`DatabaseConfig`]. No connection is opened
    /// until the first statement.
    pub fn from_config(config: &DatabaseConfig) -> StrataResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host = config.host.clone();
        pg_config.port = config.port;
        pg_config.user = config.user.clone();
        pg_config.password = config.password.clone();
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Custom("ROLLBACK".to_string()),
        });
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(config.effective_pool_size()));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| StrataError::OperationalError(format!("Failed to create pool: {e}")))?;
        Ok(Self { pool })
    }

    async fn client(&self) -> StrataResult<Object> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StrataError::OperationalError(format!("Pool error: {e}")))?;
        tracing::trace!("postgres connection checked out");
        Ok(client)
    }
}

/// A connection pinned for as long as any clone is held.
#[derive(Clone)]
pub struct PostgresConnection {
    client: Arc<Object>,
}

/// A NULL parameter. Accepted for a parameter of any type, so a NULL bound
/// to an `int8` or `jsonb` column is not rejected by the type check.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Converts ORM values to `tokio-postgres` parameters.
fn to_sql_params(params: &[Value]) -> StrataResult<Vec<BoxedParam>> {
    params
        .iter()
        .map(|v| -> StrataResult<BoxedParam> {
            Ok(match v {
                Value::Null => Box::new(SqlNull),
                Value::Bool(b) => Box::new(*b),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                Value::String(s) => Box::new(s.clone()),
                Value::Bytes(b) => Box::new(b.clone()),
                Value::Date(d) => Box::new(*d),
                Value::DateTime(dt) => Box::new(*dt),
                Value::DateTimeTz(dt) => Box::new(*dt),
                Value::Time(t) => Box::new(*t),
                Value::Uuid(u) => Box::new(*u),
                Value::Json(j) => Box::new(j.clone()),
                Value::List(_) => {
                    return Err(StrataError::Value(
                        "lists are only valid as 'in' operands".into(),
                    ))
                }
            })
        })
        .collect()
}

/// Reads column `idx`, failing instead of guessing when the driver cannot
/// convert it.
fn column<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> StrataResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        StrataError::DatabaseError(format!(
            "cannot read column '{}' of type {}: {e}",
            row.columns()[idx].name(),
            row.columns()[idx].type_()
        ))
    })
}

fn convert_row(pg_row: &tokio_postgres::Row) -> StrataResult<Row> {
    let columns: Vec<String> = pg_row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in pg_row.columns().iter().enumerate() {
        let value = match *col.type_() {
            Type::BOOL => column::<bool>(pg_row, i)?.map_or(Value::Null, Value::Bool),
            Type::INT2 => column::<i16>(pg_row, i)?.map_or(Value::Null, |v| Value::Int(i64::from(v))),
            Type::INT4 => column::<i32>(pg_row, i)?.map_or(Value::Null, |v| Value::Int(i64::from(v))),
            Type::INT8 => column::<i64>(pg_row, i)?.map_or(Value::Null, Value::Int),
            Type::FLOAT4 => column::<f32>(pg_row, i)?.map_or(Value::Null, |v| Value::Float(f64::from(v))),
            Type::FLOAT8 => column::<f64>(pg_row, i)?.map_or(Value::Null, Value::Float),
            Type::BYTEA => column::<Vec<u8>>(pg_row, i)?.map_or(Value::Null, Value::Bytes),
            Type::UUID => column::<uuid::Uuid>(pg_row, i)?.map_or(Value::Null, Value::Uuid),
            Type::DATE => column::<chrono::NaiveDate>(pg_row, i)?.map_or(Value::Null, Value::Date),
            Type::TIMESTAMP => column::<chrono::NaiveDateTime>(pg_row, i)?.map_or(Value::Null, Value::DateTime),
            Type::TIMESTAMPTZ => {
                column::<chrono::DateTime<chrono::Utc>>(pg_row, i)?.map_or(Value::Null, Value::DateTimeTz)
            }
            Type::TIME => column::<chrono::NaiveTime>(pg_row, i)?.map_or(Value::Null, Value::Time),
            Type::JSON | Type::JSONB => column::<serde_json::Value>(pg_row, i)?.map_or(Value::Null, Value::Json),
            _ => column::<String>(pg_row, i)?.map_or(Value::Null, Value::String),
        };
        values.push(value);
    }
    Ok(Row::new(columns, values))
}

/// Maps a driver error, keeping its message. SQLSTATE class 23 is an
/// integrity violation.
fn map_error(e: tokio_postgres::Error) -> StrataError {
    if e.is_closed() {
        return StrataError::OperationalError(e.to_string());
    }
    match e.code() {
        Some(state) if state.code().starts_with("23") => StrataError::IntegrityError(e.to_string()),
        Some(state) if state.code().starts_with("08") || state.code().starts_with("40") => {
            StrataError::OperationalError(e.to_string())
        }
        _ => StrataError::DatabaseError(e.to_string()),
    }
}

async fn execute_on(client: &Object, sql: &str, params: &[Value]) -> StrataResult<u64> {
    tracing::debug!(sql = %sql, params = params.len(), "postgres");
    let boxed = to_sql_params(params)?;
    let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
    client.execute(sql, &refs).await.map_err(map_error)
}

async fn fetch_on(client: &Object, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
    tracing::debug!(sql = %sql, params = params.len(), "postgres");
    let boxed = to_sql_params(params)?;
    let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
    let rows = client.query(sql, &refs).await.map_err(map_error)?;
    rows.iter().map(convert_row).collect()
}

/// The compiler appends `RETURNING <pk>` to inserts that need a key.
async fn insert_on(client: &Object, sql: &str, params: &[Value]) -> StrataResult<Value> {
    let rows = fetch_on(client, sql, params).await?;
    rows.into_iter()
        .next()
        .and_then(|row| row.into_values().into_iter().next())
        .ok_or_else(|| StrataError::DatabaseError("INSERT ... RETURNING returned no rows".to_string()))
}

#[async_trait::async_trait]
impl DbExecutor for PostgresPool {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        execute_on(&self.client().await?, sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        fetch_on(&self.client().await?, sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        insert_on(&self.client().await?, sql, params).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        Ok(Arc::new(PostgresConnection {
            client: Arc::new(self.client().await?),
        }))
    }
}

#[async_trait::async_trait]
impl DbExecutor for PostgresConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        execute_on(&self.client, sql, params).await
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        fetch_on(&self.client, sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StrataResult<Value> {
        insert_on(&self.client, sql, params).await
    }

    async fn acquire(&self) -> StrataResult<Arc<dyn DbExecutor>> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sql_params() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let params = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::String("hello".to_string()),
            Value::Uuid(uuid::Uuid::new_v4()),
            Value::Json(serde_json::json!({"key": "value"})),
            Value::Date(date),
        ];
        assert_eq!(to_sql_params(&params).unwrap().len(), 7);
    }

    #[test]
    fn test_null_parameter_accepts_any_type() {
        let params = to_sql_params(&[Value::Null]).unwrap();
        let mut buf = BytesMut::new();
        for ty in [Type::INT8, Type::TIMESTAMP, Type::JSONB, Type::UUID, Type::TEXT] {
            let written = params[0].to_sql_checked(&ty, &mut buf).unwrap();
            assert!(matches!(written, IsNull::Yes));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_list_parameter_rejected() {
        assert!(matches!(
            to_sql_params(&[Value::List(vec![])]),
            Err(StrataError::Value(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() {
        let cfg = DatabaseConfig::postgres("testdb", "127.0.0.1", 1, "user", "pass").pool_size(2);
        let pool = PostgresPool::from_config(&cfg).unwrap();
        assert_eq!(pool.backend_type(), DatabaseBackendType::PostgreSQL);
        assert_eq!(pool.pool.status().max_size, 2);
    }
}

//! Insert row preparation and batched inserts.
//!
//! Every insert path (`create`, `save` on a new instance, `bulk_create`)
//! goes through [`insert_row`], which validates the caller's keys and fills
//! omitted fields from their declared defaults. Bulk inserts are split into
//! batches that stay under the backend's bound-parameter limit.

use std::collections::BTreeMap;

use strata_core::{StrataError, StrataResult};

use crate::executor::DbExecutor;
use crate::fields::now;
use crate::model::ModelMeta;
use crate::query::compiler::{DatabaseBackendType, SqlCompiler, TableRef};
use crate::value::Value;

/// Options for `bulk_create`.
#[derive(Debug, Clone, Default)]
pub struct BulkCreateOptions {
    /// Rows per INSERT. `None` fills each statement up to the backend's
    /// parameter limit.
    pub batch_size: Option<usize>,
    /// Skip rows that violate a unique constraint (`ON CONFLICT DO NOTHING`).
    pub ignore_conflicts: bool,
}

/// Bound-parameter ceiling per statement.
const fn max_params(backend: DatabaseBackendType) -> usize {
    match backend {
        DatabaseBackendType::SQLite => 999,
        DatabaseBackendType::PostgreSQL => 65_535,
    }
}

/// The `(field name, value)` pairs to insert for one row, in declaration
/// order.
///
/// Omitted fields take their default, `auto_now`/`auto_now_add` timestamp or
/// NULL when nullable. An omitted auto primary key is left to the database.
/// A required field with none of those fails with `Value`.
pub(crate) fn insert_row(
    meta: &ModelMeta,
    provided: &BTreeMap<String, Value>,
) -> StrataResult<Vec<(String, Value)>> {
    let mut given: BTreeMap<&str, &Value> = BTreeMap::new();
    for (key, value) in provided {
        let field = meta.assignable_field(key)?;
        given.insert(field.name.as_str(), value);
    }

    let mut row = Vec::new();
    for field in meta.concrete_fields() {
        if let Some(value) = given.get(field.name.as_str()) {
            if !(field.is_auto() && value.is_null()) {
                row.push((field.name.clone(), (*value).clone()));
            }
            continue;
        }
        if field.is_auto() {
            continue;
        }
        match field.value_on_insert() {
            Some(value) => row.push((field.name.clone(), value)),
            None => {
                return Err(StrataError::Value(format!(
                    "{}.{} is required",
                    meta.name, field.name
                )))
            }
        }
    }
    Ok(row)
}

/// Assignments for every `auto_now` field, applied on each update.
pub(crate) fn auto_now_assignments(meta: &ModelMeta) -> Vec<(String, Value)> {
    meta.concrete_fields()
        .filter(|f| f.auto_now)
        .map(|f| (f.name.clone(), now()))
        .collect()
}

/// Maps field names to column names.
pub(crate) fn to_columns(meta: &ModelMeta, pairs: &[(String, Value)]) -> Vec<(String, Value)> {
    pairs
        .iter()
        .map(|(name, value)| {
            let column = meta
                .field(name)
                .map_or_else(|| name.clone(), |f| f.column.clone());
            (column, value.clone())
        })
        .collect()
}

/// Inserts prepared rows in as few statements as the parameter limit
/// allows, keeping the caller's order. Rows are grouped by column set, so a
/// mix of explicit and database-assigned keys still batches.
pub(crate) async fn bulk_insert(
    meta: &ModelMeta,
    table: &TableRef,
    rows: Vec<Vec<(String, Value)>>,
    options: &BulkCreateOptions,
    db: &dyn DbExecutor,
) -> StrataResult<u64> {
    let compiler = SqlCompiler::new(db.backend_type());
    let mut affected = 0;
    let mut start = 0;

    while start < rows.len() {
        let columns: Vec<String> = rows[start].iter().map(|(name, _)| name.clone()).collect();
        let same_shape = rows[start..]
            .iter()
            .take_while(|r| r.iter().map(|(n, _)| n).eq(columns.iter()))
            .count();
        let per_statement = options
            .batch_size
            .unwrap_or_else(|| max_params(compiler.backend()) / columns.len().max(1))
            .max(1);
        let group = &rows[start..start + same_shape];

        let column_names: Vec<String> = columns
            .iter()
            .map(|n| meta.field(n).map_or_else(|| n.clone(), |f| f.column.clone()))
            .collect();

        for chunk in group.chunks(per_statement) {
            let values: Vec<Vec<Value>> = chunk
                .iter()
                .map(|r| r.iter().map(|(_, v)| v.clone()).collect())
                .collect();
            let (mut sql, params) = compiler.compile_insert(table, &column_names, &values, None);
            if options.ignore_conflicts {
                sql.push_str(" ON CONFLICT DO NOTHING");
            }
            tracing::debug!(table = %meta.table, rows = chunk.len(), "bulk insert");
            affected += db.execute(&sql, &params).await?;
        }
        start += same_shape;
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockDb;
    use crate::fields::{FieldDef, FieldType};

    fn user_meta() -> ModelMeta {
        ModelMeta::builder("User")
            .field(FieldDef::new("name", FieldType::Char).max_length(100))
            .field(FieldDef::new("language", FieldType::Char).nullable())
            .field(FieldDef::new("data", FieldType::Json).default(serde_json::json!({})))
            .field(FieldDef::new("created", FieldType::DateTime).auto_now_add())
            .field(FieldDef::new("updated", FieldType::DateTime).auto_now())
            .build()
            .unwrap()
    }

    fn provided(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_row_applies_defaults() {
        let meta = user_meta();
        let row = insert_row(&meta, &provided(&[("name", "Jane".into())])).unwrap();
        let names: Vec<&str> = row.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "language", "data", "created", "updated"]);
        assert_eq!(row[1].1, Value::Null);
        assert_eq!(row[2].1, Value::Json(serde_json::json!({})));
        assert!(matches!(row[3].1, Value::DateTime(_)));
    }

    #[test]
    fn test_insert_row_keeps_explicit_pk() {
        let meta = user_meta();
        let row = insert_row(&meta, &provided(&[("pk", Value::Int(9)), ("name", "a".into())])).unwrap();
        assert_eq!(row[0], ("id".to_string(), Value::Int(9)));
    }

    #[test]
    fn test_insert_row_errors() {
        let meta = user_meta();
        assert!(matches!(
            insert_row(&meta, &provided(&[("nickname", "x".into())])),
            Err(StrataError::FieldLookup(_))
        ));
        assert!(matches!(
            insert_row(&meta, &provided(&[])),
            Err(StrataError::Value(msg)) if msg.contains("User.name")
        ));
    }

    #[test]
    fn test_auto_now_assignments() {
        let meta = user_meta();
        let assigned = auto_now_assignments(&meta);
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].0, "updated");
    }

    #[tokio::test]
    async fn test_bulk_insert_batches() {
        let meta = user_meta();
        let db = MockDb::new();
        let rows: Vec<_> = (0..5)
            .map(|i| insert_row(&meta, &provided(&[("name", format!("u{i}").into())])).unwrap())
            .collect();
        let options = BulkCreateOptions {
            batch_size: Some(2),
            ignore_conflicts: false,
        };
        bulk_insert(&meta, &TableRef::new(None, "users"), rows, &options, db.as_ref())
            .await
            .unwrap();
        let sql = db.sql();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("INSERT INTO \"users\" (\"name\", \"language\", \"data\", \"created\", \"updated\") VALUES (?, ?, ?, ?, ?), (?, ?, ?, ?, ?)"));
        assert_eq!(db.params(2).len(), 5);
    }

    #[tokio::test]
    async fn test_bulk_insert_groups_by_shape() {
        let meta = user_meta();
        let db = MockDb::new();
        let rows = vec![
            insert_row(&meta, &provided(&[("name", "a".into())])).unwrap(),
            insert_row(&meta, &provided(&[("id", Value::Int(10)), ("name", "b".into())])).unwrap(),
            insert_row(&meta, &provided(&[("name", "c".into())])).unwrap(),
        ];
        let options = BulkCreateOptions {
            batch_size: None,
            ignore_conflicts: true,
        };
        bulk_insert(&meta, &TableRef::new(None, "users"), rows, &options, db.as_ref())
            .await
            .unwrap();
        let sql = db.sql();
        assert_eq!(sql.len(), 3);
        assert!(sql[1].contains("(\"id\", \"name\""));
        assert!(sql.iter().all(|s| s.ends_with("ON CONFLICT DO NOTHING")));
    }
}

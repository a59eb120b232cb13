//! QuerySet and Manager.
//!
//! A [`QuerySet`] is an immutable description of a query over one model.
//! Chaining methods consume the queryset and return a new one, so a base
//! queryset can be cloned and branched freely. Nothing touches the database
//! until a terminal method (`all`, `get`, `count`, `update`, ...) is awaited
//! with an executor.
//!
//! ```
//! use strata_db::query::lookups::Q;
//! use strata_db::{DatabaseBackendType, FieldDef, FieldType, ModelMeta, Registry};
//!
//! let registry = Registry::builder()
//!     .model(
//!         ModelMeta::builder("Album")
//!             .field(FieldDef::new("name", FieldType::Char))
//!             .build()
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let base = registry.query("Album").unwrap();
//! let surf = base.clone().filter(("name__icontains", "surf")).order_by(["-name"]);
//! let (sql, params) = surf.to_sql(DatabaseBackendType::PostgreSQL).unwrap();
//! assert!(sql.contains("ILIKE $1"));
//! assert_eq!(params.len(), 1);
//! // The base queryset is unchanged.
//! assert!(!base.to_sql(DatabaseBackendType::PostgreSQL).unwrap().0.contains("WHERE"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use strata_core::logging::query_span;
use strata_core::{StrataError, StrataResult};
use tracing::Instrument;

use crate::executor::DbExecutor;
use crate::instance::Instance;
use crate::model::{ModelMeta, Registry};
use crate::query::builder::{build_mutation, build_select};
use crate::query::bulk::{auto_now_assignments, bulk_insert, insert_row, to_columns, BulkCreateOptions};
use crate::query::compiler::{DatabaseBackendType, SqlCompiler, TableRef};
use crate::query::hydrate::hydrate_row;
use crate::query::lookups::{self, Q};
use crate::query::prefetch::{prefetch, Prefetch};
use crate::value::Value;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Accumulated query state. Never mutated once a queryset is shared.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    pub filters: Vec<Q>,
    pub order_by: Vec<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub select_related: Vec<String>,
    pub prefetch: Vec<Prefetch>,
    pub schema: Option<String>,
    pub distinct: bool,
    pub for_update: bool,
    /// Set by [`QuerySet::none`]; terminal methods skip the database.
    pub is_none: bool,
}

/// Options for [`QuerySet::values`].
#[derive(Debug, Clone, Default)]
pub struct ValuesOptions {
    /// Fields to include; every column-backed field when `None`.
    pub fields: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Drop keys whose value is NULL.
    pub exclude_none: bool,
}

impl ValuesOptions {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// A lazy, immutable query over one model.
#[derive(Clone)]
pub struct QuerySet {
    pub(crate) registry: Registry,
    pub(crate) meta: Arc<ModelMeta>,
    pub(crate) state: QueryState,
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.meta.name)
            .field("state", &self.state)
            .finish()
    }
}

impl QuerySet {
    /// A queryset over every row of `meta`, in the registry's default schema.
    pub fn new(registry: &Registry, meta: Arc<ModelMeta>) -> Self {
        Self {
            registry: registry.clone(),
            meta,
            state: QueryState {
                schema: registry.schema().map(str::to_string),
                ..QueryState::default()
            },
        }
    }

    pub fn for_model(registry: &Registry, model: &str) -> StrataResult<Self> {
        Ok(Self::new(registry, registry.model(model)?))
    }

    pub fn model(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ── Chaining ─────────────────────────────────────────────────────

    /// Narrows the queryset. Repeated calls AND their predicates together.
    #[must_use]
    pub fn filter(mut self, q: impl Into<Q>) -> Self {
        self.state.filters.push(q.into());
        self
    }

    /// Excludes rows matching the predicate.
    #[must_use]
    pub fn exclude(self, q: impl Into<Q>) -> Self {
        self.filter(!q.into())
    }

    #[must_use]
    pub fn and_(self, items: impl IntoIterator<Item = Q>) -> Self {
        self.filter(lookups::and_(items))
    }

    #[must_use]
    pub fn or_(self, items: impl IntoIterator<Item = Q>) -> Self {
        self.filter(lookups::or_(items))
    }

    #[must_use]
    pub fn not_(self, q: Q) -> Self {
        self.exclude(q)
    }

    /// Replaces the ordering. A leading `-` sorts descending; paths may
    /// cross relations. Ties are always broken by primary key.
    #[must_use]
    pub fn order_by<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.order_by = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Caps the number of rows. Negative values fail when the query is
    /// compiled.
    #[must_use]
    pub fn limit(mut self, n: i64) -> Self {
        self.state.limit = Some(n);
        self
    }

    #[must_use]
    pub fn offset(mut self, n: i64) -> Self {
        self.state.offset = Some(n);
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    /// Joins single-valued relations and hydrates them in the same query.
    #[must_use]
    pub fn select_related<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            if !self.state.select_related.contains(&path) {
                self.state.select_related.push(path);
            }
        }
        self
    }

    /// Loads related collections with one extra query per relation hop.
    #[must_use]
    pub fn prefetch_related<I, P>(mut self, directives: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Prefetch>,
    {
        self.state.prefetch.extend(directives.into_iter().map(Into::into));
        self
    }

    /// A queryset that matches nothing and never queries.
    #[must_use]
    pub fn none(mut self) -> Self {
        self.state.is_none = true;
        self
    }

    /// Locks selected rows until the enclosing transaction ends. Ignored on
    /// SQLite, which locks the whole database on write.
    #[must_use]
    pub fn select_for_update(mut self) -> Self {
        self.state.for_update = true;
        self
    }

    /// Targets tables in `schema` instead of the registry default.
    #[must_use]
    pub fn using(self, schema: impl Into<String>) -> Self {
        self.with_schema(Some(schema.into()))
    }

    #[must_use]
    pub(crate) fn with_schema(mut self, schema: Option<String>) -> Self {
        self.state.schema = schema;
        self
    }

    /// Renders the SELECT this queryset would run.
    pub fn to_sql(&self, backend: DatabaseBackendType) -> StrataResult<(String, Vec<Value>)> {
        let plan = build_select(self, &[])?;
        Ok(SqlCompiler::new(backend).compile_select(&plan.query))
    }

    fn table(&self) -> TableRef {
        TableRef::new(self.state.schema.as_deref(), &self.meta.table)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Runs the SELECT and prefetches, returning instances with the values of
    /// `extra` paths selected after the model columns.
    pub(crate) fn fetch<'a>(
        &'a self,
        extra: &'a [String],
        db: &'a dyn DbExecutor,
    ) -> BoxFuture<'a, StrataResult<Vec<(Instance, Vec<Value>)>>> {
        Box::pin(async move {
            if self.state.is_none {
                return Ok(Vec::new());
            }
            let plan = build_select(self, extra)?;
            let (sql, params) = SqlCompiler::new(db.backend_type()).compile_select(&plan.query);
            let rows = db
                .fetch_all(&sql, &params)
                .instrument(query_span(&self.meta.table, "select"))
                .await?;
            tracing::debug!(model = %self.meta.name, rows = rows.len(), "fetched");

            let schema = self.state.schema.as_deref();
            let (mut instances, extras): (Vec<Instance>, Vec<Vec<Value>>) = rows
                .into_iter()
                .map(|row| hydrate_row(&self.registry, schema, &plan.layout, row))
                .unzip();

            if !self.state.prefetch.is_empty() {
                prefetch(
                    &self.registry,
                    &self.meta,
                    schema,
                    &mut instances,
                    &self.state.prefetch,
                    db,
                )
                .await?;
            }
            Ok(instances.into_iter().zip(extras).collect())
        })
    }

    /// Every matching row, in order. No match is an empty vector.
    pub async fn all(&self, db: &dyn DbExecutor) -> StrataResult<Vec<Instance>> {
        Ok(self.fetch(&[], db).await?.into_iter().map(|(i, _)| i).collect())
    }

    /// The single matching row.
    ///
    /// Fetches at most two rows: none is `ObjectNotFound`, two is
    /// `MultipleObjectsReturned`.
    pub async fn get(&self, db: &dyn DbExecutor) -> StrataResult<Instance> {
        let mut qs = self.clone();
        if qs.state.limit.map_or(true, |l| l > 2) {
            qs.state.limit = Some(2);
        }
        let mut rows = qs.all(db).await?;
        match rows.len() {
            0 => Err(StrataError::ObjectNotFound(format!(
                "{} matching query does not exist.",
                self.meta.name
            ))),
            1 => rows.pop().ok_or_else(|| StrataError::ObjectNotFound(self.meta.name.clone())),
            n => Err(StrataError::MultipleObjectsReturned(format!(
                "get() returned more than one {} -- it returned {n}!",
                self.meta.name
            ))),
        }
    }

    /// `filter(q).get()`.
    pub async fn get_by(&self, q: impl Into<Q>, db: &dyn DbExecutor) -> StrataResult<Instance> {
        self.clone().filter(q).get(db).await
    }

    /// Like [`get`](Self::get), with no match mapped to `None`.
    pub async fn get_or_none(&self, db: &dyn DbExecutor) -> StrataResult<Option<Instance>> {
        match self.get(db).await {
            Ok(instance) => Ok(Some(instance)),
            Err(StrataError::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The first row under the current ordering (primary key by default).
    pub async fn first(&self, db: &dyn DbExecutor) -> StrataResult<Option<Instance>> {
        Ok(self.clone().limit(1).all(db).await?.into_iter().next())
    }

    /// The last row under the current ordering (primary key by default).
    pub async fn last(&self, db: &dyn DbExecutor) -> StrataResult<Option<Instance>> {
        let reversed: Vec<String> = if self.state.order_by.is_empty() {
            vec!["-pk".to_string()]
        } else {
            self.state
                .order_by
                .iter()
                .map(|k| k.strip_prefix('-').map_or_else(|| format!("-{k}"), str::to_string))
                .collect()
        };
        Ok(self.clone().order_by(reversed).limit(1).all(db).await?.into_iter().next())
    }

    /// `SELECT COUNT(*)`; never fetches rows.
    pub async fn count(&self, db: &dyn DbExecutor) -> StrataResult<u64> {
        if self.state.is_none {
            return Ok(0);
        }
        let plan = build_select(self, &[])?;
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_count(&plan.query);
        let row = db
            .fetch_one(&sql, &params)
            .instrument(query_span(&self.meta.table, "count"))
            .await?;
        let count = row
            .as_ref()
            .and_then(|r| r.get_by_index(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| StrataError::DatabaseError("COUNT(*) returned no integer".into()))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// `SELECT 1 ... LIMIT 1`.
    pub async fn exists(&self, db: &dyn DbExecutor) -> StrataResult<bool> {
        if self.state.is_none {
            return Ok(false);
        }
        let plan = build_select(self, &[])?;
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_exists(&plan.query);
        let row = db
            .fetch_one(&sql, &params)
            .instrument(query_span(&self.meta.table, "exists"))
            .await?;
        Ok(row.is_some())
    }

    /// Plain field maps instead of instances.
    ///
    /// Unknown names in `fields` or `exclude` fail with `QuerySet` before
    /// any query runs.
    pub async fn values(
        &self,
        options: &ValuesOptions,
        db: &dyn DbExecutor,
    ) -> StrataResult<Vec<BTreeMap<String, Value>>> {
        let selected = self.value_fields(options.fields.as_deref())?;
        let excluded = self.value_fields(Some(options.exclude.as_slice()))?;
        let rows = self.all(db).await?;
        Ok(rows
            .iter()
            .map(|instance| {
                selected
                    .iter()
                    .filter(|name| !excluded.contains(name))
                    .filter_map(|name| {
                        let value = instance.get(name).cloned().unwrap_or(Value::Null);
                        (!(options.exclude_none && value.is_null())).then(|| (name.clone(), value))
                    })
                    .collect()
            })
            .collect())
    }

    /// [`values`](Self::values) with a dynamically typed field list: `null`
    /// selects every field, an array of strings selects those fields, and
    /// anything else fails with `QuerySet`.
    pub async fn values_json(
        &self,
        fields: &serde_json::Value,
        db: &dyn DbExecutor,
    ) -> StrataResult<Vec<BTreeMap<String, Value>>> {
        let fields = match fields {
            serde_json::Value::Null => None,
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            StrataError::QuerySet(format!("Fields must be strings, got {item}"))
                        })
                    })
                    .collect::<StrataResult<Vec<_>>>()?,
            ),
            other => {
                return Err(StrataError::QuerySet(format!(
                    "Fields must be a list of strings, got {other}"
                )))
            }
        };
        let options = ValuesOptions {
            fields,
            ..ValuesOptions::default()
        };
        self.values(&options, db).await
    }

    /// Tuples of the given fields, each as a [`Value::List`]; with `flat`,
    /// the bare values of a single field.
    pub async fn values_list(&self, fields: &[&str], flat: bool, db: &dyn DbExecutor) -> StrataResult<Vec<Value>> {
        if flat && fields.len() != 1 {
            return Err(StrataError::QuerySet(
                "'flat' is only valid with a single field".into(),
            ));
        }
        let names: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        let selected = self.value_fields(Some(names.as_slice()))?;
        let rows = self.all(db).await?;
        Ok(rows
            .iter()
            .map(|instance| {
                let mut tuple: Vec<Value> = selected
                    .iter()
                    .map(|name| instance.get(name).cloned().unwrap_or(Value::Null))
                    .collect();
                if flat {
                    tuple.pop().unwrap_or(Value::Null)
                } else {
                    Value::List(tuple)
                }
            })
            .collect())
    }

    fn value_fields(&self, names: Option<&[String]>) -> StrataResult<Vec<String>> {
        let Some(names) = names else {
            return Ok(self.meta.concrete_fields().map(|f| f.name.clone()).collect());
        };
        names
            .iter()
            .map(|name| {
                self.meta
                    .field(self.meta.canonical_name(name))
                    .filter(|f| f.is_concrete())
                    .map(|f| f.name.clone())
                    .ok_or_else(|| {
                        StrataError::QuerySet(format!("'{name}' is not a field of {}", self.meta.name))
                    })
            })
            .collect()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Inserts one row and returns it with its assigned primary key and
    /// defaults filled in.
    pub async fn create<I, K, V>(&self, fields: I, db: &dyn DbExecutor) -> StrataResult<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut instance = Instance::new(&self.registry, &self.meta.name, fields)?;
        instance.set_schema(self.state.schema.as_deref());
        instance
            .insert(db)
            .instrument(query_span(&self.meta.table, "insert"))
            .await?;
        Ok(instance)
    }

    /// Inserts many rows with multi-row INSERTs. Returns the number of rows
    /// the database reports as inserted; keys are not read back.
    pub async fn bulk_create<R, I, K, V>(&self, rows: R, db: &dyn DbExecutor) -> StrataResult<u64>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.bulk_create_with(rows, &BulkCreateOptions::default(), db).await
    }

    pub async fn bulk_create_with<R, I, K, V>(
        &self,
        rows: R,
        options: &BulkCreateOptions,
        db: &dyn DbExecutor,
    ) -> StrataResult<u64>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let prepared = rows
            .into_iter()
            .map(|row| {
                let provided: BTreeMap<String, Value> = row
                    .into_iter()
                    .map(|(k, v)| (k.as_ref().to_string(), v.into()))
                    .collect();
                insert_row(&self.meta, &provided)
            })
            .collect::<StrataResult<Vec<_>>>()?;
        if prepared.is_empty() {
            return Ok(0);
        }
        bulk_insert(&self.meta, &self.table(), prepared, options, db)
            .instrument(query_span(&self.meta.table, "bulk_insert"))
            .await
    }

    /// Updates every matching row in one statement and returns the number
    /// of rows affected. `auto_now` fields are refreshed.
    pub async fn update<I, K, V>(&self, fields: I, db: &dyn DbExecutor) -> StrataResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut assignments: Vec<(String, Value)> = Vec::new();
        for (key, value) in fields {
            let field = self.meta.assignable_field(key.as_ref())?;
            assignments.push((field.name.clone(), value.into()));
        }
        for (name, value) in auto_now_assignments(&self.meta) {
            if !assignments.iter().any(|(n, _)| *n == name) {
                assignments.push((name, value));
            }
        }
        let (table, filter) = build_mutation(self, "update")?;
        if self.state.is_none || assignments.is_empty() {
            return Ok(0);
        }
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_update(
            &table,
            &to_columns(&self.meta, &assignments),
            &filter,
        );
        db.execute(&sql, &params)
            .instrument(query_span(&self.meta.table, "update"))
            .await
    }

    /// Deletes every matching row and returns the number deleted.
    pub async fn delete(&self, db: &dyn DbExecutor) -> StrataResult<u64> {
        let (table, filter) = build_mutation(self, "delete")?;
        if self.state.is_none {
            return Ok(0);
        }
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_delete(&table, &filter);
        db.execute(&sql, &params)
            .instrument(query_span(&self.meta.table, "delete"))
            .await
    }

    /// Fetches the row matching `lookup`, creating it from `lookup` and
    /// `defaults` when absent. Returns `(instance, created)`.
    pub async fn get_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
        db: &dyn DbExecutor,
    ) -> StrataResult<(Instance, bool)> {
        match self.get_by(Q::from_pairs(lookup.iter().cloned()), db).await {
            Ok(instance) => Ok((instance, false)),
            Err(StrataError::ObjectNotFound(_)) => {
                let created = self.create(merge(lookup, defaults), db).await?;
                Ok((created, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches the row matching `lookup` and applies `defaults` to it, or
    /// creates it from `lookup` overlaid with `defaults`.
    ///
    /// The lookup and the write are separate statements; wrap the call in a
    /// transaction with suitable isolation if concurrent creators matter.
    pub async fn update_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
        db: &dyn DbExecutor,
    ) -> StrataResult<(Instance, bool)> {
        match self.get_by(Q::from_pairs(lookup.iter().cloned()), db).await {
            Ok(mut instance) => {
                instance.update(db, defaults.iter().cloned()).await?;
                Ok((instance, false))
            }
            Err(StrataError::ObjectNotFound(_)) => {
                let created = self.create(merge(lookup, defaults), db).await?;
                Ok((created, true))
            }
            Err(e) => Err(e),
        }
    }
}

/// `lookup` overlaid with `defaults`, keeping first-seen key order.
fn merge(lookup: &[(&str, Value)], defaults: &[(&str, Value)]) -> Vec<(String, Value)> {
    let mut merged: Vec<(String, Value)> = lookup.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
    for (key, value) in defaults {
        match merged.iter_mut().find(|(k, _)| k.as_str() == *key) {
            Some(slot) => slot.1 = value.clone(),
            None => merged.push(((*key).to_string(), value.clone())),
        }
    }
    merged
}

impl Registry {
    /// A queryset over every row of `model`.
    pub fn query(&self, model: &str) -> StrataResult<QuerySet> {
        QuerySet::for_model(self, model)
    }
}

type BaseFn = dyn Fn(QuerySet) -> QuerySet + Send + Sync;

/// Hands out the base queryset of a model.
///
/// A manager built with [`with_base`](Manager::with_base) applies its hook
/// to every queryset it creates, e.g. to hide soft-deleted rows.
#[derive(Clone)]
pub struct Manager {
    registry: Registry,
    meta: Arc<ModelMeta>,
    base: Option<Arc<BaseFn>>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.meta.name)
            .field("custom_base", &self.base.is_some())
            .finish()
    }
}

impl Manager {
    pub fn new(registry: &Registry, model: &str) -> StrataResult<Self> {
        Ok(Self {
            registry: registry.clone(),
            meta: registry.model(model)?,
            base: None,
        })
    }

    #[must_use]
    pub fn with_base<F>(mut self, base: F) -> Self
    where
        F: Fn(QuerySet) -> QuerySet + Send + Sync + 'static,
    {
        self.base = Some(Arc::new(base));
        self
    }

    pub fn get_queryset(&self) -> QuerySet {
        let qs = QuerySet::new(&self.registry, Arc::clone(&self.meta));
        match &self.base {
            Some(base) => base(qs),
            None => qs,
        }
    }

    #[must_use]
    pub fn filter(&self, q: impl Into<Q>) -> QuerySet {
        self.get_queryset().filter(q)
    }

    pub async fn all(&self, db: &dyn DbExecutor) -> StrataResult<Vec<Instance>> {
        self.get_queryset().all(db).await
    }

    pub async fn create<I, K, V>(&self, fields: I, db: &dyn DbExecutor) -> StrataResult<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.get_queryset().create(fields, db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::{row, MockDb};
    use crate::model::tests::music_registry;

    fn tracks() -> QuerySet {
        music_registry().query("Track").unwrap()
    }

    fn album_row(id: i64, name: &str) -> crate::query::compiler::Row {
        row(&[("id", Value::Int(id)), ("name", name.into())])
    }

    #[test]
    fn test_chaining_does_not_mutate_base() {
        let base = tracks().filter(("album", 1));
        let a = base.clone().filter(("position__gt", 2));
        let b = base.clone().order_by(["title"]);
        assert_eq!(base.state.filters.len(), 1);
        assert_eq!(a.state.filters.len(), 2);
        assert!(a.state.order_by.is_empty());
        assert_eq!(b.state.order_by, vec!["title".to_string()]);
    }

    #[test]
    fn test_exclude_and_combinators() {
        let qs = tracks()
            .exclude(("title", "x"))
            .or_([Q::kw("position", 1), Q::kw("position", 2)]);
        let (sql, params) = qs.to_sql(DatabaseBackendType::SQLite).unwrap();
        assert!(sql.contains("WHERE (NOT (\"tracks\".\"title\" = ?) AND (\"tracks\".\"position\" = ? OR \"tracks\".\"position\" = ?))"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_using_overrides_schema() {
        let (sql, _) = tracks()
            .using("tenant_a")
            .select_related(["album"])
            .to_sql(DatabaseBackendType::PostgreSQL)
            .unwrap();
        assert!(sql.contains("FROM \"tenant_a\".\"tracks\""));
        assert!(sql.contains("INNER JOIN \"tenant_a\".\"albums\" AS \"album\""));
    }

    #[tokio::test]
    async fn test_get_cardinality() {
        let registry = music_registry();
        let albums = registry.query("Album").unwrap();
        let db = MockDb::new();

        db.push_rows(vec![]);
        let err = albums.get(db.as_ref()).await.unwrap_err();
        assert!(matches!(err, StrataError::ObjectNotFound(msg) if msg == "Album matching query does not exist."));

        db.push_rows(vec![album_row(1, "a"), album_row(2, "b")]);
        let err = albums.get(db.as_ref()).await.unwrap_err();
        assert!(matches!(err, StrataError::MultipleObjectsReturned(_)));

        db.push_rows(vec![album_row(1, "a")]);
        assert_eq!(albums.get(db.as_ref()).await.unwrap().pk(), &Value::Int(1));

        assert!(db.sql().iter().all(|s| s.ends_with("LIMIT 2")));
    }

    #[tokio::test]
    async fn test_compile_errors_never_reach_database() {
        let db = MockDb::new();
        assert!(tracks().filter(("bogus", 1)).all(db.as_ref()).await.is_err());
        assert!(tracks().limit(-3).count(db.as_ref()).await.is_err());
        assert!(tracks().limit(3).delete(db.as_ref()).await.is_err());
        assert!(tracks().update([("nope", 1)], db.as_ref()).await.is_err());
        assert!(db.sql().is_empty());
    }

    #[tokio::test]
    async fn test_none_skips_database() {
        let db = MockDb::new();
        let qs = tracks().none();
        assert!(qs.all(db.as_ref()).await.unwrap().is_empty());
        assert_eq!(qs.count(db.as_ref()).await.unwrap(), 0);
        assert!(!qs.exists(db.as_ref()).await.unwrap());
        assert_eq!(qs.delete(db.as_ref()).await.unwrap(), 0);
        assert!(db.sql().is_empty());
    }

    #[tokio::test]
    async fn test_count_and_exists_statements() {
        let db = MockDb::new();
        db.push_rows(vec![row(&[("count", Value::Int(4))])]);
        assert_eq!(tracks().count(db.as_ref()).await.unwrap(), 4);
        db.push_rows(vec![]);
        assert!(!tracks().filter(("title", "x")).exists(db.as_ref()).await.unwrap());
        let sql = db.sql();
        assert_eq!(sql[0], "SELECT COUNT(*) FROM \"tracks\"");
        assert!(sql[1].starts_with("SELECT 1 FROM \"tracks\" WHERE"));
    }

    #[tokio::test]
    async fn test_last_reverses_ordering() {
        let db = MockDb::new();
        tracks().order_by(["-position", "title"]).last(db.as_ref()).await.unwrap();
        tracks().last(db.as_ref()).await.unwrap();
        let sql = db.sql();
        assert!(sql[0].contains("ORDER BY \"tracks\".\"position\" ASC, \"tracks\".\"title\" DESC, \"tracks\".\"id\" ASC LIMIT 1"));
        assert!(sql[1].contains("ORDER BY \"tracks\".\"id\" DESC LIMIT 1"));
    }

    #[tokio::test]
    async fn test_update_and_delete_statements() {
        let db = MockDb::new();
        tracks().filter(("album__name", "Malibu")).update([("title", "x")], db.as_ref()).await.unwrap();
        tracks().filter(("album", 2)).delete(db.as_ref()).await.unwrap();
        let sql = db.sql();
        assert!(sql[0].starts_with("UPDATE \"tracks\" SET \"title\" = ? WHERE EXISTS (SELECT 1 FROM \"tracks\" AS \"U0\""));
        assert_eq!(sql[1], "DELETE FROM \"tracks\" WHERE \"tracks\".\"album\" = ?");
    }

    #[tokio::test]
    async fn test_values_validation() {
        let db = MockDb::new();
        let albums = music_registry().query("Album").unwrap();
        assert!(matches!(
            albums.values(&ValuesOptions::fields(["title"]), db.as_ref()).await,
            Err(StrataError::QuerySet(_))
        ));
        assert!(matches!(
            albums.values_json(&serde_json::json!("name"), db.as_ref()).await,
            Err(StrataError::QuerySet(_))
        ));
        assert!(matches!(
            albums.values_list(&["id", "name"], true, db.as_ref()).await,
            Err(StrataError::QuerySet(_))
        ));
        assert!(db.sql().is_empty());

        db.push_rows(vec![album_row(1, "Holland")]);
        let rows = albums
            .values_json(&serde_json::json!(["name"]), db.as_ref())
            .await
            .unwrap();
        assert_eq!(rows[0].get("name"), Some(&Value::from("Holland")));
        assert_eq!(rows[0].len(), 1);

        db.push_rows(vec![album_row(1, "Holland")]);
        let flat = albums.values_list(&["pk"], true, db.as_ref()).await.unwrap();
        assert_eq!(flat, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_update_or_create_paths() {
        let registry = music_registry();
        let albums = registry.query("Album").unwrap();
        let db = MockDb::new();

        db.push_rows(vec![]);
        let (created, was_created) = albums
            .update_or_create(&[("name", "Test".into())], &[("name", "Jane".into())], db.as_ref())
            .await
            .unwrap();
        assert!(was_created);
        assert_eq!(created.get("name"), Some(&Value::from("Jane")));

        db.push_rows(vec![album_row(1, "Jane")]);
        let (found, was_created) = albums
            .update_or_create(&[("name", "Jane".into())], &[("name", "June".into())], db.as_ref())
            .await
            .unwrap();
        assert!(!was_created);
        assert_eq!(found.get("name"), Some(&Value::from("June")));
        assert!(db.sql().last().unwrap().starts_with("UPDATE \"albums\" SET \"name\" = ?"));
    }

    #[test]
    fn test_manager_base_hook() {
        let registry = music_registry();
        let manager = Manager::new(&registry, "Track")
            .unwrap()
            .with_base(|qs| qs.filter(("position__gte", 1)));
        let (sql, _) = manager
            .filter(("title", "x"))
            .to_sql(DatabaseBackendType::SQLite)
            .unwrap();
        assert!(sql.contains("\"tracks\".\"position\" >= ?"));
        assert!(sql.contains("\"tracks\".\"title\" = ?"));
    }
}

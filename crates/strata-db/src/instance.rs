//! Model instances.
//!
//! An [`Instance`] is a row of one registered model: a map from field name to
//! [`Value`] validated against the model's descriptors on construction and on
//! every assignment. Forward relations are held as a two-state [`Related`]
//! handle. Reading a relation never performs I/O; loading is always an
//! explicit async call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};

use crate::executor::DbExecutor;
use crate::model::{ModelMeta, Registry};
use crate::query::bulk::{auto_now_assignments, insert_row, to_columns};
use crate::query::compiler::{
    ColumnRef, MutationFilter, SqlCompiler, TableRef, WhereNode,
};
use crate::query::lookups::{Lookup, Q};
use crate::query::queryset::QuerySet;
use crate::value::Value;

static NULL: Value = Value::Null;

/// A forward relation as seen from the instance holding the foreign key.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Only the primary key is known.
    Unloaded { model: String, pk: Value },
    Loaded(Box<Instance>),
}

impl Related {
    /// The related primary key; NULL when the foreign key is unset.
    pub fn pk(&self) -> &Value {
        match self {
            Self::Unloaded { pk, .. } => pk,
            Self::Loaded(instance) => instance.pk(),
        }
    }

    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Self::Loaded(instance) => Some(instance),
            Self::Unloaded { .. } => None,
        }
    }
}

/// One row of a registered model.
///
/// ```
/// use strata_db::{FieldDef, FieldType, Instance, ModelMeta, Registry, Value};
///
/// let registry = Registry::builder()
///     .model(
///         ModelMeta::builder("Album")
///             .field(FieldDef::new("name", FieldType::Char))
///             .build()
///             .unwrap(),
///     )
///     .build()
///     .unwrap();
///
/// let album = Instance::new(&registry, "Album", [("name", "Surfin' Safari")]).unwrap();
/// assert_eq!(album.get("name"), Some(&Value::from("Surfin' Safari")));
/// assert!(album.pk().is_null());
/// assert!(Instance::new(&registry, "Album", [("title", "x")]).is_err());
/// ```
#[derive(Clone)]
pub struct Instance {
    registry: Registry,
    meta: Arc<ModelMeta>,
    schema: Option<String>,
    values: BTreeMap<String, Value>,
    related: BTreeMap<String, Related>,
    prefetched: BTreeMap<String, Vec<Instance>>,
}

impl Instance {
    /// Builds an unsaved instance. Every key must name a column-backed
    /// field of `model`; `pk` addresses the primary key.
    pub fn new<I, K, V>(registry: &Registry, model: &str, pairs: I) -> StrataResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let meta = registry.model(model)?;
        let mut instance = Self::empty(registry.clone(), meta, registry.schema().map(str::to_string));
        for (key, value) in pairs {
            instance.set(key.as_ref(), value)?;
        }
        Ok(instance)
    }

    fn empty(registry: Registry, meta: Arc<ModelMeta>, schema: Option<String>) -> Self {
        Self {
            registry,
            meta,
            schema,
            values: BTreeMap::new(),
            related: BTreeMap::new(),
            prefetched: BTreeMap::new(),
        }
    }

    /// Builds an instance from column values read back from the database.
    pub(crate) fn from_db(
        registry: &Registry,
        meta: Arc<ModelMeta>,
        schema: Option<&str>,
        values: Vec<(String, Value)>,
    ) -> Self {
        let mut instance = Self::empty(registry.clone(), meta, schema.map(str::to_string));
        for (name, value) in values {
            instance.store(&name, value);
        }
        instance
    }

    /// Stores a value for a known concrete field, keeping the relation
    /// handle in step with the foreign key.
    fn store(&mut self, name: &str, value: Value) {
        let Some(field) = self.meta.field(name) else {
            return;
        };
        if let Some(target) = field.field_type.relation_target().filter(|_| field.field_type.is_forward_relation()) {
            self.related.insert(
                name.to_string(),
                Related::Unloaded {
                    model: target.to_string(),
                    pk: value.clone(),
                },
            );
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn meta(&self) -> &Arc<ModelMeta> {
        &self.meta
    }

    pub fn model_name(&self) -> &str {
        &self.meta.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The schema this instance was read from or will be written to.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub(crate) fn set_schema(&mut self, schema: Option<&str>) {
        self.schema = schema.map(str::to_string);
    }

    /// The primary key, NULL until saved.
    pub fn pk(&self) -> &Value {
        self.values.get(self.meta.pk_name()).unwrap_or(&NULL)
    }

    /// The value of a field; `None` when it was never set or selected.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(self.meta.canonical_name(name))
    }

    /// Assigns a field. Unknown names and many-to-many fields are rejected.
    /// Assigning a foreign key stores an unloaded handle.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> StrataResult<()> {
        let field_name = self.meta.assignable_field(name)?.name.clone();
        self.store(&field_name, value.into());
        Ok(())
    }

    /// Assigns a loaded instance to a forward relation.
    pub fn set_related(&mut self, name: &str, instance: Instance) -> StrataResult<()> {
        let field = self.meta.assignable_field(name)?;
        if field.field_type.relation_target() != Some(instance.model_name()) {
            return Err(StrataError::Value(format!(
                "Cannot assign {} to {}.{}",
                instance.model_name(),
                self.meta.name,
                field.name
            )));
        }
        let name = field.name.clone();
        self.values.insert(name.clone(), instance.pk().clone());
        self.related.insert(name, Related::Loaded(Box::new(instance)));
        Ok(())
    }

    /// The handle of a forward relation, if its key was set or selected.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    /// The rows attached by `prefetch_related` under `attr`.
    pub fn prefetched(&self, attr: &str) -> Option<&[Instance]> {
        self.prefetched.get(attr).map(Vec::as_slice)
    }

    pub(crate) fn set_prefetched(&mut self, attr: &str, rows: Vec<Instance>) {
        self.prefetched.insert(attr.to_string(), rows);
    }

    pub(crate) fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.related.get_mut(name)
    }

    pub fn field_values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Field values as a JSON object, with prefetched rows nested as arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.values {
            let rendered = match self.related.get(name) {
                Some(Related::Loaded(instance)) => instance.to_json(),
                _ => value.to_json(),
            };
            map.insert(name.clone(), rendered);
        }
        for (attr, rows) in &self.prefetched {
            map.insert(
                attr.clone(),
                serde_json::Value::Array(rows.iter().map(Self::to_json).collect()),
            );
        }
        serde_json::Value::Object(map)
    }

    fn table(&self) -> TableRef {
        TableRef::new(self.schema.as_deref(), &self.meta.table)
    }

    fn require_pk(&self, op: &str) -> StrataResult<Value> {
        let pk = self.pk();
        if pk.is_null() {
            return Err(StrataError::Value(format!(
                "{} instance needs a primary key to {op}",
                self.meta.name
            )));
        }
        Ok(pk.clone())
    }

    fn pk_filter(&self, pk: Value) -> MutationFilter {
        MutationFilter {
            joins: Vec::new(),
            where_clause: Some(WhereNode::Condition {
                column: ColumnRef::new(&self.meta.table, self.meta.pk_column()),
                lookup: Lookup::Exact,
                value: pk,
            }),
            pk_column: self.meta.pk_column().to_string(),
        }
    }

    /// A queryset over this instance's model, in this instance's schema.
    fn own_queryset(&self) -> QuerySet {
        QuerySet::new(&self.registry, Arc::clone(&self.meta)).with_schema(self.schema.clone())
    }

    /// Re-reads every column by primary key, replacing values in place.
    /// Loaded relations revert to unloaded handles.
    pub async fn load(&mut self, db: &dyn DbExecutor) -> StrataResult<()> {
        let pk = self.require_pk("load")?;
        let fresh = self
            .own_queryset()
            .filter(Q::compare("pk", Lookup::Exact, pk))
            .get(db)
            .await?;
        self.values = fresh.values;
        self.related = fresh.related;
        Ok(())
    }

    /// Assigns the given fields (plus `auto_now` fields) and writes only
    /// those columns.
    pub async fn update<I, K, V>(&mut self, db: &dyn DbExecutor, pairs: I) -> StrataResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let pk = self.require_pk("update")?;
        let mut changed = Vec::new();
        for (key, value) in pairs {
            let value = value.into();
            self.set(key.as_ref(), value.clone())?;
            let name = self.meta.canonical_name(key.as_ref()).to_string();
            changed.push((name, value));
        }
        for (name, value) in auto_now_assignments(&self.meta) {
            if !changed.iter().any(|(n, _)| *n == name) {
                self.store(&name, value.clone());
                changed.push((name, value));
            }
        }
        if changed.is_empty() {
            return Ok(0);
        }

        let compiler = SqlCompiler::new(db.backend_type());
        let (sql, params) =
            compiler.compile_update(&self.table(), &to_columns(&self.meta, &changed), &self.pk_filter(pk));
        tracing::debug!(model = %self.meta.name, "instance update");
        db.execute(&sql, &params).await
    }

    /// Deletes the row by primary key.
    pub async fn delete(&self, db: &dyn DbExecutor) -> StrataResult<u64> {
        let pk = self.require_pk("delete")?;
        let compiler = SqlCompiler::new(db.backend_type());
        let (sql, params) = compiler.compile_delete(&self.table(), &self.pk_filter(pk));
        tracing::debug!(model = %self.meta.name, "instance delete");
        db.execute(&sql, &params).await
    }

    /// Inserts the instance when its primary key is unset, otherwise writes
    /// every column.
    pub async fn save(&mut self, db: &dyn DbExecutor) -> StrataResult<()> {
        if self.pk().is_null() {
            return self.insert(db).await;
        }
        let pairs: Vec<(String, Value)> = self
            .meta
            .concrete_fields()
            .filter(|f| !f.primary_key)
            .filter_map(|f| self.values.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect();
        self.update(db, pairs).await.map(|_| ())
    }

    /// Inserts a new row, filling defaults and the assigned primary key.
    pub(crate) async fn insert(&mut self, db: &dyn DbExecutor) -> StrataResult<()> {
        let row = insert_row(&self.meta, &self.values)?;
        let pk_name = self.meta.pk_name().to_string();
        let needs_key = !row.iter().any(|(n, _)| *n == pk_name);

        let compiler = SqlCompiler::new(db.backend_type());
        let columns = to_columns(&self.meta, &row);
        let names: Vec<String> = columns.iter().map(|(c, _)| c.clone()).collect();
        let values = vec![columns.into_iter().map(|(_, v)| v).collect::<Vec<_>>()];
        let returning = needs_key.then(|| self.meta.pk_column());
        let (sql, params) = compiler.compile_insert(&self.table(), &names, &values, returning);
        tracing::debug!(model = %self.meta.name, "instance insert");

        for (name, value) in row {
            self.store(&name, value);
        }
        if needs_key {
            let pk = db.insert_returning_id(&sql, &params).await?;
            self.store(&pk_name, pk);
        } else {
            db.execute(&sql, &params).await?;
        }
        Ok(())
    }

    /// Fetches a forward relation and replaces its handle with the loaded
    /// row. A NULL foreign key loads nothing.
    pub async fn load_related(&mut self, db: &dyn DbExecutor, name: &str) -> StrataResult<Option<&Instance>> {
        let pending = match self.related.get(name) {
            None => {
                return Err(StrataError::RelationResolution(format!(
                    "'{name}' is not a foreign key of {}",
                    self.meta.name
                )))
            }
            Some(Related::Loaded(_)) => None,
            Some(Related::Unloaded { model, pk }) => Some((model.clone(), pk.clone())),
        };
        let Some((model, pk)) = pending else {
            return Ok(self.related.get(name).and_then(Related::instance));
        };
        if pk.is_null() {
            return Ok(None);
        }
        let target = self.registry.model(&model)?;
        let loaded = QuerySet::new(&self.registry, target)
            .with_schema(self.schema.clone())
            .filter(Q::compare("pk", Lookup::Exact, pk))
            .get(db)
            .await?;
        if let Some(slot) = self.related_mut(name) {
            *slot = Related::Loaded(Box::new(loaded));
        }
        Ok(self.related.get(name).and_then(Related::instance))
    }

    /// A queryset over the rows on the far side of a reverse or
    /// many-to-many relation, filtered to this instance.
    pub fn related_set(&self, name: &str) -> StrataResult<QuerySet> {
        let rel = self.meta.relation(name).ok_or_else(|| {
            StrataError::RelationResolution(format!("{} has no relation '{name}'", self.meta.name))
        })?;
        if rel.is_forward() {
            return Err(StrataError::RelationResolution(format!(
                "'{name}' on {} is a forward relation; use load_related",
                self.meta.name
            )));
        }
        if rel.reverse_name == "+" {
            return Err(StrataError::RelationResolution(format!(
                "'{name}' on {} has no reverse accessor to filter by",
                self.meta.name
            )));
        }
        let pk = self.require_pk("query its relations")?;
        let target = self.registry.model(&rel.target)?;
        Ok(QuerySet::new(&self.registry, target)
            .with_schema(self.schema.clone())
            .filter(Q::compare(rel.reverse_name.clone(), Lookup::Exact, pk)))
    }

    /// Links `other` through a many-to-many relation.
    pub async fn add_related(&self, db: &dyn DbExecutor, name: &str, other: impl Into<Value>) -> StrataResult<()> {
        let (table, source, target) = self.through(name)?;
        let pk = self.require_pk("add relations")?;
        let compiler = SqlCompiler::new(db.backend_type());
        let (sql, params) = compiler.compile_insert(&table, &[source, target], &[vec![pk, other.into()]], None);
        db.execute(&sql, &params).await.map(|_| ())
    }

    /// Unlinks `other` from a many-to-many relation.
    pub async fn remove_related(&self, db: &dyn DbExecutor, name: &str, other: impl Into<Value>) -> StrataResult<u64> {
        let (table, source, target) = self.through(name)?;
        let pk = self.require_pk("remove relations")?;
        let compiler = SqlCompiler::new(db.backend_type());
        let filter = MutationFilter {
            joins: Vec::new(),
            where_clause: Some(WhereNode::And(vec![
                WhereNode::Condition {
                    column: ColumnRef::new(&table.table, source),
                    lookup: Lookup::Exact,
                    value: pk,
                },
                WhereNode::Condition {
                    column: ColumnRef::new(&table.table, target),
                    lookup: Lookup::Exact,
                    value: other.into(),
                },
            ])),
            pk_column: String::new(),
        };
        let (sql, params) = compiler.compile_delete(&table, &filter);
        db.execute(&sql, &params).await
    }

    fn through(&self, name: &str) -> StrataResult<(TableRef, String, String)> {
        let through = self
            .meta
            .relation(name)
            .and_then(|r| r.through.as_ref())
            .ok_or_else(|| {
                StrataError::RelationResolution(format!(
                    "'{name}' on {} is not a many-to-many relation",
                    self.meta.name
                ))
            })?;
        Ok((
            TableRef::new(self.schema.as_deref(), &through.table),
            through.source_column.clone(),
            through.target_column.clone(),
        ))
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.meta.name == other.meta.name && self.values == other.values
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&self.meta.name)
            .field("values", &self.values)
            .field("related", &self.related)
            .field("prefetched", &self.prefetched.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}={})", self.meta.name, self.meta.pk_name(), self.pk())
    }
}

impl From<&Instance> for Value {
    fn from(instance: &Instance) -> Self {
        instance.pk().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::{row, MockDb};
    use crate::model::tests::music_registry;

    #[test]
    fn test_new_validates_keys() {
        let registry = music_registry();
        let track = Instance::new(&registry, "Track", [("title", Value::from("Kokomo")), ("album", Value::Int(3))]).unwrap();
        assert_eq!(track.related("album").unwrap().pk(), &Value::Int(3));
        assert!(!track.related("album").unwrap().is_loaded());

        let err = Instance::new(&registry, "Track", [("artist", "x")]).unwrap_err();
        assert!(matches!(err, StrataError::FieldLookup(msg) if msg.contains("artist")));

        let err = Instance::new(&registry, "Track", [("tags", Value::Int(1))]).unwrap_err();
        assert!(matches!(err, StrataError::Value(_)));

        let by_alias = Instance::new(&registry, "Album", [("pk", 5)]).unwrap();
        assert_eq!(by_alias.pk(), &Value::Int(5));
    }

    #[test]
    fn test_set_related_checks_target() {
        let registry = music_registry();
        let album = Instance::new(&registry, "Album", [("id", Value::Int(1)), ("name", "Malibu".into())]).unwrap();
        let tag = Instance::new(&registry, "Tag", [("id", 1)]).unwrap();
        let mut track = Instance::new(&registry, "Track", [("title", "Kokomo")]).unwrap();

        assert!(track.set_related("album", tag).is_err());
        track.set_related("album", album.clone()).unwrap();
        assert_eq!(track.get("album"), Some(&Value::Int(1)));
        assert_eq!(track.related("album").unwrap().instance(), Some(&album));

        track.set("album", 2).unwrap();
        assert!(!track.related("album").unwrap().is_loaded());
    }

    #[test]
    fn test_display_and_eq() {
        let registry = music_registry();
        let a = Instance::new(&registry, "Album", [("id", 1)]).unwrap();
        let b = Instance::new(&registry, "Album", [("pk", 1)]).unwrap();
        assert_eq!(a.to_string(), "Album(id=1)");
        assert_eq!(a, b);
        assert_eq!(Value::from(&a), Value::Int(1));
    }

    #[tokio::test]
    async fn test_save_inserts_then_updates() {
        let registry = music_registry();
        let db = MockDb::new();
        let mut album = Instance::new(&registry, "Album", [("name", "Pet Sounds")]).unwrap();
        album.save(db.as_ref()).await.unwrap();
        assert_eq!(album.pk(), &Value::Int(1));

        album.set("name", "Smile").unwrap();
        album.save(db.as_ref()).await.unwrap();
        let sql = db.sql();
        assert_eq!(sql[0], "INSERT INTO \"albums\" (\"name\") VALUES (?)");
        assert_eq!(sql[1], "UPDATE \"albums\" SET \"name\" = ? WHERE \"albums\".\"id\" = ?");
        assert_eq!(db.params(1), vec![Value::from("Smile"), Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_delete_requires_pk() {
        let registry = music_registry();
        let db = MockDb::new();
        let album = Instance::new(&registry, "Album", [("name", "x")]).unwrap();
        assert!(matches!(album.delete(db.as_ref()).await, Err(StrataError::Value(_))));
        assert!(db.sql().is_empty());
    }

    #[tokio::test]
    async fn test_load_related_replaces_stub() {
        let registry = music_registry();
        let db = MockDb::new();
        db.push_rows(vec![row(&[("id", Value::Int(4)), ("name", "Holland".into())])]);
        let mut track = Instance::new(&registry, "Track", [("id", Value::Int(1)), ("album", Value::Int(4))]).unwrap();

        let album = track.load_related(db.as_ref(), "album").await.unwrap().unwrap();
        assert_eq!(album.get("name"), Some(&Value::from("Holland")));
        assert!(track.related("album").unwrap().is_loaded());

        // Already loaded: no further query.
        track.load_related(db.as_ref(), "album").await.unwrap();
        assert_eq!(db.sql().len(), 1);
    }

    #[test]
    fn test_related_set_filters_by_reverse_accessor() {
        let registry = music_registry();
        let album = Instance::new(&registry, "Album", [("id", 7)]).unwrap();
        let tracks = album.related_set("tracks").unwrap();
        let (sql, params) = tracks.to_sql(crate::DatabaseBackendType::SQLite).unwrap();
        assert!(sql.contains("WHERE \"tracks\".\"album\" = ?"));
        assert_eq!(params, vec![Value::Int(7)]);

        let track = Instance::new(&registry, "Track", [("id", 2)]).unwrap();
        let (sql, _) = track
            .related_set("tags")
            .unwrap()
            .to_sql(crate::DatabaseBackendType::SQLite)
            .unwrap();
        assert!(sql.contains("LEFT JOIN \"tracks_tags\" AS \"tracks__through\""));
        assert!(track.related_set("album").is_err());
    }

    #[tokio::test]
    async fn test_m2m_add_and_remove() {
        let registry = music_registry();
        let db = MockDb::new();
        let track = Instance::new(&registry, "Track", [("id", 2)]).unwrap();
        track.add_related(db.as_ref(), "tags", 9).await.unwrap();
        track.remove_related(db.as_ref(), "tags", 9).await.unwrap();
        let sql = db.sql();
        assert_eq!(sql[0], "INSERT INTO \"tracks_tags\" (\"track\", \"tag\") VALUES (?, ?)");
        assert_eq!(
            sql[1],
            "DELETE FROM \"tracks_tags\" WHERE (\"tracks_tags\".\"track\" = ? AND \"tracks_tags\".\"tag\" = ?)"
        );
    }
}

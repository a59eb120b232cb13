//! Model metadata and the model registry.
//!
//! Models are declared with [`ModelMeta::builder`] and frozen into a
//! [`Registry`]. Building the registry resolves every relation target, derives
//! the reverse accessors on related models, and synthesizes join tables for
//! many-to-many fields. After that the schema is immutable and cheap to share.
//!
//! ```
//! use strata_db::{FieldDef, FieldType, ModelMeta, Registry};
//!
//! let registry = Registry::builder()
//!     .model(
//!         ModelMeta::builder("Album")
//!             .field(FieldDef::new("name", FieldType::Char).max_length(100))
//!             .build()
//!             .unwrap(),
//!     )
//!     .model(
//!         ModelMeta::builder("Track")
//!             .field(FieldDef::foreign_key("album", "Album").related_name("tracks"))
//!             .field(FieldDef::new("title", FieldType::Char).max_length(100))
//!             .build()
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let album = registry.model("Album").unwrap();
//! assert_eq!(album.table, "albums");
//! assert!(album.relation("tracks").is_some());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};

use crate::fields::{FieldDef, FieldType};

/// The shape of a relation as seen from the model that owns the accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ForeignKey,
    OneToOne,
    /// The many side of someone else's foreign key.
    ReverseForeignKey,
    ReverseOneToOne,
    ManyToMany,
    /// The other end of a many-to-many field declared on the target.
    ReverseManyToMany,
}

/// The join table behind a many-to-many relation, oriented from the owning
/// model towards the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub model: String,
    pub table: String,
    /// Column on the join table referencing the owning model.
    pub source_column: String,
    /// Column on the join table referencing the target model.
    pub target_column: String,
}

/// A resolved relation accessor on a model.
///
/// Forward relations compare `local_column` on this table with
/// `remote_column` (the target primary key). Reverse relations compare this
/// table's primary key with the target's foreign key column. Many-to-many
/// relations go through [`Through`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub nullable: bool,
    pub local_column: String,
    pub remote_column: String,
    pub through: Option<Through>,
    /// The accessor on the target leading back here, or `"+"` when hidden.
    pub reverse_name: String,
}

impl Relation {
    /// `true` when following the relation yields a collection.
    pub const fn is_multi_valued(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ReverseForeignKey
                | RelationKind::ManyToMany
                | RelationKind::ReverseManyToMany
        )
    }

    /// `true` when the accessor was derived from a field on another model.
    pub const fn is_reverse(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ReverseForeignKey
                | RelationKind::ReverseOneToOne
                | RelationKind::ReverseManyToMany
        )
    }

    /// `true` when the relation is stored as a column on the owning table.
    pub const fn is_forward(&self) -> bool {
        matches!(self.kind, RelationKind::ForeignKey | RelationKind::OneToOne)
    }
}

/// Static description of one model: its table, fields, and relations.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    pub name: String,
    pub table: String,
    /// Declared fields; the primary key is always present.
    pub fields: Vec<FieldDef>,
    /// Filled in by [`Registry`]; empty on a freshly built meta.
    pub relations: Vec<Relation>,
    pub unique_together: Vec<Vec<String>>,
    /// Synthesized join table for a many-to-many field.
    pub auto_created: bool,
}

impl ModelMeta {
    pub fn builder(name: impl Into<String>) -> ModelMetaBuilder {
        ModelMetaBuilder {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            unique_together: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn pk_field(&self) -> &FieldDef {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .unwrap_or(&self.fields[0])
    }

    pub fn pk_name(&self) -> &str {
        &self.pk_field().name
    }

    pub fn pk_column(&self) -> &str {
        &self.pk_field().column
    }

    /// Fields stored as columns on this table, in declaration order.
    pub fn concrete_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_concrete())
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Maps the `pk` alias to the primary key field name.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        if name == "pk" {
            self.pk_name()
        } else {
            name
        }
    }

    /// The column-backed field a caller may assign, accepting the `pk` alias.
    ///
    /// Unknown names fail with `FieldLookup`; many-to-many fields, which have
    /// no column, fail with `Value`.
    pub fn assignable_field(&self, name: &str) -> StrataResult<&FieldDef> {
        let field = self.field(self.canonical_name(name)).ok_or_else(|| {
            StrataError::FieldLookup(format!("Invalid keyword '{name}' for {}", self.name))
        })?;
        if !field.is_concrete() {
            return Err(StrataError::Value(format!(
                "Many-to-many field '{name}' on {} cannot be assigned directly",
                self.name
            )));
        }
        Ok(field)
    }

    /// `true` when the model has no columns besides its primary key.
    pub fn is_empty(&self) -> bool {
        self.concrete_fields().all(|f| f.primary_key)
    }
}

/// Builder for [`ModelMeta`].
#[derive(Debug)]
pub struct ModelMetaBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    unique_together: Vec<Vec<String>>,
}

impl ModelMetaBuilder {
    /// Overrides the default table name (`{lowercase model name}s`).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique_together<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_together
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Validates the declaration. A model without an explicit primary key
    /// gets an auto-incrementing `id`.
    pub fn build(self) -> StrataResult<ModelMeta> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name == "pk" {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "'pk' is reserved and cannot be declared on {}",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "Field '{}' is declared twice on {}",
                    field.name, self.name
                )));
            }
        }

        let mut fields = self.fields;
        match fields.iter().filter(|f| f.primary_key).count() {
            0 => {
                if fields.iter().any(|f| f.name == "id") {
                    return Err(StrataError::ImproperlyConfigured(format!(
                        "{} declares 'id' without marking a primary key",
                        self.name
                    )));
                }
                fields.insert(0, FieldDef::auto("id"));
            }
            1 => {}
            _ => {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "{} declares more than one primary key",
                    self.name
                )))
            }
        }

        for group in &self.unique_together {
            if let Some(missing) = group.iter().find(|n| !fields.iter().any(|f| &f.name == *n)) {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "unique_together on {} names unknown field '{missing}'",
                    self.name
                )));
            }
        }

        let table = self
            .table
            .unwrap_or_else(|| format!("{}s", self.name.to_lowercase()));

        Ok(ModelMeta {
            name: self.name,
            table,
            fields,
            relations: Vec::new(),
            unique_together: self.unique_together,
            auto_created: false,
        })
    }
}

/// The frozen set of models an application queries.
///
/// Cloning a registry clones an `Arc`.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    models: BTreeMap<String, Arc<ModelMeta>>,
    schema: Option<String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.inner.models.keys().collect::<Vec<_>>())
            .field("schema", &self.inner.schema)
            .finish()
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a model by name.
    pub fn model(&self, name: &str) -> StrataResult<Arc<ModelMeta>> {
        self.inner
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::ImproperlyConfigured(format!("Unknown model '{name}'")))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelMeta>> {
        self.inner.models.values()
    }

    /// The default schema applied to every query, if any.
    pub fn schema(&self) -> Option<&str> {
        self.inner.schema.as_deref()
    }

    /// Models ordered so every foreign key target precedes the models that
    /// reference it. Self references and cycles fall back to name order.
    pub fn models_in_dependency_order(&self) -> Vec<Arc<ModelMeta>> {
        let mut ordered: Vec<Arc<ModelMeta>> = Vec::new();
        let mut placed: HashSet<String> = HashSet::new();
        let mut pending: Vec<&Arc<ModelMeta>> = self.inner.models.values().collect();

        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|meta| {
                let ready = meta
                    .relations
                    .iter()
                    .filter(|r| r.is_forward() && r.target != meta.name)
                    .all(|r| placed.contains(&r.target));
                if ready {
                    placed.insert(meta.name.clone());
                    ordered.push(Arc::clone(meta));
                }
                !ready
            });
            if pending.len() == before {
                ordered.extend(pending.drain(..).cloned());
            }
        }
        ordered
    }
}

/// Collects model declarations and resolves them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelMeta>,
    schema: Option<String>,
}

impl RegistryBuilder {
    pub fn model(mut self, meta: ModelMeta) -> Self {
        self.models.push(meta);
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn build(self) -> StrataResult<Registry> {
        let mut models: BTreeMap<String, ModelMeta> = BTreeMap::new();
        for meta in self.models {
            if models.contains_key(&meta.name) {
                return Err(StrataError::ImproperlyConfigured(format!(
                    "Model '{}' is registered twice",
                    meta.name
                )));
            }
            models.insert(meta.name.clone(), meta);
        }

        synthesize_through_models(&mut models)?;

        let mut relations: HashMap<String, Vec<Relation>> = HashMap::new();
        for meta in models.values() {
            for field in &meta.fields {
                match &field.field_type {
                    FieldType::ForeignKey { to, .. } | FieldType::OneToOne { to, .. } => {
                        let target = lookup(&models, to, meta, field)?;
                        add_forward_relation(&mut relations, meta, field, target);
                    }
                    FieldType::ManyToMany { to, through, .. } => {
                        let target = lookup(&models, to, meta, field)?;
                        let through_name = through
                            .clone()
                            .unwrap_or_else(|| through_model_name(meta, field));
                        let through_meta = models.get(&through_name).ok_or_else(|| {
                            StrataError::ImproperlyConfigured(format!(
                                "{}.{} uses unknown through model '{through_name}'",
                                meta.name, field.name
                            ))
                        })?;
                        add_many_to_many(&mut relations, meta, field, target, through_meta)?;
                    }
                    _ => {}
                }
            }
        }

        let mut frozen = BTreeMap::new();
        for (name, mut meta) in models {
            let rels = relations.remove(&name).unwrap_or_default();
            for rel in &rels {
                let clashes_with_field = rel.is_reverse() && meta.field(&rel.name).is_some();
                let duplicated = rels.iter().filter(|r| r.name == rel.name).count() > 1;
                if clashes_with_field || duplicated {
                    return Err(StrataError::ImproperlyConfigured(format!(
                        "Reverse accessor '{}' on {} clashes with another field; set related_name",
                        rel.name, meta.name
                    )));
                }
            }
            meta.relations = rels;
            frozen.insert(name, Arc::new(meta));
        }

        Ok(Registry {
            inner: Arc::new(RegistryInner {
                models: frozen,
                schema: self.schema,
            }),
        })
    }
}

fn lookup<'a>(
    models: &'a BTreeMap<String, ModelMeta>,
    to: &str,
    meta: &ModelMeta,
    field: &FieldDef,
) -> StrataResult<&'a ModelMeta> {
    models.get(to).ok_or_else(|| {
        StrataError::ImproperlyConfigured(format!(
            "{}.{} points to unknown model '{to}'",
            meta.name, field.name
        ))
    })
}

fn default_reverse_name(meta: &ModelMeta) -> String {
    format!("{}s_set", meta.name.to_lowercase())
}

fn through_model_name(meta: &ModelMeta, field: &FieldDef) -> String {
    format!("{}_{}", meta.name, field.name)
}

/// Adds a join model for every many-to-many field declared without one.
fn synthesize_through_models(models: &mut BTreeMap<String, ModelMeta>) -> StrataResult<()> {
    let mut synthesized = Vec::new();
    for meta in models.values() {
        for field in &meta.fields {
            let FieldType::ManyToMany { to, through: None, .. } = &field.field_type else {
                continue;
            };
            let source = meta.name.to_lowercase();
            let target = to.to_lowercase();
            let (source_field, target_field) = if source == target {
                (format!("from_{source}"), format!("to_{target}"))
            } else {
                (source, target)
            };
            let through = ModelMeta::builder(through_model_name(meta, field))
                .table(format!("{}_{}", meta.table, field.name))
                .field(FieldDef::foreign_key(&source_field, &meta.name).related_name("+"))
                .field(FieldDef::foreign_key(&target_field, to.as_str()).related_name("+"))
                .unique_together([source_field.clone(), target_field.clone()])
                .build()?;
            synthesized.push(ModelMeta {
                auto_created: true,
                ..through
            });
        }
    }
    for meta in synthesized {
        if models.contains_key(&meta.name) {
            return Err(StrataError::ImproperlyConfigured(format!(
                "Model name '{}' is reserved for a many-to-many join table",
                meta.name
            )));
        }
        models.insert(meta.name.clone(), meta);
    }
    Ok(())
}

fn add_forward_relation(
    relations: &mut HashMap<String, Vec<Relation>>,
    meta: &ModelMeta,
    field: &FieldDef,
    target: &ModelMeta,
) {
    let one_to_one = matches!(field.field_type, FieldType::OneToOne { .. });
    let reverse_name = field
        .field_type
        .related_name()
        .map_or_else(|| default_reverse_name(meta), str::to_string);

    relations.entry(meta.name.clone()).or_default().push(Relation {
        name: field.name.clone(),
        kind: if one_to_one {
            RelationKind::OneToOne
        } else {
            RelationKind::ForeignKey
        },
        target: target.name.clone(),
        nullable: field.null,
        local_column: field.column.clone(),
        remote_column: target.pk_column().to_string(),
        through: None,
        reverse_name: reverse_name.clone(),
    });

    if reverse_name == "+" {
        return;
    }
    relations.entry(target.name.clone()).or_default().push(Relation {
        name: reverse_name,
        kind: if one_to_one {
            RelationKind::ReverseOneToOne
        } else {
            RelationKind::ReverseForeignKey
        },
        target: meta.name.clone(),
        nullable: true,
        local_column: target.pk_column().to_string(),
        remote_column: field.column.clone(),
        through: None,
        reverse_name: field.name.clone(),
    });
}

fn add_many_to_many(
    relations: &mut HashMap<String, Vec<Relation>>,
    meta: &ModelMeta,
    field: &FieldDef,
    target: &ModelMeta,
    through: &ModelMeta,
) -> StrataResult<()> {
    let fks: Vec<&FieldDef> = through
        .fields
        .iter()
        .filter(|f| f.field_type.is_forward_relation())
        .collect();
    let source_fk = fks
        .iter()
        .find(|f| f.field_type.relation_target() == Some(meta.name.as_str()));
    let target_fk = fks.iter().rev().find(|f| {
        f.field_type.relation_target() == Some(target.name.as_str())
            && source_fk.map_or(true, |s| s.name != f.name)
    });
    let (Some(source_fk), Some(target_fk)) = (source_fk, target_fk) else {
        return Err(StrataError::ImproperlyConfigured(format!(
            "Through model '{}' needs foreign keys to both {} and {}",
            through.name, meta.name, target.name
        )));
    };

    let reverse_name = field
        .field_type
        .related_name()
        .map_or_else(|| default_reverse_name(meta), str::to_string);

    relations.entry(meta.name.clone()).or_default().push(Relation {
        name: field.name.clone(),
        kind: RelationKind::ManyToMany,
        target: target.name.clone(),
        nullable: true,
        local_column: meta.pk_column().to_string(),
        remote_column: target.pk_column().to_string(),
        through: Some(Through {
            model: through.name.clone(),
            table: through.table.clone(),
            source_column: source_fk.column.clone(),
            target_column: target_fk.column.clone(),
        }),
        reverse_name: reverse_name.clone(),
    });

    if reverse_name == "+" {
        return Ok(());
    }
    relations.entry(target.name.clone()).or_default().push(Relation {
        name: reverse_name,
        kind: RelationKind::ReverseManyToMany,
        target: meta.name.clone(),
        nullable: true,
        local_column: target.pk_column().to_string(),
        remote_column: meta.pk_column().to_string(),
        through: Some(Through {
            model: through.name.clone(),
            table: through.table.clone(),
            source_column: target_fk.column.clone(),
            target_column: source_fk.column.clone(),
        }),
        reverse_name: field.name.clone(),
    });
    Ok(())
}

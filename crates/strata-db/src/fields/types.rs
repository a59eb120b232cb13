//! Field descriptors.
//!
//! A [`FieldDef`] describes one declared field of a model: its column, its
//! [`FieldType`], nullability, and how a value is produced when the caller
//! leaves it out. Relation fields carry their target model by name; the
//! [`Registry`](crate::model::Registry) resolves targets when it is built.

use crate::value::Value;

/// The type of a model field.
///
/// Scalar variants only matter for hydration and DDL. Relation variants drive
/// join synthesis and prefetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Auto-incrementing integer primary key.
    Auto,
    Integer,
    BigInteger,
    Float,
    Boolean,
    /// Bounded string; the bound lives in [`FieldDef::max_length`].
    Char,
    Text,
    Date,
    DateTime,
    Time,
    Uuid,
    Json,
    Binary,
    /// Many-to-one relation stored as a column holding the target's primary key.
    ForeignKey {
        to: String,
        on_delete: OnDelete,
        related_name: Option<String>,
    },
    /// A foreign key with a uniqueness guarantee.
    OneToOne {
        to: String,
        on_delete: OnDelete,
        related_name: Option<String>,
    },
    /// Many-to-many relation through a join table. When `through` is `None`
    /// the registry synthesizes the join model.
    ManyToMany {
        to: String,
        through: Option<String>,
        related_name: Option<String>,
    },
}

impl FieldType {
    /// The target model name of a relation field.
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { to, .. } | Self::OneToOne { to, .. } | Self::ManyToMany { to, .. } => {
                Some(to)
            }
            _ => None,
        }
    }

    /// The explicit reverse accessor name, if one was declared.
    pub fn related_name(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { related_name, .. }
            | Self::OneToOne { related_name, .. }
            | Self::ManyToMany { related_name, .. } => related_name.as_deref(),
            _ => None,
        }
    }

    /// `true` for relations stored as a column on the declaring table.
    pub const fn is_forward_relation(&self) -> bool {
        matches!(self, Self::ForeignKey { .. } | Self::OneToOne { .. })
    }
}

/// What happens to referencing rows when the referenced row is deleted.
///
/// Carried as metadata for DDL; the query layer does not emulate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    DoNothing,
}

impl OnDelete {
    /// The SQL referential action keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::DoNothing => "NO ACTION",
        }
    }
}

/// A value applied when a create omits the field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    /// A constant.
    Value(Value),
    /// Evaluated once per inserted row.
    Callable(fn() -> Value),
}

/// Metadata about a single model field.
///
/// ```
/// use strata_db::{FieldDef, FieldType};
///
/// let field = FieldDef::new("name", FieldType::Char).max_length(100).nullable();
/// assert_eq!(field.column, "name");
/// assert!(field.null);
///
/// let album = FieldDef::foreign_key("album", "Album").related_name("tracks");
/// assert_eq!(album.column, "album");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Column name; defaults to the field name.
    pub column: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub null: bool,
    pub unique: bool,
    pub max_length: Option<usize>,
    pub default: Option<FieldDefault>,
    /// Set to the current time on every insert and update.
    pub auto_now: bool,
    /// Set to the current time on insert only.
    pub auto_now_add: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            field_type,
            primary_key: false,
            null: false,
            unique: false,
            max_length: None,
            default: None,
            auto_now: false,
            auto_now_add: false,
        }
    }

    /// An auto-incrementing primary key named `name`.
    pub fn auto(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Auto).primary_key()
    }

    /// A foreign key to `to` with `CASCADE` semantics.
    pub fn foreign_key(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ForeignKey {
                to: to.into(),
                on_delete: OnDelete::Cascade,
                related_name: None,
            },
        )
    }

    /// A one-to-one relation to `to`.
    pub fn one_to_one(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::OneToOne {
                to: to.into(),
                on_delete: OnDelete::Cascade,
                related_name: None,
            },
        )
        .unique()
    }

    /// A many-to-many relation to `to` through a synthesized join table.
    pub fn many_to_many(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ManyToMany {
                to: to.into(),
                through: None,
                related_name: None,
            },
        )
    }

    /// Sets the database column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// A default evaluated per row, e.g. a fresh UUID.
    pub fn default_fn(mut self, f: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Callable(f));
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    /// Sets the reverse accessor name on the relation target.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey { related_name, .. }
            | FieldType::OneToOne { related_name, .. }
            | FieldType::ManyToMany { related_name, .. } => *related_name = Some(name.into()),
            _ => {}
        }
        self
    }

    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let FieldType::ForeignKey { on_delete, .. } | FieldType::OneToOne { on_delete, .. } =
            &mut self.field_type
        {
            *on_delete = policy;
        }
        self
    }

    /// Uses an explicitly registered model as the many-to-many join table.
    pub fn through(mut self, model: impl Into<String>) -> Self {
        if let FieldType::ManyToMany { through, .. } = &mut self.field_type {
            *through = Some(model.into());
        }
        self
    }

    /// `true` when the field maps to a column on the declaring table.
    pub const fn is_concrete(&self) -> bool {
        !matches!(self.field_type, FieldType::ManyToMany { .. })
    }

    pub const fn is_relation(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::ForeignKey { .. } | FieldType::OneToOne { .. } | FieldType::ManyToMany { .. }
        )
    }

    /// `true` when the database assigns the value (auto-increment keys).
    pub const fn is_auto(&self) -> bool {
        matches!(self.field_type, FieldType::Auto)
    }

    /// The value to insert when a create omits this field, if any.
    pub fn value_on_insert(&self) -> Option<Value> {
        if self.auto_now || self.auto_now_add {
            return Some(now());
        }
        match &self.default {
            Some(FieldDefault::Value(v)) => Some(v.clone()),
            Some(FieldDefault::Callable(f)) => Some(f()),
            None if self.null && !self.is_auto() => Some(Value::Null),
            None => None,
        }
    }
}

/// The timestamp written to `auto_now` and `auto_now_add` fields.
pub fn now() -> Value {
    Value::DateTime(chrono::Utc::now().naive_utc())
}

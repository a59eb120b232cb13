//! Relationship resolution.
//!
//! A [`JoinPlan`] walks `__`-separated paths from a base model through its
//! relations and records one join per distinct relationship path. The alias of
//! a joined table is its path (`team__org`), so the same path always maps to
//! the same alias in one statement and two paths reaching the same table
//! (self references, multi-hop chains) never share one.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};

use crate::model::{ModelMeta, Registry, Relation};
use crate::query::compiler::{ColumnRef, Join, JoinType, TableRef};

#[derive(Debug, Clone)]
struct PathEntry {
    alias: String,
    meta: Arc<ModelMeta>,
    /// Reached through at least one LEFT join.
    outer: bool,
}

/// The joins required by one statement, keyed by relationship path.
#[derive(Debug)]
pub struct JoinPlan<'r> {
    registry: &'r Registry,
    schema: Option<String>,
    base: PathEntry,
    joins: Vec<Join>,
    by_path: HashMap<String, PathEntry>,
    through_aliases: HashMap<String, String>,
    /// Names no join may use, such as the outer table of a correlated
    /// subquery.
    reserved: Vec<String>,
}

impl<'r> JoinPlan<'r> {
    /// Starts a plan rooted at `base`, whose columns are qualified with
    /// `base_alias`.
    pub fn new(
        registry: &'r Registry,
        base: Arc<ModelMeta>,
        base_alias: impl Into<String>,
        schema: Option<&str>,
    ) -> Self {
        Self {
            registry,
            schema: schema.map(str::to_string),
            base: PathEntry {
                alias: base_alias.into(),
                meta: base,
                outer: false,
            },
            joins: Vec::new(),
            by_path: HashMap::new(),
            through_aliases: HashMap::new(),
            reserved: Vec::new(),
        }
    }

    /// Keeps `alias` out of the join aliases this plan hands out.
    pub fn reserve_alias(&mut self, alias: impl Into<String>) {
        self.reserved.push(alias.into());
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn into_joins(self) -> Vec<Join> {
        self.joins
    }

    /// The alias and model joined for `path`, once resolved.
    pub fn entry(&self, path: &str) -> Option<(&str, &Arc<ModelMeta>)> {
        self.by_path
            .get(path)
            .map(|e| (e.alias.as_str(), &e.meta))
    }

    fn base(&self) -> &PathEntry {
        &self.base
    }

    /// Joins every hop of a `select_related` path and returns the path
    /// prefixes in hop order (`["team", "team__org"]`).
    ///
    /// Each hop must be a single-valued relation.
    pub fn select_related(&mut self, path: &str) -> StrataResult<Vec<String>> {
        let mut prefixes = Vec::new();
        let mut current = self.base().clone();
        let mut prefix = String::new();

        for seg in path.split("__") {
            let Some(rel) = current.meta.relation(seg).cloned() else {
                return Err(StrataError::RelationResolution(format!(
                    "Non-relational field given in select_related: '{seg}' on {}",
                    current.meta.name
                )));
            };
            if rel.is_multi_valued() {
                return Err(StrataError::RelationResolution(format!(
                    "'{seg}' on {} is a multi-valued relation; use prefetch_related",
                    current.meta.name
                )));
            }
            prefix = join_prefix(&prefix, seg);
            current = self.join_relation(&current, &rel, &prefix)?;
            prefixes.push(prefix.clone());
        }
        Ok(prefixes)
    }

    /// Resolves a field path to a qualified column, adding the joins it needs.
    ///
    /// A path ending on a forward relation compares its local key column
    /// without joining; so do `fk__pk` and `fk__<target pk>`. A path ending on
    /// a reverse or many-to-many relation compares the related primary key.
    pub fn resolve_column(&mut self, path: &str) -> StrataResult<ColumnRef> {
        let segments: Vec<&str> = path.split("__").collect();
        let mut current = self.base().clone();
        let mut prefix = String::new();
        let mut i = 0;

        while i < segments.len() {
            let seg = segments[i];
            let is_last = i + 1 == segments.len();
            let name = current.meta.canonical_name(seg).to_string();

            if let Some(field) = current.meta.field(&name).filter(|f| f.is_concrete()) {
                if is_last {
                    return Ok(ColumnRef::new(&current.alias, &field.column));
                }
                let next = segments[i + 1];
                if !field.field_type.is_forward_relation() {
                    return Err(StrataError::FieldLookup(format!(
                        "Unsupported lookup '{next}' for field '{name}' on {}",
                        current.meta.name
                    )));
                }
                let target = self.registry.model(field.field_type.relation_target().unwrap_or_default())?;
                if i + 2 == segments.len() && (next == "pk" || next == target.pk_name()) {
                    return Ok(ColumnRef::new(&current.alias, &field.column));
                }
                let rel = current.meta.relation(&name).cloned().ok_or_else(|| {
                    StrataError::RelationResolution(format!(
                        "'{name}' on {} has no resolved relation",
                        current.meta.name
                    ))
                })?;
                prefix = join_prefix(&prefix, &name);
                current = self.join_relation(&current, &rel, &prefix)?;
                i += 1;
                continue;
            }

            let Some(rel) = current.meta.relation(&name).cloned() else {
                return Err(StrataError::FieldLookup(format!(
                    "Cannot resolve keyword '{seg}' into field of {}",
                    current.meta.name
                )));
            };
            prefix = join_prefix(&prefix, &name);

            if is_last {
                if let Some(through) = &rel.through {
                    let alias = self.join_through(&current, &rel, &prefix);
                    return Ok(ColumnRef::new(alias, &through.target_column));
                }
                let joined = self.join_relation(&current, &rel, &prefix)?;
                return Ok(ColumnRef::new(&joined.alias, joined.meta.pk_column()));
            }
            current = self.join_relation(&current, &rel, &prefix)?;
            i += 1;
        }

        Err(StrataError::FieldLookup(format!(
            "Cannot resolve empty field path on {}",
            self.base().meta.name
        )))
    }

    fn join_relation(&mut self, parent: &PathEntry, rel: &Relation, prefix: &str) -> StrataResult<PathEntry> {
        if let Some(existing) = self.by_path.get(prefix) {
            return Ok(existing.clone());
        }

        let target = self.registry.model(&rel.target)?;
        let outer = parent.outer || rel.nullable;
        let join_type = if outer { JoinType::Left } else { JoinType::Inner };
        let alias = self.unique_alias(prefix);

        let left = match &rel.through {
            Some(through) => {
                let through_alias = self.join_through(parent, rel, prefix);
                ColumnRef::new(through_alias, &through.target_column)
            }
            None => ColumnRef::new(&parent.alias, &rel.local_column),
        };

        self.joins.push(Join {
            table: TableRef::new(self.schema.as_deref(), &target.table).aliased(&alias),
            join_type,
            left,
            right_column: rel.remote_column.clone(),
        });

        let entry = PathEntry {
            alias,
            meta: target,
            outer,
        };
        self.by_path.insert(prefix.to_string(), entry.clone());
        Ok(entry)
    }

    /// Joins the many-to-many join table for `prefix` and returns its alias.
    fn join_through(&mut self, parent: &PathEntry, rel: &Relation, prefix: &str) -> String {
        if let Some(alias) = self.through_aliases.get(prefix) {
            return alias.clone();
        }
        let Some(through) = &rel.through else {
            return parent.alias.clone();
        };
        let alias = self.unique_alias(&format!("{prefix}__through"));
        self.joins.push(Join {
            table: TableRef::new(self.schema.as_deref(), &through.table).aliased(&alias),
            join_type: JoinType::Left,
            left: ColumnRef::new(&parent.alias, &rel.local_column),
            right_column: through.source_column.clone(),
        });
        self.through_aliases.insert(prefix.to_string(), alias.clone());
        alias
    }

    fn unique_alias(&self, wanted: &str) -> String {
        let taken = |a: &str| {
            self.base.alias == a
                || self.reserved.iter().any(|r| r == a)
                || self.by_path.values().any(|e| e.alias == a)
                || self.through_aliases.values().any(|t| t == a)
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        (1..)
            .map(|n| format!("{wanted}_{n}"))
            .find(|a| !taken(a))
            .unwrap_or_else(|| wanted.to_string())
    }
}

fn join_prefix(prefix: &str, seg: &str) -> String {
    if prefix.is_empty() {
        seg.to_string()
    } else {
        format!("{prefix}__{seg}")
    }
}

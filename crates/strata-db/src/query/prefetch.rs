//! The prefetch engine.
//!
//! After the primary query hydrates its rows, each [`Prefetch`] directive
//! runs one batched query per relation hop:
//! `SELECT ... WHERE <key> IN (<keys collected from the previous hop>)`.
//! Rows come back with their grouping key as an extra column and are fanned
//! out to every root instance that reaches them. The number of queries depends
//! on the path length, never on the number of parents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};

use crate::executor::DbExecutor;
use crate::instance::Instance;
use crate::model::{ModelMeta, Registry, Relation};
use crate::query::lookups::{Lookup, Q};
use crate::query::queryset::QuerySet;
use crate::value::Value;

/// A `prefetch_related` directive.
///
/// ```
/// use strata_db::query::prefetch::Prefetch;
///
/// let p = Prefetch::new("tracks").to_attr("all_tracks");
/// assert_eq!(p.attr(), "all_tracks");
/// assert_eq!(Prefetch::from("team__members").attr(), "team__members");
/// ```
#[derive(Debug, Clone)]
pub struct Prefetch {
    /// `__`-separated relation path from the queried model.
    pub related_name: String,
    /// Attribute the results are stored under; defaults to the path.
    pub to_attr: Option<String>,
    /// Restricts or orders the rows of the last hop. Must query the model
    /// the path ends on.
    pub queryset: Option<QuerySet>,
}

impl Prefetch {
    pub fn new(related_name: impl Into<String>) -> Self {
        Self {
            related_name: related_name.into(),
            to_attr: None,
            queryset: None,
        }
    }

    #[must_use]
    pub fn to_attr(mut self, attr: impl Into<String>) -> Self {
        self.to_attr = Some(attr.into());
        self
    }

    #[must_use]
    pub fn queryset(mut self, queryset: QuerySet) -> Self {
        self.queryset = Some(queryset);
        self
    }

    pub fn attr(&self) -> &str {
        self.to_attr.as_deref().unwrap_or(&self.related_name)
    }
}

impl From<&str> for Prefetch {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for Prefetch {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// The column a hop's rows are matched on, and the value each parent
/// contributes to the IN list.
fn hop_keys(rel: &Relation, owner: &ModelMeta) -> StrataResult<String> {
    if rel.is_forward() {
        return Ok("pk".to_string());
    }
    if rel.reverse_name == "+" {
        return Err(StrataError::RelationResolution(format!(
            "Cannot prefetch '{}' on {}: the relation has no reverse accessor",
            rel.name, owner.name
        )));
    }
    Ok(rel.reverse_name.clone())
}

fn parent_value<'i>(instance: &'i Instance, rel: &Relation) -> Option<&'i Value> {
    let value = if rel.is_forward() {
        instance.get(&rel.name)?
    } else {
        instance.pk()
    };
    (!value.is_null()).then_some(value)
}

/// Runs every directive against `roots`, which are rows of `meta`.
pub(crate) async fn prefetch(
    registry: &Registry,
    meta: &Arc<ModelMeta>,
    schema: Option<&str>,
    roots: &mut [Instance],
    directives: &[Prefetch],
    db: &dyn DbExecutor,
) -> StrataResult<()> {
    if roots.is_empty() {
        return Ok(());
    }
    for directive in directives {
        let results = prefetch_one(registry, meta, schema, roots, directive, db).await?;
        for (root, rows) in roots.iter_mut().zip(results) {
            root.set_prefetched(directive.attr(), rows);
        }
    }
    Ok(())
}

async fn prefetch_one(
    registry: &Registry,
    meta: &Arc<ModelMeta>,
    schema: Option<&str>,
    roots: &[Instance],
    directive: &Prefetch,
    db: &dyn DbExecutor,
) -> StrataResult<Vec<Vec<Instance>>> {
    let segments: Vec<&str> = directive.related_name.split("__").collect();
    let mut frontier: Vec<Vec<Instance>> = roots.iter().map(|r| vec![r.clone()]).collect();
    let mut owner = Arc::clone(meta);

    for (depth, seg) in segments.iter().enumerate() {
        let rel = owner.relation(seg).cloned().ok_or_else(|| {
            StrataError::RelationResolution(format!(
                "Cannot find '{seg}' on {} for prefetch_related('{}')",
                owner.name, directive.related_name
            ))
        })?;
        let target = registry.model(&rel.target)?;
        let key_path = hop_keys(&rel, &owner)?;

        let mut seen = HashSet::new();
        let keys: Vec<Value> = frontier
            .iter()
            .flatten()
            .filter_map(|p| parent_value(p, &rel))
            .filter(|v| seen.insert(v.key()))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(vec![Vec::new(); roots.len()]);
        }

        let is_last = depth + 1 == segments.len();
        let base = match directive.queryset.as_ref().filter(|_| is_last) {
            Some(qs) if qs.model().name != target.name => {
                return Err(StrataError::QuerySet(format!(
                    "Prefetch queryset for '{}' must query {}, not {}",
                    directive.related_name,
                    target.name,
                    qs.model().name
                )))
            }
            // An override left on the registry default follows the parent's schema.
            Some(qs) if qs.state.schema.as_deref() == registry.schema() => {
                qs.clone().with_schema(schema.map(str::to_string))
            }
            Some(qs) => qs.clone(),
            None => QuerySet::new(registry, Arc::clone(&target)).with_schema(schema.map(str::to_string)),
        };

        tracing::debug!(
            path = %directive.related_name,
            hop = %seg,
            keys = keys.len(),
            "prefetch hop"
        );
        let rows = base
            .filter(Q::compare(key_path.clone(), Lookup::In, Value::List(keys)))
            .fetch(std::slice::from_ref(&key_path), db)
            .await?;

        let mut groups: HashMap<String, Vec<Instance>> = HashMap::new();
        for (instance, extra) in rows {
            let key = extra.first().map_or_else(|| Value::Null.key(), Value::key);
            groups.entry(key).or_default().push(instance);
        }

        frontier = frontier
            .into_iter()
            .map(|parents| {
                let mut seen = HashSet::new();
                let mut reached = Vec::new();
                for parent in &parents {
                    let Some(children) = parent_value(parent, &rel).and_then(|v| groups.get(&v.key())) else {
                        continue;
                    };
                    for child in children {
                        if seen.insert(child.pk().key()) {
                            reached.push(child.clone());
                        }
                    }
                }
                reached
            })
            .collect();
        owner = target;
    }

    Ok(frontier)
}

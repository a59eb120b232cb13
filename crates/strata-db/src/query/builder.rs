//! Lowers queryset state into compiler input.
//!
//! Everything that can fail for a reason other than the database fails
//! here: unknown fields and lookups, bad relation paths, negative slices,
//! malformed lookup operands. A [`SelectPlan`] or mutation filter that comes
//! out of this module always renders to valid SQL.

use std::sync::Arc;

use strata_core::{StrataError, StrataResult};

use crate::model::ModelMeta;
use crate::query::compiler::{
    ColumnRef, MutationFilter, OrderBy, Query, TableRef, WhereNode, SUBQUERY_ALIAS,
};
use crate::query::lookups::{Lookup, Q};
use crate::query::queryset::QuerySet;
use crate::query::resolver::JoinPlan;
use crate::value::Value;

/// A `select_related` hop whose columns follow the root's in each row.
#[derive(Debug, Clone)]
pub(crate) struct RelatedLayout {
    /// Relation name on the parent.
    pub field: String,
    /// Index of the parent hop; `None` for the root model.
    pub parent: Option<usize>,
    pub meta: Arc<ModelMeta>,
}

/// How selected columns map back onto instances.
///
/// Columns come in order: every concrete field of the root model, then the
/// concrete fields of each related hop, then the extra columns.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub root: Arc<ModelMeta>,
    pub related: Vec<RelatedLayout>,
}

#[derive(Debug, Clone)]
pub(crate) struct SelectPlan {
    pub query: Query,
    pub layout: Layout,
}

fn check_queryable(meta: &ModelMeta) -> StrataResult<()> {
    if meta.is_empty() {
        return Err(StrataError::FieldLookup(format!(
            "{} declares no fields besides its primary key",
            meta.name
        )));
    }
    Ok(())
}

fn check_slice(name: &str, n: Option<i64>) -> StrataResult<Option<u64>> {
    n.map(|v| {
        u64::try_from(v).map_err(|_| StrataError::Value(format!("Negative {name} is not supported: {v}")))
    })
    .transpose()
}

/// Builds the SELECT for a queryset. `extra` paths are resolved against the
/// root model and appended after the model columns.
pub(crate) fn build_select(qs: &QuerySet, extra: &[String]) -> StrataResult<SelectPlan> {
    let meta = &qs.meta;
    check_queryable(meta)?;
    let limit = check_slice("limit", qs.state.limit)?;
    let offset = check_slice("offset", qs.state.offset)?;
    let schema = qs.state.schema.as_deref();

    let mut plan = JoinPlan::new(&qs.registry, Arc::clone(meta), &meta.table, schema);

    let mut related: Vec<(String, RelatedLayout)> = Vec::new();
    for path in &qs.state.select_related {
        for prefix in plan.select_related(path)? {
            if related.iter().any(|(p, _)| *p == prefix) {
                continue;
            }
            let (parent_path, field) = prefix
                .rsplit_once("__")
                .map_or((None, prefix.as_str()), |(p, f)| (Some(p), f));
            let parent = parent_path.and_then(|p| related.iter().position(|(q, _)| q == p));
            let Some((_, target)) = plan.entry(&prefix) else {
                continue;
            };
            related.push((
                prefix.clone(),
                RelatedLayout {
                    field: field.to_string(),
                    parent,
                    meta: Arc::clone(target),
                },
            ));
        }
    }

    let where_clause = compile_filters(&mut plan, &qs.state.filters)?;
    let order_by = compile_ordering(&mut plan, meta, &qs.state.order_by)?;

    let mut extra_columns = Vec::with_capacity(extra.len());
    for path in extra {
        extra_columns.push(plan.resolve_column(path)?);
    }

    let mut columns: Vec<ColumnRef> = meta
        .concrete_fields()
        .map(|f| ColumnRef::new(&meta.table, &f.column))
        .collect();
    for (prefix, hop) in &related {
        let alias = plan.entry(prefix).map_or(prefix.as_str(), |(a, _)| a).to_string();
        columns.extend(hop.meta.concrete_fields().map(|f| ColumnRef::new(&alias, &f.column)));
    }
    columns.extend(extra_columns);

    let query = Query {
        from: TableRef::new(schema, &meta.table),
        columns,
        joins: plan.into_joins(),
        where_clause,
        order_by,
        limit,
        offset,
        distinct: qs.state.distinct,
        for_update: qs.state.for_update,
    };

    Ok(SelectPlan {
        query,
        layout: Layout {
            root: Arc::clone(meta),
            related: related.into_iter().map(|(_, hop)| hop).collect(),
        },
    })
}

/// Builds the target table and filter of an UPDATE or DELETE.
///
/// Sliced querysets are rejected: neither statement can be limited
/// portably.
pub(crate) fn build_mutation(qs: &QuerySet, op: &str) -> StrataResult<(TableRef, MutationFilter)> {
    let meta = &qs.meta;
    check_queryable(meta)?;
    if qs.state.limit.is_some() || qs.state.offset.is_some() {
        return Err(StrataError::QuerySet(format!(
            "Cannot {op} a queryset once a limit or offset has been taken"
        )));
    }
    let schema = qs.state.schema.as_deref();
    let table = TableRef::new(schema, &meta.table);

    // Resolve once assuming a correlated subquery; without joins the plain
    // table name qualifies the columns instead.
    let mut plan = JoinPlan::new(&qs.registry, Arc::clone(meta), SUBQUERY_ALIAS, schema);
    plan.reserve_alias(meta.table.as_str());
    let mut where_clause = compile_filters(&mut plan, &qs.state.filters)?;
    let joins = plan.into_joins();
    if joins.is_empty() {
        let mut plan = JoinPlan::new(&qs.registry, Arc::clone(meta), &meta.table, schema);
        where_clause = compile_filters(&mut plan, &qs.state.filters)?;
    }

    Ok((
        table,
        MutationFilter {
            joins,
            where_clause,
            pk_column: meta.pk_column().to_string(),
        },
    ))
}

/// AND of every filter; `None` when nothing constrains the query.
fn compile_filters(plan: &mut JoinPlan<'_>, filters: &[Q]) -> StrataResult<Option<WhereNode>> {
    let mut nodes = Vec::new();
    for q in filters {
        if q.is_empty() {
            continue;
        }
        nodes.push(compile_q(plan, q)?);
    }
    Ok(match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(WhereNode::And(nodes)),
    })
}

fn compile_q(plan: &mut JoinPlan<'_>, q: &Q) -> StrataResult<WhereNode> {
    match q {
        Q::Compare {
            path,
            lookup,
            value,
        } => {
            check_operand(path, *lookup, value)?;
            let column = plan.resolve_column(path)?;
            Ok(WhereNode::Condition {
                column,
                lookup: *lookup,
                value: value.clone(),
            })
        }
        Q::And(children) => Ok(WhereNode::And(
            children
                .iter()
                .map(|c| compile_q(plan, c))
                .collect::<StrataResult<_>>()?,
        )),
        Q::Or(children) => Ok(WhereNode::Or(
            children
                .iter()
                .map(|c| compile_q(plan, c))
                .collect::<StrataResult<_>>()?,
        )),
        Q::Not(inner) => Ok(WhereNode::Not(Box::new(compile_q(plan, inner)?))),
    }
}

fn check_operand(path: &str, lookup: Lookup, value: &Value) -> StrataResult<()> {
    let bad = |expected: &str| {
        Err(StrataError::Value(format!(
            "'{}' lookup on '{path}' expects {expected}, got {value}",
            lookup.name()
        )))
    };
    match (lookup, value) {
        (Lookup::In, Value::List(_)) | (Lookup::IsNull, Value::Bool(_)) => Ok(()),
        (Lookup::In, _) => bad("a list"),
        (Lookup::IsNull, _) => bad("a boolean"),
        (Lookup::Exact, Value::List(_)) => bad("a scalar value"),
        (Lookup::Exact, _) => Ok(()),
        (_, Value::Null | Value::List(_)) => bad("a scalar value"),
        _ => Ok(()),
    }
}

/// Sort keys as written (`-name` for descending) followed by the primary
/// key ascending, unless the primary key is already a sort key.
fn compile_ordering(plan: &mut JoinPlan<'_>, meta: &ModelMeta, keys: &[String]) -> StrataResult<Vec<OrderBy>> {
    let mut order_by = Vec::with_capacity(keys.len() + 1);
    for key in keys {
        let (descending, path) = key
            .strip_prefix('-')
            .map_or((false, key.as_str()), |p| (true, p));
        order_by.push(OrderBy {
            column: plan.resolve_column(path)?,
            descending,
        });
    }
    let pk = ColumnRef::new(&meta.table, meta.pk_column());
    if !order_by.iter().any(|o| o.column == pk) {
        order_by.push(OrderBy {
            column: pk,
            descending: false,
        });
    }
    Ok(order_by)
}

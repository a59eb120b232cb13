//! Row hydration.
//!
//! Turns one positional result row into an [`Instance`] tree following a
//! [`Layout`]: root columns first, then one block per `select_related` hop.
//! A hop whose primary key came back NULL (an outer join that matched
//! nothing) is not materialized; its parent keeps the unloaded handle.

use crate::instance::{Instance, Related};
use crate::model::Registry;
use crate::query::builder::Layout;
use crate::query::compiler::Row;
use crate::value::Value;

/// Hydrates one row, returning the root instance and any extra columns
/// selected after the model columns.
pub(crate) fn hydrate_row(
    registry: &Registry,
    schema: Option<&str>,
    layout: &Layout,
    row: Row,
) -> (Instance, Vec<Value>) {
    let mut values = row.into_values().into_iter();

    let root_values = layout
        .root
        .concrete_fields()
        .map(|f| {
            let v = values.next().unwrap_or(Value::Null).coerce(&f.field_type);
            (f.name.clone(), v)
        })
        .collect();
    let mut root = Instance::from_db(registry, layout.root.clone(), schema, root_values);

    let mut hops: Vec<Option<Instance>> = layout
        .related
        .iter()
        .map(|hop| {
            let fields: Vec<(String, Value)> = hop
                .meta
                .concrete_fields()
                .map(|f| {
                    let v = values.next().unwrap_or(Value::Null).coerce(&f.field_type);
                    (f.name.clone(), v)
                })
                .collect();
            let pk_missing = fields
                .iter()
                .find(|(n, _)| n == hop.meta.pk_name())
                .map_or(true, |(_, v)| v.is_null());
            (!pk_missing).then(|| Instance::from_db(registry, hop.meta.clone(), schema, fields))
        })
        .collect();

    // Children attach before their parents move into the grandparent.
    for idx in (0..hops.len()).rev() {
        let Some(child) = hops[idx].take() else {
            continue;
        };
        let hop = &layout.related[idx];
        let parent = match hop.parent {
            None => Some(&mut root),
            Some(p) => hops[p].as_mut(),
        };
        if let Some(slot) = parent.and_then(|p| p.related_mut(&hop.field)) {
            *slot = Related::Loaded(Box::new(child));
        }
    }

    (root, values.collect())
}

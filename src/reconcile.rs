//! Reconciliation of a stored transformation model with a new raw spec.
//!
//! When the set of items changes, the columns the old model knows about keep
//! the user's settings and relative order, columns never seen before land at
//! the anchor slot where "future columns" were configured to go, and columns
//! that vanished are dropped. Positions are recomputed from scratch on every
//! run, so only relative intent survives:
//!
//! 1. carried-over columns are ranked by their old position;
//! 2. the new anchor is the number of carried-over columns that sat before the
//!    old anchor;
//! 3. output order is: ranks before the anchor, newly discovered columns in raw
//!    order, remaining ranks.
//!
//! A column that drops out of an intersection and later re-enters it comes
//! back as newly discovered, with default settings.

use std::collections::HashSet;

use log::debug;

use crate::{
    config::TableSpecConfig,
    conversion::ConversionRegistry,
    error::{Result, TableSpecError},
    spec::{ColumnSpec, ItemSpecs, RawSpec},
    transformation::{FilterMode, Transformation, TransformationModel},
};

/// Reconciles `old` against `new_raw`, keeping the old filter mode.
pub fn reconcile_model(
    old: &TransformationModel,
    new_raw: RawSpec,
    registry: &dyn ConversionRegistry,
) -> TransformationModel {
    reslot(old, new_raw, old.filter_mode(), registry)
}

/// Reconciles a stored configuration with the current specs of its items.
///
/// The result carries the old root id and the new item set. In intersection
/// mode an empty new intersection fails with
/// [`TableSpecError::EmptyIntersection`].
pub fn reconcile_config(
    old: &TableSpecConfig,
    items: ItemSpecs,
    registry: &dyn ConversionRegistry,
) -> Result<TableSpecConfig> {
    let new_raw = RawSpec::build(&items)?;
    if old.filter_mode() == FilterMode::Intersection && new_raw.intersection().is_empty() {
        return Err(TableSpecError::EmptyIntersection);
    }
    let model = TransformationModel::from_config(old);
    let reconciled = reconcile_model(&model, new_raw, registry);
    reconciled.to_config(old.root_id(), items, registry)
}

/// Rebuilds `old` over `new_raw`, exposing the columns `filter_mode` selects.
pub(crate) fn reslot(
    old: &TransformationModel,
    new_raw: RawSpec,
    filter_mode: FilterMode,
    registry: &dyn ConversionRegistry,
) -> TransformationModel {
    let relevant_new = filter_mode.relevant(&new_raw);

    let mut carried: Vec<Transformation> = Vec::new();
    let mut discovered: Vec<&ColumnSpec> = Vec::new();
    for column in relevant_new {
        match old.transformation(&column.name) {
            Some(previous) => carried.push(carry_over(previous, column, registry)),
            None => discovered.push(column),
        }
    }

    carried.sort_by_key(|t| t.position);
    let anchor = carried
        .iter()
        .filter(|t| t.position < old.unknown_column_position())
        .count();

    let carried_names = carried
        .iter()
        .map(|t| t.column.name.as_str())
        .collect::<HashSet<_>>();
    let dropped = old
        .ordered()
        .into_iter()
        .filter(|t| !carried_names.contains(t.name()))
        .count();
    debug!(
        "Reconciling {} column(s): {} carried over, {} discovered, {} dropped; anchor {} -> {}",
        relevant_new.len(),
        carried.len(),
        discovered.len(),
        dropped,
        old.unknown_column_position(),
        anchor
    );

    let after_anchor = carried.split_off(anchor);
    let mut transformations = Vec::with_capacity(relevant_new.len());
    for mut transformation in carried {
        transformation.position = transformations.len();
        transformations.push(transformation);
    }
    for column in discovered {
        let position = transformations.len();
        transformations.push(Transformation::with_defaults(
            column.clone(),
            position,
            old.keep_unknown_columns(),
            registry,
        ));
    }
    for mut transformation in after_anchor {
        transformation.position = transformations.len();
        transformations.push(transformation);
    }

    TransformationModel::from_parts(
        new_raw,
        transformations,
        filter_mode,
        old.keep_unknown_columns(),
        anchor,
    )
}

/// Carries the settings of `previous` over to the column's new spec.
///
/// A changed external type keeps the previous destination type when the
/// registry offers a path to it, otherwise falls back to the default path.
fn carry_over(
    previous: &Transformation,
    column: &ColumnSpec,
    registry: &dyn ConversionRegistry,
) -> Transformation {
    let path = if previous.column.external_type == column.external_type {
        previous.path.clone()
    } else {
        registry
            .path_to(column.external_type, previous.path.destination)
            .unwrap_or_else(|| registry.default_for(column.external_type))
    };
    Transformation {
        column: column.clone(),
        path,
        keep: previous.keep,
        position: previous.position,
        output_name: previous.output_name.clone(),
    }
}

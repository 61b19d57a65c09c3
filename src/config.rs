//! The immutable table spec configuration and its materialization.
//!
//! A [`TableSpecConfig`] is the snapshot produced by a fresh scan or by a
//! reconciliation. All per-column vectors are aligned to the raw union order;
//! `positional_mapping` lists, per output slot, the raw union index that fills
//! it. A config is never edited in place: load it into a
//! [`TransformationModel`], edit, and build a new one.

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    conversion::{ConversionPath, ConversionRegistry},
    error::{Result, TableSpecError},
    spec::{ItemSpecs, RawSpec},
    transformation::{FilterMode, Transformation, TransformationModel},
    types::ColumnType,
};

/// One column of the materialized output: output name and destination type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl OutputColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A kept output column together with the raw column feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot<'a> {
    pub raw_index: usize,
    pub original_name: &'a str,
    pub column: &'a OutputColumn,
    pub path: &'a ConversionPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpecConfig {
    root_id: String,
    item_specs: ItemSpecs,
    raw_spec: RawSpec,
    schema: Vec<OutputColumn>,
    paths: Vec<ConversionPath>,
    original_names: Vec<String>,
    positional_mapping: Vec<usize>,
    keep: Vec<bool>,
    filter_mode: FilterMode,
    keep_unknown_columns: bool,
    unknown_column_position: usize,
}

impl TableSpecConfig {
    /// Default configuration for already scanned item specs.
    pub fn compute_fresh(
        root_id: &str,
        items: ItemSpecs,
        filter_mode: FilterMode,
        registry: &dyn ConversionRegistry,
    ) -> Result<Self> {
        let raw_spec = RawSpec::build(&items)?;
        let model = TransformationModel::new_default(raw_spec, filter_mode, registry)?;
        let config = model.to_config(root_id, items, registry)?;
        info!(
            "Computed {} configuration for '{}' over {} item(s) with {} column(s)",
            filter_mode,
            root_id,
            config.item_specs.len(),
            model.len()
        );
        Ok(config)
    }

    pub fn builder(root_id: impl Into<String>, item_specs: ItemSpecs) -> TableSpecConfigBuilder {
        TableSpecConfigBuilder::new(root_id, item_specs)
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn item_specs(&self) -> &ItemSpecs {
        &self.item_specs
    }

    pub fn raw_spec(&self) -> &RawSpec {
        &self.raw_spec
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    pub fn keep_unknown_columns(&self) -> bool {
        self.keep_unknown_columns
    }

    pub fn unknown_column_position(&self) -> usize {
        self.unknown_column_position
    }

    /// Output name and destination type per raw union column.
    pub fn schema(&self) -> &[OutputColumn] {
        &self.schema
    }

    /// Conversion path per raw union column.
    pub fn paths(&self) -> &[ConversionPath] {
        &self.paths
    }

    pub fn original_names(&self) -> &[String] {
        &self.original_names
    }

    pub fn positional_mapping(&self) -> &[usize] {
        &self.positional_mapping
    }

    pub fn keep_flags(&self) -> &[bool] {
        &self.keep
    }

    /// True when the config was computed for exactly this root and item set,
    /// so it can be reused without a rescan.
    pub fn is_configured_with<I, S>(&self, root_id: &str, items: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.root_id != root_id {
            return false;
        }
        let candidates = items
            .into_iter()
            .map(|item| item.as_ref().to_string())
            .collect::<Vec<_>>();
        if candidates.len() != self.item_specs.len() {
            return false;
        }
        let configured = self.item_specs.items().collect::<HashSet<_>>();
        let candidate_set = candidates.iter().map(String::as_str).collect::<HashSet<_>>();
        candidate_set == configured
    }

    /// Kept columns in output order.
    pub fn output_columns(&self) -> Vec<OutputSlot<'_>> {
        self.positional_mapping
            .iter()
            .copied()
            .filter(|&raw_index| self.keep[raw_index])
            .map(|raw_index| OutputSlot {
                raw_index,
                original_name: &self.original_names[raw_index],
                column: &self.schema[raw_index],
                path: &self.paths[raw_index],
            })
            .collect()
    }

    /// The output schema: kept columns, in output order, under their output
    /// names and destination types. Fails when two kept columns share a name.
    pub fn output_schema(&self) -> Result<Vec<OutputColumn>> {
        let slots = self.output_columns();
        if let Some(name) = slots.iter().map(|slot| &slot.column.name).duplicates().next() {
            return Err(TableSpecError::DuplicateOutputName { name: name.clone() });
        }
        Ok(slots.into_iter().map(|slot| slot.column.clone()).collect())
    }

    /// Conversion paths of the kept columns, in output order.
    pub fn conversion_paths(&self) -> Vec<&ConversionPath> {
        self.output_columns()
            .into_iter()
            .map(|slot| slot.path)
            .collect()
    }
}

/// Assembles a [`TableSpecConfig`] and checks that its vectors line up with
/// the raw union of the item specs.
#[derive(Debug, Clone)]
pub struct TableSpecConfigBuilder {
    root_id: String,
    item_specs: ItemSpecs,
    schema: Vec<OutputColumn>,
    paths: Vec<ConversionPath>,
    original_names: Vec<String>,
    positional_mapping: Option<Vec<usize>>,
    keep: Option<Vec<bool>>,
    filter_mode: FilterMode,
    keep_unknown_columns: bool,
    unknown_column_position: Option<usize>,
}

impl TableSpecConfigBuilder {
    pub fn new(root_id: impl Into<String>, item_specs: ItemSpecs) -> Self {
        Self {
            root_id: root_id.into(),
            item_specs,
            schema: Vec::new(),
            paths: Vec::new(),
            original_names: Vec::new(),
            positional_mapping: None,
            keep: None,
            filter_mode: FilterMode::Union,
            keep_unknown_columns: true,
            unknown_column_position: None,
        }
    }

    /// Appends the next raw union column.
    pub fn column(
        mut self,
        original_name: impl Into<String>,
        output: OutputColumn,
        path: ConversionPath,
    ) -> Self {
        self.original_names.push(original_name.into());
        self.schema.push(output);
        self.paths.push(path);
        self
    }

    pub fn positional_mapping(mut self, mapping: Vec<usize>) -> Self {
        self.positional_mapping = Some(mapping);
        self
    }

    pub fn keep(mut self, keep: Vec<bool>) -> Self {
        self.keep = Some(keep);
        self
    }

    pub fn filter_mode(mut self, filter_mode: FilterMode) -> Self {
        self.filter_mode = filter_mode;
        self
    }

    pub fn keep_unknown_columns(mut self, keep: bool) -> Self {
        self.keep_unknown_columns = keep;
        self
    }

    pub fn unknown_column_position(mut self, position: usize) -> Self {
        self.unknown_column_position = Some(position);
        self
    }

    pub fn build(self) -> Result<TableSpecConfig> {
        let raw_spec = RawSpec::build(&self.item_specs)?;
        let union = raw_spec.union();
        let count = union.len();

        for (label, len) in [
            ("output schema", self.schema.len()),
            ("conversion paths", self.paths.len()),
            ("original names", self.original_names.len()),
        ] {
            if len != count {
                return Err(TableSpecError::invalid_state(format!(
                    "{label} has {len} entries but the item specs define {count} column(s)"
                )));
            }
        }
        for (idx, column) in union.iter().enumerate() {
            if self.original_names[idx] != column.name {
                return Err(TableSpecError::invalid_state(format!(
                    "original name '{}' at index {idx} does not match column '{}' of the item specs",
                    self.original_names[idx], column.name
                )));
            }
            if self.paths[idx].source != column.external_type {
                return Err(TableSpecError::invalid_state(format!(
                    "conversion path '{}' does not accept column '{}' of type {}",
                    self.paths[idx], column.name, column.external_type
                )));
            }
        }

        let keep = self.keep.unwrap_or_else(|| vec![true; count]);
        if keep.len() != count {
            return Err(TableSpecError::invalid_state(format!(
                "keep flags have {} entries but the item specs define {count} column(s)",
                keep.len()
            )));
        }

        let positional_mapping = self
            .positional_mapping
            .unwrap_or_else(|| (0..count).collect());
        let mut seen = HashSet::with_capacity(positional_mapping.len());
        for &raw_index in &positional_mapping {
            if raw_index >= count || !seen.insert(raw_index) {
                return Err(TableSpecError::invalid_state(format!(
                    "positional mapping {positional_mapping:?} is not a permutation of 0..{count}"
                )));
            }
        }

        let relevant = self.filter_mode.relevant(&raw_spec).len();
        let unknown_column_position = self
            .unknown_column_position
            .unwrap_or(relevant)
            .min(relevant);

        Ok(TableSpecConfig {
            root_id: self.root_id,
            item_specs: self.item_specs,
            raw_spec,
            schema: self.schema,
            paths: self.paths,
            original_names: self.original_names,
            positional_mapping,
            keep,
            filter_mode: self.filter_mode,
            keep_unknown_columns: self.keep_unknown_columns,
            unknown_column_position,
        })
    }
}

impl TransformationModel {
    /// Renders the model as an immutable configuration for `items`, which
    /// must be the items the model's raw spec was computed from.
    ///
    /// Union columns outside the relevant spec are appended after the
    /// relevant ones with their default path and `keep = false`.
    pub fn to_config(
        &self,
        root_id: &str,
        items: ItemSpecs,
        registry: &dyn ConversionRegistry,
    ) -> Result<TableSpecConfig> {
        let union = self.raw_spec().union();
        let mut builder = TableSpecConfig::builder(root_id, items)
            .filter_mode(self.filter_mode())
            .keep_unknown_columns(self.keep_unknown_columns())
            .unknown_column_position(self.unknown_column_position());

        let mut keep = Vec::with_capacity(union.len());
        for column in union {
            match self.transformation(&column.name) {
                Some(t) => {
                    builder = builder.column(
                        column.name.clone(),
                        OutputColumn::new(t.output_name.clone(), t.path.destination),
                        t.path.clone(),
                    );
                    keep.push(t.keep);
                }
                None => {
                    let path = registry.default_for(column.external_type);
                    builder = builder.column(
                        column.name.clone(),
                        OutputColumn::new(column.name.clone(), path.destination),
                        path,
                    );
                    keep.push(false);
                }
            }
        }

        let mut mapping = self
            .ordered()
            .into_iter()
            .filter_map(|t| self.raw_spec().union_index(t.name()))
            .collect::<Vec<_>>();
        let relevant = mapping.iter().copied().collect::<HashSet<_>>();
        mapping.extend((0..union.len()).filter(|idx| !relevant.contains(idx)));
        debug!(
            "Rendering model for '{root_id}': {} relevant of {} union column(s)",
            relevant.len(),
            union.len()
        );

        builder.positional_mapping(mapping).keep(keep).build()
    }

    /// Loads a configuration back into an editable model.
    ///
    /// Relevant columns are ranked by their output slot; columns the mapping
    /// does not cover follow in raw order.
    pub fn from_config(config: &TableSpecConfig) -> Self {
        let raw_spec = config.raw_spec().clone();
        let union_len = raw_spec.union().len();
        let mut slot_of = vec![usize::MAX; union_len];
        for (slot, &raw_index) in config.positional_mapping().iter().enumerate() {
            slot_of[raw_index] = slot;
        }

        let relevant = config
            .filter_mode()
            .relevant(&raw_spec)
            .iter()
            .filter_map(|column| raw_spec.union_index(&column.name))
            .sorted_by_key(|&raw_index| (slot_of[raw_index], raw_index))
            .collect::<Vec<_>>();

        let transformations = relevant
            .into_iter()
            .enumerate()
            .map(|(position, raw_index)| Transformation {
                column: raw_spec.union()[raw_index].clone(),
                path: config.paths()[raw_index].clone(),
                keep: config.keep_flags()[raw_index],
                position,
                output_name: config.schema()[raw_index].name.clone(),
            })
            .collect::<Vec<_>>();

        TransformationModel::from_parts(
            raw_spec,
            transformations,
            config.filter_mode(),
            config.keep_unknown_columns(),
            config.unknown_column_position(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conversion::StandardRegistry,
        spec::{ColumnSpec, TableSpec},
    };

    fn items() -> ItemSpecs {
        [
            (
                "a.csv",
                TableSpec::new(vec![
                    ColumnSpec::new("x", ColumnType::Integer),
                    ColumnSpec::new("y", ColumnType::String),
                ]),
            ),
            (
                "b.csv",
                TableSpec::new(vec![
                    ColumnSpec::new("y", ColumnType::String),
                    ColumnSpec::new("z", ColumnType::Integer),
                ]),
            ),
        ]
        .into_iter()
        .collect()
    }

    fn names(columns: &[OutputColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn fresh_union_config_outputs_every_column_in_raw_order() {
        let config =
            TableSpecConfig::compute_fresh("root", items(), FilterMode::Union, &StandardRegistry)
                .unwrap();
        assert_eq!(config.positional_mapping(), &[0, 1, 2]);
        assert_eq!(config.keep_flags(), &[true, true, true]);
        let schema = config.output_schema().unwrap();
        assert_eq!(names(&schema), vec!["x", "y", "z"]);
        assert_eq!(schema[0].column_type, ColumnType::Integer);
    }

    #[test]
    fn fresh_intersection_config_appends_excluded_columns_unkept() {
        let config = TableSpecConfig::compute_fresh(
            "root",
            items(),
            FilterMode::Intersection,
            &StandardRegistry,
        )
        .unwrap();
        assert_eq!(config.positional_mapping(), &[1, 0, 2]);
        assert_eq!(config.keep_flags(), &[false, true, false]);
        assert_eq!(names(&config.output_schema().unwrap()), vec!["y"]);
        assert_eq!(config.unknown_column_position(), 1);
    }

    #[test]
    fn edited_model_materializes_in_output_order() {
        let registry = StandardRegistry::new();
        let raw = RawSpec::build(&items()).unwrap();
        let mut model = TransformationModel::new_default(raw, FilterMode::Union, &registry).unwrap();
        model.move_to("z", 0).unwrap();
        model.set_keep("y", false).unwrap();
        model.set_output_name("x", "ex").unwrap();
        let to_float = registry
            .path_to(ColumnType::Integer, ColumnType::Float)
            .unwrap();
        model
            .set_conversion_path("z", to_float.clone(), &registry)
            .unwrap();

        let config = model.to_config("root", items(), &registry).unwrap();
        assert_eq!(config.positional_mapping(), &[2, 0, 1]);
        let schema = config.output_schema().unwrap();
        assert_eq!(names(&schema), vec!["z", "ex"]);
        assert_eq!(schema[0].column_type, ColumnType::Float);
        assert_eq!(
            config.conversion_paths(),
            vec![&to_float, &registry.default_for(ColumnType::Integer)]
        );
        assert_eq!(config.original_names(), &["x", "y", "z"]);
    }

    #[test]
    fn output_schema_rejects_duplicate_names_but_config_stays_usable() {
        let registry = StandardRegistry::new();
        let raw = RawSpec::build(&items()).unwrap();
        let mut model = TransformationModel::new_default(raw, FilterMode::Union, &registry).unwrap();
        model.set_output_name("z", "x").unwrap();
        let config = model.to_config("root", items(), &registry).unwrap();
        let err = config.output_schema().unwrap_err();
        assert!(matches!(err, TableSpecError::DuplicateOutputName { ref name } if name == "x"));

        let mut reloaded = TransformationModel::from_config(&config);
        reloaded.set_output_name("z", "zed").unwrap();
        let fixed = reloaded.to_config("root", items(), &registry).unwrap();
        assert_eq!(names(&fixed.output_schema().unwrap()), vec!["x", "y", "zed"]);
    }

    #[test]
    fn from_config_restores_the_model() {
        let registry = StandardRegistry::new();
        let raw = RawSpec::build(&items()).unwrap();
        let mut model = TransformationModel::new_default(raw, FilterMode::Union, &registry).unwrap();
        model.move_to("y", 0).unwrap();
        model.set_keep("x", false).unwrap();
        model.set_unknown_column_position(1);
        model.set_keep_unknown_columns(false);

        let config = model.to_config("root", items(), &registry).unwrap();
        assert_eq!(TransformationModel::from_config(&config), model);
    }

    #[test]
    fn is_configured_with_compares_root_and_item_set() {
        let config =
            TableSpecConfig::compute_fresh("root", items(), FilterMode::Union, &StandardRegistry)
                .unwrap();
        assert!(config.is_configured_with("root", ["b.csv", "a.csv"]));
        assert!(!config.is_configured_with("other", ["a.csv", "b.csv"]));
        assert!(!config.is_configured_with("root", ["a.csv"]));
        assert!(!config.is_configured_with("root", ["a.csv", "b.csv", "c.csv"]));
        assert!(!config.is_configured_with("root", ["a.csv", "a.csv"]));
    }

    #[test]
    fn builder_rejects_misaligned_vectors() {
        let registry = StandardRegistry::new();
        let err = TableSpecConfig::builder("root", items())
            .column(
                "x",
                OutputColumn::new("x", ColumnType::Integer),
                registry.default_for(ColumnType::Integer),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, TableSpecError::InvalidPersistedState { .. }));
    }

    #[test]
    fn builder_rejects_mapping_that_is_not_a_permutation() {
        let registry = StandardRegistry::new();
        let mut builder = TableSpecConfig::builder("root", items());
        for (name, ty) in [
            ("x", ColumnType::Integer),
            ("y", ColumnType::String),
            ("z", ColumnType::Integer),
        ] {
            builder = builder.column(name, OutputColumn::new(name, ty), registry.default_for(ty));
        }
        let err = builder
            .positional_mapping(vec![0, 0, 2])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not a permutation"));
    }
}

//! The editable transformation model over a raw spec.
//!
//! Every column relevant under the model's [`FilterMode`] owns exactly one
//! [`Transformation`]: whether it is kept, its output position and name, and
//! the conversion path its cells go through. Positions of the relevant columns
//! always form the permutation `0..count`.
//!
//! The model is a mutable working copy owned by a single editing session (or
//! by the reconciliation run). It is turned into an immutable
//! [`TableSpecConfig`](crate::config::TableSpecConfig) via
//! [`TransformationModel::to_config`] and back via
//! [`TransformationModel::from_config`].

use std::{collections::HashMap, fmt, str::FromStr};

use anyhow::anyhow;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    conversion::{ConversionPath, ConversionRegistry},
    error::{Result, TableSpecError},
    reconcile,
    spec::{ColumnSpec, RawSpec},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Columns that occur in any item.
    #[default]
    Union,
    /// Columns that occur in every item.
    Intersection,
}

impl FilterMode {
    /// The part of `raw` this mode exposes to the output.
    pub fn relevant<'a>(&self, raw: &'a RawSpec) -> &'a [ColumnSpec] {
        match self {
            FilterMode::Union => raw.union(),
            FilterMode::Intersection => raw.intersection(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::Union => "union",
            FilterMode::Intersection => "intersection",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(FilterMode::Union),
            "intersection" => Ok(FilterMode::Intersection),
            other => Err(anyhow!(
                "Unknown filter mode '{other}'. Expected 'union' or 'intersection'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub column: ColumnSpec,
    pub path: ConversionPath,
    pub keep: bool,
    pub position: usize,
    pub output_name: String,
}

impl Transformation {
    /// Default settings for `column` at `position`.
    pub fn with_defaults(
        column: ColumnSpec,
        position: usize,
        keep: bool,
        registry: &dyn ConversionRegistry,
    ) -> Self {
        let path = registry.default_for(column.external_type);
        let output_name = column.name.clone();
        Self {
            column,
            path,
            keep,
            position,
            output_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.column.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationModel {
    raw_spec: RawSpec,
    transformations: HashMap<String, Transformation>,
    filter_mode: FilterMode,
    keep_unknown_columns: bool,
    unknown_column_position: usize,
}

impl TransformationModel {
    /// Default model for a freshly scanned raw spec: every relevant column
    /// kept under its own name, in raw order, through its default path.
    pub fn new_default(
        raw_spec: RawSpec,
        filter_mode: FilterMode,
        registry: &dyn ConversionRegistry,
    ) -> Result<Self> {
        if filter_mode == FilterMode::Intersection && raw_spec.intersection().is_empty() {
            return Err(TableSpecError::EmptyIntersection);
        }
        let transformations = filter_mode
            .relevant(&raw_spec)
            .iter()
            .enumerate()
            .map(|(position, column)| {
                let transformation =
                    Transformation::with_defaults(column.clone(), position, true, registry);
                (column.name.clone(), transformation)
            })
            .collect::<HashMap<_, _>>();
        let unknown_column_position = transformations.len();
        Ok(Self {
            raw_spec,
            transformations,
            filter_mode,
            keep_unknown_columns: true,
            unknown_column_position,
        })
    }

    /// Assembles a model from parts whose invariants the caller guarantees.
    pub(crate) fn from_parts(
        raw_spec: RawSpec,
        transformations: Vec<Transformation>,
        filter_mode: FilterMode,
        keep_unknown_columns: bool,
        unknown_column_position: usize,
    ) -> Self {
        let count = transformations.len();
        let transformations = transformations
            .into_iter()
            .map(|t| (t.column.name.clone(), t))
            .collect();
        Self {
            raw_spec,
            transformations,
            filter_mode,
            keep_unknown_columns,
            unknown_column_position: unknown_column_position.min(count),
        }
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

    pub fn len(&self) -> usize {
        self.transformations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }

    pub fn transformation(&self, name: &str) -> Option<&Transformation> {
        self.transformations.get(name)
    }

    /// Transformations in output position order.
    pub fn ordered(&self) -> Vec<&Transformation> {
        self.transformations
            .values()
            .sorted_by_key(|t| t.position)
            .collect()
    }

    /// Output names of the kept columns, in output order.
    pub fn kept_output_names(&self) -> Vec<&str> {
        self.ordered()
            .into_iter()
            .filter(|t| t.keep)
            .map(|t| t.output_name.as_str())
            .collect()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Transformation> {
        self.transformations
            .get_mut(name)
            .ok_or_else(|| TableSpecError::UnknownColumn {
                name: name.to_string(),
            })
    }

    pub fn set_keep(&mut self, name: &str, keep: bool) -> Result<()> {
        self.get_mut(name)?.keep = keep;
        Ok(())
    }

    /// Renames the output column. Collisions are reported by
    /// [`TransformationModel::validate`], so they can be fixed step by step.
    pub fn set_output_name(&mut self, name: &str, output_name: impl Into<String>) -> Result<()> {
        self.get_mut(name)?.output_name = output_name.into();
        Ok(())
    }

    pub fn set_conversion_path(
        &mut self,
        name: &str,
        path: ConversionPath,
        registry: &dyn ConversionRegistry,
    ) -> Result<()> {
        let transformation = self.get_mut(name)?;
        let external = transformation.column.external_type;
        if !registry.available_for(external).contains(&path) {
            return Err(TableSpecError::InvalidConversionPath {
                column: name.to_string(),
                column_type: external,
                converter: path.converter.to_string(),
            });
        }
        transformation.path = path;
        Ok(())
    }

    /// Moves `name` to `position` (clamped to the last slot), shifting the
    /// columns in between by one. The anchor slot is left untouched.
    pub fn move_to(&mut self, name: &str, position: usize) -> Result<()> {
        if !self.transformations.contains_key(name) {
            return Err(TableSpecError::UnknownColumn {
                name: name.to_string(),
            });
        }
        let mut order = self
            .ordered()
            .into_iter()
            .map(|t| t.column.name.clone())
            .filter(|existing| existing != name)
            .collect::<Vec<_>>();
        let target = position.min(order.len());
        order.insert(target, name.to_string());
        for (slot, column) in order.iter().enumerate() {
            if let Some(transformation) = self.transformations.get_mut(column) {
                transformation.position = slot;
            }
        }
        Ok(())
    }

    pub fn set_keep_unknown_columns(&mut self, keep: bool) {
        self.keep_unknown_columns = keep;
    }

    /// Sets the slot where newly discovered columns are inserted, clamped to
    /// the end of the output.
    pub fn set_unknown_column_position(&mut self, position: usize) {
        self.unknown_column_position = position.min(self.len());
    }

    /// Switches between union and intersection filtering.
    ///
    /// Columns relevant under both modes keep their settings and relative
    /// order; columns becoming relevant are inserted at the anchor with
    /// default settings; columns no longer relevant are dropped.
    pub fn set_filter_mode(
        &mut self,
        filter_mode: FilterMode,
        registry: &dyn ConversionRegistry,
    ) -> Result<()> {
        if filter_mode == self.filter_mode {
            return Ok(());
        }
        if filter_mode == FilterMode::Intersection && self.raw_spec.intersection().is_empty() {
            return Err(TableSpecError::EmptyIntersection);
        }
        debug!("Switching filter mode {} -> {}", self.filter_mode, filter_mode);
        let raw_spec = self.raw_spec.clone();
        *self = reconcile::reslot(self, raw_spec, filter_mode, registry);
        Ok(())
    }

    /// Restores default keep flag, output name and conversion path of a
    /// column. Its position is unchanged.
    pub fn reset_column(&mut self, name: &str, registry: &dyn ConversionRegistry) -> Result<()> {
        let transformation = self.get_mut(name)?;
        transformation.keep = true;
        transformation.output_name = transformation.column.name.clone();
        transformation.path = registry.default_for(transformation.column.external_type);
        Ok(())
    }

    /// Fails on the first kept output name used twice.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self.kept_output_names().into_iter().duplicates().next() {
            return Err(TableSpecError::DuplicateOutputName {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

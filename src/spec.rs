//! Column and table specs per source item, and the raw spec combining them.
//!
//! A [`TableSpec`] describes one scanned item (a CSV file) as an ordered list
//! of [`ColumnSpec`]s. [`ItemSpecs`] keeps the specs of every item of a source
//! group in insertion order, because that order decides the column order of
//! the combined [`RawSpec`]:
//!
//! - the **union** lists every distinct column name, first-seen order across
//!   items and then within each item;
//! - the **intersection** is the sub-sequence of the union whose names occur in
//!   every item.

use std::collections::{HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TableSpecError},
    types::ColumnType,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub external_type: ColumnType,
    #[serde(default = "ColumnSpec::default_has_type")]
    pub has_type: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, external_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            external_type,
            has_type: true,
        }
    }

    /// A column whose values gave no type evidence. It reads as `string`.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_type: ColumnType::String,
            has_type: false,
        }
    }

    pub const fn default_has_type() -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpec {
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Wraps already resolved columns. Names must be unique within the item.
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Builds a spec from raw header cells, resolving empty and duplicate
    /// names first. `types[i] == None` marks column `i` as untyped.
    pub fn from_headers(headers: &[String], types: &[Option<ColumnType>]) -> Self {
        let columns = resolve_column_names(headers)
            .into_iter()
            .enumerate()
            .map(|(idx, name)| match types.get(idx).copied().flatten() {
                Some(ty) => ColumnSpec::new(name, ty),
                None => ColumnSpec::untyped(name),
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Assigns a name to every header cell.
///
/// Blank cells become `Column<n>` where `n` is the 1-based position. A name
/// already taken by an earlier column gets a ` (#k)` suffix with the smallest
/// free `k`.
pub fn resolve_column_names(headers: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut resolved = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("Column{}", idx + 1)
        } else {
            trimmed.to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 1usize;
        while taken.contains(&candidate) {
            candidate = format!("{base} (#{suffix})");
            suffix += 1;
        }
        taken.insert(candidate.clone());
        resolved.push(candidate);
    }
    resolved
}

/// Per-item specs of a source group, in caller-controlled insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSpecs {
    entries: Vec<(String, TableSpec)>,
}

impl ItemSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item, or replaces the spec of an item already present without
    /// moving it.
    pub fn insert(&mut self, item: impl Into<String>, spec: TableSpec) {
        let item = item.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == item) {
            Some((_, slot)) => *slot = spec,
            None => self.entries.push((item, spec)),
        }
    }

    pub fn get(&self, item: &str) -> Option<&TableSpec> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == item)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableSpec)> {
        self.entries.iter().map(|(item, spec)| (item.as_str(), spec))
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(item, _)| item.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, TableSpec)> for ItemSpecs {
    fn from_iter<I: IntoIterator<Item = (S, TableSpec)>>(iter: I) -> Self {
        let mut specs = ItemSpecs::new();
        for (item, spec) in iter {
            specs.insert(item, spec);
        }
        specs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSpec {
    union: Vec<ColumnSpec>,
    intersection: Vec<ColumnSpec>,
}

impl RawSpec {
    /// Combines the specs of all items of a source group.
    ///
    /// When items disagree on a column's type, the union carries the common
    /// supertype; an untyped occurrence never overrides a typed one.
    pub fn build(items: &ItemSpecs) -> Result<Self> {
        if items.is_empty() {
            return Err(TableSpecError::EmptySourceGroup);
        }

        let mut union: Vec<ColumnSpec> = Vec::new();
        let mut index_by_name: HashMap<String, usize> = HashMap::new();
        for (_, spec) in items.iter() {
            for column in spec.columns() {
                match index_by_name.get(&column.name) {
                    Some(&idx) => merge_column_type(&mut union[idx], column),
                    None => {
                        index_by_name.insert(column.name.clone(), union.len());
                        union.push(column.clone());
                    }
                }
            }
        }

        let intersection = union
            .iter()
            .filter(|column| items.iter().all(|(_, spec)| spec.contains(&column.name)))
            .cloned()
            .collect::<Vec<_>>();

        debug!(
            "Raw spec over {} item(s): {} union column(s), {} in intersection",
            items.len(),
            union.len(),
            intersection.len()
        );
        Ok(Self {
            union,
            intersection,
        })
    }

    pub fn union(&self) -> &[ColumnSpec] {
        &self.union
    }

    pub fn intersection(&self) -> &[ColumnSpec] {
        &self.intersection
    }

    pub fn union_index(&self, name: &str) -> Option<usize> {
        self.union.iter().position(|c| c.name == name)
    }

    pub fn union_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.union.iter().find(|c| c.name == name)
    }

    pub fn in_intersection(&self, name: &str) -> bool {
        self.intersection.iter().any(|c| c.name == name)
    }
}

fn merge_column_type(existing: &mut ColumnSpec, incoming: &ColumnSpec) {
    match (existing.has_type, incoming.has_type) {
        (false, true) => {
            existing.external_type = incoming.external_type;
            existing.has_type = true;
        }
        (true, true) => {
            existing.external_type = existing
                .external_type
                .common_supertype(incoming.external_type);
        }
        _ => {}
    }
}

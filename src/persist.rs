//! YAML persistence of [`TableSpecConfig`].
//!
//! Every document is read into one permissive [`PersistedConfig`] and then
//! handed to the decoder registered for its `version`. Documents without a
//! version come from the legacy format, which stored only the filtered output
//! schema; its decoder rebuilds the full union-aligned vectors.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result as AnyResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::{OutputColumn, TableSpecConfig},
    conversion::{ConversionPath, ConversionRegistry, ConverterId},
    error::{Result, TableSpecError},
    spec::{ColumnSpec, ItemSpecs, TableSpec},
    transformation::FilterMode,
    types::ColumnType,
};

pub const CURRENT_VERSION: u32 = 2;
const LEGACY_VERSION: u32 = 1;

type Decoder = fn(PersistedConfig, &dyn ConversionRegistry, ColumnType) -> Result<TableSpecConfig>;

const DECODERS: &[(u32, Decoder)] = &[
    (LEGACY_VERSION, decode_legacy as Decoder),
    (CURRENT_VERSION, decode_current as Decoder),
];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    root_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<Vec<OutputColumn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    production_paths: Option<Vec<ConverterId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    individual_specs: Option<Vec<PersistedItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    positional_mapping: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep: Option<Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_unknown_columns: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unknown_column_position: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedItem {
    item: String,
    columns: Vec<String>,
}

impl TableSpecConfig {
    pub fn save(&self, path: &Path) -> AnyResult<()> {
        let yaml = self.to_yaml_string()?;
        std::fs::write(path, yaml).with_context(|| format!("Writing config file {path:?}"))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(&PersistedConfig::from_config(self)).map_err(TableSpecError::Serialize)
    }

    /// Loads a config saved by any known format version.
    ///
    /// `fallback_type` is the most generic external type; legacy documents
    /// that did not persist every union column read the missing ones as that
    /// type.
    pub fn load(
        path: &Path,
        registry: &dyn ConversionRegistry,
        fallback_type: ColumnType,
    ) -> AnyResult<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let persisted: PersistedConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| TableSpecError::invalid_state(err.to_string()))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        let config = decode(persisted, registry, fallback_type)
            .with_context(|| format!("Loading config file {path:?}"))?;
        Ok(config)
    }

    pub fn from_yaml_str(
        yaml: &str,
        registry: &dyn ConversionRegistry,
        fallback_type: ColumnType,
    ) -> Result<Self> {
        let persisted: PersistedConfig = serde_yaml::from_str(yaml)
            .map_err(|err| TableSpecError::invalid_state(err.to_string()))?;
        decode(persisted, registry, fallback_type)
    }
}

impl PersistedConfig {
    fn from_config(config: &TableSpecConfig) -> Self {
        PersistedConfig {
            version: Some(CURRENT_VERSION),
            root_id: Some(config.root_id().to_string()),
            filter_mode: Some(config.filter_mode().as_str().to_string()),
            merge_mode: None,
            output_schema: Some(config.schema().to_vec()),
            original_names: Some(config.original_names().to_vec()),
            production_paths: Some(
                config
                    .paths()
                    .iter()
                    .map(|path| path.converter.clone())
                    .collect(),
            ),
            individual_specs: Some(
                config
                    .item_specs()
                    .iter()
                    .map(|(item, spec)| PersistedItem {
                        item: item.to_string(),
                        columns: spec.names(),
                    })
                    .collect(),
            ),
            positional_mapping: Some(config.positional_mapping().to_vec()),
            keep: Some(config.keep_flags().to_vec()),
            keep_unknown_columns: Some(config.keep_unknown_columns()),
            unknown_column_position: Some(config.unknown_column_position()),
        }
    }
}

fn decode(
    persisted: PersistedConfig,
    registry: &dyn ConversionRegistry,
    fallback_type: ColumnType,
) -> Result<TableSpecConfig> {
    let version = persisted.version.unwrap_or(LEGACY_VERSION);
    let Some((_, decoder)) = DECODERS.iter().find(|(known, _)| *known == version) else {
        return Err(TableSpecError::invalid_state(format!(
            "unsupported config version {version}"
        )));
    };
    debug!("Decoding table spec config version {version}");
    decoder(persisted, registry, fallback_type)
}

fn decode_current(
    persisted: PersistedConfig,
    registry: &dyn ConversionRegistry,
    _fallback_type: ColumnType,
) -> Result<TableSpecConfig> {
    let root_id = required(persisted.root_id, "root_id")?;
    let items = required(persisted.individual_specs, "individual_specs")?;
    let schema = required(persisted.output_schema, "output_schema")?;
    let original_names = required(persisted.original_names, "original_names")?;
    let converters = required(persisted.production_paths, "production_paths")?;
    let positional_mapping = required(persisted.positional_mapping, "positional_mapping")?;
    let keep = required(persisted.keep, "keep")?;
    let filter_mode = required(persisted.filter_mode, "filter_mode")?
        .parse::<FilterMode>()
        .map_err(|err| TableSpecError::invalid_state(err.to_string()))?;

    if schema.len() != original_names.len() || converters.len() != original_names.len() {
        return Err(TableSpecError::invalid_state(format!(
            "output_schema ({}), original_names ({}) and production_paths ({}) differ in length",
            schema.len(),
            original_names.len(),
            converters.len()
        )));
    }
    let paths = resolve_paths(&converters, registry)?;

    let types = original_names
        .iter()
        .zip(&paths)
        .map(|(name, path)| (name.as_str(), path.source))
        .collect::<HashMap<_, _>>();
    let item_specs = rebuild_items(items, &types)?;

    let mut builder = TableSpecConfig::builder(root_id, item_specs)
        .filter_mode(filter_mode)
        .keep_unknown_columns(persisted.keep_unknown_columns.unwrap_or(true))
        .positional_mapping(positional_mapping)
        .keep(keep);
    if let Some(position) = persisted.unknown_column_position {
        builder = builder.unknown_column_position(position);
    }
    for ((original_name, output), path) in original_names.into_iter().zip(schema).zip(paths) {
        builder = builder.column(original_name, output, path);
    }
    builder.build()
}

fn decode_legacy(
    persisted: PersistedConfig,
    registry: &dyn ConversionRegistry,
    fallback_type: ColumnType,
) -> Result<TableSpecConfig> {
    let root_id = required(persisted.root_id, "root_id")?;
    let items = required(persisted.individual_specs, "individual_specs")?;
    let schema = required(persisted.output_schema, "output_schema")?;
    let converters = persisted.production_paths.unwrap_or_default();
    let original_names = match persisted.original_names {
        Some(names) => names,
        None => {
            warn!("Legacy config for '{root_id}' has no original names; using output names");
            schema.iter().map(|column| column.name.clone()).collect()
        }
    };
    if schema.len() != original_names.len() || converters.len() != schema.len() {
        return Err(TableSpecError::invalid_state(format!(
            "output_schema ({}), original_names ({}) and production_paths ({}) differ in length",
            schema.len(),
            original_names.len(),
            converters.len()
        )));
    }
    let paths = resolve_paths(&converters, registry)?;

    let filter_mode = match (persisted.filter_mode, persisted.merge_mode) {
        (Some(mode), _) => mode
            .parse::<FilterMode>()
            .map_err(|err| TableSpecError::invalid_state(err.to_string()))?,
        (None, Some(merge_mode)) => {
            let mode = if merge_mode.trim().eq_ignore_ascii_case("intersection") {
                FilterMode::Intersection
            } else {
                FilterMode::Union
            };
            warn!("Legacy config for '{root_id}' uses merge mode '{merge_mode}'; reading it as {mode}");
            mode
        }
        (None, None) => FilterMode::Union,
    };

    let union_names = union_names(&items);
    let persisted_columns = original_names
        .into_iter()
        .zip(schema)
        .zip(paths)
        .map(|((original_name, output), path)| (original_name, (output, path)))
        .collect::<HashMap<_, _>>();
    if let Some(stray) = persisted_columns
        .keys()
        .find(|name| !union_names.contains(name))
    {
        return Err(TableSpecError::invalid_state(format!(
            "column '{stray}' is not part of any item spec"
        )));
    }

    let missing = union_names.len() - persisted_columns.len();
    if missing > 0 {
        warn!(
            "Legacy config for '{root_id}' lacks {missing} union column(s); reading them as {fallback_type} and dropping them from the output"
        );
    }

    let mut columns = Vec::with_capacity(union_names.len());
    let mut derived_keep = Vec::with_capacity(union_names.len());
    for name in &union_names {
        match persisted_columns.get(name) {
            Some((output, path)) => {
                derived_keep.push(true);
                columns.push((name.clone(), output.clone(), path.clone()));
            }
            None => {
                let path = registry.default_for(fallback_type);
                derived_keep.push(false);
                columns.push((
                    name.clone(),
                    OutputColumn::new(name.clone(), path.destination),
                    path,
                ));
            }
        }
    }

    let keep = match persisted.keep {
        Some(keep) => keep,
        None => {
            warn!("Legacy config for '{root_id}' has no keep flags; deriving them from the output schema");
            derived_keep
        }
    };

    let types = columns
        .iter()
        .map(|(name, _, path)| (name.as_str(), path.source))
        .collect::<HashMap<_, _>>();
    let item_specs = rebuild_items(items, &types)?;

    let mut builder = TableSpecConfig::builder(root_id, item_specs)
        .filter_mode(filter_mode)
        .keep_unknown_columns(persisted.keep_unknown_columns.unwrap_or(true))
        .keep(keep);
    if let Some(mapping) = persisted.positional_mapping {
        builder = builder.positional_mapping(mapping);
    }
    if let Some(position) = persisted.unknown_column_position {
        builder = builder.unknown_column_position(position);
    }
    for (original_name, output, path) in columns {
        builder = builder.column(original_name, output, path);
    }
    builder.build()
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| TableSpecError::invalid_state(format!("missing '{key}'")))
}

fn resolve_paths(
    converters: &[ConverterId],
    registry: &dyn ConversionRegistry,
) -> Result<Vec<ConversionPath>> {
    converters
        .iter()
        .map(|converter| {
            registry
                .resolve(converter)
                .ok_or_else(|| TableSpecError::UnknownConversionPath {
                    converter: converter.to_string(),
                })
        })
        .collect()
}

/// Column names of all items, first occurrence first.
fn union_names(items: &[PersistedItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .flat_map(|item| item.columns.iter())
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

fn rebuild_items(
    items: Vec<PersistedItem>,
    types: &HashMap<&str, ColumnType>,
) -> Result<ItemSpecs> {
    let mut specs = ItemSpecs::new();
    for PersistedItem { item, columns } in items {
        let columns = columns
            .into_iter()
            .map(|name| match types.get(name.as_str()) {
                Some(&ty) => Ok(ColumnSpec::new(name, ty)),
                None => Err(TableSpecError::invalid_state(format!(
                    "column '{name}' of item '{item}' has no conversion path"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        specs.insert(item, TableSpec::new(columns));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::StandardRegistry;

    const LEGACY_WITHOUT_KEEP: &str = "\
root_id: sales
merge_mode: UNION
output_schema:
  - name: x
    type: integer
  - name: y
    type: string
production_paths:
  - integer->integer
  - string->string
individual_specs:
  - item: a.csv
    columns: [x, y]
  - item: b.csv
    columns: [y, z]
";

    fn legacy(yaml: &str) -> Result<TableSpecConfig> {
        TableSpecConfig::from_yaml_str(yaml, &StandardRegistry, ColumnType::String)
    }

    #[test]
    fn legacy_keep_flags_follow_output_schema_membership() {
        let config = legacy(LEGACY_WITHOUT_KEEP).unwrap();
        assert_eq!(config.keep_flags(), &[true, true, false]);
        assert_eq!(config.positional_mapping(), &[0, 1, 2]);
        assert_eq!(config.original_names(), &["x", "y", "z"]);
        assert_eq!(config.paths()[2], StandardRegistry.default_for(ColumnType::String));
        assert_eq!(config.filter_mode(), FilterMode::Union);
        assert!(config.keep_unknown_columns());
        assert_eq!(config.unknown_column_position(), 3);
    }

    #[test]
    fn legacy_intersection_merge_mode_maps_to_intersection() {
        let yaml = LEGACY_WITHOUT_KEEP.replace("merge_mode: UNION", "merge_mode: INTERSECTION");
        let config = legacy(&yaml).unwrap();
        assert_eq!(config.filter_mode(), FilterMode::Intersection);
        assert_eq!(config.unknown_column_position(), 1);

        let yaml = LEGACY_WITHOUT_KEEP.replace("merge_mode: UNION", "merge_mode: APPEND");
        assert_eq!(legacy(&yaml).unwrap().filter_mode(), FilterMode::Union);
    }

    #[test]
    fn legacy_original_names_default_to_output_names() {
        let config = legacy(LEGACY_WITHOUT_KEEP).unwrap();
        let names = config
            .output_schema()
            .unwrap()
            .into_iter()
            .map(|column| column.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn current_format_round_trips() {
        let items: ItemSpecs = [
            (
                "a.csv",
                TableSpec::new(vec![
                    ColumnSpec::new("id", ColumnType::Guid),
                    ColumnSpec::new("when", ColumnType::Date),
                ]),
            ),
            (
                "b.csv",
                TableSpec::new(vec![ColumnSpec::new("when", ColumnType::Date)]),
            ),
        ]
        .into_iter()
        .collect();
        let config = TableSpecConfig::compute_fresh(
            "orders",
            items,
            FilterMode::Intersection,
            &StandardRegistry,
        )
        .unwrap();

        let yaml = config.to_yaml_string().unwrap();
        assert!(yaml.starts_with("version: 2"));
        let loaded = TableSpecConfig::from_yaml_str(&yaml, &StandardRegistry, ColumnType::String)
            .unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn current_format_requires_every_vector() {
        let yaml = "\
version: 2
root_id: sales
filter_mode: union
output_schema:
  - name: x
    type: integer
production_paths: [integer->integer]
individual_specs:
  - item: a.csv
    columns: [x]
positional_mapping: [0]
keep: [true]
";
        let err = TableSpecConfig::from_yaml_str(yaml, &StandardRegistry, ColumnType::String)
            .unwrap_err();
        assert!(err.to_string().contains("original_names"));
    }

    #[test]
    fn missing_root_id_is_invalid() {
        let yaml = LEGACY_WITHOUT_KEEP.replace("root_id: sales\n", "");
        assert!(matches!(
            legacy(&yaml).unwrap_err(),
            TableSpecError::InvalidPersistedState { .. }
        ));
    }

    #[test]
    fn unknown_converter_is_reported() {
        let yaml = LEGACY_WITHOUT_KEEP.replace("string->string", "string->guid");
        let err = legacy(&yaml).unwrap_err();
        assert!(
            matches!(err, TableSpecError::UnknownConversionPath { ref converter } if converter == "string->guid")
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let yaml = format!("version: 7\n{LEGACY_WITHOUT_KEEP}");
        let err = legacy(&yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported config version 7"));
    }
}

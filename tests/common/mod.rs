#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_unify::{ColumnSpec, ColumnType, ItemSpecs, TableSpec};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of `name` under the workspace as a string, whether or not the
    /// file exists yet.
    pub fn file(&self, name: &str) -> String {
        self.temp_dir
            .path()
            .join(name)
            .to_str()
            .expect("utf-8 temp path")
            .to_string()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Builds item specs from `(item, [(column, type)])` pairs.
pub fn items(specs: Vec<(&str, Vec<(&str, ColumnType)>)>) -> ItemSpecs {
    specs
        .into_iter()
        .map(|(item, columns)| {
            let spec = TableSpec::new(
                columns
                    .into_iter()
                    .map(|(name, ty)| ColumnSpec::new(name, ty))
                    .collect(),
            );
            (item, spec)
        })
        .collect()
}

pub mod strategies {
    use csv_unify::{ColumnSpec, ColumnType, ItemSpecs, TableSpec};
    use proptest::prelude::*;

    pub const NAMES: [&str; 8] = [
        "id", "name", "amount", "ordered_at", "flag", "note", "code", "region",
    ];

    pub fn column_type() -> impl Strategy<Value = ColumnType> {
        prop::sample::select(ColumnType::ALL.to_vec())
    }

    /// One item: a shuffled, non-empty subset of [`NAMES`] with random types.
    pub fn table_spec() -> impl Strategy<Value = TableSpec> {
        prop::sample::subsequence(NAMES.to_vec(), 1..=NAMES.len())
            .prop_shuffle()
            .prop_flat_map(|names| {
                let len = names.len();
                (Just(names), prop::collection::vec(column_type(), len))
            })
            .prop_map(|(names, types)| {
                TableSpec::new(
                    names
                        .into_iter()
                        .zip(types)
                        .map(|(name, ty)| ColumnSpec::new(name, ty))
                        .collect(),
                )
            })
    }

    pub fn item_specs() -> impl Strategy<Value = ItemSpecs> {
        prop::collection::vec(table_spec(), 1..5).prop_map(|tables| {
            tables
                .into_iter()
                .enumerate()
                .map(|(idx, spec)| (format!("part-{idx}.csv"), spec))
                .collect()
        })
    }
}

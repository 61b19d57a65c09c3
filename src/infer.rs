//! Sample-based type inference for CSV files.

use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::{
    data::{parse_guid, parse_naive_date, parse_naive_datetime},
    io_utils,
    reader::CsvOptions,
    spec::TableSpec,
    types::ColumnType,
};

pub const DEFAULT_SAMPLE_ROWS: usize = 2000;

#[derive(Debug, Clone)]
struct TypeCandidate {
    observed: bool,
    possible_boolean: bool,
    possible_integer: bool,
    possible_float: bool,
    possible_date: bool,
    possible_datetime: bool,
    possible_guid: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            observed: false,
            possible_boolean: true,
            possible_integer: true,
            possible_float: true,
            possible_date: true,
            possible_datetime: true,
            possible_guid: true,
        }
    }

    fn update(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        self.observed = true;
        if self.possible_boolean
            && !matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n"
            )
        {
            self.possible_boolean = false;
        }
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && value.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(value).is_err() {
            self.possible_date = false;
        }
        if self.possible_datetime && parse_naive_datetime(value).is_err() {
            self.possible_datetime = false;
        }
        if self.possible_guid && parse_guid(value).is_err() {
            self.possible_guid = false;
        }
    }

    /// `None` when no sampled cell carried a value.
    fn decide(&self) -> Option<ColumnType> {
        if !self.observed {
            None
        } else if self.possible_boolean {
            Some(ColumnType::Boolean)
        } else if self.possible_integer {
            Some(ColumnType::Integer)
        } else if self.possible_float {
            Some(ColumnType::Float)
        } else if self.possible_date {
            Some(ColumnType::Date)
        } else if self.possible_datetime {
            Some(ColumnType::DateTime)
        } else if self.possible_guid {
            Some(ColumnType::Guid)
        } else {
            Some(ColumnType::String)
        }
    }
}

/// Reads the header of `path` and infers each column's type from up to
/// `options.sample_rows` records (all records when zero).
pub fn infer_table_spec(path: &Path, options: &CsvOptions) -> Result<TableSpec> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, options.encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;
    let mut candidates = vec![TypeCandidate::new(); headers.len()];

    let mut record = csv::ByteRecord::new();
    let mut processed = 0usize;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading row {} of {path:?}", processed + 1))?
    {
        if options.sample_rows > 0 && processed >= options.sample_rows {
            break;
        }
        let decoded = io_utils::decode_record(&record, options.encoding)?;
        for (candidate, field) in candidates.iter_mut().zip(&decoded) {
            candidate.update(field);
        }
        processed += 1;
    }

    let types = candidates
        .iter()
        .map(TypeCandidate::decide)
        .collect::<Vec<_>>();
    let spec = TableSpec::from_headers(&headers, &types);
    debug!(
        "Inferred {} column(s) of {path:?} from {processed} sampled row(s)",
        spec.len()
    );
    Ok(spec)
}

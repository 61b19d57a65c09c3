//! Multi-source read orchestration.
//!
//! [`MultiTableReader`] turns a list of items into one logical table: it scans
//! every item into a fresh [`TableSpecConfig`] (or reuses the cached one when
//! it was computed for exactly the same items) and then streams each item's
//! rows, converted along the configured paths, in item order.
//!
//! Scanning and row access go through the [`SpecScanner`] and [`RowSource`]
//! collaborators; [`CsvSource`] implements both for CSV files.

use std::{
    io::Write,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, bail};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};

use crate::{
    config::{OutputColumn, OutputSlot, TableSpecConfig},
    conversion::ConversionRegistry,
    data::Value,
    error::{Result, TableSpecError},
    infer::{self, DEFAULT_SAMPLE_ROWS},
    io_utils,
    spec::{ItemSpecs, TableSpec},
    transformation::FilterMode,
};

/// One converted output row; `None` marks a missing value.
pub type Row = Vec<Option<Value>>;

/// Raw text rows of one item, header excluded.
pub type RawRows<'a> = Box<dyn Iterator<Item = anyhow::Result<Vec<String>>> + 'a>;

#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    /// Field delimiter; derived from the file extension when unset.
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    /// Records sampled for type inference; zero samples every record.
    pub sample_rows: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

/// Cooperative cancellation flag shared between a running scan and its
/// caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait SpecScanner {
    /// Reads the column spec of one item. Blocking.
    fn scan_item_spec(&self, item: &str) -> anyhow::Result<TableSpec>;
}

pub trait RowSource {
    /// Opens a fresh forward-only iterator over the item's data rows.
    fn read_rows(&self, item: &str) -> anyhow::Result<RawRows<'_>>;
}

pub trait RowSink {
    /// Called once with the output schema before the first row.
    fn begin(&mut self, _schema: &[OutputColumn]) -> anyhow::Result<()> {
        Ok(())
    }

    fn push(&mut self, row: Row) -> anyhow::Result<()>;

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Items are file paths. Every item is opened twice (once to infer its spec,
/// once for its rows), so standard input (`-`) is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSource {
    options: CsvOptions,
}

impl CsvSource {
    pub fn new(options: CsvOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    fn item_path(item: &str) -> anyhow::Result<&Path> {
        let path = Path::new(item);
        if io_utils::is_dash(path) {
            bail!("Standard input ('-') cannot be used as an item; pass a file path instead");
        }
        Ok(path)
    }
}

impl SpecScanner for CsvSource {
    fn scan_item_spec(&self, item: &str) -> anyhow::Result<TableSpec> {
        infer::infer_table_spec(Self::item_path(item)?, &self.options)
            .with_context(|| format!("Inferring column types of {item}"))
    }
}

impl RowSource for CsvSource {
    fn read_rows(&self, item: &str) -> anyhow::Result<RawRows<'_>> {
        let path = Self::item_path(item)?;
        let delimiter = io_utils::resolve_input_delimiter(path, self.options.delimiter);
        let reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let encoding = self.options.encoding;
        let rows = reader.into_byte_records().map(move |record| {
            let record = record.context("Reading CSV record")?;
            io_utils::decode_record(&record, encoding)
        });
        Ok(Box::new(rows))
    }
}

/// Writes converted rows as CSV, header first. Missing values are empty
/// cells.
pub struct CsvRowSink<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> CsvRowSink<W> {
    pub fn new(writer: csv::Writer<W>) -> Self {
        Self { writer, rows: 0 }
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

impl<W: Write> RowSink for CsvRowSink<W> {
    fn begin(&mut self, schema: &[OutputColumn]) -> anyhow::Result<()> {
        self.writer
            .write_record(schema.iter().map(|column| column.name.as_str()))
            .context("Writing header row")
    }

    fn push(&mut self, row: Row) -> anyhow::Result<()> {
        let cells = row
            .iter()
            .map(|value| value.as_ref().map(Value::as_display).unwrap_or_default());
        self.writer
            .write_record(cells)
            .with_context(|| format!("Writing output row {}", self.rows + 1))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("Flushing output")
    }
}

/// Scans every item in order, checking `cancel` before each one and once
/// more after the last.
pub fn scan_items(
    scanner: &dyn SpecScanner,
    items: &[String],
    cancel: &CancellationToken,
) -> Result<ItemSpecs> {
    let check_cancelled = |scanned: usize| {
        if cancel.is_cancelled() {
            info!("Scan cancelled after {scanned} of {} item(s)", items.len());
            return Err(TableSpecError::Cancelled);
        }
        Ok(())
    };
    let mut specs = ItemSpecs::new();
    for item in items {
        check_cancelled(specs.len())?;
        let spec = scanner
            .scan_item_spec(item)
            .map_err(|source| TableSpecError::Scan {
                item: item.clone(),
                source,
            })?;
        debug!("Scanned '{item}': {} column(s)", spec.len());
        specs.insert(item.clone(), spec);
    }
    check_cancelled(specs.len())?;
    Ok(specs)
}

/// Builds the default configuration for a group of scanned items.
pub fn compute_fresh_config(
    root_id: &str,
    items: ItemSpecs,
    filter_mode: FilterMode,
    registry: &dyn ConversionRegistry,
) -> Result<TableSpecConfig> {
    TableSpecConfig::compute_fresh(root_id, items, filter_mode, registry)
}

pub struct MultiTableReader<'r, S> {
    source: S,
    registry: &'r dyn ConversionRegistry,
    filter_mode: FilterMode,
    cached: Option<TableSpecConfig>,
    cancel: CancellationToken,
}

impl<'r, S> MultiTableReader<'r, S>
where
    S: SpecScanner + RowSource,
{
    pub fn new(source: S, registry: &'r dyn ConversionRegistry) -> Self {
        Self {
            source,
            registry,
            filter_mode: FilterMode::Union,
            cached: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Filter mode used when a fresh configuration has to be computed.
    pub fn with_filter_mode(mut self, filter_mode: FilterMode) -> Self {
        self.filter_mode = filter_mode;
        self
    }

    /// Seeds the cache with a previously saved configuration.
    pub fn with_config(mut self, config: TableSpecConfig) -> Self {
        self.cached = Some(config);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cached_config(&self) -> Option<&TableSpecConfig> {
        self.cached.as_ref()
    }

    /// The configuration for `items`: the cached one if it was computed for
    /// exactly this root and item set, otherwise a fresh scan that replaces
    /// the cache.
    pub fn config_for(&mut self, root_id: &str, items: &[String]) -> Result<&TableSpecConfig> {
        match self.cached.take() {
            Some(config) if config.is_configured_with(root_id, items) => {
                debug!("Reusing cached configuration for '{root_id}'");
                Ok(&*self.cached.insert(config))
            }
            _ => {
                let specs = scan_items(&self.source, items, &self.cancel)?;
                let config = compute_fresh_config(root_id, specs, self.filter_mode, self.registry)?;
                Ok(&*self.cached.insert(config))
            }
        }
    }

    /// Lazily converted rows of every item of `config`, in item order.
    pub fn rows<'a>(&'a self, config: &'a TableSpecConfig) -> Rows<'a> {
        Rows::new(&self.source, self.registry, config)
    }

    /// Streams the unified table for `items` into `sink` and returns the
    /// number of rows pushed.
    pub fn read_into(
        &mut self,
        root_id: &str,
        items: &[String],
        sink: &mut dyn RowSink,
    ) -> Result<usize> {
        let config = self.config_for(root_id, items)?.clone();
        let schema = config.output_schema()?;
        sink.begin(&schema).map_err(TableSpecError::Output)?;
        let mut pushed = 0usize;
        for row in self.rows(&config) {
            sink.push(row?).map_err(TableSpecError::Output)?;
            pushed += 1;
        }
        sink.finish().map_err(TableSpecError::Output)?;
        info!("Read {pushed} row(s) from {} item(s) into '{root_id}'", items.len());
        Ok(pushed)
    }
}

struct ActiveItem<'a> {
    item: &'a str,
    /// Per output slot, the index of the feeding column in this item.
    columns: Vec<Option<usize>>,
    rows: RawRows<'a>,
}

/// Iterator over converted rows; see [`MultiTableReader::rows`].
pub struct Rows<'a> {
    source: &'a dyn RowSource,
    registry: &'a dyn ConversionRegistry,
    slots: Vec<OutputSlot<'a>>,
    items: Vec<(&'a str, &'a TableSpec)>,
    next_item: usize,
    active: Option<ActiveItem<'a>>,
}

impl<'a> Rows<'a> {
    fn new(
        source: &'a dyn RowSource,
        registry: &'a dyn ConversionRegistry,
        config: &'a TableSpecConfig,
    ) -> Self {
        Self {
            source,
            registry,
            slots: config.output_columns(),
            items: config.item_specs().iter().collect(),
            next_item: 0,
            active: None,
        }
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(active) = self.active.as_mut() {
                match active.rows.next() {
                    Some(Ok(raw)) => {
                        return Some(convert_row(self.registry, &self.slots, &active.columns, &raw));
                    }
                    Some(Err(source)) => {
                        return Some(Err(TableSpecError::Scan {
                            item: active.item.to_string(),
                            source,
                        }));
                    }
                    None => self.active = None,
                }
            }

            let (item, spec) = *self.items.get(self.next_item)?;
            self.next_item += 1;
            let columns = self
                .slots
                .iter()
                .map(|slot| spec.column_index(slot.original_name))
                .collect();
            let source = self.source;
            match source.read_rows(item) {
                Ok(rows) => {
                    debug!("Reading rows of '{item}'");
                    self.active = Some(ActiveItem {
                        item,
                        columns,
                        rows,
                    });
                }
                Err(source) => {
                    return Some(Err(TableSpecError::Scan {
                        item: item.to_string(),
                        source,
                    }));
                }
            }
        }
    }
}

fn convert_row(
    registry: &dyn ConversionRegistry,
    slots: &[OutputSlot<'_>],
    columns: &[Option<usize>],
    raw: &[String],
) -> Result<Row> {
    slots
        .iter()
        .zip(columns)
        .map(|(slot, column)| {
            let Some(cell) = column.and_then(|idx| raw.get(idx)) else {
                return Ok(None);
            };
            registry
                .convert(slot.path, cell)
                .map_err(|source| TableSpecError::Conversion {
                    column: slot.column.name.clone(),
                    value: cell.clone(),
                    converter: slot.path.converter.to_string(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::HashMap,
    };

    use super::*;
    use crate::{conversion::StandardRegistry, spec::ColumnSpec, types::ColumnType};

    #[derive(Default)]
    struct MemorySource {
        tables: HashMap<String, (TableSpec, Vec<Vec<String>>)>,
        scans: Cell<usize>,
        /// Cancelled from inside the first scan.
        cancel_on_scan: RefCell<Option<CancellationToken>>,
    }

    impl MemorySource {
        fn with(mut self, item: &str, columns: &[(&str, ColumnType)], rows: &[&[&str]]) -> Self {
            let spec = TableSpec::new(
                columns
                    .iter()
                    .map(|(name, ty)| ColumnSpec::new(*name, *ty))
                    .collect(),
            );
            let rows = rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            self.tables.insert(item.to_string(), (spec, rows));
            self
        }
    }

    impl SpecScanner for MemorySource {
        fn scan_item_spec(&self, item: &str) -> anyhow::Result<TableSpec> {
            self.scans.set(self.scans.get() + 1);
            if let Some(token) = self.cancel_on_scan.borrow().as_ref() {
                token.cancel();
            }
            self.tables
                .get(item)
                .map(|(spec, _)| spec.clone())
                .ok_or_else(|| anyhow::anyhow!("no such item"))
        }
    }

    impl RowSource for MemorySource {
        fn read_rows(&self, item: &str) -> anyhow::Result<RawRows<'_>> {
            let (_, rows) = self
                .tables
                .get(item)
                .ok_or_else(|| anyhow::anyhow!("no such item"))?;
            Ok(Box::new(rows.iter().cloned().map(Ok)))
        }
    }

    #[derive(Default)]
    struct VecSink {
        header: Vec<String>,
        rows: Vec<Row>,
        finished: bool,
    }

    impl RowSink for VecSink {
        fn begin(&mut self, schema: &[OutputColumn]) -> anyhow::Result<()> {
            self.header = schema.iter().map(|c| c.name.clone()).collect();
            Ok(())
        }

        fn push(&mut self, row: Row) -> anyhow::Result<()> {
            self.rows.push(row);
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn source() -> MemorySource {
        MemorySource::default()
            .with(
                "a",
                &[("id", ColumnType::Integer), ("name", ColumnType::String)],
                &[&["1", "ann"], &["2", ""]],
            )
            .with(
                "b",
                &[("name", ColumnType::String), ("score", ColumnType::Float)],
                &[&["bob", "2.5"]],
            )
    }

    fn items() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn union_read_fills_missing_columns_with_none() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        let mut sink = VecSink::default();
        let pushed = reader.read_into("people", &items(), &mut sink).unwrap();

        assert_eq!(pushed, 3);
        assert!(sink.finished);
        assert_eq!(sink.header, vec!["id", "name", "score"]);
        assert_eq!(
            sink.rows,
            vec![
                vec![
                    Some(Value::Integer(1)),
                    Some(Value::String("ann".into())),
                    None
                ],
                vec![Some(Value::Integer(2)), None, None],
                vec![
                    None,
                    Some(Value::String("bob".into())),
                    Some(Value::Float(2.5))
                ],
            ]
        );
    }

    #[test]
    fn intersection_read_only_outputs_shared_columns() {
        let registry = StandardRegistry::new();
        let mut reader =
            MultiTableReader::new(source(), &registry).with_filter_mode(FilterMode::Intersection);
        let mut sink = VecSink::default();
        reader.read_into("people", &items(), &mut sink).unwrap();
        assert_eq!(sink.header, vec!["name"]);
        assert_eq!(sink.rows.len(), 3);
    }

    #[test]
    fn cached_config_is_reused_for_the_same_items() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        reader.config_for("people", &items()).unwrap();
        assert_eq!(reader.source.scans.get(), 2);

        let reversed = vec!["b".to_string(), "a".to_string()];
        reader.config_for("people", &reversed).unwrap();
        assert_eq!(reader.source.scans.get(), 2);

        reader.config_for("people", &["a".to_string()]).unwrap();
        assert_eq!(reader.source.scans.get(), 3);
        assert_eq!(reader.cached_config().unwrap().item_specs().len(), 1);
    }

    #[test]
    fn cancelled_scan_yields_no_config() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        reader.cancellation_token().cancel();
        let err = reader.config_for("people", &items()).unwrap_err();
        assert!(matches!(err, TableSpecError::Cancelled));
        assert!(reader.cached_config().is_none());
    }

    #[test]
    fn cancelling_mid_scan_stops_before_the_next_item() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        reader
            .source
            .cancel_on_scan
            .replace(Some(reader.cancellation_token()));
        let err = reader.config_for("people", &items()).unwrap_err();
        assert!(matches!(err, TableSpecError::Cancelled));
        assert_eq!(reader.source.scans.get(), 1);
        assert!(reader.cached_config().is_none());
    }

    #[test]
    fn cancelling_during_the_last_scan_yields_no_config() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        reader.config_for("people", &items()).unwrap();

        reader
            .source
            .cancel_on_scan
            .replace(Some(reader.cancellation_token()));
        let err = reader
            .config_for("people", &["b".to_string()])
            .unwrap_err();
        assert!(matches!(err, TableSpecError::Cancelled));
        assert_eq!(reader.source.scans.get(), 3);
        assert!(reader.cached_config().is_none());
    }

    #[test]
    fn scan_failures_name_the_item() {
        let registry = StandardRegistry::new();
        let mut reader = MultiTableReader::new(source(), &registry);
        let err = reader
            .config_for("people", &["a".to_string(), "missing".to_string()])
            .unwrap_err();
        assert!(matches!(err, TableSpecError::Scan { ref item, .. } if item == "missing"));
    }

    #[test]
    fn unparseable_cells_report_the_column() {
        let registry = StandardRegistry::new();
        let bad = MemorySource::default().with("a", &[("n", ColumnType::Integer)], &[&["x"]]);
        let mut reader = MultiTableReader::new(bad, &registry);
        let mut sink = VecSink::default();
        let err = reader.read_into("root", &["a".to_string()], &mut sink).unwrap_err();
        assert!(matches!(err, TableSpecError::Conversion { ref column, ref value, .. }
            if column == "n" && value == "x"));
    }
}

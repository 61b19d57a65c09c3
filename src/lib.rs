pub mod cli;
pub mod config;
pub mod conversion;
pub mod data;
pub mod error;
pub mod infer;
pub mod io_utils;
pub mod persist;
pub mod reader;
pub mod reconcile;
pub mod spec;
pub mod table;
pub mod transformation;
pub mod types;

use std::{env, path::PathBuf, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::cli::{Cli, Commands};

pub use crate::{
    config::{OutputColumn, OutputSlot, TableSpecConfig, TableSpecConfigBuilder},
    conversion::{ConversionPath, ConversionRegistry, ConverterId, StandardRegistry},
    data::Value,
    error::TableSpecError,
    reader::{
        CancellationToken, CsvOptions, CsvRowSink, CsvSource, MultiTableReader, RowSink,
        RowSource, SpecScanner, compute_fresh_config,
    },
    reconcile::{reconcile_config, reconcile_model},
    spec::{ColumnSpec, ItemSpecs, RawSpec, TableSpec},
    transformation::{FilterMode, Transformation, TransformationModel},
    types::ColumnType,
};

/// External type that legacy configurations fall back to for columns they
/// did not persist.
pub const FALLBACK_TYPE: ColumnType = ColumnType::String;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_unify", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Scan(args) => handle_scan(&args),
        Commands::Reconcile(args) => handle_reconcile(&args),
        Commands::Read(args) => handle_read(&args),
        Commands::Columns(args) => handle_columns(&args),
    }
}

fn handle_scan(args: &cli::ScanArgs) -> Result<()> {
    let registry = StandardRegistry::new();
    let source = CsvSource::new(csv_options(&args.input)?);
    let items = item_ids(&args.input.inputs);
    info!(
        "Scanning {} file(s) for '{}' with delimiter '{}'",
        items.len(),
        args.root,
        printable_delimiter(args.input.delimiter)
    );
    let specs = reader::scan_items(&source, &items, &CancellationToken::new())?;

    let filter_mode = if args.intersection {
        FilterMode::Intersection
    } else {
        FilterMode::Union
    };
    let raw_spec = RawSpec::build(&specs)?;
    let mut model = TransformationModel::new_default(raw_spec, filter_mode, &registry)?;
    if args.drop_unknown_columns {
        model.set_keep_unknown_columns(false);
    }
    let config = model.to_config(&args.root, specs, &registry)?;
    config
        .save(&args.output)
        .with_context(|| format!("Writing configuration to {:?}", args.output))?;
    info!(
        "Configuration with {} output column(s) written to {:?}",
        config.output_columns().len(),
        args.output
    );
    Ok(())
}

fn handle_reconcile(args: &cli::ReconcileArgs) -> Result<()> {
    let registry = StandardRegistry::new();
    let config = TableSpecConfig::load(&args.config, &registry, FALLBACK_TYPE)?;
    let items = item_ids(&args.input.inputs);
    let output = args.output.as_ref().unwrap_or(&args.config);

    let reconciled = if config.is_configured_with(config.root_id(), &items) {
        info!("Files of '{}' are unchanged; keeping the configuration", config.root_id());
        config
    } else {
        let source = CsvSource::new(csv_options(&args.input)?);
        let specs = reader::scan_items(&source, &items, &CancellationToken::new())?;
        reconcile_config(&config, specs, &registry)?
    };
    reconciled
        .save(output)
        .with_context(|| format!("Writing configuration to {output:?}"))?;
    info!(
        "Reconciled configuration for '{}' with {} output column(s) written to {:?}",
        reconciled.root_id(),
        reconciled.output_columns().len(),
        output
    );
    Ok(())
}

fn handle_read(args: &cli::ReadArgs) -> Result<()> {
    let registry = StandardRegistry::new();
    let source = CsvSource::new(csv_options(&args.input)?);
    let items = item_ids(&args.input.inputs);
    let filter_mode = if args.intersection {
        FilterMode::Intersection
    } else {
        FilterMode::Union
    };

    let stored = match &args.config {
        Some(path) => Some(TableSpecConfig::load(path, &registry, FALLBACK_TYPE)?),
        None => None,
    };
    let root = args
        .root
        .clone()
        .or_else(|| stored.as_ref().map(|config| config.root_id().to_string()))
        .unwrap_or_else(|| "default".to_string());

    let mut table_reader =
        MultiTableReader::new(source, &registry).with_filter_mode(filter_mode);
    if let Some(config) = stored {
        let config = if config.root_id() == root && !config.is_configured_with(&root, &items) {
            warn!("Files of '{root}' changed since the configuration was saved; reconciling");
            let specs = reader::scan_items(&source, &items, &table_reader.cancellation_token())?;
            reconcile_config(&config, specs, &registry)?
        } else {
            config
        };
        table_reader = table_reader.with_config(config);
    }

    let delimiter = io_utils::resolve_output_delimiter(args.output.as_deref(), args.output_delimiter);
    let writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    let mut sink = CsvRowSink::new(writer);
    let rows = table_reader.read_into(&root, &items, &mut sink)?;
    debug!("Wrote {} row(s)", sink.rows_written());
    info!("Read {rows} row(s) from {} file(s)", items.len());
    Ok(())
}

fn handle_columns(args: &cli::ColumnsArgs) -> Result<()> {
    let registry = StandardRegistry::new();
    let config = TableSpecConfig::load(&args.config, &registry, FALLBACK_TYPE)?;
    if args.json {
        let schema = config.output_schema()?;
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("Serializing output schema")?
        );
    } else {
        print!("{}", table::render_output_schema(&config)?);
    }
    Ok(())
}

fn csv_options(args: &cli::InputArgs) -> Result<CsvOptions> {
    Ok(CsvOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        sample_rows: args.sample_rows,
    })
}

fn item_ids(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect()
}

pub(crate) fn printable_delimiter(delimiter: Option<u8>) -> String {
    match delimiter {
        None => "auto".to_string(),
        Some(b',') => ",".to_string(),
        Some(b'\t') => "\\t".to_string(),
        Some(other) => (other as char).to_string(),
    }
}

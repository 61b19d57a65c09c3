use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::infer::DEFAULT_SAMPLE_ROWS;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Unify many similar CSV files into one table with a reconciled schema",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan CSV files and write a fresh table spec configuration
    Scan(ScanArgs),
    /// Reconcile a stored configuration with the current set of files
    Reconcile(ReconcileArgs),
    /// Stream the unified table as CSV
    Read(ReadArgs),
    /// List the output columns of a configuration
    Columns(ColumnsArgs),
}

/// Options shared by every command that reads input files.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV files, in the order their rows are read
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Number of rows to sample when inferring types (0 means full scan)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_ROWS)]
    pub sample_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Identifier of the source group the configuration belongs to
    #[arg(long, default_value = "default")]
    pub root: String,
    /// Destination configuration file (.yml)
    #[arg(short, long)]
    pub output: PathBuf,
    /// Only expose columns present in every file
    #[arg(long)]
    pub intersection: bool,
    /// Do not output columns discovered by later reconciliations
    #[arg(long)]
    pub drop_unknown_columns: bool,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Stored configuration file
    #[arg(short, long)]
    pub config: PathBuf,
    #[command(flatten)]
    pub input: InputArgs,
    /// Where to write the reconciled configuration (defaults to --config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Stored configuration to apply; reconciled in memory when the files changed
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Identifier of the source group (defaults to the configuration's)
    #[arg(long)]
    pub root: Option<String>,
    /// Only expose columns present in every file when no configuration is given
    #[arg(long)]
    pub intersection: bool,
    /// Output CSV file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Delimiter of the output CSV
    #[arg(long, value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Configuration file to describe
    #[arg(short, long)]
    pub config: PathBuf,
    /// Print the output schema as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stream delimited files into ClickHouse with mapping and filter rules",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the header columns of a delimited file
    Headers(HeadersArgs),
    /// List the target table's columns from ClickHouse
    Columns(ColumnsArgs),
    /// Transform the first rows of a file and show the result
    Preview(PreviewArgs),
    /// Render the staging-table promotion SQL for a mapping
    Sql(SqlArgs),
    /// Stream a delimited file into ClickHouse in parallel batches
    Load(LoadArgs),
}

#[derive(Debug, Args)]
pub struct HeadersArgs {
    /// Input file to inspect (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Field delimiter (supports ',', 'tab', ';', '|', ':')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Candidate input encoding, repeatable; tried in order
    /// (defaults to utf-8 then windows-1251)
    #[arg(long = "encoding", action = clap::ArgAction::Append)]
    pub encodings: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// ClickHouse host
    #[arg(long, default_value = "localhost")]
    pub host: String,
    /// ClickHouse HTTP port
    #[arg(long, default_value_t = 8123)]
    pub port: u16,
    /// ClickHouse user
    #[arg(long, default_value = "default")]
    pub user: String,
    /// ClickHouse password
    #[arg(long, default_value = "")]
    pub password: String,
    /// Database holding the target table
    #[arg(short = 'd', long)]
    pub database: String,
    /// Target table name
    #[arg(short = 't', long)]
    pub table: String,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input file to preview (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Mapping configuration (YAML)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: PathBuf,
    /// Number of transformed rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    /// Emit JSON instead of a formatted table
    #[arg(long)]
    pub json: bool,
    /// Field delimiter (supports ',', 'tab', ';', '|', ':')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Candidate input encoding, repeatable; tried in order
    /// (defaults to utf-8 then windows-1251)
    #[arg(long = "encoding", action = clap::ArgAction::Append)]
    pub encodings: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// Mapping configuration (YAML)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: PathBuf,
    /// Database holding the target table
    #[arg(short = 'd', long)]
    pub database: String,
    /// Target table name
    #[arg(short = 't', long)]
    pub table: String,
    /// Staging table name (defaults to `<table>_staging`)
    #[arg(long = "staging-table")]
    pub staging_table: Option<String>,
    /// Database holding the staging table (defaults to --database)
    #[arg(long = "staging-database")]
    pub staging_database: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Input file to load (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Mapping configuration (YAML)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: PathBuf,
    /// ClickHouse host
    #[arg(long, default_value = "localhost")]
    pub host: String,
    /// ClickHouse HTTP port
    #[arg(long, default_value_t = 8123)]
    pub port: u16,
    /// ClickHouse user
    #[arg(long, default_value = "default")]
    pub user: String,
    /// ClickHouse password
    #[arg(long, default_value = "")]
    pub password: String,
    /// Database holding the target table
    #[arg(short = 'd', long)]
    pub database: String,
    /// Target table name
    #[arg(short = 't', long)]
    pub table: String,
    /// Rows per batch (1000 to 500000)
    #[arg(long = "batch-size", default_value_t = 100_000, value_parser = parse_batch_size)]
    pub batch_size: usize,
    /// Concurrent insert workers (1 to 16)
    #[arg(long, default_value_t = 4, value_parser = parse_workers)]
    pub workers: usize,
    /// Seconds between progress reports
    #[arg(long = "progress-interval", default_value_t = 1)]
    pub progress_interval: u64,
    /// Field delimiter (supports ',', 'tab', ';', '|', ':')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Candidate input encoding, repeatable; tried in order
    /// (defaults to utf-8 then windows-1251)
    #[arg(long = "encoding", action = clap::ArgAction::Append)]
    pub encodings: Vec<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        ":" | "colon" => Ok(b':'),
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

pub fn parse_batch_size(value: &str) -> Result<usize, String> {
    let parsed: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !(1_000..=500_000).contains(&parsed) {
        return Err("Batch size must be between 1000 and 500000".to_string());
    }
    Ok(parsed)
}

pub fn parse_workers(value: &str) -> Result<usize, String> {
    let parsed: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !(1..=16).contains(&parsed) {
        return Err("Workers must be between 1 and 16".to_string());
    }
    Ok(parsed)
}

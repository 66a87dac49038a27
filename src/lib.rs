pub mod cli;
pub mod clickhouse;
pub mod data;
pub mod error;
pub mod io_utils;
pub mod loader;
pub mod mapping;
pub mod pipeline;
pub mod source;
pub mod staging;
pub mod table;
pub mod transform;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("databridge", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Headers(args) => pipeline::headers(&args),
        Commands::Columns(args) => pipeline::columns(&args),
        Commands::Preview(args) => pipeline::preview(&args),
        Commands::Sql(args) => pipeline::staging_sql(&args),
        Commands::Load(args) => pipeline::load(&args),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

//! Command orchestration: wires the source reader, transform engine, SQL
//! renderer, and parallel loader to the CLI surface.

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use log::{info, warn};

use crate::cli::{ColumnsArgs, HeadersArgs, LoadArgs, PreviewArgs, SqlArgs};
use crate::clickhouse::{ClickHouseClient, ConnectionParams};
use crate::io_utils;
use crate::loader::{self, LoadOptions};
use crate::mapping::MappingConfig;
use crate::source::CsvSource;
use crate::staging;
use crate::table;
use crate::transform::Transformer;

pub fn headers(args: &HeadersArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encodings = io_utils::resolve_encodings(&args.encodings)?;
    let source = CsvSource::open(&args.input, delimiter, &encodings)?;
    info!(
        "{} header column(s) in {:?} (encoding {})",
        source.headers().len(),
        args.input,
        source.encoding().name()
    );
    for name in source.headers() {
        println!("{name}");
    }
    Ok(())
}

pub fn columns(args: &ColumnsArgs) -> Result<()> {
    let params = ConnectionParams {
        host: args.host.clone(),
        port: args.port,
        user: args.user.clone(),
        password: args.password.clone(),
        database: args.database.clone(),
        table: args.table.clone(),
    };
    let client = ClickHouseClient::new(&params);
    let columns = client
        .fetch_columns()
        .with_context(|| format!("Describing {}.{}", args.database, args.table))?;
    if columns.is_empty() {
        bail!(
            "Table {}.{} has no columns or does not exist",
            args.database,
            args.table
        );
    }
    let headers = vec!["#".to_string(), "column".to_string(), "type".to_string()];
    let rows: Vec<Vec<String>> = columns
        .iter()
        .enumerate()
        .map(|(idx, (name, ty))| vec![(idx + 1).to_string(), name.clone(), ty.clone()])
        .collect();
    table::print_table(&headers, &rows);
    Ok(())
}

pub fn preview(args: &PreviewArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encodings = io_utils::resolve_encodings(&args.encodings)?;
    let config = MappingConfig::load(&args.mapping)?;
    let mut source = CsvSource::open(&args.input, delimiter, &encodings)?;
    let transformer = Transformer::new(&config, source.headers())?;

    let raw = source.next_batch(args.rows.max(1))?.unwrap_or_default();
    let (batch, stats) = transformer.transform(raw);
    if stats.rejected > 0 {
        warn!(
            "{} row(s) rejected by filter rules in the previewed range",
            stats.rejected
        );
    }
    if source.malformed_rows() > 0 {
        warn!(
            "{} malformed row(s) skipped in the previewed range",
            source.malformed_rows()
        );
    }

    let rows: Vec<Vec<String>> = batch
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.as_display()).collect())
        .collect();
    if args.json {
        let payload = serde_json::json!({
            "columns": batch.columns,
            "rows": rows,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        table::print_table(&batch.columns, &rows);
    }
    Ok(())
}

pub fn staging_sql(args: &SqlArgs) -> Result<()> {
    let config = MappingConfig::load(&args.mapping)?;
    let staging_table = args
        .staging_table
        .clone()
        .unwrap_or_else(|| staging::staging_table_name(&args.table));
    let staging_db = args.staging_database.as_deref().unwrap_or(&args.database);
    let sql = staging::render_staging_sql(
        staging_db,
        &staging_table,
        &args.database,
        &args.table,
        &config,
    );
    println!("{sql}");
    Ok(())
}

pub fn load(args: &LoadArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encodings = io_utils::resolve_encodings(&args.encodings)?;
    let config = MappingConfig::load(&args.mapping)?;
    let mut source = CsvSource::open(&args.input, delimiter, &encodings)?;
    info!(
        "Loading {:?} (encoding {}, delimiter {}) into {}.{} with {} worker(s), batches of {}",
        args.input,
        source.encoding().name(),
        crate::printable_delimiter(delimiter),
        args.database,
        args.table,
        args.workers,
        args.batch_size
    );
    let transformer = Transformer::new(&config, source.headers())?;

    let params = ConnectionParams {
        host: args.host.clone(),
        port: args.port,
        user: args.user.clone(),
        password: args.password.clone(),
        database: args.database.clone(),
        table: args.table.clone(),
    };
    let options = LoadOptions {
        workers: args.workers,
        progress_interval: Duration::from_secs(args.progress_interval),
        ..LoadOptions::default()
    };

    let mut rejected = 0u64;
    let report = {
        let source = &mut source;
        let transformer = &transformer;
        let rejected = &mut rejected;
        let batch_size = args.batch_size;
        let batches = std::iter::from_fn(move || match source.next_batch(batch_size) {
            Ok(Some(raw)) => {
                let (batch, stats) = transformer.transform(raw);
                *rejected += stats.rejected;
                Some(Ok(batch))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err.into())),
        });
        loader::load_all(
            batches,
            || Ok(ClickHouseClient::new(&params)),
            &options,
            |total, rate| info!("{total} row(s) inserted ({rate:.0} rows/sec)"),
        )?
    };

    info!(
        "Load finished: {} row(s) inserted in {:.1}s ({:.0} rows/sec), {} batch(es), {} malformed row(s) skipped, {} row(s) rejected by filters",
        report.rows_inserted,
        report.elapsed.as_secs_f64(),
        report.rows_per_second(),
        report.batches_inserted,
        source.malformed_rows(),
        rejected
    );
    if report.cancelled {
        warn!("Load was cancelled; totals are partial");
    }
    if let Some(failure) = report.failure {
        return Err(anyhow::Error::new(failure).context(format!(
            "Load aborted after {} row(s) inserted",
            report.rows_inserted
        )));
    }
    Ok(())
}

//! Error taxonomy for the import pipeline.
//!
//! Each stage owns its own error family: [`SourceError`] for reading and
//! decoding the input file, [`ConfigError`] for mapping validation, and
//! [`StoreError`] for the ClickHouse boundary. Fatal failures observed by
//! the loader are folded into [`LoadFailure`] so callers still receive the
//! partial totals collected before the abort.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while opening or reading the delimited source file.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Opening {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No supported encoding decodes {path:?} (tried {tried})")]
    Encoding { path: PathBuf, tried: String },
    #[error("Input {path:?} has no header row")]
    MissingHeader { path: PathBuf },
    #[error("Duplicate header column '{column}' in {path:?}")]
    DuplicateHeader { path: PathBuf, column: String },
    #[error("Reading row {row}: {source}")]
    Read {
        row: u64,
        #[source]
        source: csv::Error,
    },
}

/// Failures while parsing or validating a mapping configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Mapping defines no target columns")]
    NoTargets,
    #[error("Target column name is empty")]
    UnnamedTarget,
    #[error("Duplicate target column '{0}'")]
    DuplicateTarget(String),
    #[error("Target column '{0}' names an empty source column")]
    UnnamedSource(String),
    #[error("Target column '{0}' has neither source columns nor a static value")]
    EmptyTarget(String),
    #[error("Filter rule for '{column}': invalid pattern: {source}")]
    BadPattern {
        column: String,
        #[source]
        source: Box<regex::Error>,
    },
    #[error("Filter rule for '{column}': 'strict' requires a 'cast'")]
    StrictWithoutCast { column: String },
    #[error("Filter rule for '{column}': 'reject_on_mismatch' requires a 'pattern'")]
    RejectWithoutPattern { column: String },
    #[error("Filter rule for '{column}': default '{default}' does not parse as {cast}")]
    BadDefault {
        column: String,
        default: String,
        cast: String,
    },
    #[error("Mapped source column '{column}' is not in the input header")]
    UnknownSourceColumn { column: String },
}

/// Failures at the ClickHouse HTTP boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ClickHouse at {url} is unreachable: {message}")]
    Transport { url: String, message: String },
    #[error("ClickHouse rejected the statement (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("Unreadable ClickHouse response: {message}")]
    Response { message: String },
}

/// First fatal error observed during a parallel load.
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Reading source batches failed: {0}")]
    Produce(String),
}

//! Streaming delimited-text source.
//!
//! [`CsvSource`] opens a file once, detects its encoding from the head of the
//! stream, caches the header row, and then yields data rows in batches. Rows
//! whose field count does not match the header are counted and skipped rather
//! than aborting the stream.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, warn};

use crate::error::SourceError;
use crate::io_utils;

/// A batch of raw rows; every row has exactly as many fields as the header.
pub type RawBatch = Vec<Vec<String>>;

pub struct CsvSource {
    path: PathBuf,
    encoding: &'static Encoding,
    headers: Vec<String>,
    reader: csv::Reader<Box<dyn Read>>,
    record: csv::StringRecord,
    rows_read: u64,
    malformed: u64,
    exhausted: bool,
}

impl CsvSource {
    /// Opens `path`, detects its encoding against the preference list, and
    /// reads the header row. The header is cached, so repeated [`headers`]
    /// calls never touch the file again; a fresh pass over the data requires
    /// a new `open`.
    ///
    /// [`headers`]: CsvSource::headers
    pub fn open(
        path: &Path,
        delimiter: u8,
        encodings: &[&'static Encoding],
    ) -> Result<Self, SourceError> {
        let mut raw = io_utils::open_raw_input(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut head = Vec::with_capacity(io_utils::ENCODING_SNIFF_LEN);
        raw.by_ref()
            .take(io_utils::ENCODING_SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let encoding =
            io_utils::detect_encoding(&head, encodings).ok_or_else(|| SourceError::Encoding {
                path: path.to_path_buf(),
                tried: encodings.iter().map(|e| e.name()).join(", "),
            })?;
        debug!("Detected encoding {} for {:?}", encoding.name(), path);

        let decoded = io_utils::decoding_reader(head, raw, encoding);
        let mut reader = io_utils::open_csv_reader(decoded, delimiter, true);

        let header_record = reader
            .headers()
            .map_err(|source| SourceError::Read { row: 1, source })?
            .clone();
        if header_record.is_empty() || header_record.iter().all(str::is_empty) {
            return Err(SourceError::MissingHeader {
                path: path.to_path_buf(),
            });
        }
        let headers: Vec<String> = header_record.iter().map(str::to_string).collect();
        let mut seen = HashSet::new();
        for name in &headers {
            if !seen.insert(name.as_str()) {
                return Err(SourceError::DuplicateHeader {
                    path: path.to_path_buf(),
                    column: name.clone(),
                });
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            encoding,
            headers,
            reader,
            record: csv::StringRecord::new(),
            rows_read: 0,
            malformed: 0,
            exhausted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows yielded so far, not counting skipped malformed rows.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Rows skipped because their field count did not match the header.
    pub fn malformed_rows(&self) -> u64 {
        self.malformed
    }

    /// Reads up to `batch_size` well-formed rows. Returns `Ok(None)` once the
    /// stream is exhausted.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Option<RawBatch>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut rows: RawBatch = Vec::with_capacity(batch_size);
        while rows.len() < batch_size {
            let line = self.reader.position().line();
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    if self.record.len() != self.headers.len() {
                        self.malformed += 1;
                        warn!(
                            "Skipping malformed row at line {} of {:?} ({} fields, header has {})",
                            line,
                            self.path,
                            self.record.len(),
                            self.headers.len()
                        );
                        continue;
                    }
                    rows.push(self.record.iter().map(str::to_string).collect());
                    self.rows_read += 1;
                }
                Ok(false) => {
                    self.exhausted = true;
                    break;
                }
                Err(source) => return Err(SourceError::Read { row: line, source }),
            }
        }
        if rows.is_empty() { Ok(None) } else { Ok(Some(rows)) }
    }
}

//! I/O utilities for delimited-file reading, encoding detection, and
//! delimiter resolution.
//!
//! All input in databridge flows through this module. It provides:
//!
//! - **Delimiter resolution**: extension-based auto-detection (`.csv` → comma,
//!   `.tsv` → tab) with manual override support.
//! - **Encoding detection**: a preference list of candidate encodings is tried
//!   against the head of the stream; the first that decodes cleanly wins. A
//!   byte-order mark in the stream always overrides the detected label.
//! - **Reader construction**: `open_raw_input` (with the `-` stdin
//!   convention), `decoding_reader`, and `open_csv_reader`.

use std::{
    fs::File,
    io::{self, BufReader, Cursor, Read},
    path::Path,
};

use anyhow::{Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Encoding labels tried in order when the caller does not name any.
pub const DEFAULT_ENCODING_LABELS: &[&str] = &["utf-8", "windows-1251"];

/// Bytes of the stream head inspected during encoding detection.
pub const ENCODING_SNIFF_LEN: usize = 8 * 1024;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

/// Resolves user-supplied encoding labels, falling back to
/// [`DEFAULT_ENCODING_LABELS`] when none were given.
pub fn resolve_encodings(labels: &[String]) -> Result<Vec<&'static Encoding>> {
    if labels.is_empty() {
        DEFAULT_ENCODING_LABELS
            .iter()
            .map(|label| lookup_encoding(label))
            .collect()
    } else {
        labels.iter().map(|label| lookup_encoding(label)).collect()
    }
}

fn lookup_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| anyhow!("Unknown encoding '{label}'"))
}

/// Picks the first preference that decodes `head` without errors.
pub fn detect_encoding(
    head: &[u8],
    preferences: &[&'static Encoding],
) -> Option<&'static Encoding> {
    preferences
        .iter()
        .copied()
        .find(|encoding| decodes_cleanly(head, encoding))
}

fn decodes_cleanly(head: &[u8], encoding: &'static Encoding) -> bool {
    if encoding == UTF_8 {
        // The head may end mid-codepoint; that is not a decode failure.
        match std::str::from_utf8(head) {
            Ok(_) => true,
            Err(err) => err.error_len().is_none(),
        }
    } else {
        let (_, had_errors) = encoding.decode_without_bom_handling(head);
        !had_errors
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_raw_input(path: &Path) -> io::Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(std::io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Wraps an already-sniffed stream in a decoder that yields UTF-8.
///
/// `head` is the chunk consumed during detection; it is replayed ahead of the
/// rest of the stream. Malformed sequences after the sniffed head are replaced
/// rather than failing, so a tolerant reader never aborts mid-stream on
/// encoding issues.
pub fn decoding_reader(
    head: Vec<u8>,
    rest: Box<dyn Read>,
    encoding: &'static Encoding,
) -> Box<dyn Read> {
    let raw = Cursor::new(head).chain(rest);
    Box::new(
        DecodeReaderBytesBuilder::new()
            .encoding(Some(encoding))
            .bom_override(true)
            .strip_bom(true)
            .build(raw),
    )
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, flexible: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(flexible);
    builder.from_reader(reader)
}

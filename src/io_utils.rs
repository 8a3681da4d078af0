//! CSV reading, encoding and file fingerprint helpers.
//!
//! All file input flows through this module:
//!
//! - **Delimiter resolution**: extension-based detection (`.tsv` → tab,
//!   anything else → comma) with manual override.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Strict reading**: rows must match the header width; the first malformed
//!   or undecodable row aborts the read so a batch is all-or-nothing.
//! - **Fingerprints**: size and SHA-256 of the bytes a submission was parsed from.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// How to read one delimited input file.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_CSV_DELIMITER,
            encoding: UTF_8,
        }
    }
}

impl ReadOptions {
    pub fn for_path(path: &Path, delimiter: Option<u8>, encoding: Option<&str>) -> Result<Self> {
        Ok(Self {
            delimiter: resolve_input_delimiter(path, delimiter),
            encoding: resolve_encoding(encoding)?,
        })
    }
}

/// A fully read delimited file: header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads headers and up to `limit` data rows (`None` = all) from `reader`.
pub fn read_table_from<R>(reader: R, options: ReadOptions, limit: Option<usize>) -> Result<Table>
where
    R: Read,
{
    let mut reader = open_csv_reader(reader, options.delimiter);
    let raw_headers = reader.byte_headers().context("Reading header row")?.clone();
    let headers = decode_record(&raw_headers, options.encoding).context("Decoding header row")?;
    let mut rows = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        if limit.is_some_and(|limit| row_idx >= limit) {
            break;
        }
        // Line numbers are 1-based and the header occupies line 1.
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let decoded = decode_record(&record, options.encoding)
            .with_context(|| format!("Decoding row {}", row_idx + 2))?;
        rows.push(decoded);
    }
    Ok(Table { headers, rows })
}

pub fn read_table(path: &Path, options: ReadOptions, limit: Option<usize>) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    read_table_from(BufReader::new(file), options, limit)
        .with_context(|| format!("Reading {path:?}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub sha256: String,
}

/// Hashes and counts every byte read through it.
pub struct FingerprintReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R: Read> FingerprintReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Consumes whatever is left of the input and returns the fingerprint.
    pub fn finish(mut self) -> io::Result<Fingerprint> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(Fingerprint {
            size: self.size,
            sha256: format!("{:x}", self.hasher.finalize()),
        })
    }
}

impl<R: Read> Read for FingerprintReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.size += read as u64;
        Ok(read)
    }
}

/// Reads the whole file once, fingerprinting the same bytes that are parsed.
pub fn read_table_with_fingerprint(path: &Path, options: ReadOptions) -> Result<(Table, Fingerprint)> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let mut reader = FingerprintReader::new(file);
    let table = read_table_from(&mut reader, options, None).with_context(|| format!("Reading {path:?}"))?;
    let fingerprint = reader
        .finish()
        .with_context(|| format!("Reading {path:?}"))?;
    Ok((table, fingerprint))
}

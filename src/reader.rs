//! Chunked CSV reading with a two-encoding fallback.
//!
//! [`open`] first validates the whole file under the primary encoding. If any
//! field fails to decode, everything learned so far is thrown away and the file
//! is validated again under the fallback encoding. Only then is the file
//! reopened from the start as a [`ChunkStream`], so every chunk a caller sees is
//! decoded under the single encoding that was selected for the file.

use std::{
    collections::HashSet,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, GBK, UTF_8};
use log::{debug, warn};
use thiserror::Error;

use crate::{
    data::{NullMarkers, SqlValue},
    io_utils,
    schema::Charset,
};

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Neither encoding could decode the file.
#[derive(Debug, Error)]
#[error("{path:?} is not valid {primary} or {fallback} text")]
pub struct DecodeError {
    pub path: PathBuf,
    pub primary: &'static str,
    pub fallback: &'static str,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub chunk_size: usize,
    pub primary: &'static Encoding,
    pub fallback: &'static Encoding,
    pub delimiter: u8,
    pub null_markers: NullMarkers,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            primary: UTF_8,
            fallback: GBK,
            delimiter: io_utils::DEFAULT_CSV_DELIMITER,
            null_markers: NullMarkers::default(),
        }
    }
}

/// Rows aligned positionally with the header of the stream that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChunk {
    pub index: usize,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Picks the first of the two configured encodings that decodes all of `path`.
pub fn select_encoding(path: &Path, options: &ReaderOptions) -> Result<&'static Encoding> {
    if io_utils::decodes_cleanly(path, options.delimiter, options.primary)? {
        return Ok(options.primary);
    }
    warn!(
        "Failed to read {:?} as {}; retrying as {}",
        path,
        options.primary.name(),
        options.fallback.name()
    );
    if io_utils::decodes_cleanly(path, options.delimiter, options.fallback)? {
        return Ok(options.fallback);
    }
    Err(DecodeError {
        path: path.to_path_buf(),
        primary: options.primary.name(),
        fallback: options.fallback.name(),
    }
    .into())
}

pub fn open(path: &Path, options: &ReaderOptions) -> Result<ChunkStream> {
    if options.chunk_size == 0 {
        return Err(anyhow!("Chunk size must be greater than zero"));
    }
    let encoding = select_encoding(path, options)?;
    debug!(
        "Reading {:?} as {} in chunks of {} row(s) (delimiter '{}')",
        path,
        encoding.name(),
        options.chunk_size,
        io_utils::printable_delimiter(options.delimiter)
    );
    let mut reader = io_utils::open_csv_reader_from_path(path, options.delimiter, true)?;
    let raw_headers = reader
        .byte_headers()
        .with_context(|| format!("Reading header row of {path:?}"))?
        .clone();
    if raw_headers.is_empty() {
        return Err(anyhow!("{path:?} has no header row"));
    }
    let header = normalize_headers(io_utils::decode_headers(&raw_headers, encoding)?);
    Ok(ChunkStream {
        path: path.to_path_buf(),
        reader,
        header,
        encoding,
        chunk_size: options.chunk_size,
        null_markers: options.null_markers.clone(),
        record: csv::ByteRecord::new(),
        next_index: 0,
        finished: false,
    })
}

/// Lazy, finite sequence of [`RowChunk`]s. Consumed once; reopen to start over.
pub struct ChunkStream {
    path: PathBuf,
    reader: csv::Reader<Box<dyn Read>>,
    header: Vec<String>,
    encoding: &'static Encoding,
    chunk_size: usize,
    null_markers: NullMarkers,
    record: csv::ByteRecord,
    next_index: usize,
    finished: bool,
}

impl ChunkStream {
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn charset(&self) -> Charset {
        Charset::for_encoding(self.encoding)
    }

    fn read_chunk(&mut self) -> Result<Option<RowChunk>> {
        let mut rows = Vec::with_capacity(self.chunk_size.min(4096));
        while rows.len() < self.chunk_size {
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .with_context(|| format!("Reading {:?}", self.path))?;
            if !more {
                self.finished = true;
                break;
            }
            rows.push(self.convert_record()?);
        }
        if rows.is_empty() {
            return Ok(None);
        }
        let chunk = RowChunk {
            index: self.next_index,
            rows,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    fn convert_record(&self) -> Result<Vec<SqlValue>> {
        let width = self.header.len();
        if self.record.len() > width {
            let line = self.record.position().map(|p| p.line()).unwrap_or_default();
            return Err(anyhow!(
                "{:?} line {line}: expected {width} field(s) but found {}",
                self.path,
                self.record.len()
            ));
        }
        let mut row = Vec::with_capacity(width);
        for field in self.record.iter() {
            let text = io_utils::decode_bytes(field, self.encoding)?;
            row.push(SqlValue::from_field(text, &self.null_markers));
        }
        row.resize(width, SqlValue::Null);
        Ok(row)
    }
}

impl Iterator for ChunkStream {
    type Item = Result<RowChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let chunk = self.read_chunk();
        if chunk.is_err() {
            self.finished = true;
        }
        chunk.transpose()
    }
}

/// Names blank header cells `Unnamed: <index>` and suffixes repeats with `.1`, `.2`, ...
///
/// Repeats are detected ignoring case, since column names are case-insensitive
/// in the target databases.
pub fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let base = if name.trim().is_empty() {
                format!("Unnamed: {idx}")
            } else {
                name
            };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while !seen.insert(candidate.to_lowercase()) {
                candidate = format!("{base}.{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}

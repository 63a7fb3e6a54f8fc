//! CSV reader construction and strict field decoding.
//!
//! Every byte that reaches the loader flows through this module:
//!
//! - **Reader construction**: `open_csv_reader_from_path` builds a flexible,
//!   double-quote aware `csv::Reader` over a buffered file.
//! - **Encoding labels**: `resolve_encoding` maps WHATWG labels such as
//!   `utf-8` or `gbk` to `encoding_rs` encodings.
//! - **Strict decoding**: fields are decoded without replacement characters, so
//!   an undecodable byte sequence surfaces as an error instead of `U+FFFD`.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

const BYTE_ORDER_MARK: char = '\u{feff}';

pub fn resolve_encoding(label: Option<&str>, default: &'static Encoding) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(default)
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = Box::new(BufReader::new(
        File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
    ));
    Ok(open_csv_reader(reader, delimiter, has_headers))
}

/// Decodes `bytes` under `encoding`, returning `None` if any sequence is malformed.
pub fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    decode_strict(bytes, encoding)
        .ok_or_else(|| anyhow!("Failed to decode text with encoding {}", encoding.name()))
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Decodes the header record, dropping a UTF-8 byte-order mark from the first cell.
pub fn decode_headers(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    let mut headers = decode_record(record, encoding)?;
    if encoding == UTF_8 {
        if let Some(first) = headers.first_mut() {
            if let Some(stripped) = first.strip_prefix(BYTE_ORDER_MARK) {
                *first = stripped.to_string();
            }
        }
    }
    Ok(headers)
}

/// Returns `true` if every field of every record in `path` decodes under `encoding`.
pub fn decodes_cleanly(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<bool> {
    let mut reader = open_csv_reader_from_path(path, delimiter, false)?;
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading {path:?}"))?
    {
        if record
            .iter()
            .any(|field| decode_strict(field, encoding).is_none())
        {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

//! Reads uploaded lead lists into [`RawRow`]s.
//!
//! `.csv` files go through the `csv` crate; everything else is handed to
//! calamine, which detects xlsx, xlsm, xlsb, xls and ods from the bytes. Only
//! the first worksheet is read and its first row is the header.

use crate::errors::AppError;
use crate::models::{RawRow, RawValue};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes a spreadsheet into data rows, header consumed and blank rows dropped.
///
/// The row at index `i` of the result is reported as source line `i + 2`.
///
/// # Errors
///
/// Returns [`AppError::InvalidFile`] when the bytes cannot be read as a
/// spreadsheet. This is fatal for the whole import.
pub fn read_rows(bytes: &[u8], file_name: &str) -> Result<Vec<RawRow>, AppError> {
    if bytes.is_empty() {
        return Err(AppError::InvalidFile("arquivo vazio".to_string()));
    }

    let is_csv = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let rows = if is_csv {
        read_csv(bytes)?
    } else {
        read_workbook(bytes)?
    };

    tracing::debug!("Read {} data rows from {}", rows.len(), file_name);
    Ok(rows)
}

/// Hex-encoded SHA-256 of the uploaded bytes, recorded in the import log.
pub fn file_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn read_csv(bytes: &[u8]) -> Result<Vec<RawRow>, AppError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.trim().is_empty())
            .map(|(header, value)| {
                let value = if value.is_empty() {
                    RawValue::Empty
                } else {
                    RawValue::Text(value.to_string())
                };
                (header.to_string(), value)
            })
            .collect();
        if !row.is_blank() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<RawRow>, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::InvalidFile("planilha sem abas".to_string()))??;

    let mut sheet_rows = range.rows();
    let Some(header_row) = sheet_rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell.as_string().unwrap_or_default().trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for cells in sheet_rows {
        let row: RawRow = headers
            .iter()
            .zip(cells.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, cell)| (header.clone(), raw_value(cell)))
            .collect();
        if !row.is_blank() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn raw_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty | Data::Error(_) => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.clone()),
        Data::Int(i) => RawValue::Int(*i),
        Data::Float(f) => RawValue::Float(*f),
        Data::Bool(b) => RawValue::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_date() {
            Some(date) => RawValue::Text(date.format("%d/%m/%Y").to_string()),
            None => RawValue::Text(cell.to_string()),
        },
        Data::DurationIso(s) => RawValue::Text(s.clone()),
    }
}

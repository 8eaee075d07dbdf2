//! CSV ingest for the five-column transaction schema.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::info;

use crate::{EngineError, Transaction, TransactionTable};

/// Columns every input must carry; extra columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "transaction_id",
    "sender_id",
    "receiver_id",
    "amount",
    "timestamp",
];

/// Read a transaction table from a CSV file.
pub fn read_csv_path<P: AsRef<Path>>(path: P) -> Result<TransactionTable, EngineError> {
    let file = std::fs::File::open(path)?;
    read_csv(file)
}

/// Read a transaction table from any CSV source.
///
/// A header row is required. Missing columns are a schema error; a
/// header-only file yields an empty table.
pub fn read_csv<R: Read>(reader: R) -> Result<TransactionTable, EngineError> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let mut indices = [0usize; 5];
    let mut missing = Vec::new();
    for (slot, column) in REQUIRED_COLUMNS.iter().enumerate() {
        match headers.iter().position(|h| h == *column) {
            Some(idx) => indices[slot] = idx,
            None => missing.push(column.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |slot: usize| record.get(indices[slot]).unwrap_or("").trim();

        let amount_raw = field(3);
        let amount: f64 = amount_raw.parse().map_err(|_| EngineError::InvalidAmount {
            line,
            value: amount_raw.to_string(),
        })?;

        let timestamp_raw = field(4);
        let timestamp =
            parse_timestamp(timestamp_raw).ok_or_else(|| EngineError::InvalidTimestamp {
                line,
                value: timestamp_raw.to_string(),
            })?;

        rows.push(Transaction {
            transaction_id: field(0).to_string(),
            sender_id: field(1).to_string(),
            receiver_id: field(2).to_string(),
            amount,
            timestamp,
        });
    }

    info!(rows = rows.len(), "loaded transaction csv");
    Ok(TransactionTable::new(rows))
}

/// Parse a timestamp as RFC 3339, then a handful of common naive
/// formats treated as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

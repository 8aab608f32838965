//! Snapshot files
//!
//! Two artifacts per dataset: the final CSV snapshot consumed by the
//! processing stage, and a JSON Lines sidecar holding partial progress for
//! resumable datasets. The sidecar exists only mid-run or after an abnormal
//! termination; completion removes it.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::record::{Record, DISTRICT_COLUMN};

/// Errors from snapshot reading and writing.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Path of the partial-progress sidecar next to a snapshot output.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".partial.jsonl");
    output.with_file_name(name)
}

/// Write the final CSV snapshot, overwriting any previous run's output.
///
/// The header is the sorted union of columns across all records; cells
/// missing from a record are left empty. When `include_district` is set the
/// normalized district column is always part of the header, so even an empty
/// dataset produces a valid header-having file.
pub fn write_csv(
    output: &Path,
    records: &[Record],
    include_district: bool,
) -> Result<(), SnapshotError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut columns: Vec<&str> = Vec::new();
    {
        let mut seen = std::collections::BTreeSet::new();
        if include_district {
            seen.insert(DISTRICT_COLUMN);
        }
        for record in records {
            for (column, _) in record.columns() {
                seen.insert(column);
            }
        }
        columns.extend(seen);
    }

    if columns.is_empty() {
        // No records and no mandated columns: emit an empty file rather than
        // a zero-field CSV header, which the csv writer rejects.
        fs::write(output, "")?;
        return Ok(());
    }

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(&columns)?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map(display_value).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Persist accumulated records as a JSON Lines sidecar.
pub fn write_partial(path: &Path, records: &[Record]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a partial sidecar back. Any malformed line fails the whole read so
/// the caller can degrade to a cold start.
pub fn read_partial(path: &Path) -> Result<Vec<Record>, SnapshotError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Remove a partial sidecar; absent file is a no-op.
pub fn remove_partial(path: &Path) -> Result<(), SnapshotError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Render a JSON value as a CSV cell.
///
/// Strings stay verbatim, null becomes empty, everything structured is
/// embedded as compact JSON (mirrors how the upstream portal's own exports
/// stringify lists like geo points).
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

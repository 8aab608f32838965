//! Record representation shared by the API and export paths
//!
//! Raw sources are messy in two different ways: the search API returns nested
//! JSON documents, the export dump returns flat CSV rows. Both collapse into
//! [`Record`], a flat map of dotted column paths to values, so everything
//! downstream of retrieval sees exactly one shape per dataset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::district;

/// Column name for the normalized district code added during reconciliation.
pub const DISTRICT_COLUMN: &str = "arrondissement";

/// Wire shape of one paginated search response.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Total record count advertised by the endpoint.
    pub nhits: u64,
    /// Records in this page; absent on zero-row probes.
    #[serde(default)]
    pub records: Vec<Value>,
}

/// A single dataset record, flattened to dotted column paths.
///
/// Nested objects flatten recursively (`fields.genre`); scalars and lists
/// are kept verbatim. Columns are sorted, which keeps snapshot headers
/// deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    columns: BTreeMap<String, Value>,
}

impl Record {
    /// Flatten one JSON record as returned by the search API.
    pub fn from_api(value: &Value) -> Self {
        let mut columns = BTreeMap::new();
        match value {
            Value::Object(map) => {
                for (key, nested) in map {
                    flatten_into(key, nested, &mut columns);
                }
            }
            other => {
                columns.insert("value".to_string(), other.clone());
            }
        }
        Self { columns }
    }

    /// Build from one row of a headered CSV export.
    pub fn from_csv_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> Self {
        let columns = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
            .collect();
        Self { columns }
    }

    /// Value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Insert or replace a column.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    /// Iterate over columns in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(&format!("{prefix}.{key}"), nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Outcome of district reconciliation over one batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records with a valid canonical district code.
    pub matched: usize,
    /// Records whose raw code could not be classified.
    pub invalid: usize,
}

/// Attach the canonical district code to each record.
///
/// Looks up `district_field` in every record, normalizes it, and writes the
/// result into the [`DISTRICT_COLUMN`]. Unclassifiable codes become null,
/// never a guess, and are only counted; the pipeline continues.
pub fn reconcile(records: &mut [Record], district_field: &str) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for record in records.iter_mut() {
        match record.get(district_field).and_then(district::normalize_value) {
            Some(arrondissement) => {
                record.insert(DISTRICT_COLUMN, Value::String(arrondissement.code()));
                report.matched += 1;
            }
            None => {
                record.insert(DISTRICT_COLUMN, Value::Null);
                report.invalid += 1;
            }
        }
    }
    report
}

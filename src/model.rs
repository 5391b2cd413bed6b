// 📦 Record Model - typed cells, import rows, authoritative GWD records

use crate::fields::{self, DIGTRACKER_ID, GWD_NUMBER, STATUS};
use crate::transform::{transform_header, transform_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A typed cell. Floats are always finite.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "(blank)"),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

static NULL: FieldValue = FieldValue::Null;

/// Canonical field name → value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// One row as handed over by the file parser: header → raw cell
pub type RawRow = BTreeMap<String, Option<String>>;

// ============================================================================
// SYNC STATUS (staging bookkeeping)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "synced" => SyncStatus::Synced,
            _ => SyncStatus::Pending,
        }
    }
}

// ============================================================================
// IMPORT RECORD
// ============================================================================

/// A normalized row awaiting reconciliation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Surrogate id in the staging table (set once staged)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sync_status: SyncStatus,

    /// Import run that staged this row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_run: Option<String>,

    pub values: FieldMap,
}

impl ImportRecord {
    /// Normalize one raw row through the field transformer.
    ///
    /// Columns are read in header-name order; use [`ImportRecord::from_columns`]
    /// when the file's column order is known.
    pub fn from_raw_row(row: &RawRow) -> Self {
        Self::from_columns(row.keys().map(String::as_str), row)
    }

    /// Normalize one raw row, reading columns in the given order.
    ///
    /// Columns mapped to `_ignore_` are dropped. When two headers alias one
    /// field the first non-null value wins. A blank or missing status gets
    /// the default only after every column has been read.
    pub fn from_columns<'a>(order: impl IntoIterator<Item = &'a str>, row: &RawRow) -> Self {
        let mut values = FieldMap::new();

        for header in order {
            let Some(raw) = row.get(header) else {
                continue;
            };
            let field = transform_header(header);
            if field == STATUS && raw.as_deref().map_or(true, |s| s.trim().is_empty()) {
                continue;
            }
            let Some(value) = transform_value(raw.as_deref(), &field) else {
                continue;
            };

            match values.get(&field) {
                Some(existing) if !existing.is_null() => {}
                _ => {
                    values.insert(field, value);
                }
            }
        }

        if values.get(STATUS).map_or(true, FieldValue::is_null) {
            if let Some(status) = transform_value(None, STATUS) {
                values.insert(STATUS.to_string(), status);
            }
        }

        ImportRecord::from_values(values)
    }

    pub fn from_values(values: FieldMap) -> Self {
        ImportRecord {
            values,
            ..Default::default()
        }
    }

    pub fn digtracker_id(&self) -> Option<i64> {
        self.get(DIGTRACKER_ID).as_i64()
    }

    pub fn gwd_number(&self) -> Option<i64> {
        self.get(GWD_NUMBER).as_i64()
    }

    /// Value of a field, `Null` when absent
    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&NULL)
    }

    /// Columns that survived parsing but aren't part of the GWD schema
    pub fn unknown_columns(&self) -> Vec<&str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|k| fields::lookup(k).is_none())
            .collect()
    }

    /// Authoritative shape: staging bookkeeping and unknown columns stripped
    pub fn to_gwd_values(&self) -> FieldMap {
        fields::field_names()
            .map(|name| (name.to_string(), self.get(name).clone()))
            .collect()
    }
}

// ============================================================================
// EXISTING RECORD
// ============================================================================

/// An authoritative GWD row as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRecord {
    /// Store-assigned surrogate id; immutable
    pub gwd_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    pub values: FieldMap,
}

impl ExistingRecord {
    pub fn digtracker_id(&self) -> Option<i64> {
        self.get(DIGTRACKER_ID).as_i64()
    }

    pub fn gwd_number(&self) -> Option<i64> {
        self.get(GWD_NUMBER).as_i64()
    }

    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&NULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, Option<&str>)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_from_raw_row_normalizes_headers_and_values() {
        let record = ImportRecord::from_raw_row(&raw(&[
            ("ID", Some("101")),
            ("Target Girth Weld", Some("5500")),
            ("Dig_Status", Some("CLEIR Approved")),
            ("Land Cost", Some("$1,250.50")),
            ("Row Color", Some("yellow")),
        ]));

        assert_eq!(record.digtracker_id(), Some(101));
        assert_eq!(record.gwd_number(), Some(5500));
        assert_eq!(record.get("status"), &FieldValue::text("Ready"));
        assert_eq!(record.get("land_cost"), &FieldValue::Float(1250.5));
        assert!(!record.values.contains_key("_ignore_"));
    }

    #[test]
    fn test_missing_status_column_defaults() {
        let record = ImportRecord::from_raw_row(&raw(&[("GWD #", Some("7"))]));
        assert_eq!(record.get("status"), &FieldValue::text("Not Started"));
    }

    #[test]
    fn test_duplicate_alias_keeps_first_non_null() {
        let record = ImportRecord::from_raw_row(&raw(&[
            ("GWD #", None),
            ("Target Girth Weld", Some("42")),
        ]));
        assert_eq!(record.gwd_number(), Some(42));
    }

    #[test]
    fn test_blank_status_alias_does_not_hide_filled_one() {
        let record = ImportRecord::from_raw_row(&raw(&[
            ("Dig_Status", Some("  ")),
            ("Status", Some("Dig On Hold")),
        ]));
        assert_eq!(record.get("status"), &FieldValue::text("On Hold"));
    }

    #[test]
    fn test_column_order_decides_between_aliases() {
        let row = raw(&[("GWD #", Some("1")), ("Target Girth Weld", Some("2"))]);

        let sorted = ImportRecord::from_raw_row(&row);
        assert_eq!(sorted.gwd_number(), Some(1));

        let in_file_order = ImportRecord::from_columns(["Target Girth Weld", "GWD #"], &row);
        assert_eq!(in_file_order.gwd_number(), Some(2));
    }

    #[test]
    fn test_to_gwd_values_strips_unknown_columns() {
        let record = ImportRecord::from_raw_row(&raw(&[
            ("GWD #", Some("7")),
            ("Some Unknown Column", Some("x")),
        ]));
        assert_eq!(record.unknown_columns(), vec!["some_unknown_column"]);

        let values = record.to_gwd_values();
        assert!(!values.contains_key("some_unknown_column"));
        assert_eq!(values.len(), crate::fields::GWD_FIELDS.len());
        assert_eq!(values["land_cost"], FieldValue::Null);
    }

    #[test]
    fn test_field_value_json_is_untagged() {
        let json = serde_json::to_string(&vec![
            FieldValue::Null,
            FieldValue::Int(3),
            FieldValue::Float(1.5),
            FieldValue::text("x"),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,3,1.5,"x"]"#);

        let back: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[1], FieldValue::Int(3));
        assert_eq!(back[2], FieldValue::Float(1.5));
    }
}

// 🔤 Field Transformer - raw headers and cells → canonical fields and typed values
// Pure and stateless; handed to the file parser as header/value hooks.

use crate::fields::{self, FieldKind, DEFAULT_STATUS, IGNORE, STATUS};
use crate::model::FieldValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

// ============================================================================
// HEADERS
// ============================================================================

/// Map a raw import header to its canonical field name.
///
/// Known export headers go through the alias table; anything else is
/// lowercased with whitespace runs turned into `_`. Total and idempotent.
pub fn transform_header(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);

    if let Some(canonical) = fields::alias_for(&collapsed) {
        return canonical.to_string();
    }

    collapsed.replace(' ', "_").to_lowercase()
}

// ============================================================================
// VALUES
// ============================================================================

/// Coerce a raw cell for a canonical field.
///
/// Returns `None` for the `_ignore_` sentinel (drop the column), which is
/// not the same thing as `Some(FieldValue::Null)`.
pub fn transform_value(raw: Option<&str>, field: &str) -> Option<FieldValue> {
    if field == IGNORE {
        return None;
    }

    let raw = match raw {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            return Some(if field == STATUS {
                FieldValue::text(DEFAULT_STATUS)
            } else {
                FieldValue::Null
            });
        }
    };

    let value = match fields::kind_of(field) {
        Some(FieldKind::Integer) => parse_integer(raw).map_or(FieldValue::Null, FieldValue::Int),
        Some(FieldKind::Decimal) => parse_decimal(raw).map_or(FieldValue::Null, FieldValue::Float),
        Some(FieldKind::Text) => FieldValue::text(raw.trim()),
        Some(FieldKind::Date) => FieldValue::text(raw),
        Some(FieldKind::Timestamp) => {
            normalize_timestamp(raw).map_or(FieldValue::Null, FieldValue::Text)
        }
        Some(FieldKind::Status) => FieldValue::text(normalize_status(raw)),
        None => FieldValue::text(raw),
    };

    Some(value)
}

/// Integers accept thousands separators and whole-valued decimals ("12.0").
/// Fractional input truncates toward zero.
fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned = raw.trim().replace(',', "");

    if let Ok(v) = cleaned.parse::<i64>() {
        return Some(v);
    }

    let f = cleaned.parse::<f64>().ok().filter(|f| f.is_finite())?;
    let truncated = f.trunc();
    if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
        Some(truncated as i64)
    } else {
        None
    }
}

/// Decimals tolerate currency symbols, thousands separators and a trailing `%`
fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();

    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Normalize to RFC 3339 UTC with millisecond precision.
/// Zone-less input is read as UTC.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let parsed: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        });

    parsed.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Legacy DigTracker label → canonical status; unknown labels fall back
pub fn normalize_status(raw: &str) -> &'static str {
    let collapsed = collapse_whitespace(raw);

    match fields::canonical_status(&collapsed) {
        Some(status) => status,
        None => {
            log::warn!(
                "Unrecognized status {:?}, defaulting to {:?}",
                collapsed,
                DEFAULT_STATUS
            );
            DEFAULT_STATUS
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_aliases() {
        assert_eq!(transform_header("ID"), "digtracker_id");
        assert_eq!(transform_header("Target Girth Weld"), "gwd_number");
        assert_eq!(transform_header("Dig_Status"), "status");
        assert_eq!(transform_header("  Dig_Status  "), "status");
        assert_eq!(transform_header("Row Color"), IGNORE);
    }

    #[test]
    fn test_header_derived() {
        assert_eq!(transform_header("Some Unknown Column"), "some_unknown_column");
        assert_eq!(transform_header("  Land   Cost "), "land_cost");
        assert_eq!(transform_header("Construction\tSupervisor"), "construction_supervisor");
    }

    #[test]
    fn test_header_idempotent() {
        for raw in ["ID", "Dig  Status", "Land Cost", "GWD #", "Odometer (ft)", "x"] {
            let once = transform_header(raw);
            assert_eq!(transform_header(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_ignore_sentinel_drops_column() {
        assert_eq!(transform_value(Some("yellow"), IGNORE), None);
        assert_eq!(transform_value(None, IGNORE), None);
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(transform_value(None, "status"), Some(FieldValue::text("Not Started")));
        assert_eq!(transform_value(Some(""), "status"), Some(FieldValue::text("Not Started")));
        assert_eq!(transform_value(Some(""), "land_cost"), Some(FieldValue::Null));
        assert_eq!(transform_value(None, "notes"), Some(FieldValue::Null));
        assert_eq!(transform_value(Some("   "), "pipeline"), Some(FieldValue::Null));
        assert_eq!(transform_value(Some(""), "whatever"), Some(FieldValue::Null));
    }

    #[test]
    fn test_integer_fields() {
        assert_eq!(transform_value(Some("101"), "digtracker_id"), Some(FieldValue::Int(101)));
        assert_eq!(transform_value(Some(" 2,024 "), "year"), Some(FieldValue::Int(2024)));
        assert_eq!(transform_value(Some("12.0"), "gwd_number"), Some(FieldValue::Int(12)));
        assert_eq!(transform_value(Some("abc"), "gwd_number"), Some(FieldValue::Null));
        assert_eq!(transform_value(Some("inf"), "anomaly_count"), Some(FieldValue::Null));
    }

    #[test]
    fn test_decimal_fields() {
        assert_eq!(transform_value(Some("$1,250.50"), "land_cost"), Some(FieldValue::Float(1250.5)));
        assert_eq!(transform_value(Some("29.75"), "latitude"), Some(FieldValue::Float(29.75)));
        assert_eq!(transform_value(Some("-95.5"), "longitude"), Some(FieldValue::Float(-95.5)));
        assert_eq!(transform_value(Some("45%"), "depth_pct"), Some(FieldValue::Float(45.0)));
        assert_eq!(transform_value(Some("n/a"), "budget"), Some(FieldValue::Null));
        assert_eq!(transform_value(Some("NaN"), "budget"), Some(FieldValue::Null));
    }

    #[test]
    fn test_text_and_date_fields() {
        assert_eq!(transform_value(Some("  Line 12 "), "pipeline"), Some(FieldValue::text("Line 12")));
        assert_eq!(transform_value(Some("MiXeD"), "notes"), Some(FieldValue::text("MiXeD")));
        assert_eq!(transform_value(Some("3/14/2024"), "target_date"), Some(FieldValue::text("3/14/2024")));
        assert_eq!(transform_value(Some(" raw "), "unknown_col"), Some(FieldValue::text(" raw ")));
    }

    #[test]
    fn test_timestamp_fields() {
        assert_eq!(
            transform_value(Some("2024-01-05T10:30:00Z"), "last_updated"),
            Some(FieldValue::text("2024-01-05T10:30:00.000Z"))
        );
        assert_eq!(
            transform_value(Some("2024-01-05T04:30:00-06:00"), "last_updated"),
            Some(FieldValue::text("2024-01-05T10:30:00.000Z"))
        );
        assert_eq!(
            transform_value(Some("01/05/2024 10:30"), "report_received_at"),
            Some(FieldValue::text("2024-01-05T10:30:00.000Z"))
        );
        assert_eq!(
            transform_value(Some("2024-01-05"), "report_received_at"),
            Some(FieldValue::text("2024-01-05T00:00:00.000Z"))
        );
        assert_eq!(transform_value(Some("soon"), "last_updated"), Some(FieldValue::Null));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            ("CLEIR Approved", "Ready"),
            ("CLEIR Pending", "Pending"),
            ("Dig In Progress", "In Progress"),
            ("Dig On Hold", "On Hold"),
            ("Dig Complete", "Complete"),
            ("Dig Cancelled", "Cancelled"),
            ("Dig Report Received", "Complete"),
        ];
        for (legacy, canonical) in cases {
            assert_eq!(transform_value(Some(legacy), "status"), Some(FieldValue::text(canonical)));
        }

        assert_eq!(
            transform_value(Some("  Dig   Cancelled "), "status"),
            Some(FieldValue::text("Cancelled"))
        );
        assert_eq!(transform_value(Some("Mystery"), "status"), Some(FieldValue::text("Not Started")));
    }
}

// 🏛️ Field Catalogue - GWD attributes, header aliases, legacy status labels
// Every column name the store ever sees comes from this table.

use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD KINDS
// ============================================================================

/// How a raw import cell is coerced for a given field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Identifiers, counts, year
    Integer,
    /// Costs, budgets, coordinates, engineering metrics
    Decimal,
    /// Trimmed free text
    Text,
    /// Date-only values, stored exactly as received
    Date,
    /// Absolute times, normalized to RFC 3339 UTC
    Timestamp,
    /// Dig status, normalized through the legacy label map
    Status,
}

impl FieldKind {
    /// SQLite column type for this kind
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer => "INTEGER",
            FieldKind::Decimal => "REAL",
            FieldKind::Text | FieldKind::Date | FieldKind::Timestamp | FieldKind::Status => "TEXT",
        }
    }
}

// ============================================================================
// FIELD DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
    /// Canonical column name
    pub name: &'static str,
    pub kind: FieldKind,
    /// Human label shown next to the difference
    pub label: &'static str,
}

const fn field(name: &'static str, kind: FieldKind, label: &'static str) -> FieldDefinition {
    FieldDefinition { name, kind, label }
}

/// Canonical field names used directly by the import core
pub const DIGTRACKER_ID: &str = "digtracker_id";
pub const GWD_NUMBER: &str = "gwd_number";
pub const STATUS: &str = "status";

/// Sentinel column name meaning "drop this column"
pub const IGNORE: &str = "_ignore_";

/// Canonical status for empty or unrecognized values
pub const DEFAULT_STATUS: &str = "Not Started";

/// All GWD domain fields, in display order
pub const GWD_FIELDS: &[FieldDefinition] = &[
    // Identity
    field("digtracker_id", FieldKind::Integer, "DigTracker ID"),
    field("gwd_number", FieldKind::Integer, "GWD #"),
    field("year", FieldKind::Integer, "Year"),
    // Where
    field("system", FieldKind::Text, "System"),
    field("pipeline", FieldKind::Text, "Pipeline"),
    field("dig_name", FieldKind::Text, "Dig Name"),
    field("county", FieldKind::Text, "County"),
    field("state", FieldKind::Text, "State"),
    field("landowner", FieldKind::Text, "Landowner"),
    field("latitude", FieldKind::Decimal, "Latitude"),
    field("longitude", FieldKind::Decimal, "Longitude"),
    // Progress
    field("status", FieldKind::Status, "Status"),
    field("afe_number", FieldKind::Text, "AFE #"),
    field("work_order", FieldKind::Text, "Work Order"),
    field("target_date", FieldKind::Date, "Target Date"),
    field("completion_date", FieldKind::Date, "Completion Date"),
    field("report_received_at", FieldKind::Timestamp, "Report Received"),
    field("last_updated", FieldKind::Timestamp, "Last Updated"),
    // Inspection
    field("anomaly_type", FieldKind::Text, "Anomaly Type"),
    field("anomaly_count", FieldKind::Integer, "Anomaly Count"),
    field("odometer", FieldKind::Decimal, "Odometer"),
    field("wall_thickness", FieldKind::Decimal, "Wall Thickness"),
    field("depth_pct", FieldKind::Decimal, "Depth %"),
    field("pipe_diameter", FieldKind::Decimal, "Pipe Diameter"),
    // Costs
    field("land_cost", FieldKind::Decimal, "Land Cost"),
    field("contractor_cost", FieldKind::Decimal, "Contractor Cost"),
    field("inspection_cost", FieldKind::Decimal, "Inspection Cost"),
    field("material_cost", FieldKind::Decimal, "Material Cost"),
    field("total_cost", FieldKind::Decimal, "Total Cost"),
    field("budget", FieldKind::Decimal, "Budget"),
    // People
    field("construction_supervisor", FieldKind::Text, "Construction Supervisor"),
    field("inspector", FieldKind::Text, "Inspector"),
    field("contractor", FieldKind::Text, "Contractor"),
    field("notes", FieldKind::Text, "Notes"),
];

/// Staging and bookkeeping columns; never compared
pub const METADATA_FIELDS: &[&str] = &[
    "id",
    "gwd_id",
    "imported_at",
    "sync_status",
    "created_at",
    "import_run",
];

/// Raw export headers that don't derive to their canonical name
pub const HEADER_ALIASES: &[(&str, &str)] = &[
    ("ID", "digtracker_id"),
    ("DigTracker ID", "digtracker_id"),
    ("Target Girth Weld", "gwd_number"),
    ("GWD #", "gwd_number"),
    ("GWD Number", "gwd_number"),
    ("Dig_Status", "status"),
    ("Dig Status", "status"),
    ("Line Name", "pipeline"),
    ("Pipeline Name", "pipeline"),
    ("Lat", "latitude"),
    ("Long", "longitude"),
    ("Lon", "longitude"),
    ("Odometer (ft)", "odometer"),
    ("Depth %", "depth_pct"),
    ("Max Depth (%)", "depth_pct"),
    ("WT", "wall_thickness"),
    ("NPS", "pipe_diameter"),
    ("CS", "construction_supervisor"),
    ("Supervisor", "construction_supervisor"),
    ("AFE", "afe_number"),
    ("WO #", "work_order"),
    ("Dig Report Received", "report_received_at"),
    ("Modified", "last_updated"),
    ("Comments", "notes"),
    ("Row Color", IGNORE),
    ("Attachments", IGNORE),
];

/// Legacy DigTracker status labels → canonical statuses
pub const LEGACY_STATUS_MAP: &[(&str, &str)] = &[
    ("CLEIR Approved", "Ready"),
    ("CLEIR Pending", "Pending"),
    ("Dig In Progress", "In Progress"),
    ("Dig On Hold", "On Hold"),
    ("Dig Complete", "Complete"),
    ("Dig Cancelled", "Cancelled"),
    ("Dig Report Received", "Complete"),
];

/// Statuses the tracker itself uses
pub const CANONICAL_STATUSES: &[&str] = &[
    "Not Started",
    "Pending",
    "Ready",
    "In Progress",
    "On Hold",
    "Complete",
    "Cancelled",
];

// ============================================================================
// LOOKUPS
// ============================================================================

/// Look up a GWD field by canonical name
pub fn lookup(name: &str) -> Option<&'static FieldDefinition> {
    GWD_FIELDS.iter().find(|f| f.name == name)
}

/// Kind of a canonical field, if it's part of the GWD schema
pub fn kind_of(name: &str) -> Option<FieldKind> {
    lookup(name).map(|f| f.kind)
}

pub fn is_metadata(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

/// Canonical names of every domain field, in display order
pub fn field_names() -> impl Iterator<Item = &'static str> {
    GWD_FIELDS.iter().map(|f| f.name)
}

/// Header alias lookup (case-insensitive)
pub fn alias_for(header: &str) -> Option<&'static str> {
    // Case-insensitive on purpose: a bare "id" header is the DigTracker id
    HEADER_ALIASES
        .iter()
        .find(|(raw, _)| raw.eq_ignore_ascii_case(header))
        .map(|(_, canonical)| *canonical)
}

/// Legacy or canonical status label → canonical status (case-insensitive)
pub fn canonical_status(label: &str) -> Option<&'static str> {
    LEGACY_STATUS_MAP
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(label))
        .map(|(_, canonical)| *canonical)
        .or_else(|| {
            CANONICAL_STATUSES
                .iter()
                .find(|s| s.eq_ignore_ascii_case(label))
                .copied()
        })
}

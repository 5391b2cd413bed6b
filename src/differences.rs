// 🔀 Difference Set - field-level disagreements between imported and stored GWDs
//
// Two kinds of group:
//   Conflict   - an existing record whose imported values disagree
//   NewRecord  - an imported record with no stored counterpart (every field listed)

use crate::fields;
use crate::model::{ExistingRecord, FieldValue, ImportRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GROUP KEY
// ============================================================================

/// Identifies one group: `"<gwd_id>"` or `"new_<digtracker_id>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GroupKey {
    Existing(i64),
    New(i64),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Existing(gwd_id) => write!(f, "{}", gwd_id),
            GroupKey::New(digtracker_id) => write!(f, "new_{}", digtracker_id),
        }
    }
}

impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("new_") {
            Some(id) => id.parse().map(GroupKey::New),
            None => s.parse().map(GroupKey::Existing),
        };
        parsed.map_err(|_| format!("invalid group key: {:?}", s))
    }
}

impl From<GroupKey> for String {
    fn from(key: GroupKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for GroupKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ============================================================================
// DIFFERENCE ENTRY
// ============================================================================

/// One field-level disagreement.
///
/// `is_new` entries never carry a `gwd_id` or an existing value; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferenceEntry {
    gwd_id: Option<i64>,
    gwd_number: Option<i64>,
    field: String,
    existing: FieldValue,
    imported: FieldValue,
    is_new: bool,
}

impl DifferenceEntry {
    pub fn conflict(
        gwd_id: i64,
        gwd_number: Option<i64>,
        field: impl Into<String>,
        existing: FieldValue,
        imported: FieldValue,
    ) -> Self {
        DifferenceEntry {
            gwd_id: Some(gwd_id),
            gwd_number,
            field: field.into(),
            existing,
            imported,
            is_new: false,
        }
    }

    pub fn new_field(gwd_number: Option<i64>, field: impl Into<String>, imported: FieldValue) -> Self {
        DifferenceEntry {
            gwd_id: None,
            gwd_number,
            field: field.into(),
            existing: FieldValue::Null,
            imported,
            is_new: true,
        }
    }

    pub fn gwd_id(&self) -> Option<i64> {
        self.gwd_id
    }

    pub fn gwd_number(&self) -> Option<i64> {
        self.gwd_number
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn existing(&self) -> &FieldValue {
        &self.existing
    }

    pub fn imported(&self) -> &FieldValue {
        &self.imported
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

// ============================================================================
// DIFFERENCE GROUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DifferenceGroup {
    Conflict {
        gwd_id: i64,
        gwd_number: Option<i64>,
        entries: Vec<DifferenceEntry>,
    },
    NewRecord {
        digtracker_id: i64,
        gwd_number: Option<i64>,
        entries: Vec<DifferenceEntry>,
    },
}

impl DifferenceGroup {
    pub fn key(&self) -> GroupKey {
        match self {
            DifferenceGroup::Conflict { gwd_id, .. } => GroupKey::Existing(*gwd_id),
            DifferenceGroup::NewRecord { digtracker_id, .. } => GroupKey::New(*digtracker_id),
        }
    }

    pub fn gwd_number(&self) -> Option<i64> {
        match self {
            DifferenceGroup::Conflict { gwd_number, .. }
            | DifferenceGroup::NewRecord { gwd_number, .. } => *gwd_number,
        }
    }

    pub fn entries(&self) -> &[DifferenceEntry] {
        match self {
            DifferenceGroup::Conflict { entries, .. }
            | DifferenceGroup::NewRecord { entries, .. } => entries,
        }
    }

    fn entries_mut(&mut self) -> &mut Vec<DifferenceEntry> {
        match self {
            DifferenceGroup::Conflict { entries, .. }
            | DifferenceGroup::NewRecord { entries, .. } => entries,
        }
    }

    pub fn entry(&self, field: &str) -> Option<&DifferenceEntry> {
        self.entries().iter().find(|e| e.field == field)
    }

    pub fn is_new(&self) -> bool {
        matches!(self, DifferenceGroup::NewRecord { .. })
    }
}

// ============================================================================
// DIFFERENCE SET
// ============================================================================

/// Group key → group. Handed to the UI, shrunk by resolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DifferenceSet {
    groups: BTreeMap<GroupKey, DifferenceGroup>,
}

impl DifferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of unresolved entries across all groups
    pub fn entry_count(&self) -> usize {
        self.groups.values().map(|g| g.entries().len()).sum()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&DifferenceGroup> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = &DifferenceGroup> {
        self.groups.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.groups.keys()
    }

    /// Empty groups are never stored
    pub fn insert_group(&mut self, group: DifferenceGroup) {
        if group.entries().is_empty() {
            return;
        }
        self.groups.insert(group.key(), group);
    }

    pub fn remove_group(&mut self, key: &GroupKey) -> Option<DifferenceGroup> {
        self.groups.remove(key)
    }

    /// Drop one entry; the group goes too once it is empty.
    /// Returns false if the entry wasn't there.
    pub fn remove_entry(&mut self, key: &GroupKey, field: &str) -> bool {
        let Some(group) = self.groups.get_mut(key) else {
            return false;
        };

        let entries = group.entries_mut();
        let before = entries.len();
        entries.retain(|e| e.field != field);
        let removed = entries.len() != before;

        if entries.is_empty() {
            self.groups.remove(key);
        }

        removed
    }

    /// New-record group sharing this business key
    pub fn find_new_by_gwd_number(&self, gwd_number: i64) -> Option<&DifferenceGroup> {
        self.groups
            .values()
            .find(|g| g.is_new() && g.gwd_number() == Some(gwd_number))
    }

    /// Keep only conflict groups
    pub fn retain_conflicts(&mut self) {
        self.groups.retain(|_, g| !g.is_new());
    }

    pub fn new_record_count(&self) -> usize {
        self.groups.values().filter(|g| g.is_new()).count()
    }
}

// ============================================================================
// COMPARISON
// ============================================================================

/// Diff imported records against the stored ones, matched by external id.
///
/// Matched records yield a conflict group holding only the differing fields
/// (no group if nothing differs). Unmatched records yield a new-record group
/// listing every domain field. Imported rows without an external id can't be
/// matched and are skipped.
pub fn compare_records(existing: &[ExistingRecord], imported: &[ImportRecord]) -> DifferenceSet {
    let mut by_external_id: HashMap<i64, &ExistingRecord> = HashMap::new();
    for record in existing {
        if let Some(id) = record.digtracker_id() {
            by_external_id.entry(id).or_insert(record);
        }
    }

    let mut set = DifferenceSet::new();

    for record in imported {
        let Some(external_id) = record.digtracker_id() else {
            continue;
        };
        let gwd_number = record.gwd_number();

        match by_external_id.get(&external_id) {
            Some(stored) => {
                let entries: Vec<DifferenceEntry> = comparable_fields()
                    .filter(|field| stored.get(field) != record.get(field))
                    .map(|field| {
                        DifferenceEntry::conflict(
                            stored.gwd_id,
                            gwd_number,
                            field,
                            stored.get(field).clone(),
                            record.get(field).clone(),
                        )
                    })
                    .collect();

                set.insert_group(DifferenceGroup::Conflict {
                    gwd_id: stored.gwd_id,
                    gwd_number,
                    entries,
                });
            }
            None => {
                let entries = comparable_fields()
                    .map(|field| DifferenceEntry::new_field(gwd_number, field, record.get(field).clone()))
                    .collect();

                set.insert_group(DifferenceGroup::NewRecord {
                    digtracker_id: external_id,
                    gwd_number,
                    entries,
                });
            }
        }
    }

    set
}

fn comparable_fields() -> impl Iterator<Item = &'static str> {
    fields::field_names().filter(|f| !fields::is_metadata(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldMap;

    fn values(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn existing(gwd_id: i64, pairs: &[(&str, FieldValue)]) -> ExistingRecord {
        ExistingRecord {
            gwd_id,
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            values: values(pairs),
        }
    }

    fn imported(pairs: &[(&str, FieldValue)]) -> ImportRecord {
        let mut record = ImportRecord::from_values(values(pairs));
        record.staging_id = Some(99);
        record
    }

    #[test]
    fn test_group_key_round_trip() {
        assert_eq!("12".parse::<GroupKey>().unwrap(), GroupKey::Existing(12));
        assert_eq!("new_101".parse::<GroupKey>().unwrap(), GroupKey::New(101));
        assert_eq!(GroupKey::New(101).to_string(), "new_101");
        assert!("new_".parse::<GroupKey>().is_err());
        assert!("abc".parse::<GroupKey>().is_err());
    }

    #[test]
    fn test_identical_records_produce_no_group() {
        let fields = [
            ("digtracker_id", FieldValue::Int(101)),
            ("gwd_number", FieldValue::Int(5500)),
            ("land_cost", FieldValue::Float(1200.0)),
            ("status", FieldValue::text("Ready")),
        ];

        let set = compare_records(&[existing(1, &fields)], &[imported(&fields)]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_conflict_lists_only_differing_fields() {
        let stored = existing(
            7,
            &[
                ("digtracker_id", FieldValue::Int(101)),
                ("gwd_number", FieldValue::Int(5500)),
                ("land_cost", FieldValue::Float(1200.0)),
                ("notes", FieldValue::Null),
            ],
        );
        let incoming = imported(&[
            ("digtracker_id", FieldValue::Int(101)),
            ("gwd_number", FieldValue::Int(5500)),
            ("land_cost", FieldValue::Float(1500.0)),
            ("notes", FieldValue::Null),
        ]);

        let set = compare_records(&[stored], &[incoming]);
        assert_eq!(set.len(), 1);

        let group = set.get(&GroupKey::Existing(7)).unwrap();
        assert!(!group.is_new());
        assert_eq!(group.entries().len(), 1);

        let entry = &group.entries()[0];
        assert_eq!(entry.field(), "land_cost");
        assert_eq!(entry.gwd_id(), Some(7));
        assert_eq!(entry.existing(), &FieldValue::Float(1200.0));
        assert_eq!(entry.imported(), &FieldValue::Float(1500.0));
        assert!(!entry.is_new());
    }

    #[test]
    fn test_unmatched_record_lists_every_field() {
        let incoming = imported(&[
            ("digtracker_id", FieldValue::Int(202)),
            ("gwd_number", FieldValue::Int(6600)),
        ]);

        let set = compare_records(&[], &[incoming]);
        let group = set.get(&GroupKey::New(202)).unwrap();

        assert!(group.is_new());
        assert_eq!(group.entries().len(), fields::GWD_FIELDS.len());
        for entry in group.entries() {
            assert!(entry.is_new());
            assert_eq!(entry.gwd_id(), None);
            assert_eq!(entry.existing(), &FieldValue::Null);
            assert_eq!(entry.gwd_number(), Some(6600));
        }
        assert!(group.entry("id").is_none());
        assert!(group.entry("imported_at").is_none());
    }

    #[test]
    fn test_rows_without_external_id_are_skipped() {
        let incoming = imported(&[("gwd_number", FieldValue::Int(1))]);
        assert!(compare_records(&[], &[incoming]).is_empty());
    }

    #[test]
    fn test_remove_entry_drops_empty_group() {
        let stored = existing(3, &[("digtracker_id", FieldValue::Int(5)), ("year", FieldValue::Int(2020))]);
        let incoming = imported(&[
            ("digtracker_id", FieldValue::Int(5)),
            ("year", FieldValue::Int(2021)),
            ("county", FieldValue::text("Harris")),
        ]);

        let mut set = compare_records(&[stored], &[incoming]);
        let key = GroupKey::Existing(3);
        assert_eq!(set.get(&key).unwrap().entries().len(), 2);

        assert!(set.remove_entry(&key, "year"));
        assert_eq!(set.entry_count(), 1);
        assert!(set.remove_entry(&key, "county"));
        assert!(set.get(&key).is_none());
        assert!(!set.remove_entry(&key, "county"));
    }

    #[test]
    fn test_difference_set_json_round_trip() {
        let incoming = imported(&[
            ("digtracker_id", FieldValue::Int(202)),
            ("gwd_number", FieldValue::Int(6600)),
        ]);
        let set = compare_records(&[], &[incoming]);

        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"new_202\""));
        assert!(json.contains("\"isNew\":true"));

        let back: DifferenceSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}

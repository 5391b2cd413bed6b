// ✅ Resolution Coordinator - apply one user decision, shrink the set
//
// Existing record → single-field update, the entry goes.
// New record      → the whole record is persisted, the group goes.
//
// The input set is never mutated: success returns the smaller set, failure
// returns the error and the caller keeps what it had.

use crate::differences::{DifferenceEntry, DifferenceGroup, DifferenceSet, GroupKey};
use crate::error::{ImportError, ImportResult, StoreError};
use crate::fields;
use crate::model::{FieldMap, FieldValue};
use crate::store::GwdStore;
use serde::{Deserialize, Serialize};

/// Which group a decision applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Existing { gwd_id: i64 },
    /// A new-record group. With a DigTracker id the group is looked up by
    /// key; without one, the first new record with the GWD number is used.
    New {
        gwd_number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digtracker_id: Option<i64>,
    },
}

impl Resolution {
    /// Target for a rendered group key (`"12"` or `"new_101"`)
    pub fn for_group(set: &DifferenceSet, key: &GroupKey) -> Option<Self> {
        match key {
            GroupKey::Existing(gwd_id) => Some(Resolution::Existing { gwd_id: *gwd_id }),
            GroupKey::New(digtracker_id) => set
                .get(key)
                .and_then(DifferenceGroup::gwd_number)
                .map(|gwd_number| Resolution::New {
                    gwd_number,
                    digtracker_id: Some(*digtracker_id),
                }),
        }
    }
}

/// The value the user picked for one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "value", rename_all = "snake_case")]
pub enum Choice {
    KeepExisting,
    TakeImported,
    Value(FieldValue),
}

impl Choice {
    pub fn pick(&self, entry: &DifferenceEntry) -> FieldValue {
        match self {
            Choice::KeepExisting => entry.existing().clone(),
            Choice::TakeImported => entry.imported().clone(),
            Choice::Value(v) => v.clone(),
        }
    }
}

/// Apply one resolution. Already-resolved targets are a no-op.
pub fn resolve<S: GwdStore>(
    store: &mut S,
    set: &DifferenceSet,
    target: Resolution,
    field: &str,
    choice: &Choice,
) -> ImportResult<DifferenceSet> {
    match target {
        Resolution::Existing { gwd_id } => resolve_existing(store, set, gwd_id, field, choice),
        Resolution::New {
            gwd_number,
            digtracker_id,
        } => resolve_new(store, set, gwd_number, digtracker_id, field, choice),
    }
}

fn resolve_existing<S: GwdStore>(
    store: &mut S,
    set: &DifferenceSet,
    gwd_id: i64,
    field: &str,
    choice: &Choice,
) -> ImportResult<DifferenceSet> {
    let key = GroupKey::Existing(gwd_id);
    let Some(entry) = set.get(&key).and_then(|g| g.entry(field)) else {
        log::debug!("{}.{} already resolved", key, field);
        return Ok(set.clone());
    };
    if fields::lookup(field).is_none() {
        return Err(ImportError::UnknownField(field.to_string()));
    }

    let value = choice.pick(entry);
    store
        .update_field(gwd_id, field, &value)
        .map_err(|source| failed(&key, field, source))?;

    log::info!("Resolved {} on GWD {} → {}", field, gwd_id, value);

    let mut next = set.clone();
    next.remove_entry(&key, field);
    Ok(next)
}

fn resolve_new<S: GwdStore>(
    store: &mut S,
    set: &DifferenceSet,
    gwd_number: i64,
    digtracker_id: Option<i64>,
    field: &str,
    choice: &Choice,
) -> ImportResult<DifferenceSet> {
    let group = match digtracker_id {
        Some(id) => set.get(&GroupKey::New(id)).filter(|g| g.is_new()),
        None => set.find_new_by_gwd_number(gwd_number),
    };
    let Some(group) = group else {
        log::debug!("new GWD {} already resolved", gwd_number);
        return Ok(set.clone());
    };
    let key = group.key();
    let Some(entry) = group.entry(field) else {
        return Err(ImportError::UnknownField(field.to_string()));
    };
    let chosen = choice.pick(entry);

    let mut record: FieldMap = group
        .entries()
        .iter()
        .map(|e| (e.field().to_string(), e.imported().clone()))
        .collect();
    record.insert(field.to_string(), chosen);
    if let GroupKey::New(digtracker_id) = key {
        record.insert(fields::DIGTRACKER_ID.to_string(), FieldValue::Int(digtracker_id));
    }

    let gwd_id = persist_new(store, &key, &record).map_err(|source| failed(&key, field, source))?;
    log::info!("Confirmed new GWD {} as record {}", gwd_number, gwd_id);

    let mut next = set.clone();
    next.remove_group(&key);
    Ok(next)
}

/// Update the auto-inserted copy when there is one, otherwise insert
fn persist_new<S: GwdStore>(store: &mut S, key: &GroupKey, record: &FieldMap) -> Result<i64, StoreError> {
    let existing = match key {
        GroupKey::New(digtracker_id) => store.fetch_existing_by_external_ids(&[*digtracker_id])?,
        GroupKey::Existing(_) => Vec::new(),
    };

    match existing.first() {
        Some(stored) => {
            store.update_record(stored.gwd_id, record)?;
            Ok(stored.gwd_id)
        }
        None => store.insert_record(record),
    }
}

fn failed(key: &GroupKey, field: &str, source: StoreError) -> ImportError {
    log::warn!("Resolution of {} on {} failed: {}", field, key, source);
    ImportError::Resolution {
        target: key.to_string(),
        field: field.to_string(),
        source,
    }
}

// 🧪 In-memory Store - substitute for SQLite in tests and dry runs
// Same contract as SqliteStore, plus scripted failures.

use super::{
    Event, GwdStore, StoreResult, DEFAULT_ACTOR, ENTITY_GWD, ENTITY_IMPORT_RUN, EVENT_FIELD_UPDATED,
    EVENT_INSERTED, EVENT_RECORD_UPDATED, EVENT_STAGED,
};
use crate::error::StoreError;
use crate::fields;
use crate::model::{ExistingRecord, FieldMap, FieldValue, ImportRecord, SyncStatus};
use chrono::Utc;

/// Store operation that should be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Reject the nth staging batch (1-based)
    StagingBatch(usize),
    FetchStaged,
    MarkSynced,
    FetchExisting,
    InsertRecords,
    InsertRecord,
    UpdateField,
    UpdateRecord,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    staging: Vec<ImportRecord>,
    records: Vec<ExistingRecord>,
    events: Vec<Event>,
    next_staging_id: i64,
    next_gwd_id: i64,
    staging_batches: usize,
    writes: usize,
    fail: Option<FailPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with authoritative records
    pub fn with_records(records: Vec<FieldMap>) -> Self {
        let mut store = Self::new();
        for values in records {
            store.push_record(values);
        }
        store
    }

    pub fn fail_on(&mut self, point: FailPoint) {
        self.fail = Some(point);
    }

    pub fn clear_failure(&mut self) {
        self.fail = None;
    }

    pub fn records(&self) -> &[ExistingRecord] {
        &self.records
    }

    pub fn record(&self, gwd_id: i64) -> Option<&ExistingRecord> {
        self.records.iter().find(|r| r.gwd_id == gwd_id)
    }

    pub fn staging(&self) -> &[ImportRecord] {
        &self.staging
    }

    /// Successful write calls so far (staging batches included)
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.fail == Some(point) {
            return Err(StoreError::Rejected(format!("{:?}", point)));
        }
        Ok(())
    }

    fn push_record(&mut self, values: FieldMap) -> i64 {
        self.next_gwd_id += 1;
        let gwd_id = self.next_gwd_id;

        self.records.push(ExistingRecord {
            gwd_id,
            created_at: Some(Utc::now().to_rfc3339()),
            values: normalize(&values),
        });
        self.events.push(Event::new(
            EVENT_INSERTED,
            ENTITY_GWD,
            &gwd_id.to_string(),
            serde_json::json!({
                "digtracker_id": values.get(fields::DIGTRACKER_ID),
                "gwd_number": values.get(fields::GWD_NUMBER),
            }),
            DEFAULT_ACTOR,
        ));

        gwd_id
    }

    fn record_mut(&mut self, gwd_id: i64) -> StoreResult<&mut ExistingRecord> {
        self.records
            .iter_mut()
            .find(|r| r.gwd_id == gwd_id)
            .ok_or(StoreError::NotFound(gwd_id))
    }
}

/// Every domain field present, unknown columns dropped (like a real table)
fn normalize(values: &FieldMap) -> FieldMap {
    fields::field_names()
        .map(|name| {
            let value = values.get(name).cloned().unwrap_or_default();
            (name.to_string(), value)
        })
        .collect()
}

impl GwdStore for MemoryStore {
    fn insert_staging(&mut self, rows: &[ImportRecord]) -> StoreResult<Vec<i64>> {
        self.staging_batches += 1;
        self.check(FailPoint::StagingBatch(self.staging_batches))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            self.next_staging_id += 1;
            let mut staged = row.clone();
            staged.staging_id = Some(self.next_staging_id);
            staged.imported_at = staged.imported_at.or_else(|| Some(Utc::now()));
            staged.values = normalize(&row.values);
            ids.push(self.next_staging_id);
            self.staging.push(staged);
        }

        if let Some(run) = rows.first().and_then(|r| r.import_run.as_deref()) {
            self.events.push(Event::new(
                EVENT_STAGED,
                ENTITY_IMPORT_RUN,
                run,
                serde_json::json!({ "rows": rows.len() }),
                DEFAULT_ACTOR,
            ));
        }

        self.writes += 1;
        Ok(ids)
    }

    fn fetch_staged(&self, import_run: &str) -> StoreResult<Vec<ImportRecord>> {
        self.check(FailPoint::FetchStaged)?;
        Ok(self
            .staging
            .iter()
            .filter(|r| r.import_run.as_deref() == Some(import_run))
            .filter(|r| r.digtracker_id().is_some())
            .cloned()
            .collect())
    }

    fn mark_staging_synced(&mut self, import_run: &str) -> StoreResult<usize> {
        self.check(FailPoint::MarkSynced)?;
        let mut touched = 0;
        for row in self
            .staging
            .iter_mut()
            .filter(|r| r.import_run.as_deref() == Some(import_run))
        {
            row.sync_status = SyncStatus::Synced;
            touched += 1;
        }
        Ok(touched)
    }

    fn fetch_existing_by_external_ids(&self, ids: &[i64]) -> StoreResult<Vec<ExistingRecord>> {
        self.check(FailPoint::FetchExisting)?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.digtracker_id().map_or(false, |id| ids.contains(&id)))
            .cloned()
            .collect())
    }

    fn fetch_all(&self) -> StoreResult<Vec<ExistingRecord>> {
        Ok(self.records.clone())
    }

    fn insert_records(&mut self, records: &[FieldMap]) -> StoreResult<Vec<i64>> {
        self.check(FailPoint::InsertRecords)?;
        let ids: Vec<i64> = records.iter().map(|r| self.push_record(r.clone())).collect();
        self.writes += 1;
        Ok(ids)
    }

    fn insert_record(&mut self, record: &FieldMap) -> StoreResult<i64> {
        self.check(FailPoint::InsertRecord)?;
        let gwd_id = self.push_record(record.clone());
        self.writes += 1;
        Ok(gwd_id)
    }

    fn update_field(&mut self, gwd_id: i64, field: &str, value: &FieldValue) -> StoreResult<()> {
        self.check(FailPoint::UpdateField)?;
        if fields::lookup(field).is_none() {
            return Err(StoreError::UnknownField(field.to_string()));
        }

        let record = self.record_mut(gwd_id)?;
        record.values.insert(field.to_string(), value.clone());

        self.events.push(Event::new(
            EVENT_FIELD_UPDATED,
            ENTITY_GWD,
            &gwd_id.to_string(),
            serde_json::json!({ "field": field, "value": value }),
            DEFAULT_ACTOR,
        ));
        self.writes += 1;
        Ok(())
    }

    fn update_record(&mut self, gwd_id: i64, values: &FieldMap) -> StoreResult<()> {
        self.check(FailPoint::UpdateRecord)?;
        let record = self.record_mut(gwd_id)?;
        record.values = normalize(values);

        self.events.push(Event::new(
            EVENT_RECORD_UPDATED,
            ENTITY_GWD,
            &gwd_id.to_string(),
            serde_json::json!({ "fields": fields::GWD_FIELDS.len() }),
            DEFAULT_ACTOR,
        ));
        self.writes += 1;
        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        Ok(self
            .events
            .iter()
            .rev()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

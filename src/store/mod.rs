// 🗄️ Data Access - the store the import core reconciles against
//
// The core never owns storage. Everything it needs goes through GwdStore,
// passed in explicitly, so SQLite and the in-memory fake are interchangeable.

pub mod memory;
pub mod sqlite;

pub use memory::{FailPoint, MemoryStore};
pub use sqlite::{setup_database, SqliteStore};

use crate::error::StoreError;
use crate::model::{ExistingRecord, FieldMap, FieldValue, ImportRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StoreResult<T> = Result<T, StoreError>;

/// Generic data-access collaborator for GWD records
pub trait GwdStore {
    /// Insert one batch into the staging table. Returns the staging ids.
    fn insert_staging(&mut self, rows: &[ImportRecord]) -> StoreResult<Vec<i64>>;

    /// Staged rows of one import run whose external id is not null
    fn fetch_staged(&self, import_run: &str) -> StoreResult<Vec<ImportRecord>>;

    /// Mark a run's staged rows as reconciled; returns rows touched
    fn mark_staging_synced(&mut self, import_run: &str) -> StoreResult<usize>;

    /// Authoritative records whose external id is in the list
    fn fetch_existing_by_external_ids(&self, ids: &[i64]) -> StoreResult<Vec<ExistingRecord>>;

    /// Every authoritative record, by surrogate id
    fn fetch_all(&self) -> StoreResult<Vec<ExistingRecord>>;

    /// Bulk insert into the authoritative table. Returns the new gwd ids.
    fn insert_records(&mut self, records: &[FieldMap]) -> StoreResult<Vec<i64>>;

    fn insert_record(&mut self, record: &FieldMap) -> StoreResult<i64>;

    fn update_field(&mut self, gwd_id: i64, field: &str, value: &FieldValue) -> StoreResult<()>;

    /// Overwrite every domain field of one record
    fn update_record(&mut self, gwd_id: i64, record: &FieldMap) -> StoreResult<()>;

    /// Audit trail for one entity, newest first
    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>>;
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for the audit trail; every store write leaves one behind
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub const EVENT_STAGED: &str = "gwd_batch_staged";
pub const EVENT_INSERTED: &str = "gwd_inserted";
pub const EVENT_FIELD_UPDATED: &str = "gwd_field_updated";
pub const EVENT_RECORD_UPDATED: &str = "gwd_record_updated";

pub const ENTITY_GWD: &str = "gwd";
pub const ENTITY_IMPORT_RUN: &str = "import_run";

/// Default actor recorded on events
pub const DEFAULT_ACTOR: &str = "gwd_importer";

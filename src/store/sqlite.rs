// 🗄️ SQLite Store - authoritative GWDs, staging area, audit trail (WAL mode)

use super::{
    Event, GwdStore, StoreResult, DEFAULT_ACTOR, ENTITY_GWD, ENTITY_IMPORT_RUN, EVENT_FIELD_UPDATED,
    EVENT_INSERTED, EVENT_RECORD_UPDATED, EVENT_STAGED,
};
use crate::error::StoreError;
use crate::fields::{self, FieldKind, GWD_FIELDS};
use crate::model::{ExistingRecord, FieldMap, FieldValue, ImportRecord, SyncStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite caps bound parameters per statement; stay well below it
const IN_LIST_CHUNK: usize = 500;

pub struct SqliteStore {
    conn: Connection,
    actor: String,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Actor recorded on audit events from now on
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count_records(&self) -> StoreResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM gwd", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_staged(&self, import_run: &str) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM gwd_staging WHERE import_run = ?1",
            [import_run],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn fetch_record(&self, gwd_id: i64) -> StoreResult<ExistingRecord> {
        let sql = format!("SELECT {} FROM gwd WHERE gwd_id = ?1", gwd_select_columns());
        self.conn
            .query_row(&sql, [gwd_id], read_existing)
            .optional()?
            .ok_or(StoreError::NotFound(gwd_id))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let columns = GWD_FIELDS
        .iter()
        .map(|f| {
            if f.name == fields::STATUS {
                format!("{} {} DEFAULT '{}'", f.name, f.kind.sql_type(), fields::DEFAULT_STATUS)
            } else {
                format!("{} {}", f.name, f.kind.sql_type())
            }
        })
        .collect::<Vec<_>>()
        .join(",\n            ");

    // ==========================================================================
    // Authoritative GWD table
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS gwd (
            gwd_id INTEGER PRIMARY KEY AUTOINCREMENT,
            {},
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
            columns
        ),
        [],
    )?;

    // ==========================================================================
    // Staging table (disposable scratch area, one import run per import_run)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS gwd_staging (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {},
            imported_at TEXT NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            import_run TEXT NOT NULL
        )",
            columns
        ),
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gwd_digtracker_id ON gwd(digtracker_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staging_run ON gwd_staging(import_run)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn field_list() -> String {
    fields::field_names().collect::<Vec<_>>().join(", ")
}

fn gwd_select_columns() -> String {
    format!("gwd_id, created_at, {}", field_list())
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Int(v) => Value::Integer(*v),
        FieldValue::Float(v) => Value::Real(*v),
        FieldValue::Text(s) => Value::Text(s.clone()),
    }
}

/// Read a column back into the type its field kind calls for
fn read_value(value: ValueRef<'_>, kind: FieldKind) -> FieldValue {
    match (value, kind) {
        (ValueRef::Null, _) => FieldValue::Null,
        (ValueRef::Integer(v), FieldKind::Integer) => FieldValue::Int(v),
        (ValueRef::Integer(v), FieldKind::Decimal) => FieldValue::Float(v as f64),
        (ValueRef::Integer(v), _) => FieldValue::Text(v.to_string()),
        (ValueRef::Real(v), FieldKind::Integer) => FieldValue::Int(v as i64),
        (ValueRef::Real(v), FieldKind::Decimal) => FieldValue::Float(v),
        (ValueRef::Real(v), _) => FieldValue::Text(v.to_string()),
        (ValueRef::Text(t), _) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
        (ValueRef::Blob(_), _) => FieldValue::Null,
    }
}

/// Domain fields starting at column `offset`
fn read_fields(row: &Row<'_>, offset: usize) -> rusqlite::Result<FieldMap> {
    let mut values = FieldMap::new();
    for (i, field) in GWD_FIELDS.iter().enumerate() {
        let value = read_value(row.get_ref(offset + i)?, field.kind);
        values.insert(field.name.to_string(), value);
    }
    Ok(values)
}

fn read_existing(row: &Row<'_>) -> rusqlite::Result<ExistingRecord> {
    Ok(ExistingRecord {
        gwd_id: row.get(0)?,
        created_at: row.get(1)?,
        values: read_fields(row, 2)?,
    })
}

fn read_staged(row: &Row<'_>) -> rusqlite::Result<ImportRecord> {
    let imported_at: String = row.get(1)?;
    let sync_status: String = row.get(2)?;

    Ok(ImportRecord {
        staging_id: Some(row.get(0)?),
        imported_at: DateTime::parse_from_rfc3339(&imported_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        sync_status: SyncStatus::parse(&sync_status),
        import_run: Some(row.get(3)?),
        values: read_fields(row, 4)?,
    })
}

fn domain_values(record: &FieldMap) -> Vec<Value> {
    fields::field_names()
        .map(|name| record.get(name).map(sql_value).unwrap_or(Value::Null))
        .collect()
}

fn insert_event(conn: &Connection, event: &Event) -> StoreResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn insert_gwd(conn: &Connection, record: &FieldMap, actor: &str) -> StoreResult<i64> {
    let sql = format!(
        "INSERT INTO gwd ({}) VALUES ({})",
        field_list(),
        placeholders(1, GWD_FIELDS.len())
    );
    conn.execute(&sql, params_from_iter(domain_values(record)))?;
    let gwd_id = conn.last_insert_rowid();

    let event = Event::new(
        EVENT_INSERTED,
        ENTITY_GWD,
        &gwd_id.to_string(),
        serde_json::json!({
            "digtracker_id": record.get(fields::DIGTRACKER_ID),
            "gwd_number": record.get(fields::GWD_NUMBER),
        }),
        actor,
    );
    insert_event(conn, &event)?;

    Ok(gwd_id)
}

// ============================================================================
// GwdStore
// ============================================================================

impl GwdStore for SqliteStore {
    fn insert_staging(&mut self, rows: &[ImportRecord]) -> StoreResult<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());

        {
            let sql = format!(
                "INSERT INTO gwd_staging ({}, imported_at, sync_status, import_run) VALUES ({})",
                field_list(),
                placeholders(1, GWD_FIELDS.len() + 3)
            );
            let mut stmt = tx.prepare(&sql)?;

            for row in rows {
                let mut values = domain_values(&row.values);
                values.push(Value::Text(
                    row.imported_at.unwrap_or_else(Utc::now).to_rfc3339(),
                ));
                values.push(Value::Text(row.sync_status.as_str().to_string()));
                values.push(Value::Text(row.import_run.clone().unwrap_or_default()));

                stmt.execute(params_from_iter(values))?;
                ids.push(tx.last_insert_rowid());
            }
        }

        if let Some(run) = rows.first().and_then(|r| r.import_run.as_deref()) {
            let event = Event::new(
                EVENT_STAGED,
                ENTITY_IMPORT_RUN,
                run,
                serde_json::json!({ "rows": rows.len() }),
                &self.actor,
            );
            insert_event(&tx, &event)?;
        }

        tx.commit()?;
        Ok(ids)
    }

    fn fetch_staged(&self, import_run: &str) -> StoreResult<Vec<ImportRecord>> {
        let sql = format!(
            "SELECT id, imported_at, sync_status, import_run, {}
             FROM gwd_staging
             WHERE import_run = ?1 AND digtracker_id IS NOT NULL
             ORDER BY id",
            field_list()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([import_run], read_staged)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn mark_staging_synced(&mut self, import_run: &str) -> StoreResult<usize> {
        let updated = self.conn.execute(
            "UPDATE gwd_staging SET sync_status = ?1 WHERE import_run = ?2",
            params![SyncStatus::Synced.as_str(), import_run],
        )?;
        Ok(updated)
    }

    fn fetch_existing_by_external_ids(&self, ids: &[i64]) -> StoreResult<Vec<ExistingRecord>> {
        let mut records = Vec::new();

        for chunk in ids.chunks(IN_LIST_CHUNK) {
            let sql = format!(
                "SELECT {} FROM gwd WHERE digtracker_id IN ({}) ORDER BY gwd_id",
                gwd_select_columns(),
                placeholders(1, chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let found = stmt
                .query_map(params_from_iter(chunk.iter()), read_existing)?
                .collect::<Result<Vec<_>, _>>()?;
            records.extend(found);
        }

        records.sort_by_key(|r| r.gwd_id);
        Ok(records)
    }

    fn fetch_all(&self) -> StoreResult<Vec<ExistingRecord>> {
        let sql = format!("SELECT {} FROM gwd ORDER BY gwd_id", gwd_select_columns());
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], read_existing)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn insert_records(&mut self, records: &[FieldMap]) -> StoreResult<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_gwd(&tx, record, &self.actor)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    fn insert_record(&mut self, record: &FieldMap) -> StoreResult<i64> {
        let tx = self.conn.transaction()?;
        let gwd_id = insert_gwd(&tx, record, &self.actor)?;
        tx.commit()?;
        Ok(gwd_id)
    }

    fn update_field(&mut self, gwd_id: i64, field: &str, value: &FieldValue) -> StoreResult<()> {
        // Column names only ever come from the field catalogue
        let column = fields::lookup(field)
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))?
            .name;

        let tx = self.conn.transaction()?;
        let sql = format!("UPDATE gwd SET {} = ?1 WHERE gwd_id = ?2", column);
        let changed = tx.execute(&sql, params![sql_value(value), gwd_id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(gwd_id));
        }

        let event = Event::new(
            EVENT_FIELD_UPDATED,
            ENTITY_GWD,
            &gwd_id.to_string(),
            serde_json::json!({ "field": column, "value": value }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }

    fn update_record(&mut self, gwd_id: i64, record: &FieldMap) -> StoreResult<()> {
        let assignments = fields::field_names()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", name, i + 1))
            .collect::<Vec<_>>()
            .join(", ");

        let mut values = domain_values(record);
        values.push(Value::Integer(gwd_id));

        let tx = self.conn.transaction()?;
        let sql = format!(
            "UPDATE gwd SET {} WHERE gwd_id = ?{}",
            assignments,
            GWD_FIELDS.len() + 1
        );
        let changed = tx.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(StoreError::NotFound(gwd_id));
        }

        let event = Event::new(
            EVENT_RECORD_UPDATED,
            ENTITY_GWD,
            &gwd_id.to_string(),
            serde_json::json!({ "fields": GWD_FIELDS.len() }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC, id DESC",
        )?;

        let rows = stmt
            .query_map(params![entity_type, entity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (event_id, timestamp, event_type, entity_type, entity_id, data, actor) in rows {
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| StoreError::Rejected(format!("bad event timestamp: {}", e)))?
                .with_timezone(&Utc);
            events.push(Event {
                event_id,
                timestamp,
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data)?,
                actor,
            });
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwd(digtracker_id: i64, gwd_number: i64, land_cost: f64) -> FieldMap {
        let mut values = FieldMap::new();
        values.insert("digtracker_id".to_string(), FieldValue::Int(digtracker_id));
        values.insert("gwd_number".to_string(), FieldValue::Int(gwd_number));
        values.insert("land_cost".to_string(), FieldValue::Float(land_cost));
        values.insert("status".to_string(), FieldValue::text("Ready"));
        values
    }

    fn staged(run: &str, digtracker_id: Option<i64>, gwd_number: i64) -> ImportRecord {
        let mut values = FieldMap::new();
        if let Some(id) = digtracker_id {
            values.insert("digtracker_id".to_string(), FieldValue::Int(id));
        }
        values.insert("gwd_number".to_string(), FieldValue::Int(gwd_number));
        ImportRecord {
            import_run: Some(run.to_string()),
            imported_at: Some(Utc::now()),
            ..ImportRecord::from_values(values)
        }
    }

    #[test]
    fn test_setup_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        setup_database(store.connection()).unwrap();
        assert_eq!(store.count_records().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_fetch_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ids = store
            .insert_records(&[gwd(101, 5500, 1200.0), gwd(102, 5501, 0.0)])
            .unwrap();
        assert_eq!(ids.len(), 2);

        let found = store.fetch_existing_by_external_ids(&[101, 999]).unwrap();
        assert_eq!(found.len(), 1);

        let record = &found[0];
        assert_eq!(record.gwd_id, ids[0]);
        assert_eq!(record.get("land_cost"), &FieldValue::Float(1200.0));
        assert_eq!(record.get("status"), &FieldValue::text("Ready"));
        assert_eq!(record.get("notes"), &FieldValue::Null);
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_fetch_by_external_ids_empty_list() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.fetch_existing_by_external_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_staging_filters_by_run_and_external_id() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_staging(&[
                staged("run-a", Some(1), 10),
                staged("run-a", None, 11),
                staged("run-b", Some(2), 12),
            ])
            .unwrap();

        let rows = store.fetch_staged("run-a").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].digtracker_id(), Some(1));
        assert_eq!(rows[0].sync_status, SyncStatus::Pending);
        assert!(rows[0].staging_id.is_some());
        assert_eq!(store.count_staged("run-a").unwrap(), 2);

        assert_eq!(store.mark_staging_synced("run-a").unwrap(), 2);
        assert_eq!(store.fetch_staged("run-a").unwrap()[0].sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_update_field_and_audit_trail() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let gwd_id = store.insert_record(&gwd(101, 5500, 1200.0)).unwrap();

        store
            .update_field(gwd_id, "land_cost", &FieldValue::Float(1500.0))
            .unwrap();
        assert_eq!(
            store.fetch_record(gwd_id).unwrap().get("land_cost"),
            &FieldValue::Float(1500.0)
        );

        let events = store.events_for(ENTITY_GWD, &gwd_id.to_string()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.event_type == EVENT_FIELD_UPDATED));
        assert!(events.iter().any(|e| e.event_type == EVENT_INSERTED));
    }

    #[test]
    fn test_update_field_rejects_unknown_columns() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let gwd_id = store.insert_record(&gwd(1, 1, 1.0)).unwrap();

        let err = store
            .update_field(gwd_id, "land_cost; DROP TABLE gwd", &FieldValue::Null)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField(_)));

        let err = store.update_field(9999, "land_cost", &FieldValue::Null).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(9999)));
    }

    #[test]
    fn test_update_record_overwrites_all_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let gwd_id = store.insert_record(&gwd(101, 5500, 1200.0)).unwrap();

        let mut replacement = gwd(101, 5500, 900.0);
        replacement.insert("notes".to_string(), FieldValue::text("re-dig"));
        store.update_record(gwd_id, &replacement).unwrap();

        let record = store.fetch_record(gwd_id).unwrap();
        assert_eq!(record.get("land_cost"), &FieldValue::Float(900.0));
        assert_eq!(record.get("notes"), &FieldValue::text("re-dig"));
        assert_eq!(store.count_records().unwrap(), 1);
    }
}

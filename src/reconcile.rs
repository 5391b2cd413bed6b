// ⚖️ Import Reconciler - raw batch → staged rows → difference set
//
// One run per upload:
//   Parsing → Validating → Staging → Fetching → AutoInserting → Comparing → Done
//
// Brand-new records go straight into the authoritative table; only records
// that already exist ask the user to choose between competing values.

use crate::config::ImportConfig;
use crate::csv_source::CsvSource;
use crate::differences::{compare_records, DifferenceSet};
use crate::error::{ImportError, ImportResult};
use crate::model::{ExistingRecord, ImportRecord, RawRow, SyncStatus};
use crate::store::GwdStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

// ============================================================================
// PHASES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportPhase {
    Parsing,
    Validating,
    Staging,
    Fetching,
    AutoInserting,
    Comparing,
    Done,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportPhase::Parsing => "parsing",
            ImportPhase::Validating => "validating",
            ImportPhase::Staging => "staging",
            ImportPhase::Fetching => "fetching",
            ImportPhase::AutoInserting => "auto-inserting",
            ImportPhase::Comparing => "comparing",
            ImportPhase::Done => "done",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// IMPORT REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub run_id: String,
    /// SHA-256 of the source file, when the rows came from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    pub rows_received: usize,
    /// Rows dropped for lacking a GWD number
    pub rows_skipped: usize,
    pub rows_staged: usize,
    /// Staged but unmatchable: no DigTracker id
    pub rows_without_external_id: usize,
    /// Rows superseded by a later row with the same DigTracker id
    pub duplicate_external_ids: usize,
    pub matched: usize,
    /// Matched records with nothing to reconcile
    pub unchanged: usize,
    /// gwd ids of records inserted without confirmation
    pub inserted: Vec<i64>,
    /// Columns that aren't part of the GWD schema and were not persisted
    pub unknown_columns: Vec<String>,
    pub differences: DifferenceSet,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "Import {}: {} rows, {} skipped, {} staged, {} matched ({} unchanged), {} inserted, {} record(s) to review",
            self.run_id,
            self.rows_received,
            self.rows_skipped,
            self.rows_staged,
            self.matched,
            self.unchanged,
            self.inserted.len(),
            self.differences.len()
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct ImportReconciler {
    config: ImportConfig,
}

impl ImportReconciler {
    pub fn new(config: ImportConfig) -> Self {
        ImportReconciler { config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Run one import of raw rows against the store
    pub fn run<S: GwdStore>(&self, store: &mut S, rows: &[RawRow]) -> ImportResult<ImportReport> {
        enter(ImportPhase::Parsing);
        let records: Vec<ImportRecord> = rows.iter().map(ImportRecord::from_raw_row).collect();
        self.run_records(store, records)
    }

    /// Run one import of a CSV file; aliased columns are read in file order
    pub fn run_source<S: GwdStore>(&self, store: &mut S, source: &CsvSource) -> ImportResult<ImportReport> {
        enter(ImportPhase::Parsing);
        let records: Vec<ImportRecord> = source
            .rows
            .iter()
            .map(|row| ImportRecord::from_columns(source.headers.iter().map(String::as_str), row))
            .collect();

        let mut report = self.run_records(store, records)?;
        report.source_fingerprint = Some(source.fingerprint.clone());
        Ok(report)
    }

    /// Run one import of already-normalized records
    pub fn run_records<S: GwdStore>(
        &self,
        store: &mut S,
        records: Vec<ImportRecord>,
    ) -> ImportResult<ImportReport> {
        self.config.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let rows_received = records.len();

        let unknown_columns: Vec<String> = records
            .iter()
            .flat_map(|r| r.unknown_columns())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !unknown_columns.is_empty() {
            log::warn!(
                "Columns not in the GWD schema will not be saved: {}",
                unknown_columns.join(", ")
            );
        }

        // ====================================================================
        // Validating
        // ====================================================================
        enter(ImportPhase::Validating);
        let (valid, rows_skipped) = validate(records);
        let rows_without_external_id = valid.iter().filter(|r| r.digtracker_id().is_none()).count();
        if rows_without_external_id > 0 {
            log::warn!(
                "{} row(s) have no DigTracker id and can't be matched",
                rows_without_external_id
            );
        }

        // ====================================================================
        // Staging
        // ====================================================================
        enter(ImportPhase::Staging);
        let rows_staged = stage(store, valid, &run_id, self.config.staging_batch_size)?;

        // ====================================================================
        // Fetching
        // ====================================================================
        enter(ImportPhase::Fetching);
        let staged = store
            .fetch_staged(&run_id)
            .map_err(|source| ImportError::Fetch {
                what: "staged records",
                source,
            })?;
        let fetched = staged.len();
        let staged = dedupe_by_external_id(staged);
        let duplicate_external_ids = fetched - staged.len();

        let external_ids: Vec<i64> = staged.iter().filter_map(|r| r.digtracker_id()).collect();
        let existing = store
            .fetch_existing_by_external_ids(&external_ids)
            .map_err(|source| ImportError::Fetch {
                what: "existing records",
                source,
            })?;

        // ====================================================================
        // AutoInserting
        // ====================================================================
        enter(ImportPhase::AutoInserting);
        let known: HashSet<i64> = existing.iter().filter_map(ExistingRecord::digtracker_id).collect();
        let (matched, unmatched): (Vec<&ImportRecord>, Vec<&ImportRecord>) = staged
            .iter()
            .partition(|r| r.digtracker_id().map_or(false, |id| known.contains(&id)));

        let inserted = if unmatched.is_empty() {
            Vec::new()
        } else {
            let new_values: Vec<_> = unmatched.iter().map(|r| r.to_gwd_values()).collect();
            store
                .insert_records(&new_values)
                .map_err(|source| ImportError::AutoInsert {
                    count: new_values.len(),
                    source,
                })?
        };

        // ====================================================================
        // Comparing
        // ====================================================================
        enter(ImportPhase::Comparing);
        let mut differences = compare_records(&existing, &staged);
        if !self.config.confirm_new_records {
            differences.retain_conflicts();
        }
        let conflicts = differences.len() - differences.new_record_count();
        let unchanged = matched.len() - conflicts;

        store
            .mark_staging_synced(&run_id)
            .map_err(|source| ImportError::Bookkeeping {
                run: run_id.clone(),
                source,
            })?;

        enter(ImportPhase::Done);
        let report = ImportReport {
            run_id,
            source_fingerprint: None,
            rows_received,
            rows_skipped,
            rows_staged,
            rows_without_external_id,
            duplicate_external_ids,
            matched: matched.len(),
            unchanged,
            inserted,
            unknown_columns,
            differences,
        };

        log::info!("{}", report.summary());
        Ok(report)
    }
}

fn enter(phase: ImportPhase) {
    log::debug!("import phase: {}", phase);
}

/// Drop rows without a business key. Returns the kept rows and the skip count.
pub fn validate(records: Vec<ImportRecord>) -> (Vec<ImportRecord>, usize) {
    let total = records.len();
    let valid: Vec<ImportRecord> = records
        .into_iter()
        .filter(|r| r.gwd_number().is_some())
        .collect();

    let skipped = total - valid.len();
    if skipped > 0 {
        log::warn!("Skipped {} row(s) without a GWD number", skipped);
    }

    (valid, skipped)
}

/// Write rows to the staging area in fixed-size batches.
///
/// The first rejected batch aborts; batches already written stay.
pub fn stage<S: GwdStore>(
    store: &mut S,
    records: Vec<ImportRecord>,
    run_id: &str,
    batch_size: usize,
) -> ImportResult<usize> {
    let imported_at = Utc::now();
    let rows: Vec<ImportRecord> = records
        .into_iter()
        .map(|mut r| {
            r.staging_id = None;
            r.imported_at = Some(imported_at);
            r.sync_status = SyncStatus::Pending;
            r.import_run = Some(run_id.to_string());
            r
        })
        .collect();

    let batch_size = batch_size.max(1);
    let total = rows.len().div_ceil(batch_size);
    let mut staged = 0;

    for (i, batch) in rows.chunks(batch_size).enumerate() {
        let ids = store
            .insert_staging(batch)
            .map_err(|source| ImportError::Staging {
                batch: i + 1,
                total,
                source,
            })?;
        staged += ids.len();
        log::debug!("staged batch {}/{} ({} rows)", i + 1, total, ids.len());
    }

    Ok(staged)
}

/// Last staged row wins per DigTracker id; first-seen order is kept
fn dedupe_by_external_id(staged: Vec<ImportRecord>) -> Vec<ImportRecord> {
    let mut position: HashMap<i64, usize> = HashMap::new();
    let mut kept: Vec<ImportRecord> = Vec::with_capacity(staged.len());

    for record in staged {
        match record.digtracker_id() {
            Some(id) => match position.get(&id) {
                Some(&i) => {
                    log::warn!("DigTracker id {} appears more than once; keeping the last row", id);
                    kept[i] = record;
                }
                None => {
                    position.insert(id, kept.len());
                    kept.push(record);
                }
            },
            None => kept.push(record),
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differences::GroupKey;
    use crate::model::{FieldMap, FieldValue};
    use crate::store::{FailPoint, MemoryStore};

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    fn existing_gwd(digtracker_id: i64, gwd_number: i64, land_cost: f64) -> FieldMap {
        ImportRecord::from_raw_row(&raw(&[
            ("ID", &digtracker_id.to_string()),
            ("GWD #", &gwd_number.to_string()),
            ("Land Cost", &land_cost.to_string()),
        ]))
        .to_gwd_values()
    }

    fn reconciler(batch_size: usize) -> ImportReconciler {
        ImportReconciler::new(ImportConfig {
            staging_batch_size: batch_size,
            confirm_new_records: true,
        })
    }

    #[test]
    fn test_validate_drops_rows_without_gwd_number() {
        let records = vec![
            ImportRecord::from_raw_row(&raw(&[("GWD #", "1")])),
            ImportRecord::from_raw_row(&raw(&[("GWD #", "")])),
            ImportRecord::from_raw_row(&raw(&[("ID", "9")])),
        ];

        let (valid, skipped) = validate(records);
        assert_eq!(valid.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_staging_uses_fixed_batches() {
        let mut store = MemoryStore::new();
        let records: Vec<_> = (0..250)
            .map(|i| ImportRecord::from_raw_row(&raw(&[("ID", &i.to_string()), ("GWD #", "1")])))
            .collect();

        let staged = stage(&mut store, records, "run", 100).unwrap();
        assert_eq!(staged, 250);
        assert_eq!(store.write_count(), 3);
    }

    #[test]
    fn test_staging_failure_aborts_and_keeps_earlier_batches() {
        let mut store = MemoryStore::new();
        store.fail_on(FailPoint::StagingBatch(2));

        let rows: Vec<_> = (0..5)
            .map(|i| raw(&[("ID", &i.to_string()), ("GWD #", &i.to_string())]))
            .collect();

        let err = reconciler(2).run(&mut store, &rows).unwrap_err();
        assert!(matches!(err, ImportError::Staging { batch: 2, total: 3, .. }));
        assert_eq!(store.staging().len(), 2);
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_fetch_failure_is_fatal() {
        let mut store = MemoryStore::new();
        store.fail_on(FailPoint::FetchExisting);

        let err = reconciler(100)
            .run(&mut store, &[raw(&[("ID", "1"), ("GWD #", "1")])])
            .unwrap_err();
        assert!(matches!(err, ImportError::Fetch { what: "existing records", .. }));
    }

    #[test]
    fn test_staged_read_failure_is_fatal() {
        let mut store = MemoryStore::new();
        store.fail_on(FailPoint::FetchStaged);

        let err = reconciler(100)
            .run(&mut store, &[raw(&[("ID", "1"), ("GWD #", "1")])])
            .unwrap_err();
        assert!(matches!(err, ImportError::Fetch { what: "staged records", .. }));
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_auto_insert_failure_reports_count() {
        let mut store = MemoryStore::with_records(vec![existing_gwd(101, 5500, 1200.0)]);
        store.fail_on(FailPoint::InsertRecords);

        let err = reconciler(100)
            .run(
                &mut store,
                &[
                    raw(&[("ID", "101"), ("GWD #", "5500"), ("Land Cost", "1500")]),
                    raw(&[("ID", "202"), ("GWD #", "6600")]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ImportError::AutoInsert { count: 1, .. }));
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_sync_marking_failure_names_the_run() {
        let mut store = MemoryStore::new();
        store.fail_on(FailPoint::MarkSynced);

        let err = reconciler(100)
            .run(&mut store, &[raw(&[("ID", "1"), ("GWD #", "1")])])
            .unwrap_err();
        assert!(matches!(err, ImportError::Bookkeeping { ref run, .. } if !run.is_empty()));
        assert_eq!(store.staging().len(), 1);
    }

    #[test]
    fn test_unmatched_rows_are_auto_inserted_and_listed() {
        let mut store = MemoryStore::new();
        let report = reconciler(100)
            .run(&mut store, &[raw(&[("ID", "202"), ("GWD #", "6600"), ("System", "North")])])
            .unwrap();

        assert_eq!(report.inserted.len(), 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].get("system"), &FieldValue::text("North"));
        assert!(report.differences.get(&GroupKey::New(202)).is_some());
    }

    #[test]
    fn test_confirm_new_records_can_be_disabled() {
        let mut store = MemoryStore::new();
        let reconciler = ImportReconciler::new(ImportConfig {
            staging_batch_size: 100,
            confirm_new_records: false,
        });

        let report = reconciler
            .run(&mut store, &[raw(&[("ID", "202"), ("GWD #", "6600")])])
            .unwrap();
        assert_eq!(report.inserted.len(), 1);
        assert!(report.differences.is_empty());
    }

    #[test]
    fn test_unchanged_records_produce_no_group() {
        let mut store = MemoryStore::with_records(vec![existing_gwd(101, 5500, 1200.0)]);
        let report = reconciler(100)
            .run(&mut store, &[raw(&[("ID", "101"), ("GWD #", "5500"), ("Land Cost", "1200")])])
            .unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.unchanged, 1);
        assert!(report.differences.is_empty());
        assert!(report.inserted.is_empty());
    }

    #[test]
    fn test_duplicate_external_ids_last_row_wins() {
        let mut store = MemoryStore::with_records(vec![existing_gwd(101, 5500, 1200.0)]);
        let report = reconciler(100)
            .run(
                &mut store,
                &[
                    raw(&[("ID", "101"), ("GWD #", "5500"), ("Land Cost", "1300")]),
                    raw(&[("ID", "101"), ("GWD #", "5500"), ("Land Cost", "1400")]),
                ],
            )
            .unwrap();

        assert_eq!(report.duplicate_external_ids, 1);
        let group = report.differences.get(&GroupKey::Existing(1)).unwrap();
        assert_eq!(group.entry("land_cost").unwrap().imported(), &FieldValue::Float(1400.0));
    }

    #[test]
    fn test_rows_without_external_id_are_staged_but_not_reconciled() {
        let mut store = MemoryStore::new();
        let report = reconciler(100)
            .run(&mut store, &[raw(&[("GWD #", "5")])])
            .unwrap();

        assert_eq!(report.rows_staged, 1);
        assert_eq!(report.rows_without_external_id, 1);
        assert!(report.inserted.is_empty());
        assert!(report.differences.is_empty());
        assert_eq!(store.staging()[0].sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_zero_batch_size_is_a_config_error() {
        let mut store = MemoryStore::new();
        let err = reconciler(0).run(&mut store, &[]).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }
}

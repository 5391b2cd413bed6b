// Pipeline Tracker - GWD Import Core
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod csv_source;
pub mod differences;
pub mod error;
pub mod fields;
pub mod model;
pub mod reconcile;  // Import Reconciler
pub mod resolution; // Resolution Coordinator
pub mod store;
pub mod transform;  // Field Transformer

// Re-export commonly used types
pub use config::{ImportConfig, ServerConfig, TrackerConfig};
pub use csv_source::CsvSource;
pub use differences::{
    compare_records, DifferenceEntry, DifferenceGroup, DifferenceSet, GroupKey,
};
pub use error::{ImportError, ImportResult, StoreError};
pub use fields::{FieldDefinition, FieldKind, GWD_FIELDS};
pub use model::{ExistingRecord, FieldMap, FieldValue, ImportRecord, RawRow, SyncStatus};
pub use reconcile::{ImportPhase, ImportReconciler, ImportReport};
pub use resolution::{resolve, Choice, Resolution};
pub use store::{Event, GwdStore, MemoryStore, SqliteStore};
pub use transform::{transform_header, transform_value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ❗ Error taxonomy for the import core
//
// Row-level validation failures never surface here: those rows are skipped
// and counted. Everything below is fatal to the operation that raised it.

use thiserror::Error;

/// Failure reported by a data-access collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("rejected by store: {0}")]
    Rejected(String),
}

/// Failure of an import run or of a single resolution
#[derive(Debug, Error)]
pub enum ImportError {
    /// A staging batch was rejected; earlier batches stay committed
    #[error("staging batch {batch} of {total} failed: {source}")]
    Staging {
        batch: usize,
        total: usize,
        #[source]
        source: StoreError,
    },

    #[error("fetching {what} failed: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("inserting {count} new record(s) failed: {source}")]
    AutoInsert {
        count: usize,
        #[source]
        source: StoreError,
    },

    #[error("updating staging status of run {run} failed: {source}")]
    Bookkeeping {
        run: String,
        #[source]
        source: StoreError,
    },

    /// The difference set is left untouched so the user can retry
    #[error("resolving {field} on {target} failed: {source}")]
    Resolution {
        target: String,
        field: String,
        #[source]
        source: StoreError,
    },

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ImportResult<T> = Result<T, ImportError>;

// Pipeline Tracker - CLI
// import → pending → resolve, one invocation at a time; the open difference
// set lives in a JSON session file between invocations.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use pipeline_tracker::config::DEFAULT_CONFIG_FILE;
use pipeline_tracker::store::ENTITY_GWD;
use pipeline_tracker::{
    resolve, transform_value, Choice, CsvSource, DifferenceGroup, DifferenceSet,
    GroupKey, GwdStore, ImportReconciler, ImportReport, Resolution, SqliteStore, TrackerConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_SESSION: &str = "gwd_session.json";

#[derive(Parser)]
#[command(name = "pipeline-tracker")]
#[command(about = "Import DigTracker GWD exports and reconcile them with the tracker database")]
#[command(version)]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(long, short = 'c', global = true, env = "TRACKER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database path, overrides the config
    #[arg(long, global = true, env = "TRACKER_DB")]
    db: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and its tables
    Init,

    /// Stage a CSV export, auto-insert new GWDs and record the differences
    Import {
        csv: PathBuf,

        #[arg(long, default_value = DEFAULT_SESSION)]
        session: PathBuf,
    },

    /// List unresolved differences
    Pending {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: PathBuf,
    },

    /// Resolve one field of one group ("12" or "new_101")
    #[command(group(ArgGroup::new("choice").required(true).args(["existing", "imported", "value"])))]
    Resolve {
        group: String,
        field: String,

        /// Keep the stored value
        #[arg(long)]
        existing: bool,

        /// Take the imported value
        #[arg(long)]
        imported: bool,

        /// Use this value instead
        #[arg(long, value_name = "VALUE")]
        value: Option<String>,

        #[arg(long, default_value = DEFAULT_SESSION)]
        session: PathBuf,
    },

    /// Audit trail of one GWD record
    History { gwd_id: i64 },
}

/// Difference set carried between invocations
#[derive(Debug, Default, Serialize, Deserialize)]
struct Session {
    #[serde(default)]
    run_id: Option<String>,
    differences: DifferenceSet,
}

impl Session {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Session::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Corrupt session file: {}", path.display()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write session: {}", path.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TrackerConfig::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        config.log_filter()
    };
    init_logging(level);

    match cli.command {
        Command::Init => run_init(&config),
        Command::Import { csv, session } => run_import(&config, &csv, &session),
        Command::Pending { session } => run_pending(&session),
        Command::Resolve {
            group,
            field,
            existing,
            imported,
            value,
            session,
        } => {
            let choice = if existing {
                Choice::KeepExisting
            } else if imported {
                Choice::TakeImported
            } else {
                let raw = value.unwrap_or_default();
                Choice::Value(transform_value(Some(&raw), &field).unwrap_or_default())
            };
            run_resolve(&config, &group, &field, &choice, &session)
        }
        Command::History { gwd_id } => run_history(&config, gwd_id),
    }
}

/// Route `log` records from the library through a tracing subscriber on stderr.
/// RUST_LOG overrides the configured level.
fn init_logging(level: log::LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn level_directive(level: log::LevelFilter) -> String {
    level.as_str().to_ascii_lowercase()
}

fn open_store(config: &TrackerConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path.display()))
}

fn run_init(config: &TrackerConfig) -> Result<()> {
    println!("🔧 Setting up database...");
    let store = open_store(config)?;
    println!("✓ Database ready at {} (WAL mode)", config.database_path.display());
    println!("✓ {} GWD records", store.count_records()?);
    Ok(())
}

fn run_import(config: &TrackerConfig, csv: &Path, session_path: &Path) -> Result<()> {
    println!("🗄️  GWD Import - CSV → staging → reconciliation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading CSV...");
    let source = CsvSource::read_path(csv)
        .with_context(|| format!("Failed to load CSV: {}", csv.display()))?;
    println!("✓ Loaded {} rows from {}", source.rows.len(), source.name);

    let mut store = open_store(config)?;
    let reconciler = ImportReconciler::new(config.import.clone());

    println!("\n💾 Staging and reconciling...");
    let report = reconciler.run_source(&mut store, &source)?;

    print_report(&report);

    let session = Session {
        run_id: Some(report.run_id.clone()),
        differences: report.differences,
    };
    session.save(session_path)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if session.differences.is_empty() {
        println!("✅ Nothing to review");
    } else {
        println!(
            "📝 {} record(s) to review, saved to {}",
            session.differences.len(),
            session_path.display()
        );
        println!("   Run: pipeline-tracker pending");
    }
    Ok(())
}

fn print_report(report: &ImportReport) {
    println!("✓ Rows received:  {}", report.rows_received);
    if report.rows_skipped > 0 {
        println!("⚠️  Rows skipped (no GWD number): {}", report.rows_skipped);
    }
    println!("✓ Rows staged:    {}", report.rows_staged);
    if report.rows_without_external_id > 0 {
        println!("⚠️  Rows without DigTracker id: {}", report.rows_without_external_id);
    }
    if report.duplicate_external_ids > 0 {
        println!("⚠️  Duplicate DigTracker ids (last row kept): {}", report.duplicate_external_ids);
    }
    println!("✓ Matched:        {} ({} unchanged)", report.matched, report.unchanged);
    println!("✓ Inserted:       {}", report.inserted.len());
    if let Some(fingerprint) = &report.source_fingerprint {
        println!("✓ Source sha256:  {}", fingerprint);
    }
    if !report.unknown_columns.is_empty() {
        println!("⚠️  Ignored columns: {}", report.unknown_columns.join(", "));
    }
}

fn run_pending(session_path: &Path) -> Result<()> {
    let session = Session::load(session_path)?;

    if session.differences.is_empty() {
        println!("✅ No unresolved differences");
        return Ok(());
    }

    println!(
        "📝 {} record(s), {} field(s) to review\n",
        session.differences.len(),
        session.differences.entry_count()
    );

    for group in session.differences.groups() {
        print_group(group);
    }
    Ok(())
}

fn print_group(group: &DifferenceGroup) {
    let gwd_number = group
        .gwd_number()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());

    match group {
        DifferenceGroup::Conflict { gwd_id, .. } => {
            println!("[{}] GWD #{} (record {})", group.key(), gwd_number, gwd_id);
            for entry in group.entries() {
                println!("    {:<24} {} → {}", entry.field(), entry.existing(), entry.imported());
            }
        }
        DifferenceGroup::NewRecord { digtracker_id, .. } => {
            println!("[{}] New GWD #{} (DigTracker {})", group.key(), gwd_number, digtracker_id);
            for entry in group.entries().iter().filter(|e| !e.imported().is_null()) {
                println!("    {:<24} {}", entry.field(), entry.imported());
            }
        }
    }
    println!();
}

fn run_resolve(
    config: &TrackerConfig,
    group: &str,
    field: &str,
    choice: &Choice,
    session_path: &Path,
) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let key: GroupKey = group.parse().map_err(anyhow::Error::msg)?;

    let Some(target) = Resolution::for_group(&session.differences, &key) else {
        println!("✓ {} already resolved", key);
        return Ok(());
    };

    let mut store = open_store(config)?;
    let before = session.differences.entry_count();
    session.differences = resolve(&mut store, &session.differences, target, field, choice)?;
    session.save(session_path)?;

    if session.differences.entry_count() == before {
        println!("✓ {}.{} already resolved", key, field);
    } else {
        println!("✅ Resolved {}.{}", key, field);
    }
    println!("   {} record(s) left to review", session.differences.len());
    Ok(())
}

fn run_history(config: &TrackerConfig, gwd_id: i64) -> Result<()> {
    let store = open_store(config)?;
    let events = store.events_for(ENTITY_GWD, &gwd_id.to_string())?;

    if events.is_empty() {
        println!("No history for GWD record {}", gwd_id);
        return Ok(());
    }

    println!("📜 History of GWD record {}\n", gwd_id);
    for event in events {
        println!(
            "{}  {:<20} {:<14} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.actor,
            event.data
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_config_level_becomes_filter_directive() {
        assert_eq!(level_directive(log::LevelFilter::Debug), "debug");
        assert_eq!(level_directive(log::LevelFilter::Off), "off");

        let filter = EnvFilter::new(level_directive(log::LevelFilter::Warn));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }
}

// Pipeline Tracker - Web Server
// REST API over the import core with Axum

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use pipeline_tracker::config::DEFAULT_CONFIG_FILE;
use pipeline_tracker::{
    resolve, Choice, CsvSource, DifferenceSet, ExistingRecord, FieldValue, GroupKey,
    GwdStore, ImportError, ImportReconciler, ImportReport, Resolution, SqliteStore, TrackerConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Store plus the difference set of the last import
struct Workspace {
    store: SqliteStore,
    differences: DifferenceSet,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    workspace: Arc<Mutex<Workspace>>,
    reconciler: Arc<ImportReconciler>,
}

impl AppState {
    fn lock(&self) -> Result<MutexGuard<'_, Workspace>, ApiError> {
        self.workspace
            .lock()
            .map_err(|_| ApiError::internal("workspace lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::UnknownField(_) | ImportError::Csv(_) | ImportError::Config(_) => {
                ApiError::bad_request(err.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("{}: {}", self.status, self.message);
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// POST /api/resolve body
#[derive(Deserialize)]
struct ResolveRequest {
    group: String,
    field: String,
    /// "existing", "imported" or "value"
    pick: String,
    #[serde(default)]
    value: Option<FieldValue>,
}

impl ResolveRequest {
    fn choice(&self) -> Result<Choice, ApiError> {
        match (self.pick.as_str(), &self.value) {
            ("existing", _) => Ok(Choice::KeepExisting),
            ("imported", _) => Ok(Choice::TakeImported),
            ("value", Some(v)) => Ok(Choice::Value(v.clone())),
            ("value", None) => Err(ApiError::bad_request("pick \"value\" needs a value")),
            (other, _) => Err(ApiError::bad_request(format!("unknown pick: {}", other))),
        }
    }
}

#[derive(Serialize)]
struct ResolveResponse {
    remaining_groups: usize,
    remaining_entries: usize,
    differences: DifferenceSet,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/import - CSV body in, import report out
async fn import_csv(State(state): State<AppState>, body: String) -> ApiResult<ImportReport> {
    let source = CsvSource::from_bytes("upload.csv", body.as_bytes())?;

    let mut workspace = state.lock()?;
    let report = state.reconciler.run_source(&mut workspace.store, &source)?;
    workspace.differences = report.differences.clone();

    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/differences - Unresolved differences of the last import
async fn get_differences(State(state): State<AppState>) -> ApiResult<DifferenceSet> {
    let workspace = state.lock()?;
    Ok(Json(ApiResponse::ok(workspace.differences.clone())))
}

/// POST /api/resolve - Apply one decision
async fn resolve_difference(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<ResolveResponse> {
    let key: GroupKey = request.group.parse().map_err(ApiError::bad_request)?;
    let choice = request.choice()?;

    let mut workspace = state.lock()?;
    if let Some(target) = Resolution::for_group(&workspace.differences, &key) {
        let Workspace { store, differences } = &mut *workspace;
        *differences = resolve(store, differences, target, &request.field, &choice)?;
    }

    Ok(Json(ApiResponse::ok(ResolveResponse {
        remaining_groups: workspace.differences.len(),
        remaining_entries: workspace.differences.entry_count(),
        differences: workspace.differences.clone(),
    })))
}

/// GET /api/records - Every authoritative GWD
async fn get_records(State(state): State<AppState>) -> ApiResult<Vec<ExistingRecord>> {
    let workspace = state.lock()?;
    let records = workspace
        .store
        .fetch_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(records)))
}

// ============================================================================
// Main Server
// ============================================================================

/// Route `log` records from the library through a tracing subscriber on stderr.
/// RUST_LOG overrides the configured level.
fn init_logging(level: log::LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TRACKER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = TrackerConfig::load(&config_path)?;
    init_logging(config.log_filter());

    println!("🌐 Pipeline Tracker - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = SqliteStore::open(&config.database_path)?;
    println!("✓ Database opened: {:?}", config.database_path);

    // Create shared state
    let state = AppState {
        workspace: Arc::new(Mutex::new(Workspace {
            store,
            differences: DifferenceSet::new(),
        })),
        reconciler: Arc::new(ImportReconciler::new(config.import.clone())),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/import", post(import_csv))
        .route("/differences", get(get_differences))
        .route("/resolve", post(resolve_difference))
        .route("/records", get(get_records))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    println!("\n🚀 Server running on http://{}", config.server.bind);
    println!("   API: http://{}/api/differences", config.server.bind);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}

use crate::config::Config;
use crate::error_export::errors_to_csv;
use crate::errors::AppError;
use crate::importer::{ImportCancellation, LeadImporter, LookupStrategy};
use crate::models::{ImportLog, ImportReport};
use crate::store::{AuditLogSink, LeadStore};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the admin token when `ADMIN_TOKEN` is configured.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
/// Header identifying the admin who uploads the file.
pub const IMPORTED_BY_HEADER: &str = "x-imported-by";

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lead persistence used by every import.
    pub store: Arc<dyn LeadStore>,
    /// Import audit trail.
    pub audit: Arc<dyn AuditLogSink>,
    /// Application configuration.
    pub config: Config,
    /// Reports of recent imports (1 hour TTL), keyed by `import_id`.
    /// Backs the report and error-export endpoints.
    pub report_cache: Cache<Uuid, Arc<ImportReport>>,
}

impl AppState {
    pub fn new(store: Arc<dyn LeadStore>, audit: Arc<dyn AuditLogSink>, config: Config) -> Self {
        let report_cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(1_000)
            .build();
        Self {
            store,
            audit,
            config,
            report_cache,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub arquivo_nome: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListImportsQuery {
    pub limit: Option<i64>,
}

/// Import endpoints, accepting uploads up to `upload_limit` bytes.
pub fn import_routes(upload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/imports", post(import_leads).get(list_imports))
        .route("/api/v1/imports/:id", get(get_import))
        .route("/api/v1/imports/:id/errors.csv", get(import_errors_csv))
        .layer(DefaultBodyLimit::max(upload_limit))
}

/// Health check plus the import routes, without rate limiting.
pub fn routes(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .merge(import_routes(upload_limit))
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-leads-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/imports?arquivo_nome=leads.xlsx
///
/// Imports the spreadsheet sent as the raw request body and returns the
/// report. Row problems are part of the report; only an unreadable file
/// fails the request (422).
///
/// # Arguments
///
/// * `state` - The application state.
/// * `params` - Query parameters; `arquivo_nome` selects the reader by extension.
/// * `headers` - `X-Admin-Token` and the optional `X-Imported-By` UUID.
/// * `body` - The file bytes.
pub async fn import_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImportQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ImportReport>, AppError> {
    authorize(&state.config, &headers)?;

    let arquivo_nome = params
        .arquivo_nome
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::BadRequest("arquivo_nome is required".to_string()))?;
    let imported_by = imported_by(&headers)?;

    tracing::info!(
        "POST /imports - {} ({} bytes, by {:?})",
        arquivo_nome,
        body.len(),
        imported_by
    );

    let importer = LeadImporter::new(state.store.clone(), state.audit.clone())
        .with_strategy(LookupStrategy::from_chunk_size(state.config.prefetch_chunk));
    let report = importer
        .import_file(body.to_vec(), &arquivo_nome, imported_by, &ImportCancellation::new())
        .await?;

    tracing::info!("Import {} finished: {}", report.import_id, report.summary());
    state
        .report_cache
        .insert(report.import_id, Arc::new(report.clone()))
        .await;

    Ok(Json(report))
}

/// GET /api/v1/imports?limit=20
///
/// Recent entries of the import audit log, most recent first.
pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListImportsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ImportLog>>, AppError> {
    authorize(&state.config, &headers)?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let logs = state.audit.recent(limit).await?;
    Ok(Json(logs))
}

/// GET /api/v1/imports/:id
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ImportReport>, AppError> {
    authorize(&state.config, &headers)?;
    let report = cached_report(&state, id).await?;
    Ok(Json(report.as_ref().clone()))
}

/// GET /api/v1/imports/:id/errors.csv
///
/// Row errors of a recent import as a CSV attachment.
pub async fn import_errors_csv(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state.config, &headers)?;
    let report = cached_report(&state, id).await?;
    let csv = errors_to_csv(&report.erros_detalhes)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"erros_importacao_{}.csv\"", id),
            ),
        ],
        csv,
    ))
}

async fn cached_report(state: &AppState, id: Uuid) -> Result<Arc<ImportReport>, AppError> {
    state
        .report_cache
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("import {} not found or expired", id)))
}

/// Checks `X-Admin-Token` against the configured token, if any.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Admin-Token header".to_string()))?;

    if provided != expected {
        tracing::error!("❌ Invalid admin token");
        return Err(AppError::Unauthorized("Invalid X-Admin-Token".to_string()));
    }
    Ok(())
}

fn imported_by(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    let Some(value) = headers.get(IMPORTED_BY_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("X-Imported-By must be a UUID".to_string()))
}

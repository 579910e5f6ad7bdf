use std::sync::Arc;

use axum::{
    extract::{Json, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use arkiv::{
    validate_requests, ArkivError, AssetResolver, AttachmentEmbedder, AttachmentRequest,
    ComplianceReport, FontCatalog, PdfRenderer, RenderOptions, ServiceConfig, ValidationEngine,
};

/// Everything one conversion request needs, constructed once at startup and
/// shared read-only across requests.
pub struct AppState {
    pub renderer: PdfRenderer,
    pub embedder: AttachmentEmbedder,
    pub engine: ValidationEngine,
    pub resolver: AssetResolver,
    pub config: ServiceConfig,
}

impl AppState {
    /// Build the pipeline from environment configuration. Performs the
    /// font-catalog warmup and validation-engine init; a failure here is a
    /// deployment defect and should abort startup.
    pub fn from_env() -> arkiv::Result<Self> {
        Self::with_config(ServiceConfig::from_env())
    }

    pub fn with_config(config: ServiceConfig) -> arkiv::Result<Self> {
        let catalog = Arc::new(FontCatalog::new());
        catalog.warmup()?;
        let engine = ValidationEngine::new();
        engine.init()?;
        let resolver = AssetResolver::new(&config)?;
        Ok(Self {
            renderer: PdfRenderer::new(catalog),
            embedder: AttachmentEmbedder::new(),
            engine,
            resolver,
            config,
        })
    }
}

/// Request payload for the conversion endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    /// The HTML document to convert.
    pub html: String,
    /// Base URL for resolving relative references (http/https only).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Attachments to embed as associated files (at most 10).
    #[serde(default)]
    pub attachments: Vec<AttachmentRequest>,
}

/// Standard error response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message describing what went wrong.
    pub error: String,
}

/// Response for the conversion-with-report endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertWithReportResponse {
    /// The final PDF, base64 encoded.
    pub pdf: String,
    pub report: ComplianceReport,
}

/// Application-specific error type for the API.
#[derive(Debug)]
pub enum AppError {
    /// Pipeline errors; client errors map to 400, the rest to 500.
    Core(ArkivError),
    /// Malformed request envelope (bad multipart, missing upload).
    BadRequest(String),
    /// Task orchestration failure.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Core(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Core(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ArkivError> for AppError {
    fn from(err: ArkivError) -> Self {
        AppError::Core(err)
    }
}

/// Build the application router with all routes configured.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/convert", post(convert))
        .route("/api/convert/report", post(convert_with_report))
        .route("/api/validate", post(validate_upload))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint for monitoring and load balancing.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "arkiv API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Convert HTML to an accessible, archival PDF and return the raw bytes.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConversionRequest>,
) -> Result<Response, AppError> {
    let pdf = run_conversion(state, payload).await?;
    info!(bytes = pdf.len(), "conversion finished");
    Ok((
        StatusCode::OK,
        [
            ("Content-Type", "application/pdf"),
            ("Content-Disposition", "attachment; filename=\"document.pdf\""),
        ],
        pdf,
    )
        .into_response())
}

/// Convert HTML and return the PDF together with its compliance report.
pub async fn convert_with_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConversionRequest>,
) -> Result<Response, AppError> {
    let (pdf, report) = spawn_pipeline(state, move |state, payload| {
        let pdf = pipeline(state, &payload)?;
        let report = state.engine.validate(&pdf)?;
        Ok((pdf, report))
    }, payload)
    .await?;

    let response = ConvertWithReportResponse {
        pdf: base64::engine::general_purpose::STANDARD.encode(pdf),
        report,
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Validate an uploaded PDF and return its compliance report.
pub async fn validate_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut pdf_data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read multipart field: {e}")))?
    {
        if field.name() == Some("file") {
            pdf_data = Some(field.bytes().await.map_err(|e| {
                AppError::BadRequest(format!("failed to read file data: {e}"))
            })?);
            break;
        }
    }

    let pdf_bytes = pdf_data
        .ok_or_else(|| AppError::BadRequest("no file provided in upload".to_string()))?;

    let report = tokio::task::spawn_blocking(move || state.engine.validate(&pdf_bytes))
        .await
        .map_err(|e| AppError::Internal(format!("validation task failed: {e}")))??;

    Ok((StatusCode::OK, Json(report)).into_response())
}

/// The synchronous conversion pipeline: validate attachments, render,
/// embed. Runs on the blocking pool, never on the async executor.
fn pipeline(state: &AppState, payload: &ConversionRequest) -> arkiv::Result<Vec<u8>> {
    let attachments = validate_requests(&payload.attachments)?;
    let options = RenderOptions {
        producer: state.config.pdf_producer.clone(),
        base_url: payload.base_url.clone(),
        resolver: Some(&state.resolver),
    };
    let pdf = state.renderer.render(&payload.html, &options)?;
    state.embedder.embed(&pdf, &attachments)
}

async fn run_conversion(
    state: Arc<AppState>,
    payload: ConversionRequest,
) -> Result<Vec<u8>, AppError> {
    spawn_pipeline(state, |state, payload| pipeline(state, &payload), payload).await
}

async fn spawn_pipeline<T, F>(
    state: Arc<AppState>,
    work: F,
    payload: ConversionRequest,
) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&AppState, ConversionRequest) -> arkiv::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&state, payload))
        .await
        .map_err(|e| AppError::Internal(format!("conversion task failed: {e}")))?
        .map_err(AppError::from)
}

//! HTTP surface: upload an invoice image, get its line items back.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ConfigStore, ConfigSummary};
use crate::extractor::{ExtractError, Extractor};
use crate::schema::Items;
use crate::upload::TempUpload;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub configs: Arc<ConfigStore>,
    pub upload_dir: PathBuf,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/configs", get(list_configs))
        .route("/analyze-invoice/", post(analyze_invoice))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Everything the upload endpoint can answer with instead of items.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    /// Malformed or oversized multipart body; carries axum's status for it.
    #[error("{message}")]
    Multipart { status: StatusCode, message: String },

    #[error("Unknown config: {name}. Available: {available:?}")]
    UnknownConfig { name: String, available: Vec<String> },

    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            GatewayError::BadRequest(_) | GatewayError::UnknownConfig { .. } => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            GatewayError::Multipart { status, .. } => (status, json!({ "error": message })),
            GatewayError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
            GatewayError::Extraction(ExtractError::Provider(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
            GatewayError::Extraction(ExtractError::Unparsable { raw }) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": message, "raw_response": raw }),
            ),
            GatewayError::Extraction(ExtractError::Validation(violations)) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": message, "violations": violations }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available extraction profiles.
async fn list_configs(State(state): State<AppState>) -> Json<Vec<ConfigSummary>> {
    Json(state.configs.summaries())
}

#[derive(serde::Deserialize)]
struct AnalyzeQuery {
    config: Option<String>,
}

/// Upload an invoice image and extract its line items.
async fn analyze_invoice(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    mut multipart: Multipart,
) -> Result<Json<Items>, GatewayError> {
    let config = state
        .configs
        .resolve(query.config.as_deref())
        .ok_or_else(|| GatewayError::UnknownConfig {
            name: query.config.clone().unwrap_or_default(),
            available: state.configs.list(),
        })?;

    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Multipart error", e))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("upload").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| multipart_error("Failed to read file", e))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err(GatewayError::BadRequest("No file uploaded".to_string()));
    }

    let upload = TempUpload::create(&state.upload_dir, &filename, &file_data).map_err(|e| {
        error!("Failed to store upload {}: {}", filename, e);
        GatewayError::Storage(e)
    })?;

    info!(
        "Received file: {} ({} bytes, sha256 {}) with config: {}",
        filename,
        upload.size(),
        upload.digest(),
        config.name
    );

    let result = state.extractor.extract(upload.path(), config).await;
    upload.close();

    match result {
        Ok(items) => Ok(Json(items)),
        Err(e) => {
            warn!("Extraction failed for {}: {}", filename, e);
            Err(e.into())
        }
    }
}

fn multipart_error(context: &str, err: MultipartError) -> GatewayError {
    GatewayError::Multipart {
        status: err.status(),
        message: format!("{}: {}", context, err.body_text()),
    }
}

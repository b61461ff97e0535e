//! HTTP gateway.
//!
//! Exposes the advisory pipelines as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Question + language → answer, optional infographic URL |
//! | `POST` | `/scan-image` | Field photo → crop-health diagnosis JSON |
//! | `POST` | `/classify-plant` | Photo → sugarcane-vs-weed classification JSON |
//! | `POST` | `/upload` | Document → ingestion into the file-search store |
//! | `GET`  | `/webhook` | Verification handshake (`hub.verify_token`) |
//! | `POST` | `/webhook` | Tolerated chat payloads → advisory reply |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/uploads/*` | Static serving of generated infographics |
//!
//! # Error Contract
//!
//! Local validation failures return the error envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Vendor failures do NOT use the envelope: per the gateway's failure policy
//! they are logged and mapped to degraded 200-responses (no infographic,
//! "unavailable" diagnosis, unindexed upload) so the caller always gets a
//! usable answer shape.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support the browser
//! front end.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::advisor;
use crate::config::{self, Config};
use crate::gemini::{GeminiClient, ModelClient};
use crate::models::{
    AskRequest, AskResponse, Classification, Diagnosis, UploadResponse, WebhookReply,
};
use crate::store::{self, StoreSync};
use crate::webhook;

/// Degraded answer used when the text model cannot be reached at all.
const ADVISOR_UNAVAILABLE: &str =
    "The advisory service could not be reached. Please try again in a moment.";

/// Shared application state, explicitly constructed and passed to every
/// handler — no module-level globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn ModelClient>,
    pub store: Arc<StoreSync>,
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
}

impl AppState {
    /// Wire up state around any [`ModelClient`] (tests pass a scripted fake).
    pub fn new(config: Arc<Config>, model: Arc<dyn ModelClient>) -> Self {
        let store = Arc::new(StoreSync::load(config.clone(), model.clone()));
        let verify_token = config::webhook_verify_token();
        let app_secret = config::webhook_app_secret();
        Self {
            config,
            model,
            store,
            verify_token,
            app_secret,
        }
    }
}

/// Starts the HTTP gateway on the configured bind address.
///
/// Builds the production Gemini client (requires `GEMINI_API_KEY`), loads the
/// persisted store state, and serves until the process is terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::new(&config.gemini)?);
    let state = AppState::new(config.clone(), model);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "advisory gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the router. Split from [`run_server`] so tests can drive it
/// in-process with `tower::ServiceExt::oneshot`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_dir = state.config.server.upload_dir.clone();
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/scan-image", post(handle_scan_image))
        .route("/classify-plant", post(handle_classify_plant))
        .route("/upload", post(handle_upload))
        .route("/webhook", get(handle_webhook_verify).post(handle_webhook))
        .route("/health", get(handle_health))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Local-validation error that converts into an HTTP response. Vendor
/// failures never take this path.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let outcome = advisor::ask(
        &state.config,
        state.model.as_ref(),
        &state.store,
        &request.question,
        &request.language,
    )
    .await;

    let response = match outcome {
        Ok(outcome) => {
            let mut response = AskResponse::text(outcome.response);
            if let Some((url, reason)) = outcome.infographic {
                response.infographic_url = Some(url);
                response.infographic_reason = Some(reason);
            }
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "ask pipeline failed, returning degraded answer");
            AskResponse::text(ADVISOR_UNAVAILABLE.to_string())
        }
    };

    Ok(Json(response))
}

// ============ Multipart helpers ============

struct ImageForm {
    bytes: Vec<u8>,
    mime_type: String,
    language: String,
    hint: Option<String>,
}

/// Pull the image and accompanying text fields out of a multipart body.
/// Accepts the file under either `file` or `image`, matching the clients the
/// original UI and test scripts send.
async fn read_image_form(mut multipart: Multipart) -> Result<ImageForm, AppError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut mime_type = "image/jpeg".to_string();
    let mut language = "english".to_string();
    let mut hint = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "image" => {
                if let Some(content_type) = field.content_type() {
                    mime_type = content_type.to_string();
                } else if let Some(file_name) = field.file_name() {
                    mime_type =
                        store::mime_for_path(std::path::Path::new(file_name)).to_string();
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("could not read image field: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            "language" => {
                language = field.text().await.unwrap_or_default();
            }
            "prompt" => {
                let text = field.text().await.unwrap_or_default();
                if !text.trim().is_empty() {
                    hint = Some(text);
                }
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| bad_request("missing image file"))?;
    if bytes.is_empty() {
        return Err(bad_request("image file is empty"));
    }

    Ok(ImageForm {
        bytes,
        mime_type,
        language,
        hint,
    })
}

// ============ POST /scan-image ============

async fn handle_scan_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Diagnosis>, AppError> {
    let form = read_image_form(multipart).await?;

    let diagnosis = match advisor::scan_image(
        state.model.as_ref(),
        &form.language,
        form.hint.as_deref(),
        &form.mime_type,
        &form.bytes,
    )
    .await
    {
        Ok(diagnosis) => diagnosis,
        Err(e) => {
            tracing::warn!(error = %e, "image scan failed, returning degraded diagnosis");
            Diagnosis::unavailable()
        }
    };

    Ok(Json(diagnosis))
}

// ============ POST /classify-plant ============

async fn handle_classify_plant(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Classification>, AppError> {
    let form = read_image_form(multipart).await?;

    let classification = match advisor::classify_plant(
        state.model.as_ref(),
        &form.language,
        &form.mime_type,
        &form.bytes,
    )
    .await
    {
        Ok(classification) => classification,
        Err(e) => {
            tracing::warn!(error = %e, "classification failed, returning degraded result");
            Classification::unknown("classification unavailable")
        }
    };

    Ok(Json(classification))
}

// ============ POST /upload ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if let Some(file_name) = field.file_name() {
            let file_name = sanitize_file_name(file_name);
            let data = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("could not read file field: {}", e)))?;
            file = Some((file_name, data.to_vec()));
            break;
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| bad_request("missing file"))?;
    if bytes.is_empty() {
        return Err(bad_request("file is empty"));
    }

    let extension = std::path::Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !state
        .config
        .server
        .allowed_extensions
        .iter()
        .any(|allowed| *allowed == extension)
    {
        return Err(bad_request(format!(
            "file type .{} is not allowed",
            extension
        )));
    }

    // Keep a local copy regardless of whether vendor ingestion succeeds.
    let documents_dir = state.config.server.upload_dir.join("documents");
    if let Err(e) = std::fs::create_dir_all(&documents_dir)
        .and_then(|_| std::fs::write(documents_dir.join(&file_name), &bytes))
    {
        tracing::warn!(error = %e, file = %file_name, "could not save local copy");
    }

    let response = match state.store.ensure_uploaded_bytes(&file_name, bytes).await {
        Ok(outcome) => UploadResponse {
            status: "ok".to_string(),
            file: file_name,
            deduplicated: outcome.deduplicated,
            indexed: true,
        },
        Err(e) => {
            tracing::warn!(error = %e, "vendor ingestion failed, document not indexed");
            UploadResponse {
                status: "stored".to_string(),
                file: file_name,
                deduplicated: false,
                indexed: false,
            }
        }
    };

    Ok(Json(response))
}

/// Strip any path components a client smuggles into the filename.
fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string();
    if base.is_empty() {
        "document".to_string()
    } else {
        base
    }
}

// ============ GET /webhook (verification) ============

async fn handle_webhook_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, AppError> {
    let configured = state
        .verify_token
        .as_deref()
        .ok_or_else(|| forbidden("webhook verification is not configured"))?;

    let token = params.get("hub.verify_token").map(|s| s.as_str());
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if token == Some(configured) {
        Ok(challenge)
    } else {
        Err(forbidden("verification token mismatch"))
    }
}

// ============ POST /webhook ============

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReply>, AppError> {
    if let Some(secret) = &state.app_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| forbidden("missing webhook signature"))?;
        if !webhook::verify_signature(secret, &body, signature) {
            return Err(forbidden("webhook signature mismatch"));
        }
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| bad_request("body must be JSON"))?;
    let message = webhook::parse_payload(&payload)
        .ok_or_else(|| bad_request("unrecognized webhook payload shape"))?;

    let reply = match advisor::ask(
        &state.config,
        state.model.as_ref(),
        &state.store,
        &message.text,
        &message.language,
    )
    .await
    {
        Ok(outcome) => outcome.response,
        Err(e) => {
            tracing::warn!(error = %e, "webhook ask failed, returning degraded reply");
            ADVISOR_UNAVAILABLE.to_string()
        }
    };

    Ok(Json(WebhookReply { reply }))
}

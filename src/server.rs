//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/` | no | Usage information |
//! | `GET`  | `/health` | no | Liveness check |
//! | `POST` | `/process` | no | Analyze a mail and its attachments (multipart) |
//! | `GET`  | `/collections/{c}/subcollections/{s}` | yes | Collection-join query |
//!
//! # Authentication
//!
//! The collections route requires an `X-API-Key` header equal to the key
//! resolved from `[auth]` at startup. With `require_api_key = false` the
//! guard lets everything through.
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "status": "error", "error": "Invalid API key" }
//! ```
//!
//! `401` bad or missing key, `400` malformed multipart body, `413` body over
//! `server.max_upload_bytes`, `500` internal failure. A failed model call is
//! *not* an HTTP error: `/process` answers `200` with `result.status = "error"`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, Query, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::attachment::LoadOptions;
use crate::classify::supported_formats;
use crate::completion::{create_client, CompletionClient};
use crate::config::{format_size, Config};
use crate::process::{collect_attachments, process_mail, resolve_mail_id, ProcessResponse, Upload};
use crate::query::{parse_filters, query_with_subcollection};
use crate::store::{create_store, DocumentStore};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const SERVICE_NAME: &str = "File Processing Service";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
///
/// External clients are built once and shared; handlers never construct them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub completion: Arc<dyn CompletionClient>,
    pub store: Arc<dyn DocumentStore>,
    /// Expected `X-API-Key`; `None` disables the check.
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        config: Config,
        completion: Arc<dyn CompletionClient>,
        store: Arc<dyn DocumentStore>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            completion,
            store,
            api_key: api_key.map(Arc::from),
        }
    }

    /// Builds the completion client, document store, and API key from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let completion = create_client(&config.completion)?;
        let store = create_store(&config.store)?;
        let api_key = config.auth.resolve_key()?;
        Ok(Self::new(config.clone(), completion, store, api_key))
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            extract_documents: self.config.attachments.extract_documents,
        }
    }
}

/// Starts the server with clients built from `config`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    run_server_with_state(AppState::from_config(config)?).await
}

/// Starts the server with caller-supplied state (custom or fake clients).
pub async fn run_server_with_state(state: AppState) -> Result<()> {
    let bind_addr = state.config.server.bind.clone();
    if state.api_key.is_none() {
        tracing::warn!("{} check disabled (auth.require_api_key = false)", API_KEY_HEADER);
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    tracing::info!(
        store = state.store.name(),
        model = state.completion.model_name(),
        "listening on http://{}",
        bind_addr
    );
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

/// The full route table with middleware applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let guarded = Router::new()
        .route(
            "/collections/{collection}/subcollections/{subcollection}",
            get(handle_collection_query),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/process", post(handle_process))
        .merge(guarded)
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// Error that renders as `{"status": "error", "error": <message>}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ============ Auth ============

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_ref()) {
            tracing::warn!(path = %request.uri().path(), "rejected request with bad API key");
            return Err(ApiError::unauthorized("Invalid API key"));
        }
    }
    Ok(next.run(request).await)
}

// ============ GET /health ============

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

// ============ GET / ============

async fn handle_index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "Email & Document Processing Service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /health": "Health check",
            "POST /process": "Process email with attachments (multipart/form-data with optional \"files\" field and optional \"mail_id\")",
            "GET /collections/{collection}/subcollections/{subcollection}": "Query a collection and include its subcollection documents (collection_<field>=value, subcollection_<field>=value)",
            "GET /": "This help page",
        },
        "supported_formats": supported_formats(),
        "max_file_size": format_size(state.config.server.max_upload_bytes),
        "usage": {
            "curl_example": "curl -X POST -F \"mail_id=001\" -F \"files=@invoice.pdf\" http://localhost:8080/process",
            "form_fields": {
                "mail_id": "Optional - unique identifier for the email (default: mail_001)",
                "files": "Optional - one or more attachment files",
            },
        },
    }))
}

// ============ POST /process ============

/// Reads the multipart form, loads attachments, and runs the analysis.
///
/// Both form fields are optional: a request without a multipart body, or
/// with an empty one, is analyzed as a mail with the default id and no
/// attachments.
async fn handle_process(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let (mail_id, uploads) = match multipart {
        Ok(multipart) => read_process_form(multipart).await?,
        Err(rejection) => {
            tracing::debug!(reason = %rejection.body_text(), "no multipart form, using defaults");
            (None, Vec::new())
        }
    };

    let mail_id = resolve_mail_id(mail_id);
    let attachments = collect_attachments(uploads, state.load_options());
    let response = process_mail(state.completion.as_ref(), &mail_id, &attachments).await;
    Ok(Json(response))
}

/// Pulls `mail_id` (first occurrence) and every `files` part out of the form.
///
/// A part that cannot be read fails the request, which is how an upload
/// over the body limit surfaces as `413`.
async fn read_process_form(
    mut multipart: Multipart,
) -> Result<(Option<String>, Vec<Upload>), ApiError> {
    let mut mail_id: Option<String> = None;
    let mut uploads = Vec::new();
    let mut parts_read = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // a form with no parts is only a closing boundary
            Err(e) if parts_read == 0 && e.status() == StatusCode::BAD_REQUEST => break,
            Err(e) => return Err(e.into()),
        };
        parts_read += 1;

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "mail_id" if mail_id.is_none() => {
                mail_id = Some(field.text().await?);
            }
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                uploads.push(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok((mail_id, uploads))
}

// ============ GET /collections/{c}/subcollections/{s} ============

async fn handle_collection_query(
    State(state): State<AppState>,
    Path((collection, subcollection)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let filters = parse_filters(params);
    let records = query_with_subcollection(
        state.store.as_ref(),
        &collection,
        &subcollection,
        &filters,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %format!("{:#}", e), "collection query failed");
        ApiError::internal(format!("{:#}", e))
    })?;

    Ok(Json(json!({ "status": "success", "data": records })))
}

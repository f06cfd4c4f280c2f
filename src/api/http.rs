//! HTTP API Server
//!
//! Routes the file manager endpoints. Every route except CORS preflight
//! authorizes the request against a fresh credential snapshot first.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{
        header::{self, HeaderMap},
        Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{self, AuthFailure, AuthorizedContext, CredentialStore};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::manager::FileManager;
use crate::path::StorageEntry;

/// Shared application state
pub struct AppState {
    /// Source of per-request user directory snapshots
    pub credentials: Arc<dyn CredentialStore>,
    /// File operations
    pub files: FileManager,
}

impl AppState {
    pub fn new(credentials: Arc<dyn CredentialStore>, files: FileManager) -> Self {
        Self { credentials, files }
    }
}

/// HTTP API server
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
        let routes = Router::new()
            .route("/list", get(handle_list).fallback(handle_unsupported))
            .route("/list-files", get(handle_list_files).fallback(handle_unsupported))
            .route("/get", get(handle_get).fallback(handle_unsupported))
            .route("/put", put(handle_put).fallback(handle_unsupported))
            .route("/delete", delete(handle_delete).fallback(handle_unsupported))
            .route("/download-folder", get(handle_download_folder).fallback(handle_unsupported))
            .route("/delete-folder", delete(handle_delete_folder).fallback(handle_unsupported))
            .fallback(handle_unsupported)
            .with_state(state);

        let app = if config.base_path.is_empty() {
            routes
        } else {
            Router::new()
                .nest(config.base_path.trim_end_matches('/'), routes)
                .fallback(handle_unsupported)
        };

        app.layer(DefaultBodyLimit::max(config.max_upload_bytes()))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer())
    }

    /// Start the HTTP server, stopping on ctrl-c
    pub async fn start(&self) -> Result<()> {
        let app = Self::create_router(Arc::clone(&self.state), &self.config);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!(
            "HTTP API listening on {}{}",
            self.config.bind_address,
            self.config.base_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

/// Permissive CORS for the browser front end.
///
/// Answers every OPTIONS request itself, before authorization.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any)
}

// ============ Request/Response Types ============

/// Query parameters naming one object
#[derive(Debug, Deserialize)]
pub struct FileParams {
    #[serde(alias = "key")]
    pub filename: Option<String>,
}

/// Query parameters naming a folder
#[derive(Debug, Deserialize)]
pub struct PrefixParams {
    pub prefix: Option<String>,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::PathViolation(_) => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Never reveal which part of the credentials was wrong
            Error::Unauthorized(_) => "Unauthorized".to_string(),
            Error::NotFound(_) => "File not found".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else if self.is_client_error() {
            tracing::debug!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ============ Helpers ============

/// Authorize a request against the current credential snapshot
async fn authorize_request(state: &AppState, headers: &HeaderMap) -> Result<AuthorizedContext> {
    let users = state.credentials.load().await?;

    let header = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| Error::Unauthorized(AuthFailure::MalformedCredentials))?,
        ),
        None => None,
    };

    auth::authorize(header, &users).map_err(|failure| {
        tracing::debug!("Rejected request: {}", failure);
        Error::Unauthorized(failure)
    })
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::InvalidRequest(format!("Missing {}", name))),
    }
}

/// `photos/2024/` -> `2024.zip`
fn archive_name(prefix: &str) -> String {
    let name = prefix
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("folder");
    format!("{}.zip", name.replace(['"', '\\'], "_"))
}

// ============ Handlers ============

async fn handle_unsupported() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse {
            error: "Unsupported operation".to_string(),
        }),
    )
        .into_response()
}

async fn handle_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PrefixParams>,
) -> Result<Json<Vec<String>>> {
    let ctx = authorize_request(&state, &headers).await?;
    let entries = state.files.list(&ctx, params.prefix.as_deref()).await?;
    Ok(Json(entries.into_iter().map(StorageEntry::into_key).collect()))
}

async fn handle_list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PrefixParams>,
) -> Result<Json<Vec<String>>> {
    let ctx = authorize_request(&state, &headers).await?;
    let files = state.files.list_files(&ctx, params.prefix.as_deref()).await?;
    Ok(Json(files))
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FileParams>,
) -> Result<Response> {
    let ctx = authorize_request(&state, &headers).await?;
    let filename = required(&params.filename, "filename")?;
    let body = state.files.get(&ctx, filename).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}

async fn handle_put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FileParams>,
    body: Bytes,
) -> Result<String> {
    let ctx = authorize_request(&state, &headers).await?;
    let filename = required(&params.filename, "filename")?;

    let entry = state.files.put(&ctx, filename, body).await?;
    Ok(if entry.is_folder() {
        format!("Folder \"{}\" created", filename)
    } else {
        format!("File \"{}\" uploaded", filename)
    })
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FileParams>,
) -> Result<String> {
    let ctx = authorize_request(&state, &headers).await?;
    let filename = required(&params.filename, "filename")?;

    state.files.delete(&ctx, filename).await?;
    Ok(format!("File \"{}\" deleted", filename))
}

async fn handle_download_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PrefixParams>,
) -> Result<Response> {
    let ctx = authorize_request(&state, &headers).await?;
    let prefix = required(&params.prefix, "prefix")?;
    let archive = state.files.download_folder(&ctx, prefix).await?;

    let disposition = format!("attachment; filename=\"{}\"", archive_name(prefix));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive,
    )
        .into_response())
}

async fn handle_delete_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PrefixParams>,
) -> Result<Response> {
    let ctx = authorize_request(&state, &headers).await?;
    let prefix = required(&params.prefix, "prefix")?;
    let report = state.files.delete_folder(&ctx, prefix).await?;

    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)).into_response())
}

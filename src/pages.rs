use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::Response,
    routing::get,
};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio_util::io::ReaderStream;

use crate::{admin, error::AppError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(|s: State<AppState>| page(s, "index.html")))
        .route("/vans", get(|s: State<AppState>| page(s, "vans.html")))
        .route("/van/{slug}", get(|s: State<AppState>| page(s, "van.html")))
        .route("/contact", get(|s: State<AppState>| page(s, "contact.html")))
        .route("/about", get(|s: State<AppState>| page(s, "about.html")))
        .route("/admin", get(admin_page))
        .route("/static/{*path}", get(static_file))
}

async fn page(State(state): State<AppState>, name: &'static str) -> Result<Response, AppError> {
    serve_file(&state, &state.static_root.join(name)).await
}

/// Dashboard for a logged-in admin, login form otherwise.
async fn admin_page(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let name = if admin::is_admin(&headers) {
        "admin.html"
    } else {
        "admin_login.html"
    };
    serve_file(&state, &state.static_root.join(name)).await
}

async fn static_file(State(state): State<AppState>, uri: Uri) -> Result<Response, AppError> {
    let raw = uri.path().strip_prefix("/static/").ok_or_else(not_found)?;
    let decoded = percent_decode(raw).ok_or_else(not_found)?;
    let rel = decoded.trim_start_matches('/');

    // Reject path traversal attempts early.
    if rel.is_empty() || rel.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(not_found());
    }

    let fs_path = state.static_root.join(rel);
    // Fast lexical guard; validate_path() performs canonicalize for the real check.
    if !fs_path.starts_with(&state.static_root) {
        return Err(not_found());
    }
    serve_file(&state, &fs_path).await
}

async fn serve_file(state: &AppState, fs_path: &Path) -> Result<Response, AppError> {
    let real_path = validate_path(state, fs_path).await?;

    let file = tokio::fs::File::open(&real_path).await.map_err(io_err)?;
    let meta = file.metadata().await.map_err(AppError::Io)?;
    if !meta.is_file() {
        return Err(not_found());
    }

    let mime: &'static str = mime_guess::from_path(&real_path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, meta.len())
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn not_found() -> AppError {
    AppError::not_found("Not found")
}

/// Canonicalize `path` (resolving symlinks) and verify it stays within
/// `state.canonical_root`. Returns the resolved path on success.
async fn validate_path(state: &AppState, path: &Path) -> Result<PathBuf, AppError> {
    let canonical = tokio::fs::canonicalize(path).await.map_err(io_err)?;
    if !canonical.starts_with(&state.canonical_root) {
        return Err(not_found());
    }
    Ok(canonical)
}

fn io_err(e: io::Error) -> AppError {
    if e.kind() == io::ErrorKind::NotFound {
        not_found()
    } else {
        AppError::Io(e)
    }
}

/// Percent-decode a URL path. Returns `None` if the decoded bytes are not
/// valid UTF-8 (which maps to a 404).
fn percent_decode(s: &str) -> Option<String> {
    percent_encoding::percent_decode_str(s)
        .decode_utf8()
        .ok()
        .map(|c| c.into_owned())
}

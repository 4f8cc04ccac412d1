mod handlers;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, extract::JsonBody, state::AppState};

/// Admin cookie name. The value is a plain flag.
const ADMIN_COOKIE: &str = "admin_auth";
/// Upper bound on an uploaded image.
const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

// ── Router ────────────────────────────────────────────────────────────────────

/// Login/logout plus every admin-only route behind a single guard.
pub fn router() -> Router<AppState> {
    let public = Router::new()
        .route("/api/admin-login", post(post_login))
        .route("/api/admin-logout", post(post_logout));

    let uploads = Router::new()
        .route("/api/admin/upload-image", post(handlers::upload_image))
        .route(
            "/api/admin/upload-about-image",
            post(handlers::upload_about_image),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT));

    let protected = Router::new()
        .route("/api/messages", get(handlers::get_messages))
        .route("/api/stats", get(handlers::get_stats))
        .route(
            "/api/admin/update-site-content",
            post(handlers::update_site_content),
        )
        .route("/api/admin/confirm-booking", post(handlers::confirm_booking))
        .route("/api/admin/undo-booking", post(handlers::undo_booking))
        .route("/api/admin/update-van", post(handlers::update_van))
        .route("/api/admin/create-van", post(handlers::create_van))
        .route("/api/admin/delete-van", post(handlers::delete_van))
        .route("/api/admin/remove-image", post(handlers::remove_image))
        .route(
            "/api/admin/remove-about-image",
            post(handlers::remove_about_image),
        )
        .route("/api/admin/test-email", post(handlers::test_email))
        .merge(uploads)
        .route_layer(middleware::from_fn(require_admin));

    Router::new().merge(public).merge(protected)
}

// ── Auth middleware ───────────────────────────────────────────────────────────

async fn require_admin(req: Request, next: Next) -> Response {
    if is_admin(req.headers()) {
        return next.run(req).await;
    }
    AppError::Unauthorized.into_response()
}

/// Whether the request carries the admin cookie flag.
pub fn is_admin(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(k, v)| k == ADMIN_COOKIE && v == "1")
}

// ── Login / logout ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginForm {
    username: String,
    password: String,
}

async fn post_login(
    State(state): State<AppState>,
    JsonBody(form): JsonBody<LoginForm>,
) -> Response {
    let ok = state
        .admin
        .as_ref()
        .is_some_and(|creds| creds.matches(&form.username, &form.password));

    if !ok {
        tracing::warn!("Rejected admin login for {:?}", form.username.trim());
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "Invalid credentials" })),
        )
            .into_response();
    }

    let cookie = format!("{ADMIN_COOKIE}=1; Path=/; HttpOnly; SameSite=Lax");
    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn post_logout() -> Response {
    let clear = format!("{ADMIN_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    ([(header::SET_COOKIE, clear)], Json(json!({ "ok": true }))).into_response()
}

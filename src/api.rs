use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, header},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    analytics::{self, Visitor},
    availability::{self, Availability},
    booking::{BookingRequest, ContactRequest, SubmitOutcome},
    checkout::CheckoutRequest,
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
    store::Van,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/vans", get(get_vans))
        .route("/api/site", get(get_site))
        .route("/api/site-content", get(get_site_content))
        .route("/api/availability", get(get_availability))
        .route("/api/contact", post(post_contact))
        .route("/api/book", post(post_book))
        .route("/api/track", post(post_track))
        .route("/api/checkout", post(post_checkout))
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// All vans, with `airbnbUrl` filled in from the calendar feed when derivable.
async fn get_vans(State(state): State<AppState>) -> Json<Vec<Van>> {
    let config = state.stores.config().load().await;
    Json(config.vans.iter().map(Van::with_listing_url).collect())
}

/// Public site settings: contact details and the payment publishable key.
async fn get_site(State(state): State<AppState>) -> Json<Value> {
    let config = state.stores.config().load().await;
    Json(json!({
        "contact": config.contact,
        "stripe": { "publicKey": config.stripe.public_key.unwrap_or_default() },
    }))
}

async fn get_site_content(State(state): State<AppState>) -> Json<Value> {
    let config = state.stores.config().load().await;
    Json(Value::Object(config.site_content))
}

#[derive(Deserialize)]
struct SlugQuery {
    slug: Option<String>,
}

async fn get_availability(
    State(state): State<AppState>,
    Query(query): Query<SlugQuery>,
) -> AppResult<Json<Availability>> {
    let slug = query
        .slug
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::validation("missing slug"))?;
    let got = availability::get_availability(&state.stores, &state.http, slug.trim()).await?;
    Ok(Json(got))
}

// ── Forms ─────────────────────────────────────────────────────────────────────

async fn post_contact(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ContactRequest>,
) -> AppResult<Json<Value>> {
    let sent = state.workflow().submit_contact(req).await?;
    Ok(Json(json!({ "ok": true, "sent": sent })))
}

async fn post_book(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<BookingRequest>,
) -> AppResult<Json<SubmitOutcome>> {
    let outcome = state.workflow().submit_booking(req).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TrackBody {
    path: Option<String>,
}

/// Record a page view. Any failure is reported as a 400 so the page script
/// can ignore it.
async fn post_track(
    State(state): State<AppState>,
    visitor: Visitor,
    JsonBody(body): JsonBody<TrackBody>,
) -> AppResult<Json<Value>> {
    analytics::record_visit(&state.stores, &state.geo, body.path.as_deref(), &visitor)
        .await
        .map_err(|e| AppError::validation(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

// ── Payments ──────────────────────────────────────────────────────────────────

/// Origin for payment return URLs: the configured base URL, else the request's
/// `Host` header.
fn return_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = state.base_url.as_deref().filter(|b| !b.is_empty()) {
        return base.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

async fn post_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CheckoutRequest>,
) -> AppResult<Json<Value>> {
    let config = state.stores.config().load().await;
    let base = return_base(&state, &headers);
    let url = state
        .checkout
        .create_session(&config.stripe, req, &base)
        .await?;
    Ok(Json(json!({ "url": url })))
}

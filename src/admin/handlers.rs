use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    content,
    error::{AppError, AppResult},
    extract::JsonBody,
    mail::Email,
    state::AppState,
    store::{Message, stats::StatsReport},
};

// ── Dashboard data ────────────────────────────────────────────────────────────

pub async fn get_messages(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.stores.messages().load().await)
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsReport> {
    Json(StatsReport::from(state.stores.stats().load().await))
}

// ── Site content ──────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct UpdatesBody {
    pub updates: Option<Map<String, Value>>,
}

pub async fn update_site_content(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<UpdatesBody>,
) -> AppResult<Json<Value>> {
    content::update_site_content(&state.stores, body.updates.unwrap_or_default()).await?;
    Ok(Json(json!({ "ok": true })))
}

// ── Bookings ──────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct BookingIdBody {
    pub booking_id: Option<String>,
}

impl BookingIdBody {
    fn id(self) -> AppResult<String> {
        self.booking_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::validation("Missing booking_id"))
    }
}

pub async fn confirm_booking(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<BookingIdBody>,
) -> AppResult<Json<Value>> {
    let id = body.id()?;
    let booking = state.workflow().confirm_booking(&id).await?;
    Ok(Json(json!({
        "ok": true,
        "status": booking.status,
        "total": booking.total,
    })))
}

pub async fn undo_booking(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<BookingIdBody>,
) -> AppResult<Json<Value>> {
    let id = body.id()?;
    let booking = state.workflow().undo_booking(&id).await?;
    Ok(Json(json!({
        "ok": true,
        "status": booking.status,
        "total": booking.total,
    })))
}

// ── Vans ──────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct VanUpdateBody {
    pub slug: String,
    pub updates: Option<Map<String, Value>>,
}

pub async fn update_van(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<VanUpdateBody>,
) -> AppResult<Json<Value>> {
    content::update_van(&state.stores, body.slug.trim(), body.updates.unwrap_or_default()).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn create_van(
    State(state): State<AppState>,
    JsonBody(fields): JsonBody<Map<String, Value>>,
) -> AppResult<Json<Value>> {
    let van = content::create_van(&state.stores, &state.images, fields).await?;
    Ok(Json(json!({ "ok": true, "van": van })))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SlugBody {
    pub slug: String,
}

pub async fn delete_van(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<SlugBody>,
) -> AppResult<Json<Value>> {
    content::delete_van(&state.stores, body.slug.trim()).await?;
    Ok(Json(json!({ "ok": true })))
}

// ── Images ────────────────────────────────────────────────────────────────────

/// The file part and any text parts of an upload form.
#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    van_slug: String,
}

async fn read_upload(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(e.body_text()))?;
                form.file = Some((name, bytes.to_vec()));
            }
            Some("van_slug") => {
                form.van_slug = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(e.body_text()))?
                    .trim()
                    .to_string();
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let form = read_upload(multipart).await?;
    let (name, bytes) = form
        .file
        .ok_or_else(|| AppError::validation("No file uploaded"))?;
    if form.van_slug.is_empty() {
        return Err(AppError::validation("Van slug required"));
    }

    let stored = state
        .images
        .save_van_image(&form.van_slug, &name, &bytes)
        .await?;
    tracing::info!(slug = %form.van_slug, "Uploaded {}", stored.filename);
    Ok(Json(json!({ "ok": true, "url": stored.url, "filename": stored.filename })))
}

pub async fn upload_about_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let form = read_upload(multipart).await?;
    let (name, bytes) = form
        .file
        .ok_or_else(|| AppError::validation("No file uploaded"))?;

    let stored = content::upload_about_image(&state.stores, &state.images, &name, &bytes).await?;
    tracing::info!("Uploaded about image {}", stored.filename);
    Ok(Json(json!({ "ok": true, "url": stored.url, "filename": stored.filename })))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RemoveImageBody {
    pub van_slug: String,
    pub image_url: String,
}

pub async fn remove_image(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RemoveImageBody>,
) -> AppResult<Json<Value>> {
    content::remove_van_image(
        &state.stores,
        &state.images,
        body.van_slug.trim(),
        body.image_url.trim(),
    )
    .await?;
    Ok(Json(json!({ "ok": true })))
}

/// Accepts `{"image_url": ".."}`, `{"image": {"url": ".."}}` or
/// `{"image": ".."}`. A blank `image_url` falls through to `image`.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RemoveAboutImageBody {
    pub image_url: Option<String>,
    pub image: Option<Value>,
}

impl RemoveAboutImageBody {
    fn url(&self) -> String {
        let from_image = || match self.image.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("url").and_then(Value::as_str),
            _ => None,
        };
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| from_image().map(str::trim))
            .unwrap_or_default()
            .to_string()
    }
}

pub async fn remove_about_image(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RemoveAboutImageBody>,
) -> AppResult<Json<Value>> {
    content::remove_about_image(&state.stores, &state.images, &body.url()).await?;
    Ok(Json(json!({ "ok": true })))
}

// ── Email ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct TestEmailBody {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub to: Option<String>,
}

pub async fn test_email(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<TestEmailBody>,
) -> AppResult<Json<Value>> {
    let subject = req.subject.unwrap_or_else(|| "Test email".into());
    let body = req
        .body
        .unwrap_or_else(|| format!("This is a test email from {}.", state.site_name));
    let email = match req.to.filter(|t| !t.trim().is_empty()) {
        Some(to) => Email::to(to.trim(), subject, body),
        None => Email::to_admin(subject, body),
    };

    let config = state.stores.config().load().await;
    state
        .mailer
        .send(&config.email, &email)
        .await
        .map_err(|e| AppError::External(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn about_image_url_from_either_shape() {
        let flat: RemoveAboutImageBody =
            serde_json::from_value(json!({ "image_url": " /static/images/about/a.png " })).unwrap();
        assert_eq!(flat.url(), "/static/images/about/a.png");

        let nested: RemoveAboutImageBody =
            serde_json::from_value(json!({ "image": { "url": "/static/images/about/b.png", "size": "360px" } }))
                .unwrap();
        assert_eq!(nested.url(), "/static/images/about/b.png");

        assert_eq!(RemoveAboutImageBody::default().url(), "");
    }

    #[test]
    fn blank_image_url_falls_back_to_image() {
        let body: RemoveAboutImageBody = serde_json::from_value(json!({
            "image_url": "",
            "image": { "url": "/static/images/about/c.png" }
        }))
        .unwrap();
        assert_eq!(body.url(), "/static/images/about/c.png");

        let plain: RemoveAboutImageBody =
            serde_json::from_value(json!({ "image": "/static/images/about/d.png" })).unwrap();
        assert_eq!(plain.url(), "/static/images/about/d.png");
    }

    #[test]
    fn blank_booking_id_is_rejected() {
        let body = BookingIdBody {
            booking_id: Some("  ".into()),
        };
        assert!(matches!(body.id(), Err(AppError::Validation(_))));
    }
}

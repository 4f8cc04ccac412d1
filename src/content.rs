//! Admin edits to the config document: site text, images and vans.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    error::{AppError, AppResult},
    store::{ConfigDoc, Stores, Van, config::is_valid_slug},
};

/// Display size recorded for newly uploaded about-page photos.
pub const ABOUT_PHOTO_SIZE: &str = "360px";

/// Apply `updates` to `site_content`: mapping values merge key-wise into an
/// existing mapping, everything else replaces the old value.
pub fn merge_site_content(site_content: &mut Map<String, Value>, updates: Map<String, Value>) {
    for (key, incoming) in updates {
        let both_maps = matches!(
            (site_content.get(&key), &incoming),
            (Some(Value::Object(_)), Value::Object(_))
        );
        if !both_maps {
            site_content.insert(key, incoming);
            continue;
        }
        if let (Some(Value::Object(existing)), Value::Object(fields)) =
            (site_content.get_mut(&key), incoming)
        {
            existing.extend(fields);
        }
    }
}

pub async fn update_site_content(stores: &Stores, updates: Map<String, Value>) -> AppResult<()> {
    if updates.is_empty() {
        return Err(AppError::validation("No updates provided"));
    }
    let mut config = stores.config().load().await;
    merge_site_content(&mut config.site_content, updates);
    stores.config().save(&config).await
}

// ── Vans ──────────────────────────────────────────────────────────────────────

pub async fn create_van(stores: &Stores, images: &ImageStore, fields: Map<String, Value>) -> AppResult<Van> {
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let slug = text("slug");
    let name = text("name");
    if slug.is_empty() || name.is_empty() {
        return Err(AppError::validation("Slug and name are required"));
    }
    if !is_valid_slug(&slug) {
        return Err(AppError::validation(
            "Slug must contain only lowercase letters, numbers, and hyphens",
        ));
    }

    let mut config = stores.config().load().await;
    if config.van(&slug).is_some() {
        return Err(AppError::validation("A van with this slug already exists"));
    }

    let mut record = Map::new();
    for key in [
        "pricePerNight",
        "description",
        "imageUrl",
        "photos",
        "equipment",
        "airbnbIcalUrl",
        "airbnbUrl",
    ] {
        if let Some(v) = fields.get(key) {
            record.insert(key.to_string(), v.clone());
        }
    }
    record.insert("slug".into(), json!(slug));
    record.insert("name".into(), json!(name));
    let van: Van = serde_json::from_value(Value::Object(record))
        .map_err(|e| AppError::validation(format!("Invalid van: {e}")))?;

    config.vans.push(van.clone());
    stores.config().save(&config).await?;
    tokio::fs::create_dir_all(images.van_dir(&slug)?).await?;
    tracing::info!(%slug, "Van created");
    Ok(van)
}

/// Overwrite the given keys of a van record.
pub async fn update_van(stores: &Stores, slug: &str, updates: Map<String, Value>) -> AppResult<()> {
    if slug.is_empty() {
        return Err(AppError::validation("Van slug required"));
    }
    let mut config = stores.config().load().await;
    if config.van(slug).is_none() {
        return Err(AppError::not_found("Van not found"));
    }

    if let Some(new_slug) = updates.get("slug") {
        let new_slug = new_slug.as_str().unwrap_or_default();
        if !is_valid_slug(new_slug) {
            return Err(AppError::validation(
                "Slug must contain only lowercase letters, numbers, and hyphens",
            ));
        }
        if new_slug != slug && config.van(new_slug).is_some() {
            return Err(AppError::validation("A van with this slug already exists"));
        }
    }

    let van = config
        .van_mut(slug)
        .ok_or_else(|| AppError::not_found("Van not found"))?;

    let mut record = match serde_json::to_value(&*van)? {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    for (key, value) in updates {
        record.insert(key, value);
    }
    *van = serde_json::from_value(Value::Object(record))
        .map_err(|e| AppError::validation(format!("Invalid van: {e}")))?;

    stores.config().save(&config).await
}

pub async fn delete_van(stores: &Stores, slug: &str) -> AppResult<()> {
    if slug.is_empty() {
        return Err(AppError::validation("Van slug required"));
    }
    let mut config = stores.config().load().await;
    let before = config.vans.len();
    config.vans.retain(|v| v.slug != slug);
    if config.vans.len() == before {
        return Err(AppError::not_found("Van not found"));
    }
    stores.config().save(&config).await?;
    tracing::info!(%slug, "Van deleted");
    Ok(())
}

// ── Images ────────────────────────────────────────────────────────────────────

/// Uploaded images live under `{static_root}/images/` and are served from
/// `/static/images/`.
#[derive(Clone)]
pub struct ImageStore {
    root: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StoredImage {
    pub url: String,
    pub filename: String,
}

impl ImageStore {
    pub fn new(static_root: &Path) -> Self {
        Self {
            root: static_root.join("images"),
        }
    }

    fn van_dir(&self, slug: &str) -> AppResult<PathBuf> {
        if !is_valid_slug(slug) {
            return Err(AppError::validation("Invalid van slug"));
        }
        Ok(self.root.join(slug))
    }

    fn about_dir(&self) -> PathBuf {
        self.root.join("about")
    }

    async fn write(&self, dir: &Path, folder: &str, filename: String, bytes: &[u8]) -> AppResult<StoredImage> {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(&filename), bytes).await?;
        Ok(StoredImage {
            url: format!("/static/images/{folder}/{filename}"),
            filename,
        })
    }

    pub async fn save_van_image(&self, slug: &str, original_name: &str, bytes: &[u8]) -> AppResult<StoredImage> {
        let dir = self.van_dir(slug)?;
        let filename = upload_filename(original_name, bytes);
        self.write(&dir, slug, filename, bytes).await
    }

    pub async fn save_about_image(&self, original_name: &str, bytes: &[u8]) -> AppResult<StoredImage> {
        let filename = upload_filename(original_name, bytes);
        self.write(&self.about_dir(), "about", filename, bytes).await
    }

    /// Delete the file an image URL points at. A missing file is fine.
    async fn remove_file(&self, dir: &Path, image_url: &str) {
        let name = sanitize_filename(image_url.rsplit('/').next().unwrap_or_default());
        if name.is_empty() {
            return;
        }
        match tokio::fs::remove_file(dir.join(&name)).await {
            Ok(()) => tracing::info!("Removed image {}", name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Cannot remove image {}: {}", name, e),
        }
    }
}

/// Keep ASCII letters, digits, `.`, `-` and `_`; spaces become `_`; leading
/// dots are dropped.
pub fn sanitize_filename(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = name
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Image type from magic bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("webp"),
        [b'B', b'M', ..] => Some("bmp"),
        _ => None,
    }
}

fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `<token>_<name>.<ext>`; a missing extension is sniffed from the content.
pub fn upload_filename(original_name: &str, bytes: &[u8]) -> String {
    let token = random_token();
    let name = sanitize_filename(original_name);
    let ext_fallback = sniff_image(bytes).unwrap_or("png");

    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!("{token}_{name}"),
        _ => {
            let stem = name.trim_end_matches('.');
            if stem.is_empty() {
                format!("{token}.{ext_fallback}")
            } else {
                format!("{token}_{stem}.{ext_fallback}")
            }
        }
    }
}

pub async fn upload_about_image(
    stores: &Stores,
    images: &ImageStore,
    original_name: &str,
    bytes: &[u8],
) -> AppResult<StoredImage> {
    let stored = images.save_about_image(original_name, bytes).await?;

    let mut config = stores.config().load().await;
    add_about_photo(&mut config, &stored.url);
    stores.config().save(&config).await?;
    Ok(stored)
}

/// Run `f` on `site_content.about.photos`, creating either level if missing.
fn with_about_photos(config: &mut ConfigDoc, f: impl FnOnce(&mut Vec<Value>)) {
    let about = config
        .site_content
        .entry("about")
        .or_insert_with(|| json!({}));
    if !about.is_object() {
        *about = json!({});
    }
    if let Value::Object(about) = about {
        let photos = about.entry("photos").or_insert_with(|| json!([]));
        if !photos.is_array() {
            *photos = json!([]);
        }
        if let Value::Array(list) = photos {
            f(list);
        }
    }
}

fn add_about_photo(config: &mut ConfigDoc, url: &str) {
    with_about_photos(config, |list| {
        list.push(json!({ "url": url, "size": ABOUT_PHOTO_SIZE }));
    });
}

fn remove_about_photo(config: &mut ConfigDoc, url: &str) {
    with_about_photos(config, |list| {
        list.retain(|p| match p {
            Value::Object(o) => o.get("url").and_then(Value::as_str) != Some(url),
            Value::String(s) => s != url,
            _ => true,
        });
    });
}

pub async fn remove_about_image(stores: &Stores, images: &ImageStore, image_url: &str) -> AppResult<()> {
    if image_url.is_empty() {
        return Err(AppError::validation("Image URL required"));
    }
    images.remove_file(&images.about_dir(), image_url).await;

    let mut config = stores.config().load().await;
    remove_about_photo(&mut config, image_url);
    stores.config().save(&config).await
}

pub async fn remove_van_image(stores: &Stores, images: &ImageStore, slug: &str, image_url: &str) -> AppResult<()> {
    if slug.is_empty() || image_url.is_empty() {
        return Err(AppError::validation("Van slug and image URL required"));
    }
    images.remove_file(&images.van_dir(slug)?, image_url).await;

    let mut config = stores.config().load().await;
    if let Some(van) = config.van_mut(slug) {
        van.remove_photo(image_url);
    }
    stores.config().save(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn merge_keeps_sibling_keys() {
        let mut content = object(json!({ "hero": { "title": "A", "subtitle": "B" } }));
        merge_site_content(&mut content, object(json!({ "hero": { "title": "X" } })));
        assert_eq!(content["hero"], json!({ "title": "X", "subtitle": "B" }));
    }

    #[test]
    fn merge_replaces_non_mappings_and_adds_new_sections() {
        let mut content = object(json!({
            "hero": { "title": "A" },
            "tagline": "old",
            "why": "plain text"
        }));
        merge_site_content(
            &mut content,
            object(json!({
                "tagline": { "text": "new" },
                "why": { "title": "Why us" },
                "faq": [1, 2]
            })),
        );
        assert_eq!(content["tagline"], json!({ "text": "new" }));
        assert_eq!(content["why"], json!({ "title": "Why us" }));
        assert_eq!(content["faq"], json!([1, 2]));
        assert_eq!(content["hero"], json!({ "title": "A" }));
    }

    #[test]
    fn merge_is_one_level_deep() {
        let mut content = object(json!({ "about": { "meta": { "a": 1, "b": 2 } } }));
        merge_site_content(&mut content, object(json!({ "about": { "meta": { "a": 9 } } })));
        assert_eq!(content["about"]["meta"], json!({ "a": 9 }));
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());
        let err = update_site_content(&stores, Map::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn filenames() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my photo (1).JPG"), "my_photo_1.JPG");
        assert_eq!(sanitize_filename(".hidden"), "hidden");

        let named = upload_filename("van front.jpg", PNG);
        assert!(named.ends_with("_van_front.jpg"));
        assert_eq!(named.len(), 8 + "_van_front.jpg".len());

        assert!(upload_filename("photo", PNG).ends_with("_photo.png"));
        assert!(upload_filename("photo", b"\xFF\xD8\xFF\xE0").ends_with("_photo.jpeg"));
        let anonymous = upload_filename("", b"unknown bytes");
        assert!(anonymous.ends_with(".png"));
        assert!(!anonymous.contains('_'));
    }

    #[tokio::test]
    async fn about_image_upload_and_removal() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(&tmp.path().join("data"));
        let images = ImageStore::new(&tmp.path().join("static"));

        let stored = upload_about_image(&stores, &images, "team.png", PNG)
            .await
            .unwrap();
        assert!(stored.url.starts_with("/static/images/about/"));
        let on_disk = tmp.path().join("static/images/about").join(&stored.filename);
        assert!(on_disk.exists());

        let config = stores.config().load().await;
        assert_eq!(
            config.site_content["about"]["photos"],
            json!([{ "url": stored.url, "size": "360px" }])
        );

        remove_about_image(&stores, &images, &stored.url).await.unwrap();
        assert!(!on_disk.exists());
        let config = stores.config().load().await;
        assert_eq!(config.site_content["about"]["photos"], json!([]));

        // Second removal: file already gone, still fine.
        remove_about_image(&stores, &images, &stored.url).await.unwrap();
    }

    #[tokio::test]
    async fn van_photo_removal_repairs_primary_image() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(&tmp.path().join("data"));
        let images = ImageStore::new(&tmp.path().join("static"));

        let first = images.save_van_image("big-blue", "a.jpg", b"\xFF\xD8\xFF").await.unwrap();
        let second = images.save_van_image("big-blue", "b.jpg", b"\xFF\xD8\xFF").await.unwrap();

        let config: ConfigDoc = serde_json::from_value(json!({
            "vans": [{
                "slug": "big-blue",
                "name": "Big Blue",
                "imageUrl": first.url,
                "photos": [first.url, second.url]
            }]
        }))
        .unwrap();
        stores.config().save(&config).await.unwrap();

        remove_van_image(&stores, &images, "big-blue", &first.url).await.unwrap();
        let van = stores.config().load().await.van("big-blue").cloned().unwrap();
        assert_eq!(van.image_url, second.url);
        assert_eq!(van.photos, vec![second.url.clone()]);
        assert!(!tmp.path().join("static/images/big-blue").join(&first.filename).exists());

        remove_van_image(&stores, &images, "big-blue", &second.url).await.unwrap();
        let van = stores.config().load().await.van("big-blue").cloned().unwrap();
        assert_eq!(van.image_url, "");
        assert!(van.photos.is_empty());
    }

    #[tokio::test]
    async fn van_image_slug_must_be_safe() {
        let tmp = TempDir::new().unwrap();
        let images = ImageStore::new(tmp.path());
        let err = images.save_van_image("../x", "a.png", PNG).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn van_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(&tmp.path().join("data"));
        let images = ImageStore::new(&tmp.path().join("static"));

        let van = create_van(
            &stores,
            &images,
            object(json!({ "slug": "little-red", "name": "Little Red", "pricePerNight": 80 })),
        )
        .await
        .unwrap();
        assert_eq!(van.price_per_night, 80.0);
        assert!(tmp.path().join("static/images/little-red").is_dir());

        let dup = create_van(
            &stores,
            &images,
            object(json!({ "slug": "little-red", "name": "Again" })),
        )
        .await
        .unwrap_err();
        assert!(matches!(dup, AppError::Validation(_)));

        let bad = create_van(&stores, &images, object(json!({ "slug": "Bad Slug", "name": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(bad, AppError::Validation(_)));

        update_van(
            &stores,
            "little-red",
            object(json!({ "description": "Cosy", "sleeps": 2 })),
        )
        .await
        .unwrap();
        let config = stores.config().load().await;
        let van = config.van("little-red").unwrap();
        assert_eq!(van.description, "Cosy");
        assert_eq!(van.name, "Little Red");
        assert_eq!(van.extra["sleeps"], 2);

        let missing = update_van(&stores, "nope", Map::new()).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));

        delete_van(&stores, "little-red").await.unwrap();
        assert!(stores.config().load().await.vans.is_empty());
        let missing = delete_van(&stores, "little-red").await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn slug_changes_stay_unique_and_well_formed() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(&tmp.path().join("data"));
        let config: ConfigDoc =
            serde_json::from_value(json!({ "vans": [{ "slug": "a" }, { "slug": "b" }] })).unwrap();
        stores.config().save(&config).await.unwrap();

        let taken = update_van(&stores, "b", object(json!({ "slug": "a" })))
            .await
            .unwrap_err();
        assert!(matches!(taken, AppError::Validation(_)));

        let malformed = update_van(&stores, "a", object(json!({ "slug": "Bad Slug/.." })))
            .await
            .unwrap_err();
        assert!(matches!(malformed, AppError::Validation(_)));

        let not_text = update_van(&stores, "a", object(json!({ "slug": 7 })))
            .await
            .unwrap_err();
        assert!(matches!(not_text, AppError::Validation(_)));

        update_van(&stores, "b", object(json!({ "slug": "b", "name": "Bee" })))
            .await
            .unwrap();
        update_van(&stores, "b", object(json!({ "slug": "c" }))).await.unwrap();
        let slugs: Vec<String> = stores
            .config()
            .load()
            .await
            .vans
            .into_iter()
            .map(|v| v.slug)
            .collect();
        assert_eq!(slugs, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn null_van_fields_do_not_wipe_the_config_on_next_write() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());
        tokio::fs::write(
            stores.config().path(),
            r#"{"vans":[{"slug":"a","photos":null},{"slug":"b"}],"contact":{"phone":"555"}}"#,
        )
        .await
        .unwrap();

        update_site_content(&stores, object(json!({ "why": { "t": "1" } })))
            .await
            .unwrap();

        let config = stores.config().load().await;
        assert_eq!(config.vans.len(), 2);
        assert_eq!(config.contact["phone"], "555");
        assert_eq!(config.site_content["why"]["t"], "1");
    }
}

//! File-backed JSON documents.
//!
//! Every document is read and written in full. There is no locking: two
//! requests that load, mutate and save the same document race and the last
//! writer wins. All reads and writes go through [`JsonDocument`] so a lock
//! or a version check can be added in one place.
//!
//! ```text
//! {data_dir}/
//! ├── config.json     # vans, contact, email, stripe, site_content
//! ├── messages.json   # contact messages and booking requests
//! └── stats.json      # visit counters and confirmed revenue
//! ```

pub mod config;
pub mod messages;
pub mod stats;

use std::{
    io,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::AppResult;

pub use config::{ConfigDoc, EmailSettings, StripeSettings, Van};
pub use messages::{Booking, ContactMessage, Message};
pub use stats::StatsDoc;

/// A whole-file JSON document of type `T`.
pub struct JsonDocument<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonDocument<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing or unparsable file yields `T::default()`.
    pub async fn load(&self) -> T {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", self.path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Unparsable document, using defaults: {}",
                    e
                );
                T::default()
            }
        }
    }

    /// Overwrite the document: pretty JSON to a temp file, then rename.
    ///
    /// Each save writes its own temp file, so concurrent saves never share
    /// one and readers only ever see a complete document.
    pub async fn save(&self, doc: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        if let Err(e) = write_then_rename(&tmp, &self.path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// `<name>.<random hex>.tmp` next to the document.
    fn temp_path(&self) -> PathBuf {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{name}.{token}.tmp"))
    }
}

async fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(tmp, dest).await
}

impl<E> JsonDocument<Vec<E>>
where
    E: Serialize + DeserializeOwned,
{
    /// Load the list, push `entry`, save the whole list back.
    pub async fn append(&self, entry: E) -> AppResult<()> {
        let mut list = self.load().await;
        list.push(entry);
        self.save(&list).await
    }
}

/// The three documents the site persists.
#[derive(Clone)]
pub struct Stores {
    inner: Arc<StoresInner>,
}

struct StoresInner {
    config: JsonDocument<ConfigDoc>,
    messages: JsonDocument<Vec<Message>>,
    stats: JsonDocument<StatsDoc>,
}

impl Stores {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            inner: Arc::new(StoresInner {
                config: JsonDocument::new(data_dir.join("config.json")),
                messages: JsonDocument::new(data_dir.join("messages.json")),
                stats: JsonDocument::new(data_dir.join("stats.json")),
            }),
        }
    }

    pub fn config(&self) -> &JsonDocument<ConfigDoc> {
        &self.inner.config
    }

    pub fn messages(&self) -> &JsonDocument<Vec<Message>> {
        &self.inner.messages
    }

    pub fn stats(&self) -> &JsonDocument<StatsDoc> {
        &self.inner.stats
    }
}

// ── Lenient numbers ──────────────────────────────────────────────────────────
//
// Documents are hand-edited and form posts send numbers as strings, so numeric
// fields accept `12`, `12.5`, `"12"` and `null`. A type mismatch here would
// otherwise make the whole document unparsable and reset it to defaults.

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(serde_json::Number),
    Text(String),
    Bool(bool),
}

fn number_like_to_f64(value: Option<NumberLike>) -> f64 {
    match value {
        Some(NumberLike::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(NumberLike::Text(s)) => s.trim().parse().unwrap_or(0.0),
        Some(NumberLike::Bool(_)) | None => 0.0,
    }
}

pub fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value: Option<NumberLike> = Option::deserialize(d)?;
    let n = number_like_to_f64(value);
    Ok(if n.is_finite() { n } else { 0.0 })
}

/// Truncating integer conversion, matching `int(float(x))`.
pub fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(lenient_f64(d)?.trunc() as i64)
}

pub fn lenient_opt_u16<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    let value: Option<NumberLike> = Option::deserialize(d)?;
    Ok(match value {
        Some(NumberLike::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(NumberLike::Text(s)) => s.trim().parse().ok(),
        Some(NumberLike::Bool(_)) | None => None,
    })
}

/// `null` reads as an empty string.
pub fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// `null` reads as the type's default (empty list, empty map, blank settings).
pub fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());

        let config = stores.config().load().await;
        assert!(config.vans.is_empty());
        assert!(config.site_content.is_empty());
        assert!(stores.messages().load().await.is_empty());

        let stats = stores.stats().load().await;
        assert_eq!(stats.total, 0);
        assert!(stats.log.is_empty());
        assert_eq!(stats.confirmed_revenue, 0.0);
    }

    #[tokio::test]
    async fn corrupt_file_loads_defaults() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());
        tokio::fs::write(stores.stats().path(), b"{ not json").await.unwrap();
        tokio::fs::write(stores.messages().path(), b"[1, 2").await.unwrap();

        assert_eq!(stores.stats().load().await.total, 0);
        assert!(stores.messages().load().await.is_empty());
    }

    #[tokio::test]
    async fn save_keeps_non_ascii_text_readable() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());

        let mut config = ConfigDoc::default();
        config
            .site_content
            .insert("hero".into(), serde_json::json!({ "title": "Fjällräven på väg" }));
        stores.config().save(&config).await.unwrap();

        let raw = tokio::fs::read_to_string(stores.config().path()).await.unwrap();
        assert!(raw.contains("Fjällräven på väg"));
        assert!(raw.contains("\n  \"vans\""));

        let loaded = stores.config().load().await;
        assert_eq!(loaded.site_content["hero"]["title"], "Fjällräven på väg");

        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().into_owned();
            assert!(!name.ends_with(".tmp"), "leftover temp file {name}");
        }
    }

    #[tokio::test]
    async fn concurrent_saves_never_expose_a_partial_document() {
        let tmp = TempDir::new().unwrap();
        let stores = Stores::open(tmp.path());

        let mut seed = StatsDoc::default();
        for n in 0..2000 {
            seed.pages.insert(format!("/page/{n}"), 1);
        }
        stores.stats().save(&seed).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..64u64 {
            let stores = stores.clone();
            tasks.push(tokio::spawn(async move {
                let mut stats = stores.stats().load().await;
                let saw_seed = stats.pages.len() >= 2000;
                stats.total = n;
                let saved = stores.stats().save(&stats).await;
                (saw_seed, saved.is_ok())
            }));
        }

        for task in tasks {
            let (saw_seed, saved) = task.await.unwrap();
            assert!(saw_seed, "a load fell back to the default document");
            assert!(saved, "a save failed");
        }
        assert_eq!(stores.stats().load().await.pages.len(), 2000);
    }

    #[tokio::test]
    async fn append_keeps_existing_entries() {
        let tmp = TempDir::new().unwrap();
        let doc: JsonDocument<Vec<Message>> = JsonDocument::new(tmp.path().join("m.json"));

        for n in 0..3 {
            doc.append(Message::Contact(ContactMessage {
                name: format!("n{n}"),
                email: "a@b.co".into(),
                message: "hi".into(),
                ts: format!("2024-01-0{}T00:00:00Z", n + 1),
            }))
            .await
            .unwrap();
        }

        assert_eq!(doc.load().await.len(), 3);
    }

    #[test]
    fn lenient_numbers_accept_strings() {
        #[derive(Deserialize)]
        struct Fields {
            #[serde(default, deserialize_with = "lenient_f64")]
            total: f64,
            #[serde(default, deserialize_with = "lenient_i64")]
            nights: i64,
            #[serde(default, deserialize_with = "lenient_opt_u16")]
            port: Option<u16>,
        }

        let p: Fields =
            serde_json::from_str(r#"{"total":"120.5","nights":"3","port":"587"}"#).unwrap();
        assert_eq!(p.total, 120.5);
        assert_eq!(p.nights, 3);
        assert_eq!(p.port, Some(587));

        let p: Fields = serde_json::from_str(r#"{"total":null,"nights":2.9}"#).unwrap();
        assert_eq!(p.total, 0.0);
        assert_eq!(p.nights, 2);
        assert_eq!(p.port, None);
    }
}

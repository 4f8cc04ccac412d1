use std::{path::PathBuf, sync::Arc};

use crate::{
    analytics::GeoLocator, checkout::Checkout, content::ImageStore, mail::Mailer, store::Stores,
};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    /// Directory holding the HTML pages and `/static` assets.
    pub static_root: PathBuf,
    /// Canonicalized (symlink-resolved) version of `static_root`.
    /// Used for containment checks when serving files.
    pub canonical_root: PathBuf,
    pub images: ImageStore,
    /// `None` disables admin login.
    pub admin: Option<AdminCredentials>,
    pub mailer: Arc<dyn Mailer>,
    pub http: reqwest::Client,
    pub geo: GeoLocator,
    pub checkout: Checkout,
    /// Public origin used for payment return URLs, e.g. "https://example.com".
    pub base_url: Option<String>,
    /// Signature used in customer emails.
    pub site_name: String,
}

#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Exact match after trimming surrounding whitespace from the input.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        username.trim() == self.username && password.trim() == self.password
    }
}

impl AppState {
    pub fn workflow(&self) -> crate::booking::Workflow<'_> {
        crate::booking::Workflow {
            stores: &self.stores,
            mailer: self.mailer.as_ref(),
            site_name: &self.site_name,
        }
    }
}

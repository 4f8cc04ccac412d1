use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{lenient_f64, lenient_opt_u16, null_as_default, null_as_empty};

static LISTING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/ical/(\d+)").expect("valid listing id pattern"));

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid slug pattern"));

/// Site-wide settings document.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigDoc {
    #[serde(default, deserialize_with = "null_as_default")]
    pub vans: Vec<Van>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contact: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: EmailSettings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stripe: StripeSettings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub site_content: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfigDoc {
    pub fn van(&self, slug: &str) -> Option<&Van> {
        self.vans.iter().find(|v| v.slug == slug)
    }

    pub fn van_mut(&mut self, slug: &str) -> Option<&mut Van> {
        self.vans.iter_mut().find(|v| v.slug == slug)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Van {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub slug: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price_per_night: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub photos: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub equipment: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub airbnb_ical_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub airbnb_url: String,
    /// Keys the admin UI adds that this schema does not name.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Van {
    /// Numeric listing id embedded in the calendar feed URL.
    pub fn listing_id(&self) -> Option<&str> {
        LISTING_ID
            .captures(&self.airbnb_ical_url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// The public listing URL derived from the calendar feed, if any.
    pub fn derived_listing_url(&self) -> Option<String> {
        self.listing_id()
            .map(|id| format!("https://www.airbnb.com/rooms/{id}"))
    }

    /// Copy of this van with `airbnbUrl` filled from the feed when it is blank.
    pub fn with_listing_url(&self) -> Van {
        let mut van = self.clone();
        if van.airbnb_url.is_empty() {
            if let Some(url) = self.derived_listing_url() {
                van.airbnb_url = url;
            }
        }
        van
    }

    /// Drop `url` from the photo list and repair the primary image pointer.
    pub fn remove_photo(&mut self, url: &str) {
        self.photos.retain(|p| p != url);
        let dangling = !self.image_url.is_empty() && !self.photos.contains(&self.image_url);
        if self.image_url == url || dangling {
            self.image_url = self.photos.first().cloned().unwrap_or_default();
        }
    }
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG.is_match(slug)
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_u16",
        skip_serializing_if = "Option::is_none"
    )]
    pub smtp_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_pass: Option<String>,
    /// Admin inbox for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

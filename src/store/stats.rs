use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lenient_f64;

/// Maximum number of entries kept in the rolling visit log.
pub const MAX_LOG_ENTRIES: usize = 500;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StatsDoc {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pages: IndexMap<String, u64>,
    #[serde(default)]
    pub ips: IndexMap<String, IpStats>,
    #[serde(default)]
    pub log: Vec<VisitLogEntry>,
    #[serde(default)]
    pub by_country_visits: IndexMap<String, u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confirmed_revenue: f64,
    /// Raw geo-IP lookup outcome per address, for inspection.
    #[serde(default)]
    pub geo_debug: IndexMap<String, GeoTrace>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IpStats {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub pages: IndexMap<String, u64>,
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub ua: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitLogEntry {
    pub ts: String,
    pub ip: String,
    pub path: String,
    #[serde(default)]
    pub ua: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTrace {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeoTrace {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            status_code: None,
            text: None,
            error: None,
        }
    }

    pub fn http_error(status_code: u16, text: String) -> Self {
        Self {
            ok: false,
            data: None,
            status_code: Some(status_code),
            text: Some(text),
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            ok: false,
            data: None,
            status_code: None,
            text: None,
            error: Some(error),
        }
    }
}

/// One page view, already normalized.
pub struct Visit<'a> {
    pub path: &'a str,
    pub ip: &'a str,
    pub ua: &'a str,
    pub country: &'a str,
    pub ts: &'a str,
}

impl StatsDoc {
    pub fn record_visit(&mut self, visit: &Visit<'_>) {
        self.total += 1;
        *self.pages.entry(visit.path.to_string()).or_insert(0) += 1;

        let info = self.ips.entry(visit.ip.to_string()).or_default();
        info.count += 1;
        *info.pages.entry(visit.path.to_string()).or_insert(0) += 1;
        info.last = Some(visit.ts.to_string());
        if !visit.ua.is_empty() {
            info.ua = visit.ua.to_string();
        }
        info.country = Some(visit.country.to_string());

        *self
            .by_country_visits
            .entry(visit.country.to_string())
            .or_insert(0) += 1;

        self.log.push(VisitLogEntry {
            ts: visit.ts.to_string(),
            ip: visit.ip.to_string(),
            path: visit.path.to_string(),
            ua: visit.ua.to_string(),
        });
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            self.log.drain(..excess);
        }
    }

    pub fn add_revenue(&mut self, amount: f64) {
        self.confirmed_revenue += amount;
    }

    /// Subtract `amount`, never going below zero.
    pub fn remove_revenue(&mut self, amount: f64) {
        self.confirmed_revenue = (self.confirmed_revenue - amount).max(0.0);
    }

    /// Number of distinct addresses per country.
    pub fn unique_by_country(&self) -> IndexMap<String, u64> {
        let mut out = IndexMap::new();
        for info in self.ips.values() {
            let country = info.country.as_deref().unwrap_or("Unknown");
            *out.entry(country.to_string()).or_insert(0) += 1;
        }
        out
    }
}

/// Stats document plus figures derived at read time.
#[derive(Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub doc: StatsDoc,
    pub unique_visitors: usize,
    pub by_country_unique: IndexMap<String, u64>,
}

impl From<StatsDoc> for StatsReport {
    fn from(doc: StatsDoc) -> Self {
        Self {
            unique_visitors: doc.ips.len(),
            by_country_unique: doc.unique_by_country(),
            doc,
        }
    }
}

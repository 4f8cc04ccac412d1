use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    error::AppResult,
    store::{
        Stores,
        stats::{GeoTrace, Visit},
    },
};

const GEO_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound on the error body kept in a geo trace.
const GEO_TEXT_LIMIT: usize = 500;

/// Who made the request: client address and user agent.
#[derive(Debug, Clone)]
pub struct Visitor {
    pub ip: String,
    pub ua: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Visitor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip());

        Ok(Visitor {
            ip: client_ip(&parts.headers, peer),
            ua: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// First `X-Forwarded-For` entry, else the peer address, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Strip the query string; an empty path counts as `/`.
pub fn normalize_path(path: Option<&str>) -> String {
    let path = path.unwrap_or_default();
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Addresses that are never sent to the geo-IP service.
pub fn is_local(ip: &str) -> bool {
    if ip.is_empty() || ip == "unknown" {
        return true;
    }
    ip.parse::<IpAddr>().map(|a| a.is_loopback()).unwrap_or(false)
}

/// Geo-IP lookup against an ipapi-compatible endpoint (`{base}/{ip}/json/`).
#[derive(Clone)]
pub struct GeoLocator {
    http: reqwest::Client,
    base_url: String,
}

impl GeoLocator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Resolve a country name. Never fails: lookup problems yield `"Unknown"`
    /// and are described by the returned trace.
    pub async fn country(&self, ip: &str) -> (String, Option<GeoTrace>) {
        if is_local(ip) {
            return ("Local".to_string(), None);
        }

        let url = format!("{}/{}/json/", self.base_url.trim_end_matches('/'), ip);
        let resp = match self.http.get(&url).timeout(GEO_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(%ip, "geo lookup failed: {}", e);
                return ("Unknown".to_string(), Some(GeoTrace::failure(e.to_string())));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(GEO_TEXT_LIMIT)
                .collect();
            return (
                "Unknown".to_string(),
                Some(GeoTrace::http_error(status.as_u16(), text)),
            );
        }

        match resp.json::<Value>().await {
            Ok(data) => {
                let country = country_from_payload(&data);
                (country, Some(GeoTrace::success(data)))
            }
            Err(e) => ("Unknown".to_string(), Some(GeoTrace::failure(e.to_string()))),
        }
    }
}

fn country_from_payload(data: &Value) -> String {
    ["country_name", "country"]
        .iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// Record one page view in the stats document.
pub async fn record_visit(
    stores: &Stores,
    geo: &GeoLocator,
    path: Option<&str>,
    visitor: &Visitor,
) -> AppResult<()> {
    let path = normalize_path(path);
    // Resolve the country before loading so the slow call does not widen the
    // load/save window.
    let (country, trace) = geo.country(&visitor.ip).await;

    let mut stats = stores.stats().load().await;
    if let Some(trace) = trace {
        stats.geo_debug.insert(visitor.ip.clone(), trace);
    }

    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    stats.record_visit(&Visit {
        path: &path,
        ip: &visitor.ip,
        ua: &visitor.ua,
        country: &country,
        ts: &ts,
    });

    stores.stats().save(&stats).await
}

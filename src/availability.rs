//! Busy date ranges from a van's external iCalendar feed.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    store::Stores,
};

const FEED_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusyRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct Availability {
    pub slug: String,
    pub busy: Vec<BusyRange>,
}

pub async fn get_availability(
    stores: &Stores,
    http: &reqwest::Client,
    slug: &str,
) -> AppResult<Availability> {
    let config = stores.config().load().await;
    let van = config
        .van(slug)
        .ok_or_else(|| AppError::not_found("unknown van"))?;

    if van.airbnb_ical_url.trim().is_empty() {
        return Ok(Availability {
            slug: slug.to_string(),
            busy: Vec::new(),
        });
    }

    let feed = fetch_feed(http, van.airbnb_ical_url.trim()).await?;
    Ok(Availability {
        slug: slug.to_string(),
        busy: parse_busy(&feed),
    })
}

async fn fetch_feed(http: &reqwest::Client, url: &str) -> AppResult<String> {
    let resp = http
        .get(url)
        .timeout(FEED_TIMEOUT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AppError::External(e.to_string()))?;
    resp.text()
        .await
        .map_err(|e| AppError::External(e.to_string()))
}

// ── iCalendar ─────────────────────────────────────────────────────────────────

/// Undo RFC 5545 line folding: a line starting with a space or tab continues
/// the previous one.
fn unfold(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

/// A content line split into name, parameters and value.
struct ContentLine<'a> {
    name: String,
    params: Vec<(String, &'a str)>,
    value: &'a str,
}

fn parse_line(line: &str) -> Option<ContentLine<'_>> {
    // The value starts after the first colon that is not inside a quoted
    // parameter value.
    let mut in_quotes = false;
    let mut split = None;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let split = split?;
    let (head, value) = (&line[..split], &line[split + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim_matches('"')))
        .collect();

    Some(ContentLine {
        name,
        params,
        value: value.trim(),
    })
}

impl ContentLine<'_> {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

/// A `DTSTART`/`DTEND` value rendered as the UTC calendar date.
fn event_date(line: &ContentLine<'_>) -> Option<String> {
    let value = line.value;

    if line.param("VALUE") == Some("DATE") || value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(date.format("%Y-%m-%d").to_string());
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(naive.and_utc().format("%Y-%m-%d").to_string());
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let zone = line.param("TZID").and_then(|tz| tz.parse::<Tz>().ok());
    match zone {
        Some(tz) => {
            // A time inside a DST gap does not exist locally; take the first
            // valid time after it, else read it as floating.
            let local = tz
                .from_local_datetime(&naive)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest());
            match local {
                Some(local) => Some(local.with_timezone(&Utc).format("%Y-%m-%d").to_string()),
                None => Some(naive.format("%Y-%m-%d").to_string()),
            }
        }
        // Floating time, or a zone we do not know: take it as written.
        None => Some(naive.format("%Y-%m-%d").to_string()),
    }
}

/// Collect `VEVENT` start/end dates in feed order.
pub fn parse_busy(feed: &str) -> Vec<BusyRange> {
    let mut busy = Vec::new();
    let mut in_event = false;
    let mut start: Option<String> = None;
    let mut end: Option<String> = None;

    for raw in unfold(feed) {
        let Some(line) = parse_line(&raw) else {
            continue;
        };

        match (line.name.as_str(), line.value.to_ascii_uppercase().as_str()) {
            ("BEGIN", "VEVENT") => {
                in_event = true;
                start = None;
                end = None;
            }
            ("END", "VEVENT") if in_event => {
                in_event = false;
                match (start.take(), end.take()) {
                    (Some(s), Some(e)) => busy.push(BusyRange { start: s, end: e }),
                    (Some(s), None) => busy.push(BusyRange {
                        start: s.clone(),
                        end: s,
                    }),
                    _ => tracing::debug!("Skipping VEVENT without DTSTART"),
                }
            }
            ("DTSTART", _) if in_event => start = event_date(&line),
            ("DTEND", _) if in_event => end = event_date(&line),
            _ => {}
        }
    }

    busy
}

//! Booking requests, contact messages and the admin confirm/undo transitions.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    mail::{self, Mailer},
    store::{
        Booking, ContactMessage, Message, Stores,
        lenient_f64, lenient_i64,
        messages::{BookingKind, BookingStatus, find_booking_mut},
    },
};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Timestamp used both as `ts` and as the booking id.
fn booking_id_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BookingRequest {
    pub slug: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub nights: i64,
    #[serde(deserialize_with = "lenient_f64")]
    pub total: f64,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

fn trimmed(s: Option<String>) -> String {
    s.map(|s| s.trim().to_string()).unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct SubmitOutcome {
    pub ok: bool,
    /// Both notifications went out.
    pub sent: bool,
    pub admin_sent: bool,
    pub customer_sent: bool,
    pub id: String,
}

/// Everything a workflow step needs besides its input.
pub struct Workflow<'a> {
    pub stores: &'a Stores,
    pub mailer: &'a dyn Mailer,
    pub site_name: &'a str,
}

impl Workflow<'_> {
    pub async fn submit_booking(&self, req: BookingRequest) -> AppResult<SubmitOutcome> {
        let slug = trimmed(req.slug);
        let start = trimmed(req.start);
        let end = trimmed(req.end);
        if slug.is_empty() || start.is_empty() || end.is_empty() || req.nights <= 0 {
            return Err(AppError::validation("Missing required fields"));
        }

        let email = trimmed(req.email);
        if !email.is_empty() && !is_valid_email(&email) {
            return Err(AppError::validation("Invalid email address"));
        }

        let config = self.stores.config().load().await;
        let van_name = config
            .van(&slug)
            .map(|v| v.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| slug.clone());

        let booking = Booking {
            kind: BookingKind::Booking,
            slug,
            start,
            end,
            nights: req.nights,
            total: req.total,
            email,
            name: trimmed(req.name),
            phone: trimmed(req.phone),
            notes: trimmed(req.notes),
            status: BookingStatus::Pending,
            ts: booking_id_now(),
        };
        self.stores
            .messages()
            .append(Message::Booking(booking.clone()))
            .await?;
        tracing::info!(id = %booking.ts, slug = %booking.slug, "Booking request stored");

        let admin_sent = mail::deliver(
            self.mailer,
            &config.email,
            &mail::booking_request_for_admin(&booking, &van_name),
        )
        .await;
        let customer_sent = if booking.email.is_empty() {
            false
        } else {
            mail::deliver(
                self.mailer,
                &config.email,
                &mail::booking_request_for_customer(&booking, &van_name, self.site_name),
            )
            .await
        };

        Ok(SubmitOutcome {
            ok: true,
            sent: admin_sent && customer_sent,
            admin_sent,
            customer_sent,
            id: booking.ts,
        })
    }

    /// `pending -> confirmed`; adds the booking total to confirmed revenue.
    pub async fn confirm_booking(&self, id: &str) -> AppResult<Booking> {
        let mut messages = self.stores.messages().load().await;
        let booking = find_booking_mut(&mut messages, id)
            .ok_or_else(|| AppError::not_found("Booking not found"))?;
        booking.confirm()?;
        let booking = booking.clone();
        self.stores.messages().save(&messages).await?;

        let mut stats = self.stores.stats().load().await;
        stats.add_revenue(booking.total);
        self.stores.stats().save(&stats).await?;
        tracing::info!(id = %booking.ts, total = booking.total, "Booking confirmed");

        let config = self.stores.config().load().await;
        let van = config.van(&booking.slug);
        let listing_url = van.and_then(|v| v.derived_listing_url());
        let van_name = van
            .map(|v| v.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| mail::slug_title(&booking.slug));

        if !booking.email.is_empty() {
            mail::deliver(
                self.mailer,
                &config.email,
                &mail::booking_confirmed_for_customer(&booking, &van_name, self.site_name),
            )
            .await;
        }
        mail::deliver(
            self.mailer,
            &config.email,
            &mail::calendar_reminder_for_admin(&booking, &van_name, listing_url.as_deref()),
        )
        .await;

        Ok(booking)
    }

    /// `confirmed -> pending`; takes the total back out of confirmed revenue.
    pub async fn undo_booking(&self, id: &str) -> AppResult<Booking> {
        let mut messages = self.stores.messages().load().await;
        let booking = find_booking_mut(&mut messages, id)
            .ok_or_else(|| AppError::not_found("Booking not found"))?;
        booking.undo()?;
        let booking = booking.clone();
        self.stores.messages().save(&messages).await?;

        let mut stats = self.stores.stats().load().await;
        stats.remove_revenue(booking.total);
        self.stores.stats().save(&stats).await?;
        tracing::info!(id = %booking.ts, total = booking.total, "Booking moved back to pending");

        Ok(booking)
    }

    /// Store a contact form message and notify the admin. Returns whether the
    /// notification went out.
    pub async fn submit_contact(&self, req: ContactRequest) -> AppResult<bool> {
        let name = trimmed(req.name);
        let email = trimmed(req.email);
        let message = trimmed(req.message);
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err(AppError::validation("Missing fields"));
        }

        self.stores
            .messages()
            .append(Message::Contact(ContactMessage {
                name: name.clone(),
                email: email.clone(),
                message: message.clone(),
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            }))
            .await?;

        let config = self.stores.config().load().await;
        Ok(mail::deliver(
            self.mailer,
            &config.email,
            &mail::contact_notification(&name, &email, &message),
        )
        .await)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

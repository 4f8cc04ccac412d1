//! Outbound notification email.
//!
//! Delivery failures are never fatal to the request that triggered them:
//! callers go through [`deliver`], which logs and returns a flag.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::store::{Booking, EmailSettings};

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("missing smtp config (host={host:?}, port={port:?}, to={to:?}, from={from:?})")]
    NotConfigured {
        host: Option<String>,
        port: Option<u16>,
        to: Option<String>,
        from: Option<String>,
    },
    #[error("invalid address {0:?}")]
    Address(String),
    #[error("cannot build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A plain-text email. `to: None` means the admin inbox (`toEmail`).
#[derive(Debug, Clone)]
pub struct Email {
    pub subject: String,
    pub body: String,
    pub to: Option<String>,
    pub reply_to: Option<String>,
}

impl Email {
    pub fn to_admin(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            to: None,
            reply_to: None,
        }
    }

    pub fn to(address: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            to: Some(address.into()),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, address: &str) -> Self {
        if !address.is_empty() {
            self.reply_to = Some(address.to_string());
        }
        self
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, settings: &EmailSettings, email: &Email) -> Result<(), MailError>;
}

/// Send `email`, logging any failure. Returns whether it went out.
pub async fn deliver(mailer: &dyn Mailer, settings: &EmailSettings, email: &Email) -> bool {
    match mailer.send(settings, email).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(subject = %email.subject, "Email not sent: {}", e);
            false
        }
    }
}

/// STARTTLS SMTP delivery using the settings stored in the config document.
pub struct SmtpMailer;

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::Address(address.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, settings: &EmailSettings, email: &Email) -> Result<(), MailError> {
        let host = non_empty(&settings.smtp_host);
        let port = settings.smtp_port.filter(|p| *p != 0);
        let to = email
            .to
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| non_empty(&settings.to_email));
        let from = non_empty(&settings.from_email).or_else(|| non_empty(&settings.smtp_user));

        let (Some(host), Some(port), Some(to), Some(from)) = (host, port, to, from) else {
            return Err(MailError::NotConfigured {
                host: host.map(String::from),
                port,
                to: to.map(String::from),
                from: from.map(String::from),
            });
        };

        let mut builder = Message::builder()
            .from(mailbox(from)?)
            .to(mailbox(to)?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(mailbox(reply_to)?);
        }
        let message = builder.body(email.body.clone())?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(port)
            .timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (non_empty(&settings.smtp_user), non_empty(&settings.smtp_pass)) {
            transport = transport.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        tracing::info!("Sending email to {} via {}:{}", to, host, port);
        transport.build().send(message).await?;
        Ok(())
    }
}

// ── Templates ─────────────────────────────────────────────────────────────────

fn or_not_provided(s: &str) -> &str {
    if s.is_empty() { "Not provided" } else { s }
}

fn money(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let (whole, frac) = (cents.abs() / 100, cents.abs() % 100);
    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac:02}")
}

pub fn contact_notification(name: &str, email: &str, message: &str) -> Email {
    Email::to_admin(
        "New contact form submission",
        format!("Contact form\nName: {name}\nEmail: {email}\nMessage:\n{message}"),
    )
    .reply_to(email)
}

pub fn booking_request_for_admin(booking: &Booking, van_name: &str) -> Email {
    let who = if booking.name.is_empty() { "Unknown" } else { booking.name.as_str() };
    let body = format!(
        "New booking request\n\n\
         Van: {van_name} ({slug})\n\
         Dates: {start} to {end}\n\
         Nights: {nights}\n\
         Total: {total}\n\n\
         Customer\n\
         Name: {name}\n\
         Email: {email}\n\
         Phone: {phone}\n\n\
         Notes:\n{notes}\n\n\
         Contact the customer to confirm availability and complete the booking.",
        slug = booking.slug,
        start = booking.start,
        end = booking.end,
        nights = booking.nights,
        total = money(booking.total),
        name = or_not_provided(&booking.name),
        email = or_not_provided(&booking.email),
        phone = or_not_provided(&booking.phone),
        notes = if booking.notes.is_empty() { "None" } else { booking.notes.as_str() },
    );
    Email::to_admin(format!("Booking Request: {van_name} - {who}"), body).reply_to(&booking.email)
}

pub fn booking_request_for_customer(booking: &Booking, van_name: &str, site_name: &str) -> Email {
    let body = format!(
        "Thank you for your booking request.\n\n\
         Van: {van_name}\n\
         Check-in: {start}\n\
         Check-out: {end}\n\
         Nights: {nights}\n\
         Total: {total}\n\n\
         Name: {name}\n\
         Phone: {phone}\n\
         Notes: {notes}\n\n\
         We will review your request and get back to you shortly to confirm availability.\n\n\
         {site_name}",
        start = booking.start,
        end = booking.end,
        nights = booking.nights,
        total = money(booking.total),
        name = or_not_provided(&booking.name),
        phone = or_not_provided(&booking.phone),
        notes = if booking.notes.is_empty() { "None" } else { booking.notes.as_str() },
    );
    Email::to(
        booking.email.clone(),
        format!("Your Booking Request - {site_name}"),
        body,
    )
}

pub fn booking_confirmed_for_customer(booking: &Booking, van_name: &str, site_name: &str) -> Email {
    let body = format!(
        "Your booking is confirmed.\n\n\
         Van: {van_name}\n\
         Check-in: {start}\n\
         Check-out: {end}\n\
         Nights: {nights}\n\
         Total: {total}\n\n\
         Name: {name}\n\
         Email: {email}\n\
         Phone: {phone}\n\n\
         If you need to change anything, reply to this email.\n\n\
         {site_name}",
        start = booking.start,
        end = booking.end,
        nights = booking.nights,
        total = money(booking.total),
        name = or_not_provided(&booking.name),
        email = booking.email,
        phone = or_not_provided(&booking.phone),
    );
    Email::to(
        booking.email.clone(),
        format!("Your Booking is Confirmed! - {site_name}"),
        body,
    )
}

pub fn calendar_reminder_for_admin(booking: &Booking, van_name: &str, listing_url: Option<&str>) -> Email {
    let listing = match listing_url {
        Some(url) => format!("Listing: {url}"),
        None => "Update the matching listing calendar.".to_string(),
    };
    let body = format!(
        "A booking was confirmed. Block these dates on the external calendar to avoid a double booking.\n\n\
         Van: {van_name}\n\
         Check-in: {start}\n\
         Check-out: {end}\n\
         Customer: {name}\n\n\
         {listing}",
        start = booking.start,
        end = booking.end,
        name = or_not_provided(&booking.name),
    );
    Email::to_admin(
        format!("ACTION NEEDED: Update calendar - {van_name} {}", booking.start),
        body,
    )
}

/// Title-cased slug, used when a booking's van no longer exists.
pub fn slug_title(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every email instead of sending it.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<Email>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn subjects(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.subject.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, _settings: &EmailSettings, email: &Email) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Address("test".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}

//! Hosted payment sessions on a Stripe-compatible API.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    store::{StripeSettings, lenient_f64},
};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Clone)]
pub struct Checkout {
    http: reqwest::Client,
    api_base: String,
}

/// Amount in the currency's minor unit.
fn minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

impl Checkout {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    /// Create a one-item payment session and return its hosted URL.
    /// `return_base` is used for the default success/cancel URLs.
    pub async fn create_session(
        &self,
        settings: &StripeSettings,
        req: CheckoutRequest,
        return_base: &str,
    ) -> AppResult<String> {
        let configured = |k: &Option<String>| k.as_deref().is_some_and(|s| !s.trim().is_empty());
        let secret = match &settings.secret_key {
            Some(secret) if configured(&settings.secret_key) && configured(&settings.public_key) => {
                secret.trim()
            }
            _ => return Err(AppError::External("Stripe not configured".into())),
        };

        let cents = minor_units(req.amount);
        if cents <= 0 {
            return Err(AppError::validation("Invalid amount"));
        }

        let default_return = format!("{}/vans", return_base.trim_end_matches('/'));
        let form = vec![
            ("mode", "payment".to_string()),
            (
                "line_items[0][price_data][currency]",
                settings.currency.clone().unwrap_or_else(|| "usd".into()),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                req.name.unwrap_or_else(|| "Rental".into()),
            ),
            ("line_items[0][price_data][unit_amount]", cents.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "success_url",
                req.success_url.unwrap_or_else(|| default_return.clone()),
            ),
            ("cancel_url", req.cancel_url.unwrap_or(default_return)),
        ];

        let url = format!("{}/v1/checkout/sessions", self.api_base.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .basic_auth(secret, None::<&str>)
            .form(&form)
            .timeout(CHECKOUT_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::External(e.to_string()))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::External(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("payment provider returned {status}"));
            return Err(AppError::External(message));
        }

        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::External("payment session has no url".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> StripeSettings {
        StripeSettings {
            public_key: Some("pk_test_1".into()),
            secret_key: Some("sk_test_1".into()),
            currency: None,
        }
    }

    #[test]
    fn amounts_round_to_cents() {
        assert_eq!(minor_units(19.99), 1999);
        assert_eq!(minor_units(0.004), 0);
    }

    #[tokio::test]
    async fn missing_keys_are_a_provider_error() {
        let checkout = Checkout::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let req = CheckoutRequest {
            amount: 10.0,
            ..Default::default()
        };
        let err = checkout
            .create_session(&StripeSettings::default(), req, "http://localhost:3000")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::External(ref m) if m == "Stripe not configured"));
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let checkout = Checkout::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let err = checkout
            .create_session(&keys(), CheckoutRequest::default(), "http://localhost:3000")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_external_error() {
        let checkout = Checkout::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let req = CheckoutRequest {
            amount: 99.0,
            ..Default::default()
        };
        let err = checkout
            .create_session(&keys(), req, "http://localhost:3000")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::External(_)));
    }
}

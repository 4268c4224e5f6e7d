mod mercadopago;
mod stripe;

pub use mercadopago::*;
pub use stripe::*;

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, Result};

/// Timeout for every outbound gateway call.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(GATEWAY_TIMEOUT)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    MercadoPago,
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MercadoPago => "mercadopago",
            Self::Stripe => "stripe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mercadopago" | "mp" => Some(Self::MercadoPago),
            "stripe" => Some(Self::Stripe),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line on a gateway checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutLine {
    pub title: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Gateway-agnostic checkout request for an order or a first subscription period.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    /// External reference echoed back on webhooks
    pub reference: &'a str,
    pub lines: Vec<CheckoutLine>,
    pub currency: &'a str,
    pub customer_email: &'a str,
    pub success_url: String,
    pub cancel_url: String,
    pub notification_url: String,
    /// Ask the gateway to keep the card for later off-session charges
    pub save_payment_method: bool,
}

/// Where to send the buyer to pay.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutLink {
    pub provider: PaymentProvider,
    /// Gateway-side id (preference, session, or preapproval)
    pub gateway_id: String,
    pub url: String,
}

pub(crate) fn cents_to_decimal(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub(crate) fn decimal_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Gateways disagree on whether ids are JSON numbers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

pub(crate) fn opt_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

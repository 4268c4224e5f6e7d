use std::collections::HashMap;

use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{CheckoutLink, CheckoutRequest, PaymentProvider, http_client};
use crate::config::StripeSettings;
use crate::error::{AppError, Result, msg};
use crate::models::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: Option<String>,
    api_base: String,
}

/// Result of an off-session charge attempt.
#[derive(Debug, Clone)]
pub enum OffSessionCharge {
    Succeeded(StripePaymentIntent),
    /// The card was declined or needs the customer present
    Declined {
        payment_intent_id: Option<String>,
        reason: String,
    },
}

impl StripeClient {
    pub fn new(settings: &StripeSettings) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            secret_key: settings.secret_key.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Stripe {} failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Stripe {} returned {}: {}",
                what, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Stripe {} response: {}", what, e)))
    }

    /// Create a Checkout Session with ad-hoc `price_data` lines.
    ///
    /// The reference goes into session metadata and PaymentIntent metadata so
    /// both `checkout.session.*` and `payment_intent.*` events can be matched.
    pub async fn create_checkout_session(&self, req: &CheckoutRequest<'_>) -> Result<CheckoutLink> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), req.success_url.clone()),
            ("cancel_url".into(), req.cancel_url.clone()),
            ("client_reference_id".into(), req.reference.to_string()),
            ("customer_email".into(), req.customer_email.to_string()),
            (
                "metadata[external_reference]".into(),
                req.reference.to_string(),
            ),
            (
                "payment_intent_data[metadata][external_reference]".into(),
                req.reference.to_string(),
            ),
        ];

        for (i, line) in req.lines.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                req.currency.to_lowercase(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                line.title.clone(),
            ));
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                line.unit_price_cents.to_string(),
            ));
            form.push((
                format!("line_items[{}][quantity]", i),
                line.quantity.to_string(),
            ));
        }

        if req.save_payment_method {
            form.push((
                "payment_intent_data[setup_future_usage]".into(),
                "off_session".into(),
            ));
            form.push(("customer_creation".into(), "always".into()));
        }

        let session: CreateCheckoutSessionResponse = self
            .send(
                self.client
                    .post(format!("{}/v1/checkout/sessions", self.api_base))
                    .form(&form),
                "checkout session",
            )
            .await?;

        Ok(CheckoutLink {
            provider: PaymentProvider::Stripe,
            gateway_id: session.id,
            url: session.url,
        })
    }

    pub async fn get_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        self.send(
            self.client
                .get(format!("{}/v1/payment_intents/{}", self.api_base, id)),
            "payment intent lookup",
        )
        .await
    }

    /// Charge a saved card without the customer present.
    ///
    /// `idempotency_key` makes retries of the same billing period safe.
    pub async fn charge_off_session(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        amount_cents: i64,
        currency: &str,
        reference: &str,
        idempotency_key: &str,
    ) -> Result<OffSessionCharge> {
        let amount = amount_cents.to_string();
        let currency = currency.to_lowercase();
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", idempotency_key)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", currency.as_str()),
                ("customer", customer_id),
                ("payment_method", payment_method_id),
                ("off_session", "true"),
                ("confirm", "true"),
                ("metadata[external_reference]", reference),
            ])
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Stripe charge failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let intent: StripePaymentIntent = response.json().await.map_err(|e| {
                AppError::Gateway(format!("Failed to parse Stripe charge response: {}", e))
            })?;
            if intent.status == "succeeded" {
                return Ok(OffSessionCharge::Succeeded(intent));
            }
            return Ok(OffSessionCharge::Declined {
                reason: format!("payment intent status {}", intent.status),
                payment_intent_id: Some(intent.id),
            });
        }

        // 402 = card error; the body says why and names the failed intent
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let body: StripeErrorBody = response.json().await.map_err(|e| {
                AppError::Gateway(format!("Failed to parse Stripe error response: {}", e))
            })?;
            return Ok(OffSessionCharge::Declined {
                payment_intent_id: body.error.payment_intent.map(|pi| pi.id),
                reason: body
                    .error
                    .decline_code
                    .or(body.error.code)
                    .or(body.error.message)
                    .unwrap_or_else(|| "card_declined".into()),
            });
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(AppError::Gateway(format!(
            "Stripe charge returned {}: {}",
            status, error_text
        )))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        verify_stripe_signature(secret, payload, signature, chrono::Utc::now().timestamp())
    }
}

/// Check a `stripe-signature: t=..,v1=..` header against `now`.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &[u8],
    signature: &str,
    now: i64,
) -> Result<bool> {
    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    let sig_v1 = sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let age = now - timestamp;
    if age > StripeClient::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            StripeClient::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    // Clock skew tolerance: 60 seconds
    if age < -60 {
        tracing::warn!(
            "Stripe webhook rejected: timestamp in the future (age={}s)",
            age
        );
        return Ok(false);
    }

    let expected = stripe_signature_hex(secret, timestamp_str, payload)?;

    // Length is not secret (always 64 hex chars for SHA-256)
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

fn stripe_signature_hex(secret: &str, timestamp: &str, payload: &[u8]) -> Result<String> {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(signed_payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `stripe-signature` header. Used by tests and local tooling.
pub fn sign_stripe(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let sig = stripe_signature_hex(secret, &timestamp.to_string(), payload)?;
    Ok(format!("t={},v1={}", timestamp, sig))
}

pub fn map_payment_intent_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "succeeded" => Some(PaymentStatus::Approved),
        "processing" => Some(PaymentStatus::InProcess),
        "requires_payment_method" => Some(PaymentStatus::Rejected),
        "canceled" => Some(PaymentStatus::Cancelled),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeApiError,
}

#[derive(Debug, Deserialize)]
struct StripeApiError {
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
    payment_intent: Option<StripePaymentIntent>,
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: Option<String>, // "paid", "unpaid", "no_payment_required"
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeCheckoutSession {
    pub fn external_reference(&self) -> Option<&str> {
        self.metadata
            .get("external_reference")
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
    }
}

// ============ payment_intent.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_payment_error: Option<serde_json::Value>,
}

impl StripePaymentIntent {
    pub fn external_reference(&self) -> Option<&str> {
        self.metadata.get("external_reference").map(String::as_str)
    }
}

// ============ charge.refunded ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ============ charge.dispute.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeDispute {
    pub id: String,
    pub charge: Option<String>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: i64,
    pub status: Option<String>,
}

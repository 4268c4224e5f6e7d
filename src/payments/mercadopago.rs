use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{
    CheckoutLink, CheckoutRequest, PaymentProvider, cents_to_decimal, http_client,
    opt_string_or_number, string_or_number,
};
use crate::config::MercadoPagoSettings;
use crate::error::{AppError, Result, msg};
use crate::models::{Frequency, PaymentStatus, SubscriptionStatus};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    client: Client,
    access_token: String,
    webhook_secret: Option<String>,
    api_base: String,
}

/// A recurring plan to register with MercadoPago.
#[derive(Debug, Clone)]
pub struct PreapprovalRequest<'a> {
    pub reference: &'a str,
    pub reason: String,
    pub payer_email: &'a str,
    pub frequency: Frequency,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub back_url: String,
    pub notification_url: String,
}

impl MercadoPagoClient {
    pub fn new(settings: &MercadoPagoSettings) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            access_token: settings.access_token.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("MercadoPago {} failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "MercadoPago {} returned {}: {}",
                what, status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::Gateway(format!("Failed to parse MercadoPago {} response: {}", what, e))
        })
    }

    /// Create a checkout preference. In test mode the buyer is sent to the sandbox.
    pub async fn create_preference(
        &self,
        req: &CheckoutRequest<'_>,
        test_mode: bool,
    ) -> Result<CheckoutLink> {
        let currency_id = req.currency.to_uppercase();
        let items: Vec<_> = req
            .lines
            .iter()
            .map(|line| {
                json!({
                    "title": line.title,
                    "quantity": line.quantity,
                    "unit_price": cents_to_decimal(line.unit_price_cents),
                    "currency_id": currency_id,
                })
            })
            .collect();

        let body = json!({
            "items": items,
            "external_reference": req.reference,
            "payer": { "email": req.customer_email },
            "notification_url": req.notification_url,
            "back_urls": {
                "success": req.success_url,
                "pending": req.success_url,
                "failure": req.cancel_url,
            },
            "auto_return": "approved",
        });

        let pref: PreferenceResponse = self
            .send(
                self.client
                    .post(format!("{}/checkout/preferences", self.api_base))
                    .json(&body),
                "preference",
            )
            .await?;

        let url = if test_mode {
            pref.sandbox_init_point.or(pref.init_point)
        } else {
            pref.init_point
        }
        .ok_or_else(|| AppError::Gateway("MercadoPago preference has no init_point".into()))?;

        Ok(CheckoutLink {
            provider: PaymentProvider::MercadoPago,
            gateway_id: pref.id,
            url,
        })
    }

    /// Register a preapproval; MercadoPago charges it on schedule from then on.
    pub async fn create_preapproval(&self, req: &PreapprovalRequest<'_>) -> Result<CheckoutLink> {
        let (frequency, frequency_type) = req.frequency.mercadopago_interval();
        let body = json!({
            "reason": req.reason,
            "external_reference": req.reference,
            "payer_email": req.payer_email,
            "back_url": req.back_url,
            "notification_url": req.notification_url,
            "status": "pending",
            "auto_recurring": {
                "frequency": frequency,
                "frequency_type": frequency_type,
                "transaction_amount": cents_to_decimal(req.amount_cents),
                "currency_id": req.currency.to_uppercase(),
            },
        });

        let preapproval: MpPreapproval = self
            .send(
                self.client
                    .post(format!("{}/preapproval", self.api_base))
                    .json(&body),
                "preapproval",
            )
            .await?;

        let url = preapproval
            .init_point
            .ok_or_else(|| AppError::Gateway("MercadoPago preapproval has no init_point".into()))?;

        Ok(CheckoutLink {
            provider: PaymentProvider::MercadoPago,
            gateway_id: preapproval.id,
            url,
        })
    }

    pub async fn get_payment(&self, id: &str) -> Result<MpPayment> {
        self.send(
            self.client.get(format!("{}/v1/payments/{}", self.api_base, id)),
            "payment lookup",
        )
        .await
    }

    pub async fn get_preapproval(&self, id: &str) -> Result<MpPreapproval> {
        self.send(
            self.client.get(format!("{}/preapproval/{}", self.api_base, id)),
            "preapproval lookup",
        )
        .await
    }

    /// Pause, resume (`authorized`) or cancel a preapproval on the gateway side.
    pub async fn update_preapproval_status(&self, id: &str, status: &str) -> Result<MpPreapproval> {
        self.send(
            self.client
                .put(format!("{}/preapproval/{}", self.api_base, id))
                .json(&json!({ "status": status })),
            "preapproval update",
        )
        .await
    }

    pub async fn get_authorized_payment(&self, id: &str) -> Result<MpAuthorizedPayment> {
        self.send(
            self.client
                .get(format!("{}/authorized_payments/{}", self.api_base, id)),
            "authorized payment lookup",
        )
        .await
    }
}

/// Verify a MercadoPago `x-signature` header.
///
/// The header looks like `ts=1704908010,v1=618c85...`. The signed manifest is
/// `id:{data.id};request-id:{x-request-id};ts:{ts};`, where alphanumeric
/// data ids are lowercased and absent parts are left out.
pub fn verify_mercadopago_signature(
    secret: &str,
    signature: &str,
    request_id: Option<&str>,
    data_id: Option<&str>,
) -> Result<bool> {
    let mut ts = None;
    let mut v1 = None;
    for part in signature.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }

    let ts = ts.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    let v1 = v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    if ts.parse::<i64>().is_err() {
        return Err(AppError::BadRequest(
            msg::INVALID_TIMESTAMP_IN_SIGNATURE.into(),
        ));
    }

    let manifest = signature_manifest(ts, request_id, data_id);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(manifest.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let provided = v1.to_ascii_lowercase();
    if expected.len() != provided.len() {
        return Ok(false);
    }
    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}

fn signature_manifest(ts: &str, request_id: Option<&str>, data_id: Option<&str>) -> String {
    let mut manifest = String::new();
    if let Some(id) = data_id.filter(|s| !s.is_empty()) {
        let id = if id.chars().all(|c| c.is_ascii_alphanumeric()) {
            id.to_ascii_lowercase()
        } else {
            id.to_string()
        };
        manifest.push_str(&format!("id:{};", id));
    }
    if let Some(request_id) = request_id.filter(|s| !s.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

/// Sign a manifest the way MercadoPago does. Used by tests and local tooling.
pub fn sign_mercadopago(secret: &str, ts: i64, request_id: &str, data_id: &str) -> Result<String> {
    let manifest = signature_manifest(&ts.to_string(), Some(request_id), Some(data_id));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(manifest.as_bytes());
    Ok(format!(
        "ts={},v1={}",
        ts,
        hex::encode(mac.finalize().into_bytes())
    ))
}

pub fn map_payment_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "pending" => Some(PaymentStatus::Pending),
        "in_process" | "authorized" | "in_mediation" => Some(PaymentStatus::InProcess),
        "approved" => Some(PaymentStatus::Approved),
        "rejected" => Some(PaymentStatus::Rejected),
        "cancelled" => Some(PaymentStatus::Cancelled),
        "refunded" => Some(PaymentStatus::Refunded),
        "charged_back" => Some(PaymentStatus::ChargedBack),
        _ => None,
    }
}

pub fn map_preapproval_status(status: &str) -> Option<SubscriptionStatus> {
    match status {
        "pending" => Some(SubscriptionStatus::Pending),
        "authorized" => Some(SubscriptionStatus::Active),
        "paused" => Some(SubscriptionStatus::Paused),
        "cancelled" => Some(SubscriptionStatus::Cancelled),
        _ => None,
    }
}

/// The preapproval status that asks MercadoPago for a local status change.
pub fn preapproval_status_for(status: SubscriptionStatus) -> Option<&'static str> {
    match status {
        SubscriptionStatus::Active => Some("authorized"),
        SubscriptionStatus::Paused => Some("paused"),
        SubscriptionStatus::Cancelled => Some("cancelled"),
        SubscriptionStatus::Pending | SubscriptionStatus::PastDue => None,
    }
}

// ============ Webhook envelope ============

/// Body of a MercadoPago webhook notification.
#[derive(Debug, Deserialize)]
pub struct MpNotification {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Older notifications carry `topic` instead of `type`
    pub topic: Option<String>,
    pub action: Option<String>,
    pub data: Option<MpNotificationData>,
}

#[derive(Debug, Deserialize)]
pub struct MpNotificationData {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
}

impl MpNotification {
    pub fn kind(&self) -> Option<&str> {
        self.event_type.as_deref().or(self.topic.as_deref())
    }

    pub fn data_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.id.as_deref())
    }
}

// ============ REST resources ============

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: Option<String>,
    sandbox_init_point: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpPayment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub transaction_amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpPreapproval {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
    /// ISO-8601 with offset, e.g. `2025-04-01T10:00:00.000-03:00`
    pub next_payment_date: Option<String>,
    pub init_point: Option<String>,
}

impl MpPreapproval {
    pub fn next_payment_timestamp(&self) -> Option<i64> {
        self.next_payment_date
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
    }
}

/// A charge MercadoPago made against a preapproval.
#[derive(Debug, Clone, Deserialize)]
pub struct MpAuthorizedPayment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub preapproval_id: String,
    pub status: String,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub transaction_amount: f64,
    pub payment: Option<MpAuthorizedPaymentDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpAuthorizedPaymentDetail {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
}

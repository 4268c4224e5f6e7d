use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::AppState;
use crate::error::Result;
use crate::id::ExternalReference;
use crate::payments::{
    MercadoPagoClient, MpNotification, PaymentProvider, decimal_to_cents, map_payment_status,
    map_preapproval_status, verify_mercadopago_signature,
};
use crate::util::header_str;

use super::common::{
    PaymentUpdate, SubscriptionUpdate, WebhookEvent, WebhookNotice, WebhookProvider,
    WebhookResult, handle_webhook,
};

/// MercadoPago webhook provider implementation.
pub struct MercadoPagoWebhookProvider {
    client: Arc<MercadoPagoClient>,
    /// Unsigned deliveries are accepted in dev mode when no secret is configured
    dev_mode: bool,
}

impl MercadoPagoWebhookProvider {
    pub fn new(client: Arc<MercadoPagoClient>, dev_mode: bool) -> Self {
        Self { client, dev_mode }
    }
}

fn parse_reference(raw: Option<&str>) -> Option<ExternalReference> {
    raw.and_then(ExternalReference::parse)
}

impl WebhookProvider for MercadoPagoWebhookProvider {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::MercadoPago
    }

    fn extract_signature(&self, headers: &HeaderMap) -> std::result::Result<Option<String>, WebhookResult> {
        match header_str(headers, "x-signature") {
            Some(sig) => Ok(Some(sig.to_string())),
            None if self.client.webhook_secret().is_some() => {
                Err((StatusCode::BAD_REQUEST, "Missing x-signature header"))
            }
            None => Ok(None),
        }
    }

    fn verify_signature(
        &self,
        headers: &HeaderMap,
        _body: &Bytes,
        signature: Option<&str>,
        notice: &WebhookNotice,
    ) -> std::result::Result<(), WebhookResult> {
        let Some(secret) = self.client.webhook_secret() else {
            if self.dev_mode {
                tracing::warn!("MERCADOPAGO_WEBHOOK_SECRET not set; accepting unsigned webhook (dev mode)");
                return Ok(());
            }
            tracing::error!("MERCADOPAGO_WEBHOOK_SECRET not set; rejecting webhook");
            return Err((StatusCode::UNAUTHORIZED, "Webhook secret not configured"));
        };
        let signature = signature.ok_or((StatusCode::BAD_REQUEST, "Missing x-signature header"))?;

        match verify_mercadopago_signature(
            secret,
            signature,
            header_str(headers, "x-request-id"),
            notice.resource_id.as_deref(),
        ) {
            Ok(true) => Ok(()),
            Ok(false) => Err((StatusCode::UNAUTHORIZED, "Invalid signature")),
            Err(e) => {
                tracing::debug!("Malformed MercadoPago signature: {}", e);
                Err((StatusCode::BAD_REQUEST, "Invalid signature header"))
            }
        }
    }

    fn parse_notice(&self, body: &Bytes) -> std::result::Result<WebhookNotice, WebhookResult> {
        let notification: MpNotification = serde_json::from_slice(body).map_err(|e| {
            tracing::warn!("Failed to parse MercadoPago webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        let event_type = notification.kind().unwrap_or("unknown").to_string();
        let resource_id = notification.data_id().map(str::to_string);
        // Envelope ids are absent on some legacy notifications; the resource and
        // action still identify the delivery
        let event_id = notification.id.clone().unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                event_type,
                resource_id.as_deref().unwrap_or_default(),
                notification.action.as_deref().unwrap_or_default()
            )
        });

        Ok(WebhookNotice {
            event_id,
            event_type,
            resource_id,
        })
    }

    async fn resolve(&self, notice: &WebhookNotice, _body: &Bytes) -> Result<WebhookEvent> {
        let Some(resource_id) = notice.resource_id.as_deref() else {
            return Ok(WebhookEvent::Ignored("Notification has no resource id"));
        };

        match notice.event_type.as_str() {
            "payment" => {
                let payment = self.client.get_payment(resource_id).await?;
                let Some(status) = map_payment_status(&payment.status) else {
                    tracing::warn!(payment = %payment.id, status = %payment.status, "Unknown MercadoPago payment status");
                    return Ok(WebhookEvent::Ignored("Unknown payment status"));
                };
                Ok(WebhookEvent::Payment(PaymentUpdate {
                    reference: parse_reference(payment.external_reference.as_deref()),
                    gateway_subscription_id: None,
                    payment_id: payment.id,
                    status,
                    amount_cents: decimal_to_cents(payment.transaction_amount),
                    customer_id: None,
                    payment_method_id: None,
                    detail: payment.status_detail,
                }))
            }
            "preapproval" | "subscription_preapproval" => {
                let preapproval = self.client.get_preapproval(resource_id).await?;
                let status = map_preapproval_status(&preapproval.status);
                if status.is_none() {
                    tracing::warn!(preapproval = %preapproval.id, status = %preapproval.status, "Unknown preapproval status");
                }
                Ok(WebhookEvent::Subscription(SubscriptionUpdate {
                    reference: parse_reference(preapproval.external_reference.as_deref()),
                    next_billing_at: preapproval.next_payment_timestamp(),
                    gateway_subscription_id: Some(preapproval.id),
                    status,
                }))
            }
            "subscription_authorized_payment" | "authorized_payment" => {
                let authorized = self.client.get_authorized_payment(resource_id).await?;
                let Some(payment) = authorized.payment else {
                    return Ok(WebhookEvent::Ignored("Authorized payment not charged yet"));
                };
                let Some(status) = map_payment_status(&payment.status) else {
                    return Ok(WebhookEvent::Ignored("Unknown payment status"));
                };
                // Keyed by the underlying payment id, so the plain `payment`
                // notification for the same charge dedupes against this one
                Ok(WebhookEvent::Payment(PaymentUpdate {
                    reference: parse_reference(authorized.external_reference.as_deref()),
                    gateway_subscription_id: Some(authorized.preapproval_id),
                    payment_id: payment.id,
                    status,
                    amount_cents: decimal_to_cents(authorized.transaction_amount),
                    customer_id: None,
                    payment_method_id: None,
                    detail: payment.status_detail,
                }))
            }
            _ => Ok(WebhookEvent::Ignored("Unhandled event type")),
        }
    }
}

pub async fn handle_mercadopago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(client) = state.mercadopago.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "MercadoPago is not configured");
    };
    let provider = MercadoPagoWebhookProvider::new(client, state.dev_mode);
    handle_webhook(&provider, &state, headers, body).await
}


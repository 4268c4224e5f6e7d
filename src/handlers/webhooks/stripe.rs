use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::de::DeserializeOwned;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::id::ExternalReference;
use crate::models::PaymentStatus;
use crate::payments::{
    PaymentProvider, StripeCharge, StripeCheckoutSession, StripeClient, StripeDispute,
    StripePaymentIntent, StripeWebhookEvent, map_payment_intent_status,
};

use super::common::{
    PaymentUpdate, WebhookEvent, WebhookNotice, WebhookProvider, WebhookResult, handle_webhook,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider {
    client: Arc<StripeClient>,
}

impl StripeWebhookProvider {
    pub fn new(client: Arc<StripeClient>) -> Self {
        Self { client }
    }

    /// The PaymentIntent behind a refund or dispute, fetched for its reference.
    async fn intent_update(
        &self,
        payment_intent: Option<&str>,
        status: PaymentStatus,
        amount_cents: i64,
    ) -> Result<WebhookEvent> {
        let Some(intent_id) = payment_intent else {
            return Ok(WebhookEvent::Ignored("No payment intent on event"));
        };
        let intent = self.client.get_payment_intent(intent_id).await?;
        Ok(WebhookEvent::Payment(PaymentUpdate {
            reference: intent.external_reference().and_then(ExternalReference::parse),
            gateway_subscription_id: None,
            payment_id: intent.id,
            status,
            amount_cents,
            customer_id: None,
            payment_method_id: None,
            detail: None,
        }))
    }

    async fn checkout_update(
        &self,
        session: StripeCheckoutSession,
        status: PaymentStatus,
    ) -> Result<WebhookEvent> {
        let reference = session.external_reference().and_then(ExternalReference::parse);

        // First subscription period: the saved card lives on the PaymentIntent
        let (customer_id, payment_method_id) = match (&reference, session.payment_intent.as_deref())
        {
            (Some(ExternalReference::Subscription(_)), Some(intent_id))
                if status == PaymentStatus::Approved =>
            {
                let intent = self.client.get_payment_intent(intent_id).await?;
                (
                    intent.customer.or(session.customer.clone()),
                    intent.payment_method,
                )
            }
            _ => (session.customer.clone(), None),
        };

        Ok(WebhookEvent::Payment(PaymentUpdate {
            reference,
            gateway_subscription_id: None,
            payment_id: session.payment_intent.unwrap_or(session.id),
            status,
            amount_cents: session.amount_total.unwrap_or_default(),
            customer_id,
            payment_method_id,
            detail: None,
        }))
    }
}

fn parse_object<T: DeserializeOwned>(event: &StripeWebhookEvent) -> Result<T> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        AppError::BadRequest(format!(
            "Invalid {} object: {}",
            event.event_type, e
        ))
    })
}

fn intent_update(intent: StripePaymentIntent, status: PaymentStatus) -> WebhookEvent {
    let detail = intent
        .last_payment_error
        .as_ref()
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    WebhookEvent::Payment(PaymentUpdate {
        reference: intent.external_reference().and_then(ExternalReference::parse),
        gateway_subscription_id: None,
        payment_id: intent.id,
        status,
        amount_cents: intent.amount,
        customer_id: intent.customer,
        payment_method_id: intent.payment_method,
        detail,
    })
}

impl WebhookProvider for StripeWebhookProvider {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn extract_signature(&self, headers: &HeaderMap) -> std::result::Result<Option<String>, WebhookResult> {
        let value = headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?;
        value.to_str().map(|s| Some(s.to_string())).map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid signature header")
        })
    }

    fn verify_signature(
        &self,
        _headers: &HeaderMap,
        body: &Bytes,
        signature: Option<&str>,
        _notice: &WebhookNotice,
    ) -> std::result::Result<(), WebhookResult> {
        if self.client.webhook_secret().is_none() {
            tracing::error!("STRIPE_WEBHOOK_SECRET not set; rejecting webhook");
            return Err((StatusCode::UNAUTHORIZED, "Webhook secret not configured"));
        }
        let signature =
            signature.ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?;

        match self.client.verify_webhook_signature(body, signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err((StatusCode::UNAUTHORIZED, "Invalid signature")),
            Err(e) => {
                tracing::debug!("Malformed Stripe signature: {}", e);
                Err((StatusCode::BAD_REQUEST, "Invalid signature header"))
            }
        }
    }

    fn parse_notice(&self, body: &Bytes) -> std::result::Result<WebhookNotice, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::warn!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        Ok(WebhookNotice {
            resource_id: event
                .data
                .object
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            event_id: event.id,
            event_type: event.event_type,
        })
    }

    async fn resolve(&self, _notice: &WebhookNotice, body: &Bytes) -> Result<WebhookEvent> {
        let event: StripeWebhookEvent = serde_json::from_slice(body)?;

        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session: StripeCheckoutSession = parse_object(&event)?;
                // Delayed payment methods complete unpaid and succeed later
                if session.payment_status.as_deref() != Some("paid") {
                    return Ok(WebhookEvent::Ignored("Checkout not paid yet"));
                }
                self.checkout_update(session, PaymentStatus::Approved).await
            }
            "checkout.session.async_payment_failed" => {
                let session: StripeCheckoutSession = parse_object(&event)?;
                self.checkout_update(session, PaymentStatus::Rejected).await
            }
            "payment_intent.succeeded"
            | "payment_intent.payment_failed"
            | "payment_intent.canceled"
            | "payment_intent.processing" => {
                let intent: StripePaymentIntent = parse_object(&event)?;
                let Some(status) = map_payment_intent_status(&intent.status) else {
                    return Ok(WebhookEvent::Ignored("Unhandled payment intent status"));
                };
                Ok(intent_update(intent, status))
            }
            "charge.refunded" => {
                let charge: StripeCharge = parse_object(&event)?;
                if !charge.refunded {
                    tracing::info!(charge = %charge.id, amount = charge.amount_refunded, "Partial refund, order left as is");
                    return Ok(WebhookEvent::Ignored("Partial refund"));
                }
                self.intent_update(
                    charge.payment_intent.as_deref(),
                    PaymentStatus::Refunded,
                    charge.amount_refunded,
                )
                .await
            }
            "charge.dispute.created" => {
                let dispute: StripeDispute = parse_object(&event)?;
                tracing::warn!(dispute = %dispute.id, charge = ?dispute.charge, "Charge disputed");
                self.intent_update(
                    dispute.payment_intent.as_deref(),
                    PaymentStatus::ChargedBack,
                    dispute.amount,
                )
                .await
            }
            _ => Ok(WebhookEvent::Ignored("Unhandled event type")),
        }
    }
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(client) = state.stripe.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Stripe is not configured");
    };
    let provider = StripeWebhookProvider::new(client);
    handle_webhook(&provider, &state, headers, body).await
}

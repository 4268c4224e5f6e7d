//! Shared webhook processing for both payment gateways.
//!
//! Providers turn a gateway delivery into a [`WebhookEvent`]; everything after
//! that (dedupe, lookup, status transitions, billing) happens here, in one
//! database transaction per delivery.

use std::future::Future;
use std::time::Instant;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use rusqlite::{Connection, TransactionBehavior};

use crate::billing::{self, ChargeApplied, SubscriptionCharge};
use crate::config::StoreSettings;
use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::id::ExternalReference;
use crate::models::{
    NewWebhookLog, Order, OrderStatus, PaymentStatus, Subscription, SubscriptionStatus,
    WebhookLogStatus,
};
use crate::payments::PaymentProvider;

/// Result type for webhook responses: gateways only look at the status code.
pub type WebhookResult = (StatusCode, &'static str);

/// Envelope fields every delivery carries.
#[derive(Debug, Clone)]
pub struct WebhookNotice {
    /// Gateway event id, the dedupe key
    pub event_id: String,
    pub event_type: String,
    /// Id of the remote payment, preapproval or object the event is about
    pub resource_id: Option<String>,
}

/// A payment reported by a gateway.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub reference: Option<ExternalReference>,
    /// Set when the gateway charged a subscription it manages itself
    pub gateway_subscription_id: Option<String>,
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    /// Saved card for later off-session charges
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    /// Gateway's explanation for a failed payment
    pub detail: Option<String>,
}

/// A change to a gateway-managed subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub reference: Option<ExternalReference>,
    pub gateway_subscription_id: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub next_billing_at: Option<i64>,
}

/// Provider-agnostic event resolved from a delivery.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Payment(PaymentUpdate),
    Subscription(SubscriptionUpdate),
    /// Not relevant to orders or subscriptions
    Ignored(&'static str),
}

/// What processing did with a resolved event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed(&'static str),
    Ignored(&'static str),
    AlreadyProcessed,
}

/// Trait for payment provider webhook handling.
///
/// Implementors read and verify the gateway's envelope and fetch
/// authoritative detail; [`handle_webhook`] does the rest.
pub trait WebhookProvider: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Read the signature header. `Ok(None)` means the delivery may proceed unsigned.
    fn extract_signature(&self, headers: &HeaderMap) -> Result<Option<String>, WebhookResult>;

    fn verify_signature(
        &self,
        headers: &HeaderMap,
        body: &Bytes,
        signature: Option<&str>,
        notice: &WebhookNotice,
    ) -> Result<(), WebhookResult>;

    fn parse_notice(&self, body: &Bytes) -> Result<WebhookNotice, WebhookResult>;

    /// Turn the delivery into an event, calling the gateway API where the
    /// payload alone is not authoritative.
    fn resolve(
        &self,
        notice: &WebhookNotice,
        body: &Bytes,
    ) -> impl Future<Output = Result<WebhookEvent, AppError>> + Send;
}

pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let started = Instant::now();
    let provider_name = provider.provider().as_str();

    let notice = match provider.parse_notice(&body) {
        Ok(n) => n,
        Err(e) => {
            write_log(state, provider_name, None, WebhookLogStatus::Failed, e.1, &body, started);
            return e;
        }
    };

    let verified = provider
        .extract_signature(&headers)
        .and_then(|sig| provider.verify_signature(&headers, &body, sig.as_deref(), &notice));
    if let Err(e) = verified {
        tracing::warn!(
            provider = provider_name,
            event = %notice.event_id,
            "Webhook rejected: {}",
            e.1
        );
        write_log(state, provider_name, Some(&notice), WebhookLogStatus::Failed, e.1, &body, started);
        return e;
    }

    let event = match provider.resolve(&notice, &body).await {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                provider = provider_name,
                event = %notice.event_id,
                "Failed to resolve webhook: {}",
                e
            );
            let result = match e {
                AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Invalid payload"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Gateway lookup failed"),
            };
            write_log(state, provider_name, Some(&notice), WebhookLogStatus::Failed, result.1, &body, started);
            return result;
        }
    };

    let processed = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|mut conn| {
            process_event(
                &mut conn,
                &state.store,
                provider_name,
                &notice,
                &event,
                chrono::Utc::now().timestamp(),
            )
        });

    let (status, result) = match processed {
        Ok(Outcome::Processed(message)) => {
            tracing::info!(provider = provider_name, event = %notice.event_id, "{}", message);
            (WebhookLogStatus::Processed, (StatusCode::OK, message))
        }
        Ok(Outcome::Ignored(reason)) => {
            tracing::info!(
                provider = provider_name,
                event = %notice.event_id,
                "Webhook ignored: {}",
                reason
            );
            (WebhookLogStatus::Ignored, (StatusCode::OK, reason))
        }
        Ok(Outcome::AlreadyProcessed) => {
            tracing::debug!(provider = provider_name, event = %notice.event_id, "Duplicate webhook");
            (WebhookLogStatus::Duplicate, (StatusCode::OK, "Already processed"))
        }
        Err(e) => {
            tracing::error!(
                provider = provider_name,
                event = %notice.event_id,
                "Webhook processing failed: {}",
                e
            );
            (
                WebhookLogStatus::Failed,
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            )
        }
    };

    write_log(state, provider_name, Some(&notice), status, result.1, &body, started);
    result
}

/// Record the delivery for observability. Failures here never change the response.
fn write_log(
    state: &AppState,
    provider: &str,
    notice: Option<&WebhookNotice>,
    status: WebhookLogStatus,
    message: &str,
    body: &Bytes,
    started: Instant,
) {
    let payload = String::from_utf8_lossy(body);
    let log = NewWebhookLog {
        provider,
        event_id: notice.map(|n| n.event_id.as_str()),
        event_type: notice.map(|n| n.event_type.as_str()),
        resource_id: notice.and_then(|n| n.resource_id.as_deref()),
        status,
        message: Some(message),
        payload: &payload,
        duration_ms: started.elapsed().as_millis() as i64,
    };

    let written = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::insert_webhook_log(&conn, &log));
    if let Err(e) = written {
        tracing::warn!("Failed to write webhook log: {}", e);
    }
}

/// Apply one resolved event atomically.
///
/// The dedupe row is written in the same transaction as the state change, so
/// an error rolls both back and the gateway's retry is processed afresh.
pub fn process_event(
    conn: &mut Connection,
    store: &StoreSettings,
    provider: &str,
    notice: &WebhookNotice,
    event: &WebhookEvent,
    now: i64,
) -> Result<Outcome, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !queries::try_record_webhook_event(&tx, provider, &notice.event_id)? {
        return Ok(Outcome::AlreadyProcessed);
    }

    let outcome = match event {
        WebhookEvent::Ignored(reason) => Outcome::Ignored(*reason),
        WebhookEvent::Payment(update) => apply_payment(&tx, store, provider, update, now)?,
        WebhookEvent::Subscription(update) => apply_subscription_update(&tx, provider, update)?,
    };

    tx.commit()?;
    Ok(outcome)
}

enum PaymentTarget {
    Order(Order),
    Subscription(Subscription),
}

fn locate_subscription(
    conn: &Connection,
    provider: &str,
    reference: Option<&ExternalReference>,
    gateway_subscription_id: Option<&str>,
) -> Result<Option<Subscription>, AppError> {
    if let Some(ExternalReference::Subscription(id)) = reference
        && let Some(sub) = queries::get_subscription(conn, id)?
    {
        return Ok(Some(sub));
    }
    match gateway_subscription_id {
        Some(gateway_id) => queries::get_subscription_by_gateway_id(conn, provider, gateway_id),
        None => Ok(None),
    }
}

fn locate_payment_target(
    conn: &Connection,
    provider: &str,
    update: &PaymentUpdate,
) -> Result<Option<PaymentTarget>, AppError> {
    if let Some(ExternalReference::Order(id)) = &update.reference {
        return Ok(queries::get_order(conn, id)?.map(PaymentTarget::Order));
    }
    Ok(locate_subscription(
        conn,
        provider,
        update.reference.as_ref(),
        update.gateway_subscription_id.as_deref(),
    )?
    .map(PaymentTarget::Subscription))
}

fn apply_payment(
    conn: &Connection,
    store: &StoreSettings,
    provider: &str,
    update: &PaymentUpdate,
    now: i64,
) -> Result<Outcome, AppError> {
    match locate_payment_target(conn, provider, update)? {
        None => {
            tracing::warn!(
                payment = %update.payment_id,
                reference = ?update.reference,
                "No order or subscription matches payment"
            );
            Ok(Outcome::Ignored("Unknown reference"))
        }
        Some(PaymentTarget::Order(order)) => apply_order_payment(conn, provider, &order, update),
        Some(PaymentTarget::Subscription(sub)) if update.status.is_reversal() => {
            // Reversals settle on the delivery order the charge created
            match queries::get_order_by_provider_payment(conn, provider, &update.payment_id)? {
                Some(order) => apply_order_payment(conn, provider, &order, update),
                None => {
                    tracing::warn!(
                        subscription = %sub.id,
                        payment = %update.payment_id,
                        "Reversal for a subscription payment with no delivery order"
                    );
                    Ok(Outcome::Ignored("No order for reversed payment"))
                }
            }
        }
        Some(PaymentTarget::Subscription(sub)) => {
            let charge = SubscriptionCharge {
                provider,
                provider_payment_id: Some(&update.payment_id),
                status: update.status,
                amount_cents: if update.amount_cents > 0 {
                    update.amount_cents
                } else {
                    sub.amount_cents
                },
                gateway_customer_id: update.customer_id.as_deref(),
                gateway_payment_method_id: update.payment_method_id.as_deref(),
                error: update.detail.as_deref(),
            };
            Ok(
                match billing::apply_subscription_payment(conn, store, &sub, &charge, now)? {
                    ChargeApplied::Billed { .. } => Outcome::Processed("Subscription billed"),
                    ChargeApplied::Failed { .. } => {
                        Outcome::Processed("Subscription charge failure recorded")
                    }
                    ChargeApplied::Duplicate => Outcome::Ignored("Payment already recorded"),
                    ChargeApplied::Skipped(reason) => Outcome::Ignored(reason),
                },
            )
        }
    }
}

/// The fulfilment change a payment transition implies, if any.
fn order_status_after(order: OrderStatus, payment: PaymentStatus) -> Option<OrderStatus> {
    match payment {
        PaymentStatus::Approved if order == OrderStatus::Pending => Some(OrderStatus::Processing),
        PaymentStatus::Refunded | PaymentStatus::ChargedBack | PaymentStatus::Cancelled
            if order.can_transition_to(OrderStatus::Cancelled) =>
        {
            Some(OrderStatus::Cancelled)
        }
        _ => None,
    }
}

fn apply_order_payment(
    conn: &Connection,
    provider: &str,
    order: &Order,
    update: &PaymentUpdate,
) -> Result<Outcome, AppError> {
    let from = order.payment_status;
    let to = update.status;

    if from == to {
        return Ok(Outcome::Ignored("Payment status unchanged"));
    }
    if !from.can_transition_to(to) {
        tracing::warn!(
            order = %order.id,
            from = %from,
            to = %to,
            "Stale or out-of-order payment status"
        );
        return Ok(Outcome::Ignored("Stale payment status"));
    }

    if to == PaymentStatus::Approved && update.amount_cents > 0 && update.amount_cents != order.total_cents
    {
        tracing::warn!(
            order = %order.id,
            paid = update.amount_cents,
            total = order.total_cents,
            "Approved amount differs from order total"
        );
    }

    let order_status = order_status_after(order.status, to);
    if !queries::update_order_payment(
        conn,
        &order.id,
        from,
        to,
        provider,
        Some(&update.payment_id),
        order_status,
    )? {
        return Ok(Outcome::Ignored("Order changed concurrently"));
    }

    tracing::info!(
        order = %order.id,
        payment = %update.payment_id,
        from = %from,
        to = %to,
        order_status = ?order_status,
        "Order payment updated"
    );
    Ok(Outcome::Processed("Order payment updated"))
}

fn apply_subscription_update(
    conn: &Connection,
    provider: &str,
    update: &SubscriptionUpdate,
) -> Result<Outcome, AppError> {
    if matches!(update.reference, Some(ExternalReference::Order(_))) {
        return Ok(Outcome::Ignored("Reference is not a subscription"));
    }

    let Some(sub) = locate_subscription(
        conn,
        provider,
        update.reference.as_ref(),
        update.gateway_subscription_id.as_deref(),
    )?
    else {
        tracing::warn!(
            reference = ?update.reference,
            gateway_subscription = ?update.gateway_subscription_id,
            "No subscription matches gateway subscription event"
        );
        return Ok(Outcome::Ignored("Unknown reference"));
    };

    if sub.gateway_subscription_id.is_none()
        && let Some(gateway_id) = &update.gateway_subscription_id
    {
        queries::set_gateway_subscription_id(conn, &sub.id, gateway_id)?;
    }
    if let Some(next) = update.next_billing_at {
        queries::set_subscription_next_billing(conn, &sub.id, next)?;
    }

    let Some(to) = update.status else {
        return Ok(Outcome::Processed("Subscription schedule updated"));
    };
    if to == sub.status {
        return Ok(Outcome::Processed("Subscription status unchanged"));
    }
    if !sub.status.can_transition_to(to) {
        tracing::warn!(
            subscription = %sub.id,
            from = %sub.status,
            to = %to,
            "Ignoring disallowed subscription transition"
        );
        return Ok(Outcome::Ignored("Stale subscription status"));
    }

    if !queries::update_subscription_status(conn, &sub.id, sub.status, to)? {
        return Ok(Outcome::Ignored("Subscription changed concurrently"));
    }
    tracing::info!(subscription = %sub.id, from = %sub.status, to = %to, "Subscription status updated");
    Ok(Outcome::Processed("Subscription status updated"))
}

//! Subscription charging.
//!
//! A subscription payment reaches us two ways: a gateway webhook (MercadoPago
//! preapprovals bill themselves, Stripe reports first-period checkouts) or our
//! own cron charging a saved card. Both apply the result through
//! [`apply_subscription_payment`], inside the caller's transaction.

use std::future::Future;
use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::config::StoreSettings;
use crate::db::{DbPool, queries};
use crate::error::{AppError, Result, msg};
use crate::models::{
    NewOrder, OrderStatus, PaymentStatus, PricedLine, Subscription, SubscriptionStatus,
    apply_discount,
};
use crate::payments::{OffSessionCharge, PaymentProvider, StripeClient};

/// Due subscriptions charged per cron run.
pub const BILLING_BATCH_SIZE: i64 = 100;

/// A charge result for one subscription, from whichever path observed it.
#[derive(Debug, Clone)]
pub struct SubscriptionCharge<'a> {
    pub provider: &'a str,
    pub provider_payment_id: Option<&'a str>,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub gateway_customer_id: Option<&'a str>,
    pub gateway_payment_method_id: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// What applying a charge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeApplied {
    Billed { attempt_id: String, order_id: String },
    Failed { failed_attempts: i64, past_due: bool },
    /// This gateway payment was already recorded
    Duplicate,
    Skipped(&'static str),
}

/// When the period after a paid one starts.
///
/// A schedule already in the future (a gateway that reported its own next
/// date) is kept. A due schedule moves one period, skipping ahead from `now`
/// when the subscription fell more than a period behind.
pub fn next_billing_after(sub: &Subscription, now: i64) -> i64 {
    match sub.next_billing_at {
        Some(scheduled) if scheduled > now => scheduled,
        Some(scheduled) => {
            let next = sub.frequency.advance(scheduled);
            if next > now {
                next
            } else {
                sub.frequency.advance(now)
            }
        }
        None => sub.frequency.advance(now),
    }
}

/// Record a subscription charge and its consequences.
///
/// Must run inside a transaction: an approval writes the attempt, the
/// schedule and a delivery order together.
pub fn apply_subscription_payment(
    conn: &Connection,
    store: &StoreSettings,
    sub: &Subscription,
    charge: &SubscriptionCharge<'_>,
    now: i64,
) -> Result<ChargeApplied> {
    match charge.status {
        PaymentStatus::Approved => apply_approved(conn, store, sub, charge, now),
        PaymentStatus::Rejected | PaymentStatus::Cancelled => {
            apply_failed(conn, store, sub, charge)
        }
        PaymentStatus::Pending | PaymentStatus::InProcess => {
            Ok(ChargeApplied::Skipped("Payment not settled yet"))
        }
        PaymentStatus::Refunded | PaymentStatus::ChargedBack => {
            Ok(ChargeApplied::Skipped("Reversal has no billing effect"))
        }
    }
}

fn apply_approved(
    conn: &Connection,
    store: &StoreSettings,
    sub: &Subscription,
    charge: &SubscriptionCharge<'_>,
    now: i64,
) -> Result<ChargeApplied> {
    let Some(attempt) = queries::insert_billing_attempt(
        conn,
        &sub.id,
        charge.provider,
        charge.provider_payment_id,
        charge.amount_cents,
        true,
        None,
    )?
    else {
        tracing::info!(
            subscription = %sub.id,
            payment = charge.provider_payment_id.unwrap_or_default(),
            "Subscription payment already recorded"
        );
        return Ok(ChargeApplied::Duplicate);
    };

    if matches!(
        sub.status,
        SubscriptionStatus::Pending | SubscriptionStatus::PastDue
    ) && queries::update_subscription_status(conn, &sub.id, sub.status, SubscriptionStatus::Active)?
    {
        tracing::info!(subscription = %sub.id, from = %sub.status, "Subscription activated");
    }

    queries::mark_subscription_billed(
        conn,
        &sub.id,
        now,
        next_billing_after(sub, now),
        charge.gateway_customer_id,
        charge.gateway_payment_method_id,
    )?;

    let order = queries::insert_order(conn, &delivery_order(conn, store, sub, charge)?)?;
    queries::set_billing_attempt_order(conn, &attempt.id, &order.order.id)?;

    tracing::info!(
        subscription = %sub.id,
        order = %order.order.id,
        amount_cents = charge.amount_cents,
        "Subscription period billed"
    );

    Ok(ChargeApplied::Billed {
        attempt_id: attempt.id,
        order_id: order.order.id,
    })
}

fn apply_failed(
    conn: &Connection,
    store: &StoreSettings,
    sub: &Subscription,
    charge: &SubscriptionCharge<'_>,
) -> Result<ChargeApplied> {
    let recorded = queries::insert_billing_attempt(
        conn,
        &sub.id,
        charge.provider,
        charge.provider_payment_id,
        charge.amount_cents,
        false,
        charge.error,
    )?;
    if recorded.is_none() {
        return Ok(ChargeApplied::Duplicate);
    }

    let failed_attempts = queries::increment_failed_attempts(conn, &sub.id)?;
    let past_due = sub.status == SubscriptionStatus::Active
        && failed_attempts >= store.max_failed_attempts
        && queries::update_subscription_status(
            conn,
            &sub.id,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
        )?;

    if past_due {
        tracing::warn!(
            subscription = %sub.id,
            failed_attempts,
            "Subscription moved to past_due"
        );
    } else {
        tracing::info!(
            subscription = %sub.id,
            failed_attempts,
            error = charge.error.unwrap_or_default(),
            "Subscription charge failed"
        );
    }

    Ok(ChargeApplied::Failed {
        failed_attempts,
        past_due,
    })
}

/// The order that ships one paid period. Subscription deliveries ship free.
fn delivery_order(
    conn: &Connection,
    store: &StoreSettings,
    sub: &Subscription,
    charge: &SubscriptionCharge<'_>,
) -> Result<NewOrder> {
    let product = queries::get_product(conn, &sub.product_id)?
        .ok_or_else(|| AppError::Internal(format!("{}: {}", msg::PRODUCT_NOT_FOUND, sub.product_id)))?;
    let variant_label = match &sub.variant_id {
        Some(variant_id) => queries::get_variant(conn, variant_id)?.map(|v| v.label),
        None => None,
    };

    Ok(NewOrder {
        user_id: Some(sub.user_id.clone()),
        subscription_id: Some(sub.id.clone()),
        status: OrderStatus::Processing,
        payment_status: PaymentStatus::Approved,
        payment_provider: Some(charge.provider.to_string()),
        provider_payment_id: charge.provider_payment_id.map(str::to_string),
        shipping_cents: 0,
        currency: if sub.currency.is_empty() {
            store.currency.clone()
        } else {
            sub.currency.clone()
        },
        customer_email: sub.customer_email.clone(),
        shipping_address: sub.shipping_address.clone(),
        lines: vec![PricedLine {
            product_id: product.id,
            variant_id: sub.variant_id.clone(),
            product_name: product.name,
            variant_label,
            quantity: sub.quantity,
            unit_price_cents: apply_discount(sub.unit_price_cents, sub.discount_pct),
        }],
    })
}

// ============ Cron billing ============

/// What a gateway said about an off-session charge.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Succeeded {
        provider_payment_id: String,
        gateway_customer_id: Option<String>,
        gateway_payment_method_id: Option<String>,
    },
    Declined {
        provider_payment_id: Option<String>,
        reason: String,
    },
}

/// Charges one period of a locally billed subscription.
pub trait RecurringCharger: Send + Sync {
    fn charge(&self, sub: &Subscription) -> impl Future<Output = Result<ChargeOutcome>> + Send;
}

/// Production charger: off-session Stripe PaymentIntents against the saved card.
#[derive(Clone)]
pub struct GatewayCharger {
    stripe: Option<Arc<StripeClient>>,
}

impl GatewayCharger {
    pub fn new(stripe: Option<Arc<StripeClient>>) -> Self {
        Self { stripe }
    }
}

/// One key per subscription, period and attempt. A repeated run cannot
/// double-charge, and a declined card gets a fresh attempt next run.
pub fn idempotency_key(sub: &Subscription) -> String {
    format!(
        "{}:{}:{}",
        sub.id,
        sub.next_billing_at.unwrap_or_default(),
        sub.failed_attempts
    )
}

impl RecurringCharger for GatewayCharger {
    async fn charge(&self, sub: &Subscription) -> Result<ChargeOutcome> {
        if sub.provider != PaymentProvider::Stripe.as_str() {
            return Err(AppError::BadRequest(format!(
                "Provider '{}' cannot be charged off-session",
                sub.provider
            )));
        }
        let stripe = self
            .stripe
            .as_ref()
            .ok_or_else(|| AppError::Unavailable(msg::STRIPE_NOT_CONFIGURED.into()))?;

        let (Some(customer), Some(payment_method)) = (
            sub.gateway_customer_id.as_deref(),
            sub.gateway_payment_method_id.as_deref(),
        ) else {
            return Ok(ChargeOutcome::Declined {
                provider_payment_id: None,
                reason: "No saved payment method".into(),
            });
        };

        let outcome = stripe
            .charge_off_session(
                customer,
                payment_method,
                sub.amount_cents,
                &sub.currency,
                &sub.id,
                &idempotency_key(sub),
            )
            .await?;

        Ok(match outcome {
            OffSessionCharge::Succeeded(intent) => ChargeOutcome::Succeeded {
                provider_payment_id: intent.id,
                gateway_customer_id: intent.customer,
                gateway_payment_method_id: intent.payment_method,
            },
            OffSessionCharge::Declined {
                payment_intent_id,
                reason,
            } => ChargeOutcome::Declined {
                provider_payment_id: payment_intent_id,
                reason,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingOutcome {
    Billed,
    Declined,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingResult {
    pub subscription_id: String,
    pub outcome: BillingOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BillingResult>,
}

/// Charge every due, locally billed subscription once.
///
/// Subscriptions are charged one at a time and independently: a gateway or
/// database failure on one is recorded and the run moves on. No connection is
/// held while a charge is in flight.
pub async fn run_billing<C: RecurringCharger>(
    db: &DbPool,
    store: &StoreSettings,
    charger: &C,
    now: i64,
) -> Result<BillingReport> {
    let due = {
        let conn = db.get()?;
        queries::list_due_subscriptions(&conn, now, BILLING_BATCH_SIZE)?
    };

    tracing::info!(due = due.len(), "Billing run started");

    let mut report = BillingReport::default();
    for sub in due {
        let charge = charger.charge(&sub).await;
        let result = match record_charge(db, store, &sub, &charge, now) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(subscription = %sub.id, "Failed to record charge: {}", e);
                BillingResult {
                    subscription_id: sub.id.clone(),
                    outcome: BillingOutcome::Error,
                    order_id: None,
                    error: Some(e.to_string()),
                }
            }
        };

        report.processed += 1;
        match result.outcome {
            BillingOutcome::Billed => report.succeeded += 1,
            BillingOutcome::Declined | BillingOutcome::Error => report.failed += 1,
            BillingOutcome::Skipped => {}
        }
        report.results.push(result);
    }

    tracing::info!(
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        "Billing run finished"
    );

    Ok(report)
}

fn record_charge(
    db: &DbPool,
    store: &StoreSettings,
    sub: &Subscription,
    charge: &Result<ChargeOutcome>,
    now: i64,
) -> Result<BillingResult> {
    let error_text = match charge {
        Err(e) => {
            tracing::warn!(subscription = %sub.id, "Charge errored: {}", e);
            Some(e.to_string())
        }
        Ok(ChargeOutcome::Declined { reason, .. }) => Some(reason.clone()),
        Ok(ChargeOutcome::Succeeded { .. }) => None,
    };

    let applied_charge = match charge {
        Ok(ChargeOutcome::Succeeded {
            provider_payment_id,
            gateway_customer_id,
            gateway_payment_method_id,
        }) => SubscriptionCharge {
            provider: &sub.provider,
            provider_payment_id: Some(provider_payment_id),
            status: PaymentStatus::Approved,
            amount_cents: sub.amount_cents,
            gateway_customer_id: gateway_customer_id.as_deref(),
            gateway_payment_method_id: gateway_payment_method_id.as_deref(),
            error: None,
        },
        Ok(ChargeOutcome::Declined {
            provider_payment_id,
            ..
        }) => SubscriptionCharge {
            provider: &sub.provider,
            provider_payment_id: provider_payment_id.as_deref(),
            status: PaymentStatus::Rejected,
            amount_cents: sub.amount_cents,
            gateway_customer_id: None,
            gateway_payment_method_id: None,
            error: error_text.as_deref(),
        },
        Err(_) => SubscriptionCharge {
            provider: &sub.provider,
            provider_payment_id: None,
            status: PaymentStatus::Rejected,
            amount_cents: sub.amount_cents,
            gateway_customer_id: None,
            gateway_payment_method_id: None,
            error: error_text.as_deref(),
        },
    };

    let mut conn = db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Re-read: a webhook or the customer may have moved it while we were charging
    let Some(current) = queries::get_subscription(&tx, &sub.id)? else {
        return Err(AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()));
    };
    let applied = apply_subscription_payment(&tx, store, &current, &applied_charge, now)?;
    tx.commit()?;

    let (outcome, order_id) = match applied {
        ChargeApplied::Billed { order_id, .. } => (BillingOutcome::Billed, Some(order_id)),
        // Already recorded by the gateway's own webhook
        ChargeApplied::Duplicate if applied_charge.status == PaymentStatus::Approved => {
            (BillingOutcome::Billed, None)
        }
        ChargeApplied::Failed { .. } | ChargeApplied::Duplicate => {
            if charge.is_err() {
                (BillingOutcome::Error, None)
            } else {
                (BillingOutcome::Declined, None)
            }
        }
        ChargeApplied::Skipped(_) => (BillingOutcome::Skipped, None),
    };

    Ok(BillingResult {
        subscription_id: sub.id.clone(),
        outcome,
        order_id,
        error: error_text,
    })
}

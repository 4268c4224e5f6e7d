use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::Json;
use crate::models::{OrderItem, OrderStatus, PaymentStatus};
use crate::payments::{CheckoutLine, CheckoutLink, CheckoutRequest, PaymentProvider};

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub order_id: String,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub provider: PaymentProvider,
    pub checkout_url: String,
    pub gateway_id: String,
}

/// Pick the gateway for a checkout.
///
/// An explicit choice must be configured. Without one, the only configured
/// gateway is used; with both configured the caller has to choose.
pub fn select_provider(state: &AppState, requested: Option<&str>) -> Result<PaymentProvider> {
    let configured = |p: PaymentProvider| match p {
        PaymentProvider::MercadoPago => state.mercadopago.is_some(),
        PaymentProvider::Stripe => state.stripe.is_some(),
    };

    if let Some(requested) = requested {
        let provider = PaymentProvider::from_str(requested)
            .ok_or_else(|| AppError::BadRequest(msg::INVALID_PROVIDER.into()))?;
        if !configured(provider) {
            let message = match provider {
                PaymentProvider::MercadoPago => msg::MERCADOPAGO_NOT_CONFIGURED,
                PaymentProvider::Stripe => msg::STRIPE_NOT_CONFIGURED,
            };
            return Err(AppError::BadRequest(message.into()));
        }
        return Ok(provider);
    }

    match (
        configured(PaymentProvider::MercadoPago),
        configured(PaymentProvider::Stripe),
    ) {
        (true, false) => Ok(PaymentProvider::MercadoPago),
        (false, true) => Ok(PaymentProvider::Stripe),
        (true, true) => Err(AppError::BadRequest(msg::MULTIPLE_PROVIDERS.into())),
        (false, false) => Err(AppError::BadRequest(msg::NO_PROVIDER_CONFIGURED.into())),
    }
}

/// Title shown on the gateway's checkout page for one order line.
pub(crate) fn line_title(product_name: &str, variant_label: Option<&str>) -> String {
    match variant_label {
        Some(label) => format!("{} ({})", product_name, label),
        None => product_name.to_string(),
    }
}

fn checkout_lines(items: &[OrderItem], shipping_cents: i64) -> Vec<CheckoutLine> {
    let mut lines: Vec<CheckoutLine> = items
        .iter()
        .map(|item| CheckoutLine {
            title: line_title(&item.product_name, item.variant_label.as_deref()),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
        })
        .collect();
    if shipping_cents > 0 {
        lines.push(CheckoutLine {
            title: "Shipping".into(),
            quantity: 1,
            unit_price_cents: shipping_cents,
        });
    }
    lines
}

/// Send the buyer to a gateway for one of the order's payments.
pub(crate) async fn create_gateway_checkout(
    state: &AppState,
    provider: PaymentProvider,
    request: &CheckoutRequest<'_>,
) -> Result<CheckoutLink> {
    match provider {
        PaymentProvider::MercadoPago => {
            let client = state
                .mercadopago
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(msg::MERCADOPAGO_NOT_CONFIGURED.into()))?;
            client
                .create_preference(request, state.payments_test_mode)
                .await
        }
        PaymentProvider::Stripe => {
            let client = state
                .stripe
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()))?;
            client.create_checkout_session(request).await
        }
    }
}

pub(crate) fn notification_url(state: &AppState, provider: PaymentProvider) -> String {
    format!("{}/webhooks/{}", state.base_url, provider.as_str())
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    let provider = select_provider(&state, body.provider.as_deref())?;

    let order = {
        let conn = state.db.get()?;
        queries::get_order_with_items(&conn, &body.order_id)?
            .or_not_found(msg::ORDER_NOT_FOUND)?
    };

    // A cancelled payment cancels its order, so only declines are retried here
    let awaiting_payment = matches!(
        order.order.payment_status,
        PaymentStatus::Pending | PaymentStatus::Rejected
    );
    if order.order.status != OrderStatus::Pending || !awaiting_payment {
        return Err(AppError::Conflict("Order is not awaiting payment".into()));
    }

    let request = CheckoutRequest {
        reference: &order.order.id,
        lines: checkout_lines(&order.items, order.order.shipping_cents),
        currency: &order.order.currency,
        customer_email: &order.order.customer_email,
        success_url: format!("{}/orders/{}?checkout=success", state.storefront_url, order.order.id),
        cancel_url: format!("{}/orders/{}?checkout=cancelled", state.storefront_url, order.order.id),
        notification_url: notification_url(&state, provider),
        save_payment_method: false,
    };

    // No connection is held while the gateway is called
    let link = create_gateway_checkout(&state, provider, &request).await?;

    {
        let conn = state.db.get()?;
        queries::set_order_payment_provider(&conn, &order.order.id, provider.as_str())?;
    }

    tracing::info!(
        order = %order.order.id,
        provider = %provider,
        gateway_id = %link.gateway_id,
        "Checkout created"
    );

    Ok(Json(CheckoutResponse {
        order_id: order.order.id,
        provider: link.provider,
        checkout_url: link.url,
        gateway_id: link.gateway_id,
    }))
}

use axum::{extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::Json;
use crate::middleware::OptionalUser;
use crate::models::{CreateOrder, NewOrder, OrderStatus, OrderWithItems, PaymentStatus};

/// Create an order from catalog prices. Guests may order; a valid token
/// attaches the order to the signed-in user.
pub async fn create_order(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Json(input): Json<CreateOrder>,
) -> Result<(StatusCode, Json<OrderWithItems>)> {
    input.validate()?;

    let mut conn = state.db.get()?;
    let lines = queries::price_lines(&conn, &input.items)?;

    let mut order = NewOrder {
        user_id: user.map(|u| u.profile.id),
        subscription_id: None,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_provider: None,
        provider_payment_id: None,
        shipping_cents: 0,
        currency: state.store.currency.clone(),
        customer_email: input.customer_email,
        shipping_address: input.shipping_address,
        lines,
    };
    order.shipping_cents = state.store.shipping_for(order.subtotal_cents());

    let created = queries::create_order(&mut conn, &order)?;

    tracing::info!(
        order = %created.order.id,
        items = created.items.len(),
        total_cents = created.order.total_cents,
        "Order created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

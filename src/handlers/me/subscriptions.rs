use axum::{Extension, extract::State, http::StatusCode};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::handlers::public::{
    create_gateway_checkout, line_title, notification_url, select_provider,
};
use crate::middleware::UserContext;
use crate::models::{
    CreateSubscription, NewSubscription, Subscription, SubscriptionStatus, apply_discount,
    status_for_action,
};
use crate::payments::{
    CheckoutLine, CheckoutLink, CheckoutRequest, PaymentProvider, PreapprovalRequest,
    preapproval_status_for,
};

#[derive(Debug, Serialize)]
pub struct SubscriptionCheckout {
    pub subscription: Subscription,
    pub provider: PaymentProvider,
    pub checkout_url: String,
}

/// Start a recurring delivery.
///
/// The subscription is stored as pending first so its id can travel through
/// the gateway as the external reference; it activates when the first
/// payment is reported.
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(input): Json<CreateSubscription>,
) -> Result<(StatusCode, Json<SubscriptionCheckout>)> {
    input.validate()?;
    let provider = select_provider(&state, input.provider.as_deref())?;

    let (subscription, title) = {
        let conn = state.db.get()?;
        let item = queries::resolve_item(&conn, &input.product_id, input.variant_id.as_deref())?;
        if !item.product.subscription_enabled {
            return Err(AppError::BadRequest(msg::SUBSCRIPTIONS_NOT_AVAILABLE.into()));
        }

        let unit_price_cents = item.unit_price_cents();
        let discount_pct = item.product.discount_pct(input.frequency);
        let title = line_title(
            &item.product.name,
            item.variant.as_ref().map(|v| v.label.as_str()),
        );

        let subscription = queries::create_subscription(
            &conn,
            &NewSubscription {
                user_id: user.user_id().to_string(),
                product_id: item.product.id.clone(),
                variant_id: item.variant.as_ref().map(|v| v.id.clone()),
                quantity: input.quantity,
                frequency: input.frequency,
                unit_price_cents,
                discount_pct,
                amount_cents: apply_discount(unit_price_cents, discount_pct) * input.quantity,
                currency: state.store.currency.clone(),
                provider: provider.as_str().to_string(),
                customer_email: user.profile.email.clone(),
                shipping_address: input.shipping_address,
            },
        )?;
        (subscription, title)
    };

    let link = match start_gateway_subscription(&state, provider, &subscription, &title).await {
        Ok(link) => link,
        Err(e) => {
            // Nothing can ever activate it now
            let conn = state.db.get()?;
            queries::update_subscription_status(
                &conn,
                &subscription.id,
                SubscriptionStatus::Pending,
                SubscriptionStatus::Cancelled,
            )?;
            return Err(e);
        }
    };

    let subscription = {
        let conn = state.db.get()?;
        if provider == PaymentProvider::MercadoPago {
            queries::set_gateway_subscription_id(&conn, &subscription.id, &link.gateway_id)?;
        }
        queries::get_subscription(&conn, &subscription.id)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };

    tracing::info!(
        subscription = %subscription.id,
        provider = %provider,
        frequency = subscription.frequency.as_str(),
        amount_cents = subscription.amount_cents,
        "Subscription created"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionCheckout {
            subscription,
            provider,
            checkout_url: link.url,
        }),
    ))
}

/// MercadoPago bills preapprovals itself. Stripe takes the first period through
/// a checkout that keeps the card for the billing cron.
async fn start_gateway_subscription(
    state: &AppState,
    provider: PaymentProvider,
    subscription: &Subscription,
    title: &str,
) -> Result<CheckoutLink> {
    let success_url = format!(
        "{}/subscriptions/{}?checkout=success",
        state.storefront_url, subscription.id
    );

    match provider {
        PaymentProvider::MercadoPago => {
            let client = state
                .mercadopago
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(msg::MERCADOPAGO_NOT_CONFIGURED.into()))?;
            client
                .create_preapproval(&PreapprovalRequest {
                    reference: &subscription.id,
                    reason: format!("{} x{}", title, subscription.quantity),
                    payer_email: &subscription.customer_email,
                    frequency: subscription.frequency,
                    amount_cents: subscription.amount_cents,
                    currency: &subscription.currency,
                    back_url: success_url,
                    notification_url: notification_url(state, provider),
                })
                .await
        }
        PaymentProvider::Stripe => {
            let request = CheckoutRequest {
                reference: &subscription.id,
                lines: vec![CheckoutLine {
                    title: title.to_string(),
                    quantity: subscription.quantity,
                    unit_price_cents: apply_discount(
                        subscription.unit_price_cents,
                        subscription.discount_pct,
                    ),
                }],
                currency: &subscription.currency,
                customer_email: &subscription.customer_email,
                success_url,
                cancel_url: format!(
                    "{}/subscriptions/{}?checkout=cancelled",
                    state.storefront_url, subscription.id
                ),
                notification_url: notification_url(state, provider),
                save_payment_method: true,
            };
            create_gateway_checkout(state, provider, &request).await
        }
    }
}

pub async fn list_my_subscriptions(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<Vec<Subscription>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_user_subscriptions(&conn, user.user_id())?))
}

pub async fn get_my_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>> {
    let conn = state.db.get()?;
    let subscription = queries::get_user_subscription(&conn, user.user_id(), &id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    Ok(Json(subscription))
}

/// `POST /me/subscriptions/{id}/{action}` for pause, resume and cancel.
pub async fn change_my_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<Subscription>> {
    let next = status_for_action(&action)?;
    let subscription = {
        let conn = state.db.get()?;
        queries::get_user_subscription(&conn, user.user_id(), &id)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };
    let updated = transition_subscription(&state, &subscription, next).await?;
    Ok(Json(updated))
}

/// Move a subscription to `next`, telling the gateway first when it bills on
/// its own. Shared by the customer and admin routes.
pub(crate) async fn transition_subscription(
    state: &AppState,
    subscription: &Subscription,
    next: SubscriptionStatus,
) -> Result<Subscription> {
    if !subscription.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Cannot change subscription from {} to {}",
            subscription.status, next
        )));
    }

    if let (Some(gateway_id), Some(gateway_status)) = (
        subscription.gateway_subscription_id.as_deref(),
        preapproval_status_for(next),
    ) && subscription.provider == PaymentProvider::MercadoPago.as_str()
    {
        let client = state
            .mercadopago
            .as_ref()
            .ok_or_else(|| AppError::Unavailable(msg::MERCADOPAGO_NOT_CONFIGURED.into()))?;
        client
            .update_preapproval_status(gateway_id, gateway_status)
            .await?;
    }

    let conn = state.db.get()?;
    if !queries::update_subscription_status(&conn, &subscription.id, subscription.status, next)? {
        return Err(AppError::Conflict(
            "Subscription changed while updating; reload and retry".into(),
        ));
    }

    tracing::info!(
        subscription = %subscription.id,
        from = %subscription.status,
        to = %next,
        "Subscription status changed"
    );

    queries::get_subscription(&conn, &subscription.id)?.or_not_found(msg::SUBSCRIPTION_NOT_FOUND)
}

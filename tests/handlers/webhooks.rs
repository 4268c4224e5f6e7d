//! Gateway webhooks end to end: signature checks, gateway lookups, dedupe
//! and the state changes each delivery implies.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Path;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Json;
use serde_json::{Value, json};
use tower::ServiceExt;

use kibble::payments::{sign_mercadopago, sign_stripe};

#[path = "../common/mod.rs"]
mod common;
use common::*;

const REQUEST_ID: &str = "req-7f3c";

async fn post_webhook(
    app: Router,
    provider: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> (StatusCode, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", provider))
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    let response = app
        .oneshot(builder.body(Body::from(body.to_vec())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn mp_notification(event_id: &str, kind: &str, data_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": kind,
        "action": "payment.updated",
        "data": { "id": data_id },
    }))
    .unwrap()
}

fn mp_headers(data_id: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "x-signature",
            sign_mercadopago(MP_WEBHOOK_SECRET, now(), REQUEST_ID, data_id).unwrap(),
        ),
        ("x-request-id", REQUEST_ID.to_string()),
    ]
}

fn stripe_headers(payload: &[u8]) -> Vec<(&'static str, String)> {
    vec![(
        "stripe-signature",
        sign_stripe(STRIPE_WEBHOOK_SECRET, now(), payload).unwrap(),
    )]
}

/// A MercadoPago API that knows one payment.
fn mp_payment_api(payment: Value) -> Router {
    Router::new().route(
        "/v1/payments/{id}",
        get(move |Path(id): Path<String>| {
            let payment = payment.clone();
            async move {
                if payment["id"].to_string().trim_matches('"') == id {
                    (StatusCode::OK, Json(payment))
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" })))
                }
            }
        }),
    )
}

async fn mp_state(api: Router) -> AppState {
    let base = spawn_mock_gateway(api).await;
    let mut state = create_test_app_state();
    state.mercadopago = Some(mercadopago_client(&base, Some(MP_WEBHOOK_SECRET)));
    state
}

fn webhook_logs(state: &AppState) -> Vec<WebhookLog> {
    let conn = state.db.get().unwrap();
    queries::list_webhook_logs(&conn, &WebhookLogFilters::default(), 100, 0)
        .unwrap()
        .0
}

fn pending_order(state: &AppState, quantity: i64) -> OrderWithItems {
    let mut conn = state.db.get().unwrap();
    let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
    create_test_order(&mut conn, &product.product, quantity, None)
}

// ============ MercadoPago ============

#[tokio::test]
async fn test_mercadopago_approval_moves_order_to_processing() {
    let mut state = create_test_app_state();
    let order = pending_order(&state, 2);
    let api = mp_payment_api(json!({
        "id": 123456789,
        "status": "approved",
        "status_detail": "accredited",
        "external_reference": order.order.id,
        "transaction_amount": 30.0,
    }));
    let base = spawn_mock_gateway(api).await;
    state.mercadopago = Some(mercadopago_client(&base, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-1", "payment", "123456789");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("123456789"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    let stored = {
        let conn = state.db.get().unwrap();
        queries::get_order(&conn, &order.order.id).unwrap().unwrap()
    };
    assert_eq!(stored.payment_status, PaymentStatus::Approved);
    assert_eq!(stored.status, OrderStatus::Processing);
    assert_eq!(stored.provider_payment_id.as_deref(), Some("123456789"));
    assert_eq!(stored.payment_provider.as_deref(), Some("mercadopago"));

    // Gateways redeliver; the second copy changes nothing
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("123456789"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Already processed");

    let logs = webhook_logs(&state);
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().any(|l| l.status == WebhookLogStatus::Processed));
    assert!(logs.iter().any(|l| l.status == WebhookLogStatus::Duplicate));
    assert!(logs.iter().all(|l| l.event_id.as_deref() == Some("evt-1")));
}

#[tokio::test]
async fn test_mercadopago_unknown_reference_is_acknowledged() {
    let state = mp_state(mp_payment_api(json!({
        "id": 555,
        "status": "approved",
        "external_reference": "someone-elses-store-42",
        "transaction_amount": 10.0,
    })))
    .await;

    let body = mp_notification("evt-unknown", "payment", "555");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("555"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Unknown reference");

    let logs = webhook_logs(&state);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, WebhookLogStatus::Ignored);
    assert_eq!(logs[0].resource_id.as_deref(), Some("555"));
}

#[tokio::test]
async fn test_mercadopago_signature_checks() {
    let state = mp_state(mp_payment_api(json!({ "id": 1, "status": "approved" }))).await;
    let body = mp_notification("evt-sig", "payment", "1");

    // Signed for a different resource
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("2"), &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong_secret = vec![
        ("x-signature", sign_mercadopago("not-the-secret", now(), REQUEST_ID, "1").unwrap()),
        ("x-request-id", REQUEST_ID.to_string()),
    ];
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &wrong_secret, &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &[], &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let garbled = vec![("x-signature", "v1=abc".to_string())];
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &garbled, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected deliveries never reach the dedupe table, so a valid retry still counts
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("1"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Unknown reference");

    let failed = webhook_logs(&state)
        .into_iter()
        .filter(|l| l.status == WebhookLogStatus::Failed)
        .count();
    assert_eq!(failed, 4);
}

#[tokio::test]
async fn test_mercadopago_malformed_body_is_rejected() {
    let state = mp_state(Router::new()).await;
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("1"), b"{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "Invalid JSON");
    assert_eq!(webhook_logs(&state)[0].status, WebhookLogStatus::Failed);
}

#[tokio::test]
async fn test_mercadopago_gateway_outage_allows_retry() {
    let mut state = create_test_app_state();
    let order = pending_order(&state, 1);
    // API knows nothing: every lookup 404s
    state.mercadopago = Some(mercadopago_client(
        &spawn_mock_gateway(Router::new()).await,
        Some(MP_WEBHOOK_SECRET),
    ));

    let body = mp_notification("evt-retry", "payment", "777");
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("777"), &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The retry lands once the gateway answers
    let api = mp_payment_api(json!({
        "id": 777,
        "status": "approved",
        "external_reference": order.order.id,
        "transaction_amount": 15.0,
    }));
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));
    let (status, text) = post_webhook(test_app(state), "mercadopago", &mp_headers("777"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");
}

#[tokio::test]
async fn test_mercadopago_unsigned_webhooks_need_dev_mode() {
    let body = mp_notification("evt-dev", "payment", "9");
    let base = spawn_mock_gateway(mp_payment_api(json!({ "id": 9, "status": "pending" }))).await;

    let mut state = create_test_app_state();
    state.mercadopago = Some(mercadopago_client(&base, None));
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &[], &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    state.dev_mode = true;
    let (status, _) = post_webhook(test_app(state), "mercadopago", &[], &body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unconfigured_gateway_webhooks_are_unavailable() {
    let state = create_test_app_state();
    let (status, _) = post_webhook(test_app(state.clone()), "mercadopago", &[], b"{}").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = post_webhook(test_app(state), "stripe", &[], b"{}").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_mercadopago_payment_bills_subscription() {
    let mut state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_test_subscription(&conn, "user_a", &product.product, "mercadopago")
    };
    let api = mp_payment_api(json!({
        "id": 4242,
        "status": "approved",
        "external_reference": sub.id,
        "transaction_amount": 27.0,
    }));
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-sub-pay", "payment", "4242");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("4242"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Subscription billed");

    let conn = state.db.get().unwrap();
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert!(stored.last_billed_at.is_some());
    assert!(stored.next_billing_at.unwrap() > now());

    let attempts = queries::list_billing_attempts(&conn, &sub.id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].succeeded);
    assert_eq!(attempts[0].amount_cents, 2700);

    let delivery = queries::get_order(&conn, attempts[0].order_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(delivery.subscription_id.as_deref(), Some(sub.id.as_str()));
    assert_eq!(delivery.status, OrderStatus::Processing);
    assert_eq!(delivery.payment_status, PaymentStatus::Approved);
    assert_eq!(delivery.shipping_cents, 0);
    assert_eq!(delivery.total_cents, 2700);
}

#[tokio::test]
async fn test_mercadopago_preapproval_activates_subscription() {
    let mut state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_test_subscription(&conn, "user_a", &product.product, "mercadopago")
    };
    let reference = sub.id.clone();
    let api = Router::new().route(
        "/preapproval/{id}",
        get(move |Path(id): Path<String>| {
            let reference = reference.clone();
            async move {
                Json(json!({
                    "id": id,
                    "status": "authorized",
                    "external_reference": reference,
                    "next_payment_date": "2030-04-01T10:00:00.000-03:00",
                }))
            }
        }),
    );
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-pre", "subscription_preapproval", "2c938084");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("2c938084"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Subscription status updated");

    let conn = state.db.get().unwrap();
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(stored.gateway_subscription_id.as_deref(), Some("2c938084"));
    assert_eq!(stored.next_billing_at, Some(1_901_278_800));
}

/// A MercadoPago API whose one payment can change between deliveries.
fn mp_live_payment_api(payment: Arc<Mutex<Value>>) -> Router {
    Router::new().route(
        "/v1/payments/{id}",
        get(move |Path(_id): Path<String>| {
            let payment = payment.clone();
            async move { Json(payment.lock().unwrap().clone()) }
        }),
    )
}

#[tokio::test]
async fn test_mercadopago_refund_settles_subscription_delivery_order() {
    let mut state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_test_subscription(&conn, "user_a", &product.product, "mercadopago")
    };
    let payment = Arc::new(Mutex::new(json!({
        "id": 4343,
        "status": "approved",
        "external_reference": sub.id,
        "transaction_amount": 27.0,
    })));
    let api = mp_live_payment_api(payment.clone());
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-bill", "payment", "4343");
    let (_, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("4343"), &body).await;
    assert_eq!(text, "Subscription billed");

    payment.lock().unwrap()["status"] = json!("refunded");
    let body = mp_notification("evt-refund", "payment", "4343");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("4343"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    let conn = state.db.get().unwrap();
    let delivery = queries::get_order_by_provider_payment(&conn, "mercadopago", "4343")
        .unwrap()
        .unwrap();
    assert_eq!(delivery.subscription_id.as_deref(), Some(sub.id.as_str()));
    assert_eq!(delivery.payment_status, PaymentStatus::Refunded);
    assert_eq!(delivery.status, OrderStatus::Cancelled);

    // The subscription itself carries on; no extra attempt is recorded
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(queries::list_billing_attempts(&conn, &sub.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_mercadopago_rejected_subscription_payment_counts_failure() {
    let mut state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        let sub = create_test_subscription(&conn, "user_a", &product.product, "mercadopago");
        queries::update_subscription_status(
            &conn,
            &sub.id,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
        )
        .unwrap();
        sub
    };
    let api = mp_payment_api(json!({
        "id": 900,
        "status": "rejected",
        "status_detail": "cc_rejected_insufficient_amount",
        "external_reference": sub.id,
        "transaction_amount": 27.0,
    }));
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-rejected", "payment", "900");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("900"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Subscription charge failure recorded");

    let conn = state.db.get().unwrap();
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.failed_attempts, 1);
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert!(stored.last_billed_at.is_none());

    let attempts = queries::list_billing_attempts(&conn, &sub.id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].succeeded);
    assert_eq!(attempts[0].error.as_deref(), Some("cc_rejected_insufficient_amount"));
    assert!(attempts[0].order_id.is_none());
}

#[tokio::test]
async fn test_mercadopago_authorized_payment_and_plain_payment_bill_once() {
    let mut state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        let sub = create_test_subscription(&conn, "user_a", &product.product, "mercadopago");
        queries::set_gateway_subscription_id(&conn, &sub.id, "pre_77").unwrap();
        sub
    };
    let reference = sub.id.clone();
    let api = Router::new()
        .route(
            "/authorized_payments/{id}",
            get(|Path(id): Path<String>| async move {
                // No external reference: matched through the preapproval id
                Json(json!({
                    "id": id.parse::<i64>().unwrap(),
                    "preapproval_id": "pre_77",
                    "status": "processed",
                    "transaction_amount": 27.0,
                    "payment": { "id": 5555, "status": "approved", "status_detail": "accredited" },
                }))
            }),
        )
        .merge(mp_payment_api(json!({
            "id": 5555,
            "status": "approved",
            "external_reference": reference,
            "transaction_amount": 27.0,
        })));
    state.mercadopago = Some(mercadopago_client(&spawn_mock_gateway(api).await, Some(MP_WEBHOOK_SECRET)));

    let body = mp_notification("evt-authorized", "subscription_authorized_payment", "9001");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("9001"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Subscription billed");

    // Same charge, announced again as a plain payment under another event id
    let body = mp_notification("evt-payment", "payment", "5555");
    let (status, text) = post_webhook(test_app(state.clone()), "mercadopago", &mp_headers("5555"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Payment already recorded");

    {
        let conn = state.db.get().unwrap();
        let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        let attempts = queries::list_billing_attempts(&conn, &sub.id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].provider_payment_id.as_deref(), Some("5555"));
        assert!(attempts[0].order_id.is_some());
    }

    let statuses: Vec<_> = webhook_logs(&state).into_iter().map(|l| l.status).collect();
    assert!(statuses.contains(&WebhookLogStatus::Processed));
    assert!(statuses.contains(&WebhookLogStatus::Ignored));
}

// ============ Stripe ============

fn stripe_event(event_id: &str, kind: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": kind,
        "data": { "object": object },
    }))
    .unwrap()
}

async fn stripe_state(api: Router) -> AppState {
    let base = spawn_mock_gateway(api).await;
    let mut state = create_test_app_state();
    state.stripe = Some(stripe_client(&base, Some(STRIPE_WEBHOOK_SECRET)));
    state
}

#[tokio::test]
async fn test_stripe_payment_intent_succeeded_approves_order() {
    let state = stripe_state(Router::new()).await;
    let order = pending_order(&state, 1);
    let body = stripe_event(
        "evt_pi_1",
        "payment_intent.succeeded",
        json!({
            "id": "pi_123",
            "status": "succeeded",
            "amount": 1500,
            "metadata": { "external_reference": order.order.id },
        }),
    );

    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    // A late failure event for the same intent cannot undo the approval
    let late = stripe_event(
        "evt_pi_2",
        "payment_intent.payment_failed",
        json!({
            "id": "pi_123",
            "status": "requires_payment_method",
            "amount": 1500,
            "metadata": { "external_reference": order.order.id },
        }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&late), &late).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Stale payment status");

    let conn = state.db.get().unwrap();
    let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Approved);
    assert_eq!(stored.provider_payment_id.as_deref(), Some("pi_123"));
}

#[tokio::test]
async fn test_stripe_signature_checks() {
    let state = stripe_state(Router::new()).await;
    let body = stripe_event("evt_x", "customer.created", json!({ "id": "cus_1" }));

    let (status, _) = post_webhook(test_app(state.clone()), "stripe", &[], &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let forged = vec![(
        "stripe-signature",
        sign_stripe("whsec_someone_else", now(), &body).unwrap(),
    )];
    let (status, _) = post_webhook(test_app(state.clone()), "stripe", &forged, &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stale = vec![(
        "stripe-signature",
        sign_stripe(STRIPE_WEBHOOK_SECRET, now() - 3600, &body).unwrap(),
    )];
    let (status, _) = post_webhook(test_app(state.clone()), "stripe", &stale, &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, text) = post_webhook(test_app(state), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Unhandled event type");
}

#[tokio::test]
async fn test_stripe_first_subscription_checkout_saves_card() {
    let api = Router::new().route(
        "/v1/payment_intents/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({
                "id": id,
                "status": "succeeded",
                "amount": 2700,
                "customer": "cus_saved",
                "payment_method": "pm_saved",
            }))
        }),
    );
    let state = stripe_state(api).await;
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_test_subscription(&conn, "user_a", &product.product, "stripe")
    };

    let body = stripe_event(
        "evt_cs_1",
        "checkout.session.completed",
        json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_first",
            "amount_total": 2700,
            "customer": "cus_saved",
            "metadata": { "external_reference": sub.id },
        }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Subscription billed");

    let conn = state.db.get().unwrap();
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(stored.gateway_customer_id.as_deref(), Some("cus_saved"));
    assert_eq!(stored.gateway_payment_method_id.as_deref(), Some("pm_saved"));
    assert!(stored.next_billing_at.is_some());
}

#[tokio::test]
async fn test_stripe_unpaid_checkout_is_ignored() {
    let state = stripe_state(Router::new()).await;
    let order = pending_order(&state, 1);
    let body = stripe_event(
        "evt_cs_unpaid",
        "checkout.session.completed",
        json!({
            "id": "cs_test_2",
            "payment_status": "unpaid",
            "metadata": { "external_reference": order.order.id },
        }),
    );

    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Checkout not paid yet");

    let conn = state.db.get().unwrap();
    let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

/// A Stripe API that knows PaymentIntents belonging to one order.
fn stripe_intent_api(reference: String) -> Router {
    Router::new().route(
        "/v1/payment_intents/{id}",
        get(move |Path(id): Path<String>| {
            let reference = reference.clone();
            async move {
                Json(json!({
                    "id": id,
                    "status": "succeeded",
                    "amount": 1500,
                    "metadata": { "external_reference": reference },
                }))
            }
        }),
    )
}

async fn approve_with_intent(state: &AppState, order: &OrderWithItems, intent_id: &str) {
    let body = stripe_event(
        &format!("evt_ok_{}", intent_id),
        "payment_intent.succeeded",
        json!({
            "id": intent_id,
            "status": "succeeded",
            "amount": 1500,
            "metadata": { "external_reference": order.order.id },
        }),
    );
    let (_, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(text, "Order payment updated");
}

#[tokio::test]
async fn test_stripe_full_refund_cancels_order_and_partial_is_ignored() {
    let mut state = create_test_app_state();
    let order = pending_order(&state, 1);
    let base = spawn_mock_gateway(stripe_intent_api(order.order.id.clone())).await;
    state.stripe = Some(stripe_client(&base, Some(STRIPE_WEBHOOK_SECRET)));
    approve_with_intent(&state, &order, "pi_refund").await;

    let partial = stripe_event(
        "evt_refund_partial",
        "charge.refunded",
        json!({ "id": "ch_1", "payment_intent": "pi_refund", "refunded": false, "amount_refunded": 500 }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&partial), &partial).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Partial refund");
    {
        let conn = state.db.get().unwrap();
        let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Approved);
        assert_eq!(stored.status, OrderStatus::Processing);
    }

    let full = stripe_event(
        "evt_refund_full",
        "charge.refunded",
        json!({ "id": "ch_1", "payment_intent": "pi_refund", "refunded": true, "amount_refunded": 1500 }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&full), &full).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    let conn = state.db.get().unwrap();
    let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_stripe_dispute_charges_back_without_recalling_shipment() {
    let mut state = create_test_app_state();
    let order = pending_order(&state, 1);
    let base = spawn_mock_gateway(stripe_intent_api(order.order.id.clone())).await;
    state.stripe = Some(stripe_client(&base, Some(STRIPE_WEBHOOK_SECRET)));
    approve_with_intent(&state, &order, "pi_disputed").await;
    {
        let conn = state.db.get().unwrap();
        assert!(
            queries::update_order_status(&conn, &order.order.id, OrderStatus::Processing, OrderStatus::Shipped)
                .unwrap()
        );
    }

    let body = stripe_event(
        "evt_dispute",
        "charge.dispute.created",
        json!({
            "id": "dp_1",
            "charge": "ch_2",
            "payment_intent": "pi_disputed",
            "amount": 1500,
            "status": "needs_response",
        }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    let conn = state.db.get().unwrap();
    let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::ChargedBack);
    assert_eq!(stored.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn test_stripe_cancelled_intent_cancels_order_for_good() {
    let state = stripe_state(Router::new()).await;
    let order = pending_order(&state, 1);
    // Checkout Session expiry cancels the PaymentIntent behind it
    let body = stripe_event(
        "evt_pi_cancel",
        "payment_intent.canceled",
        json!({
            "id": "pi_expired",
            "status": "canceled",
            "amount": 1500,
            "metadata": { "external_reference": order.order.id },
        }),
    );
    let (status, text) = post_webhook(test_app(state.clone()), "stripe", &stripe_headers(&body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Order payment updated");

    {
        let conn = state.db.get().unwrap();
        let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Cancelled);
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }

    let (status, _) = send(
        test_app(state),
        "POST",
        "/checkout",
        None,
        Some(json!({ "order_id": order.order.id, "provider": "stripe" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

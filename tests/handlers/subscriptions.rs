//! Starting, pausing and cancelling recurring deliveries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Form, Json, Router};
use serde_json::{Value, json};

#[path = "../common/mod.rs"]
mod common;
use common::*;

fn subscribe_body(product_id: &str, provider: &str) -> Value {
    json!({
        "product_id": product_id,
        "quantity": 2,
        "frequency": "monthly",
        "provider": provider,
        "shipping_address": address_json(),
    })
}

fn seed_subscribable(state: &AppState) -> ProductWithVariants {
    let mut conn = state.db.get().unwrap();
    create_test_product(&mut conn, "Adult Dog Food", 1500, true)
}

#[tokio::test]
async fn test_subscribe_requires_sign_in() {
    let state = create_test_app_state();
    let product = seed_subscribable(&state);

    let (status, _) = send(
        test_app(state),
        "POST",
        "/subscriptions",
        None,
        Some(subscribe_body(&product.product.id, "stripe")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stripe_subscription_saves_card_at_discounted_price() {
    let captured: Arc<Mutex<Option<HashMap<String, String>>>> = Arc::default();
    let sink = captured.clone();
    let gateway = Router::new().route(
        "/v1/checkout/sessions",
        post(move |Form(form): Form<HashMap<String, String>>| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some(form);
                Json(json!({ "id": "cs_test_sub", "url": "https://checkout.stripe.test/cs_test_sub" }))
            }
        }),
    );
    let base = spawn_mock_gateway(gateway).await;

    let mut state = create_test_app_state();
    state.stripe = Some(stripe_client(&base, None));
    let product = seed_subscribable(&state);
    let token = token_for(&state, "user_a", "a@kibble.test");

    let (status, body) = send(
        test_app(state.clone()),
        "POST",
        "/subscriptions",
        Some(&token),
        Some(subscribe_body(&product.product.id, "stripe")),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["checkout_url"], "https://checkout.stripe.test/cs_test_sub");
    assert_eq!(body["subscription"]["status"], "pending");
    // 10% monthly discount on 1500, two bags
    assert_eq!(body["subscription"]["discount_pct"], 10);
    assert_eq!(body["subscription"]["amount_cents"], 2700);
    assert!(body["subscription"]["gateway_subscription_id"].is_null());

    let form = captured.lock().unwrap().clone().unwrap();
    let id = body["subscription"]["id"].as_str().unwrap();
    assert_eq!(form["metadata[external_reference]"], id);
    assert_eq!(form["payment_intent_data[setup_future_usage]"], "off_session");
    assert_eq!(form["line_items[0][price_data][unit_amount]"], "1350");
    assert_eq!(form["line_items[0][quantity]"], "2");

    let (_, mine) = send(test_app(state), "GET", "/me/subscriptions", Some(&token), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_mercadopago_subscription_stores_preapproval_id() {
    let captured: Arc<Mutex<Option<Value>>> = Arc::default();
    let sink = captured.clone();
    let gateway = Router::new().route(
        "/preapproval",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some(body);
                Json(json!({
                    "id": "preapproval_42",
                    "status": "pending",
                    "init_point": "https://mp.example/subscriptions/preapproval_42",
                }))
            }
        }),
    );
    let base = spawn_mock_gateway(gateway).await;

    let mut state = create_test_app_state();
    state.mercadopago = Some(mercadopago_client(&base, None));
    let product = seed_subscribable(&state);
    let token = token_for(&state, "user_a", "a@kibble.test");

    let (status, body) = send(
        test_app(state),
        "POST",
        "/subscriptions",
        Some(&token),
        Some(subscribe_body(&product.product.id, "mercadopago")),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["subscription"]["gateway_subscription_id"], "preapproval_42");
    assert_eq!(body["checkout_url"], "https://mp.example/subscriptions/preapproval_42");

    let sent = captured.lock().unwrap().clone().unwrap();
    assert_eq!(sent["external_reference"], body["subscription"]["id"]);
    assert_eq!(sent["payer_email"], "a@kibble.test");
    assert_eq!(sent["auto_recurring"]["frequency"], 1);
    assert_eq!(sent["auto_recurring"]["frequency_type"], "months");
    assert_eq!(sent["auto_recurring"]["transaction_amount"], 27.0);
}

#[tokio::test]
async fn test_gateway_failure_cancels_pending_subscription() {
    let gateway = Router::new().route(
        "/v1/checkout/sessions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_mock_gateway(gateway).await;

    let mut state = create_test_app_state();
    state.stripe = Some(stripe_client(&base, None));
    let product = seed_subscribable(&state);
    let token = token_for(&state, "user_a", "a@kibble.test");

    let (status, _) = send(
        test_app(state.clone()),
        "POST",
        "/subscriptions",
        Some(&token),
        Some(subscribe_body(&product.product.id, "stripe")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let conn = state.db.get().unwrap();
    let subs = queries::list_user_subscriptions(&conn, "user_a").unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn test_product_without_subscriptions_is_rejected() {
    let mut state = create_test_app_state();
    state.stripe = Some(stripe_client("http://127.0.0.1:9", None));
    let product = {
        let mut conn = state.db.get().unwrap();
        create_test_product(&mut conn, "Cat Treats", 500, false)
    };
    let token = token_for(&state, "user_a", "a@kibble.test");

    let (status, body) = send(
        test_app(state),
        "POST",
        "/subscriptions",
        Some(&token),
        Some(subscribe_body(&product.product.id, "stripe")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("ubscription"));
}

#[tokio::test]
async fn test_pause_resume_cancel_follow_transition_rules() {
    let state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_test_subscription(&conn, "user_a", &product.product, "stripe")
    };
    let token = token_for(&state, "user_a", "a@kibble.test");
    let uri = |action: &str| format!("/me/subscriptions/{}/{}", sub.id, action);

    // Pending subscriptions cannot be paused
    let (status, _) = send(test_app(state.clone()), "POST", &uri("pause"), Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    {
        let conn = state.db.get().unwrap();
        queries::update_subscription_status(
            &conn,
            &sub.id,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
        )
        .unwrap();
    }

    let (status, body) = send(test_app(state.clone()), "POST", &uri("pause"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, body) = send(test_app(state.clone()), "POST", &uri("resume"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = send(test_app(state.clone()), "POST", &uri("cancel"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert!(body["cancelled_at"].is_i64());

    // Cancelled is final
    let (status, _) = send(test_app(state.clone()), "POST", &uri("resume"), Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(test_app(state.clone()), "POST", &uri("explode"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Another customer cannot touch it
    let other = token_for(&state, "user_b", "b@kibble.test");
    let (status, _) = send(test_app(state), "GET", &format!("/me/subscriptions/{}", sub.id), Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pausing_mercadopago_subscription_updates_preapproval() {
    let captured: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
    let sink = captured.clone();
    let gateway = Router::new().route(
        "/preapproval/{id}",
        put(move |Path(id): Path<String>, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                let status = body["status"].clone();
                sink.lock().unwrap().push((id.clone(), body));
                Json(json!({ "id": id, "status": status }))
            }
        }),
    );
    let base = spawn_mock_gateway(gateway).await;

    let mut state = create_test_app_state();
    state.mercadopago = Some(mercadopago_client(&base, None));
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        let sub = create_test_subscription(&conn, "user_a", &product.product, "mercadopago");
        queries::set_gateway_subscription_id(&conn, &sub.id, "preapproval_7").unwrap();
        queries::update_subscription_status(
            &conn,
            &sub.id,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
        )
        .unwrap();
        sub
    };
    let token = token_for(&state, "user_a", "a@kibble.test");

    let (status, body) = send(
        test_app(state),
        "POST",
        &format!("/me/subscriptions/{}/pause", sub.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["status"], "paused");

    let calls = captured.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "preapproval_7");
    assert_eq!(calls[0].1["status"], "paused");
}

#[tokio::test]
async fn test_admin_subscription_view_includes_attempts() {
    let state = create_test_app_state();
    let token = admin_token(&state);
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        let sub = create_billable_subscription(&conn, "user_a", &product.product, now());
        queries::insert_billing_attempt(&conn, &sub.id, "stripe", Some("pi_1"), 2700, false, Some("card_declined"))
            .unwrap();
        sub
    };

    let (status, body) = send(
        test_app(state.clone()),
        "GET",
        &format!("/admin/subscriptions/{}", sub.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["billing_attempts"].as_array().unwrap().len(), 1);
    assert_eq!(body["billing_attempts"][0]["error"], "card_declined");

    let (status, body) = send(
        test_app(state.clone()),
        "PUT",
        &format!("/admin/subscriptions/{}/status", sub.id),
        Some(&token),
        Some(json!({ "status": "past_due" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "past_due");

    let (_, listed) = send(test_app(state), "GET", "/admin/subscriptions?status=past_due", Some(&token), None).await;
    assert_eq!(listed["total"], 1);
}

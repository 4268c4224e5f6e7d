//! Back-office routes: role checks, catalog management, fulfilment.

use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

const ADMIN_ROUTES: &[(&str, &str)] = &[
    ("GET", "/admin/products"),
    ("GET", "/admin/orders"),
    ("GET", "/admin/subscriptions"),
    ("GET", "/admin/webhook-logs"),
    ("GET", "/admin/stats"),
    ("GET", "/admin/schema"),
];

#[tokio::test]
async fn test_admin_routes_reject_anonymous_with_401() {
    let state = create_test_app_state();
    for (method, uri) in ADMIN_ROUTES {
        let (status, _) = send(test_app(state.clone()), method, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_admin_routes_reject_customers_with_403() {
    let state = create_test_app_state();
    let token = token_for(&state, "user_a", "a@kibble.test");
    for (method, uri) in ADMIN_ROUTES {
        let (status, _) = send(test_app(state.clone()), method, uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_product_lifecycle() {
    let state = create_test_app_state();
    let token = admin_token(&state);

    let (status, created) = send(
        test_app(state.clone()),
        "POST",
        "/admin/products",
        Some(&token),
        Some(json!({
            "name": "Adult Dog Food",
            "category": "dog",
            "price_cents": 1850000,
            "subscription_enabled": true,
            "monthly_discount_pct": 10,
            "variants": [{ "label": "3 kg", "price_cents": 1850000 }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", created);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["variants"].as_array().unwrap().len(), 1);

    let (status, updated) = send(
        test_app(state.clone()),
        "PUT",
        &format!("/admin/products/{}", id),
        Some(&token),
        Some(json!({ "price_cents": 1900000, "description": "Chicken and rice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["price_cents"], 1900000);
    assert_eq!(updated["description"], "Chicken and rice");

    let (status, variant) = send(
        test_app(state.clone()),
        "POST",
        &format!("/admin/products/{}/variants", id),
        Some(&token),
        Some(json!({ "label": "15 kg", "price_cents": 7900000 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        test_app(state.clone()),
        "DELETE",
        &format!("/admin/products/{}/variants/{}", id, variant["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        test_app(state.clone()),
        "DELETE",
        &format!("/admin/products/{}", id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Gone from the storefront, still listed for admins
    let (status, _) = send(test_app(state.clone()), "GET", &format!("/products/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = send(test_app(state), "GET", "/admin/products", Some(&token), None).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["items"][0]["active"], false);
    assert_eq!(listed["items"][0]["variants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_product_validation() {
    let state = create_test_app_state();
    let token = admin_token(&state);

    for body in [
        json!({ "name": "", "price_cents": 100 }),
        json!({ "name": "Food", "price_cents": -1 }),
        json!({ "name": "Food", "price_cents": 100, "weekly_discount_pct": 101 }),
    ] {
        let (status, _) = send(test_app(state.clone()), "POST", "/admin/products", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_order_status_follows_transition_rules() {
    let state = create_test_app_state();
    let token = admin_token(&state);
    let order = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, false);
        create_test_order(&mut conn, &product.product, 1, None)
    };
    let uri = format!("/admin/orders/{}/status", order.order.id);

    let (status, _) = send(test_app(state.clone()), "PUT", &uri, Some(&token), Some(json!({ "status": "shipped" }))).await;
    assert_eq!(status, StatusCode::CONFLICT, "pending orders cannot skip to shipped");

    for next in ["processing", "shipped", "delivered"] {
        let (status, body) = send(test_app(state.clone()), "PUT", &uri, Some(&token), Some(json!({ "status": next }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], next);
    }

    let (status, _) = send(test_app(state.clone()), "PUT", &uri, Some(&token), Some(json!({ "status": "cancelled" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, listed) = send(test_app(state), "GET", "/admin/orders?status=delivered", Some(&token), None).await;
    assert_eq!(listed["total"], 1);
}

#[tokio::test]
async fn test_role_change_and_stats() {
    let state = create_test_app_state();
    let token = admin_token(&state);
    {
        let conn = state.db.get().unwrap();
        ensure_profile(&conn, "user_b");
    }

    let (status, body) = send(
        test_app(state.clone()),
        "PUT",
        "/admin/profiles/user_b/role",
        Some(&token),
        Some(json!({ "role": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _) = send(
        test_app(state.clone()),
        "PUT",
        "/admin/profiles/nobody/role",
        Some(&token),
        Some(json!({ "role": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, stats) = send(test_app(state.clone()), "GET", "/admin/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["approved_revenue_cents"], 0);
    assert_eq!(stats["active_subscriptions"], 0);

    let (status, schema) = send(test_app(state), "GET", "/admin/schema", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["schema_version"], schema["latest_version"]);
    assert_eq!(schema["up_to_date"], true);
}

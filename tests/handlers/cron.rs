//! Scheduler-triggered billing endpoint.

use axum::http::StatusCode;

#[path = "../common/mod.rs"]
mod common;
use common::*;

#[tokio::test]
async fn test_cron_requires_secret() {
    let state = create_test_app_state();

    let (status, _) = send(test_app(state.clone()), "POST", "/cron/billing", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(test_app(state), "POST", "/cron/billing", Some("wrong-secret"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_unavailable_without_configured_secret() {
    let mut state = create_test_app_state();
    state.cron_secret = None;

    let (status, _) = send(test_app(state), "POST", "/cron/billing", Some(CRON_SECRET), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cron_with_nothing_due() {
    let state = create_test_app_state();
    {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        // Due next week
        create_billable_subscription(&conn, "user_a", &product.product, now() + 7 * 86_400);
    }

    for method in ["POST", "GET"] {
        let (status, body) = send(test_app(state.clone()), method, "/cron/billing", Some(CRON_SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], 0);
        assert_eq!(body["results"].as_array().unwrap().len(), 0);
    }
}

#[tokio::test]
async fn test_cron_records_errors_without_stripe() {
    let state = create_test_app_state();
    let sub = {
        let mut conn = state.db.get().unwrap();
        let product = create_test_product(&mut conn, "Adult Dog Food", 1500, true);
        create_billable_subscription(&conn, "user_a", &product.product, now() - 60)
    };

    let (status, body) = send(test_app(state.clone()), "POST", "/cron/billing", Some(CRON_SECRET), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["results"][0]["outcome"], "error");

    let conn = state.db.get().unwrap();
    let attempts = queries::list_billing_attempts(&conn, &sub.id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].succeeded);
    let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(stored.failed_attempts, 1);
    assert_eq!(stored.status, SubscriptionStatus::Active);
}

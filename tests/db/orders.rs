//! Order persistence: one order row plus its items, or nothing.

#[path = "../common/mod.rs"]
mod common;
use common::*;

fn count(conn: &rusqlite::Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_order_with_n_items_persists_one_order_and_n_items() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);
    let treats = create_test_product(&mut conn, "Dental Chews", 450, false);

    let lines = queries::price_lines(
        &conn,
        &[
            CreateOrderItem {
                product_id: kibble.product.id.clone(),
                variant_id: None,
                quantity: 2,
            },
            CreateOrderItem {
                product_id: kibble.product.id.clone(),
                variant_id: Some(kibble.variants[0].id.clone()),
                quantity: 1,
            },
            CreateOrderItem {
                product_id: treats.product.id.clone(),
                variant_id: None,
                quantity: 3,
            },
        ],
    )
    .unwrap();

    let order = NewOrder {
        user_id: None,
        subscription_id: None,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_provider: None,
        provider_payment_id: None,
        shipping_cents: 900,
        currency: "ars".to_string(),
        customer_email: "buyer@kibble.test".to_string(),
        shipping_address: test_address(),
        lines,
    };
    let created = queries::create_order(&mut conn, &order).unwrap();

    assert_eq!(count(&conn, "orders"), 1);
    assert_eq!(count(&conn, "order_items"), 3);
    assert_eq!(created.items.len(), 3);
    // 2 x 1500 + 1 x 6000 (variant) + 3 x 450
    assert_eq!(created.order.subtotal_cents, 10_350);
    assert_eq!(created.order.total_cents, 11_250);
    assert_eq!(created.items[1].variant_label.as_deref(), Some("15 kg"));
}

#[test]
fn test_unknown_product_fails_pricing() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);

    let result = queries::price_lines(
        &conn,
        &[
            CreateOrderItem {
                product_id: kibble.product.id.clone(),
                variant_id: None,
                quantity: 1,
            },
            CreateOrderItem {
                product_id: "kb_prod_00000000000000000000000000000000".to_string(),
                variant_id: None,
                quantity: 1,
            },
        ],
    );

    assert!(matches!(result, Err(kibble::error::AppError::BadRequest(_))));
    assert_eq!(count(&conn, "orders"), 0);
}

#[test]
fn test_failed_item_insert_rolls_back_whole_order() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);

    let good = PricedLine {
        product_id: kibble.product.id.clone(),
        variant_id: None,
        product_name: kibble.product.name.clone(),
        variant_label: None,
        quantity: 1,
        unit_price_cents: 1500,
    };
    // Violates the order_items -> products foreign key
    let dangling = PricedLine {
        product_id: "kb_prod_ffffffffffffffffffffffffffffffff".to_string(),
        ..good.clone()
    };

    let order = NewOrder {
        user_id: None,
        subscription_id: None,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_provider: None,
        provider_payment_id: None,
        shipping_cents: 0,
        currency: "ars".to_string(),
        customer_email: "buyer@kibble.test".to_string(),
        shipping_address: test_address(),
        lines: vec![good, dangling],
    };

    assert!(queries::create_order(&mut conn, &order).is_err());
    assert_eq!(count(&conn, "orders"), 0);
    assert_eq!(count(&conn, "order_items"), 0);
}

#[test]
fn test_inactive_variant_cannot_be_ordered() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);
    let variant_id = kibble.variants[0].id.clone();
    assert!(queries::deactivate_variant(&conn, &kibble.product.id, &variant_id).unwrap());

    let result = queries::resolve_item(&conn, &kibble.product.id, Some(&variant_id));
    assert!(result.is_err(), "deactivated variant should not resolve");
}

#[test]
fn test_order_status_update_is_compare_and_set() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);
    let order = create_test_order(&mut conn, &kibble.product, 1, None);

    assert!(
        queries::update_order_status(&conn, &order.order.id, OrderStatus::Pending, OrderStatus::Processing)
            .unwrap()
    );
    // Second writer still believes the order is pending
    assert!(
        !queries::update_order_status(&conn, &order.order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .unwrap()
    );

    let stored = queries::get_order(&conn, &order.order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
}

#[test]
fn test_user_orders_are_isolated() {
    let mut conn = setup_test_db();
    let kibble = create_test_product(&mut conn, "Adult Dog Food", 1500, false);
    let mine = create_test_order(&mut conn, &kibble.product, 1, Some("user_a"));
    create_test_order(&mut conn, &kibble.product, 1, Some("user_b"));

    let (orders, total) = queries::list_user_orders(&conn, "user_a", 20, 0).unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].id, mine.order.id);

    assert!(
        queries::get_user_order(&conn, "user_b", &mine.order.id)
            .unwrap()
            .is_none()
    );
}

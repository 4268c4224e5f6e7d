//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` against the column lists below, so every
//! SELECT for a table uses the same column order.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a JSON text column.
fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e)))
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROFILE_COLS: &str = "id, email, full_name, phone, role, created_at, updated_at";

pub const PRODUCT_COLS: &str = "id, name, description, category, price_cents, image_url, active, subscription_enabled, weekly_discount_pct, biweekly_discount_pct, monthly_discount_pct, bimonthly_discount_pct, created_at, updated_at";

pub const VARIANT_COLS: &str =
    "id, product_id, label, price_cents, attributes, active, created_at";

pub const ORDER_COLS: &str = "id, user_id, subscription_id, status, payment_status, payment_provider, provider_payment_id, subtotal_cents, shipping_cents, total_cents, currency, customer_email, shipping_address, created_at, updated_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, product_id, variant_id, product_name, variant_label, quantity, unit_price_cents";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, product_id, variant_id, quantity, frequency, unit_price_cents, discount_pct, amount_cents, currency, status, provider, gateway_subscription_id, gateway_customer_id, gateway_payment_method_id, next_billing_at, last_billed_at, failed_attempts, customer_email, shipping_address, cancelled_at, created_at, updated_at";

pub const BILLING_ATTEMPT_COLS: &str = "id, subscription_id, provider, provider_payment_id, amount_cents, succeeded, error, order_id, created_at";

pub const WEBHOOK_LOG_COLS: &str = "id, provider, event_id, event_type, resource_id, status, message, payload, duration_ms, created_at";

// ============ FromRow Implementations ============

impl FromRow for Profile {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Profile {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            phone: row.get(3)?,
            role: parse_enum(row, 4, "role")?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            price_cents: row.get(4)?,
            image_url: row.get(5)?,
            active: row.get::<_, i32>(6)? != 0,
            subscription_enabled: row.get::<_, i32>(7)? != 0,
            weekly_discount_pct: row.get(8)?,
            biweekly_discount_pct: row.get(9)?,
            monthly_discount_pct: row.get(10)?,
            bimonthly_discount_pct: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for ProductVariant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductVariant {
            id: row.get(0)?,
            product_id: row.get(1)?,
            label: row.get(2)?,
            price_cents: row.get(3)?,
            attributes: parse_json(row, 4)?,
            active: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            subscription_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            payment_status: parse_enum(row, 4, "payment_status")?,
            payment_provider: row.get(5)?,
            provider_payment_id: row.get(6)?,
            subtotal_cents: row.get(7)?,
            shipping_cents: row.get(8)?,
            total_cents: row.get(9)?,
            currency: row.get(10)?,
            customer_email: row.get(11)?,
            shipping_address: parse_json(row, 12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            variant_id: row.get(3)?,
            product_name: row.get(4)?,
            variant_label: row.get(5)?,
            quantity: row.get(6)?,
            unit_price_cents: row.get(7)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            product_id: row.get(2)?,
            variant_id: row.get(3)?,
            quantity: row.get(4)?,
            frequency: parse_enum(row, 5, "frequency")?,
            unit_price_cents: row.get(6)?,
            discount_pct: row.get(7)?,
            amount_cents: row.get(8)?,
            currency: row.get(9)?,
            status: parse_enum(row, 10, "status")?,
            provider: row.get(11)?,
            gateway_subscription_id: row.get(12)?,
            gateway_customer_id: row.get(13)?,
            gateway_payment_method_id: row.get(14)?,
            next_billing_at: row.get(15)?,
            last_billed_at: row.get(16)?,
            failed_attempts: row.get(17)?,
            customer_email: row.get(18)?,
            shipping_address: parse_json(row, 19)?,
            cancelled_at: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }
}

impl FromRow for BillingAttempt {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(BillingAttempt {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            provider: row.get(2)?,
            provider_payment_id: row.get(3)?,
            amount_cents: row.get(4)?,
            succeeded: row.get::<_, i32>(5)? != 0,
            error: row.get(6)?,
            order_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_id: row.get(2)?,
            event_type: row.get(3)?,
            resource_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            message: row.get(6)?,
            payload: row.get(7)?,
            duration_ms: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

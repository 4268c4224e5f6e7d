use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};

use crate::error::{AppError, Result, msg};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    BILLING_ATTEMPT_COLS, FromRow, ORDER_COLS, ORDER_ITEM_COLS, PRODUCT_COLS, PROFILE_COLS,
    SUBSCRIPTION_COLS, VARIANT_COLS, WEBHOOK_LOG_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    /// Execute the update and return the updated row.
    /// Returns None if no rows matched. With no fields set, returns the current row.
    fn execute_returning<T: FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return query_one(
                conn,
                &format!("SELECT {} FROM {} WHERE id = ?1", returning_cols, self.table),
                &[&self.id],
            );
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn count(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

// ============ Profiles ============

pub fn get_profile(conn: &Connection, id: &str) -> Result<Option<Profile>> {
    query_one(
        conn,
        &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLS),
        &[&id],
    )
}

/// Create the profile on first sight of a token, keeping the email in sync afterwards.
///
/// A matching `bootstrap_admin_email` makes the profile an admin; it never demotes.
pub fn upsert_profile(
    conn: &Connection,
    id: &str,
    email: &str,
    bootstrap_admin_email: Option<&str>,
) -> Result<Profile> {
    let email = email.trim().to_lowercase();
    let role = match bootstrap_admin_email {
        Some(admin) if admin == email => Role::Admin,
        _ => Role::User,
    };
    let now = now();

    conn.query_row(
        &format!(
            "INSERT INTO profiles (id, email, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                role = CASE WHEN excluded.role = 'admin' THEN 'admin' ELSE profiles.role END,
                updated_at = CASE WHEN profiles.email != excluded.email
                    THEN excluded.updated_at ELSE profiles.updated_at END
             RETURNING {}",
            PROFILE_COLS
        ),
        params![id, &email, role.as_str(), now],
        Profile::from_row,
    )
    .map_err(Into::into)
}

pub fn update_profile(conn: &Connection, id: &str, input: &UpdateProfile) -> Result<Option<Profile>> {
    UpdateBuilder::new("profiles", id)
        .with_updated_at()
        .set_opt("full_name", input.full_name.as_ref().map(|s| s.trim().to_string()))
        .set_opt("phone", input.phone.as_ref().map(|s| s.trim().to_string()))
        .execute_returning(conn, PROFILE_COLS)
}

pub fn set_profile_role(conn: &Connection, id: &str, role: Role) -> Result<Option<Profile>> {
    UpdateBuilder::new("profiles", id)
        .with_updated_at()
        .set("role", role.as_str().to_string())
        .execute_returning(conn, PROFILE_COLS)
}

/// Promote every profile with this email. Returns how many changed.
pub fn grant_admin_by_email(conn: &Connection, email: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE profiles SET role = 'admin', updated_at = ?1 WHERE email = ?2 AND role != 'admin'",
        params![now(), email.trim().to_lowercase()],
    )?;
    Ok(updated)
}

// ============ Products ============

/// Create a product and its initial variants in one transaction.
pub fn create_product(conn: &mut Connection, input: &CreateProduct) -> Result<ProductWithVariants> {
    let tx = conn.transaction()?;
    let id = EntityType::Product.gen_id();
    let now = now();

    let product = tx.query_row(
        &format!(
            "INSERT INTO products (id, name, description, category, price_cents, image_url,
                active, subscription_enabled, weekly_discount_pct, biweekly_discount_pct,
                monthly_discount_pct, bimonthly_discount_pct, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             RETURNING {}",
            PRODUCT_COLS
        ),
        params![
            &id,
            input.name.trim(),
            &input.description,
            &input.category,
            input.price_cents,
            &input.image_url,
            input.subscription_enabled as i32,
            input.weekly_discount_pct,
            input.biweekly_discount_pct,
            input.monthly_discount_pct,
            input.bimonthly_discount_pct,
            now,
        ],
        Product::from_row,
    )?;

    let mut variants = Vec::with_capacity(input.variants.len());
    for variant in &input.variants {
        variants.push(create_variant(&tx, &id, variant)?);
    }

    tx.commit()?;
    Ok(ProductWithVariants { product, variants })
}

pub fn get_product(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn get_active_product(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE id = ?1 AND active = 1",
            PRODUCT_COLS
        ),
        &[&id],
    )
}

/// List products matching `filters`, newest first. Returns (page, total).
pub fn list_products(
    conn: &Connection,
    filters: &ProductFilters,
    include_inactive: bool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Product>, i64)> {
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !include_inactive {
        conditions.push("active = 1".to_string());
    }
    if let Some(ref category) = filters.category {
        values.push(category.clone().into());
        conditions.push(format!("category = ?{}", values.len()));
    }
    if let Some(ref search) = filters.search
        && !search.trim().is_empty()
    {
        values.push(format!("%{}%", search.trim().to_lowercase()).into());
        conditions.push(format!("LOWER(name) LIKE ?{}", values.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM products {}", where_clause),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM products {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
        PRODUCT_COLS,
        where_clause,
        values.len() + 1,
        values.len() + 2
    );
    values.push(limit.into());
    values.push(offset.into());

    let mut stmt = conn.prepare(&sql)?;
    let products = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), Product::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((products, total))
}

pub fn list_variants(
    conn: &Connection,
    product_id: &str,
    active_only: bool,
) -> Result<Vec<ProductVariant>> {
    let filter = if active_only { " AND active = 1" } else { "" };
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_variants WHERE product_id = ?1{} ORDER BY price_cents, created_at",
            VARIANT_COLS, filter
        ),
        &[&product_id],
    )
}

/// Attach variants to each product.
pub fn with_variants(
    conn: &Connection,
    products: Vec<Product>,
    active_only: bool,
) -> Result<Vec<ProductWithVariants>> {
    products
        .into_iter()
        .map(|product| {
            let variants = list_variants(conn, &product.id, active_only)?;
            Ok(ProductWithVariants { product, variants })
        })
        .collect()
}

pub fn update_product(conn: &Connection, id: &str, input: &UpdateProduct) -> Result<Option<Product>> {
    let mut builder = UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("name", input.name.as_ref().map(|s| s.trim().to_string()))
        .set_opt("price_cents", input.price_cents)
        .set_opt("active", input.active.map(|b| b as i32))
        .set_opt("subscription_enabled", input.subscription_enabled.map(|b| b as i32))
        .set_opt("weekly_discount_pct", input.weekly_discount_pct)
        .set_opt("biweekly_discount_pct", input.biweekly_discount_pct)
        .set_opt("monthly_discount_pct", input.monthly_discount_pct)
        .set_opt("bimonthly_discount_pct", input.bimonthly_discount_pct);

    if let Some(ref description) = input.description {
        builder = builder.set_nullable("description", description.clone());
    }
    if let Some(ref category) = input.category {
        builder = builder.set_nullable("category", category.clone());
    }
    if let Some(ref image_url) = input.image_url {
        builder = builder.set_nullable("image_url", image_url.clone());
    }

    builder.execute_returning(conn, PRODUCT_COLS)
}

/// Hide a product from the storefront. Order history keeps referencing it.
pub fn deactivate_product(conn: &Connection, id: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE products SET active = 0, updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(updated > 0)
}

pub fn create_variant(
    conn: &Connection,
    product_id: &str,
    input: &CreateVariant,
) -> Result<ProductVariant> {
    let id = EntityType::Variant.gen_id();
    conn.query_row(
        &format!(
            "INSERT INTO product_variants (id, product_id, label, price_cents, attributes, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             RETURNING {}",
            VARIANT_COLS
        ),
        params![
            &id,
            product_id,
            input.label.trim(),
            input.price_cents,
            to_json(&input.attributes)?,
            now()
        ],
        ProductVariant::from_row,
    )
    .map_err(Into::into)
}

pub fn get_variant(conn: &Connection, id: &str) -> Result<Option<ProductVariant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM product_variants WHERE id = ?1", VARIANT_COLS),
        &[&id],
    )
}

pub fn deactivate_variant(conn: &Connection, product_id: &str, variant_id: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE product_variants SET active = 0 WHERE id = ?1 AND product_id = ?2",
        params![variant_id, product_id],
    )?;
    Ok(updated > 0)
}

/// Resolved price for a product, or one of its variants.
pub struct ResolvedItem {
    pub product: Product,
    pub variant: Option<ProductVariant>,
}

impl ResolvedItem {
    pub fn unit_price_cents(&self) -> i64 {
        self.variant
            .as_ref()
            .map(|v| v.price_cents)
            .unwrap_or(self.product.price_cents)
    }
}

/// Look up an active product (and variant, when given) for purchase.
pub fn resolve_item(
    conn: &Connection,
    product_id: &str,
    variant_id: Option<&str>,
) -> Result<ResolvedItem> {
    let product = get_active_product(conn, product_id)?.ok_or_else(|| {
        AppError::BadRequest(format!("{}: {}", msg::PRODUCT_NOT_FOUND, product_id))
    })?;

    let variant = match variant_id {
        Some(variant_id) => {
            let variant = get_variant(conn, variant_id)?
                .filter(|v| v.product_id == product.id && v.active)
                .ok_or_else(|| {
                    AppError::BadRequest(format!("{}: {}", msg::VARIANT_NOT_FOUND, variant_id))
                })?;
            Some(variant)
        }
        None => None,
    };

    Ok(ResolvedItem { product, variant })
}

/// Price every requested line from the catalog.
pub fn price_lines(conn: &Connection, items: &[CreateOrderItem]) -> Result<Vec<PricedLine>> {
    items
        .iter()
        .map(|item| {
            let resolved = resolve_item(conn, &item.product_id, item.variant_id.as_deref())?;
            Ok(PricedLine {
                unit_price_cents: resolved.unit_price_cents(),
                product_id: resolved.product.id,
                variant_id: resolved.variant.as_ref().map(|v| v.id.clone()),
                product_name: resolved.product.name,
                variant_label: resolved.variant.map(|v| v.label),
                quantity: item.quantity,
            })
        })
        .collect()
}

// ============ Orders ============

/// Insert an order and all its items in one transaction.
pub fn create_order(conn: &mut Connection, input: &NewOrder) -> Result<OrderWithItems> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let order = insert_order(&tx, input)?;
    tx.commit()?;
    Ok(order)
}

/// Insert an order and its items on a connection the caller already holds a
/// transaction on.
pub fn insert_order(conn: &Connection, input: &NewOrder) -> Result<OrderWithItems> {
    if input.lines.is_empty() {
        return Err(AppError::BadRequest(msg::NO_ITEMS.into()));
    }

    let id = EntityType::Order.gen_id();
    let now = now();
    let subtotal = input.subtotal_cents();
    let total = subtotal + input.shipping_cents;

    let order = conn.query_row(
        &format!(
            "INSERT INTO orders (id, user_id, subscription_id, status, payment_status,
                payment_provider, provider_payment_id, subtotal_cents, shipping_cents, total_cents,
                currency, customer_email, shipping_address, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             RETURNING {}",
            ORDER_COLS
        ),
        params![
            &id,
            &input.user_id,
            &input.subscription_id,
            input.status.as_str(),
            input.payment_status.as_str(),
            &input.payment_provider,
            &input.provider_payment_id,
            subtotal,
            input.shipping_cents,
            total,
            &input.currency,
            input.customer_email.trim().to_lowercase(),
            to_json(&input.shipping_address)?,
            now,
        ],
        Order::from_row,
    )?;

    let mut items = Vec::with_capacity(input.lines.len());
    {
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO order_items (id, order_id, product_id, variant_id, product_name,
                variant_label, quantity, unit_price_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING {}",
            ORDER_ITEM_COLS
        ))?;
        for line in &input.lines {
            let item = stmt.query_row(
                params![
                    EntityType::OrderItem.gen_id(),
                    &id,
                    &line.product_id,
                    &line.variant_id,
                    &line.product_name,
                    &line.variant_label,
                    line.quantity,
                    line.unit_price_cents,
                ],
                OrderItem::from_row,
            )?;
            items.push(item);
        }
    }

    Ok(OrderWithItems { order, items })
}

pub fn get_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY rowid",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

pub fn get_order_with_items(conn: &Connection, id: &str) -> Result<Option<OrderWithItems>> {
    let Some(order) = get_order(conn, id)? else {
        return Ok(None);
    };
    let items = list_order_items(conn, &order.id)?;
    Ok(Some(OrderWithItems { order, items }))
}

/// The order a gateway payment settled (subscription deliveries carry no reference of their own).
pub fn get_order_by_provider_payment(
    conn: &Connection,
    provider: &str,
    provider_payment_id: &str,
) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE payment_provider = ?1 AND provider_payment_id = ?2",
            ORDER_COLS
        ),
        &[&provider, &provider_payment_id],
    )
}

/// A user's own order. Someone else's order is indistinguishable from a missing one.
pub fn get_user_order(conn: &Connection, user_id: &str, id: &str) -> Result<Option<OrderWithItems>> {
    let order: Option<Order> = query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE id = ?1 AND user_id = ?2",
            ORDER_COLS
        ),
        &[&id, &user_id],
    )?;
    match order {
        Some(order) => {
            let items = list_order_items(conn, &order.id)?;
            Ok(Some(OrderWithItems { order, items }))
        }
        None => Ok(None),
    }
}

pub fn list_user_orders(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64)> {
    let total = count(
        conn,
        "SELECT COUNT(*) FROM orders WHERE user_id = ?1",
        &[&user_id],
    )?;
    let orders = query_all(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
            ORDER_COLS
        ),
        &[&user_id, &limit, &offset],
    )?;
    Ok((orders, total))
}

pub fn list_orders(
    conn: &Connection,
    filters: &OrderFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64)> {
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filters.status {
        values.push(status.as_str().to_string().into());
        conditions.push(format!("status = ?{}", values.len()));
    }
    if let Some(payment_status) = filters.payment_status {
        values.push(payment_status.as_str().to_string().into());
        conditions.push(format!("payment_status = ?{}", values.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM orders {}", where_clause),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM orders {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
        ORDER_COLS,
        where_clause,
        values.len() + 1,
        values.len() + 2
    );
    values.push(limit.into());
    values.push(offset.into());

    let mut stmt = conn.prepare(&sql)?;
    let orders = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), Order::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((orders, total))
}

/// Remember which gateway the buyer was sent to.
pub fn set_order_payment_provider(conn: &Connection, id: &str, provider: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE orders SET payment_provider = ?1, updated_at = ?2 WHERE id = ?3",
        params![provider, now(), id],
    )?;
    Ok(updated > 0)
}

/// Compare-and-set the fulfilment status. Returns false if the order moved meanwhile.
pub fn update_order_status(
    conn: &Connection,
    id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now(), id, from.as_str()],
    )?;
    Ok(updated > 0)
}

/// Compare-and-set the payment status, optionally moving fulfilment with it.
pub fn update_order_payment(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    provider: &str,
    provider_payment_id: Option<&str>,
    order_status: Option<OrderStatus>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE orders SET
            payment_status = ?1,
            payment_provider = ?2,
            provider_payment_id = COALESCE(?3, provider_payment_id),
            status = COALESCE(?4, status),
            updated_at = ?5
         WHERE id = ?6 AND payment_status = ?7",
        params![
            to.as_str(),
            provider,
            provider_payment_id,
            order_status.map(|s| s.as_str()),
            now(),
            id,
            from.as_str()
        ],
    )?;
    Ok(updated > 0)
}

// ============ Subscriptions ============

pub fn create_subscription(conn: &Connection, input: &NewSubscription) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let now = now();
    conn.query_row(
        &format!(
            "INSERT INTO subscriptions (id, user_id, product_id, variant_id, quantity, frequency,
                unit_price_cents, discount_pct, amount_cents, currency, status, provider,
                customer_email, shipping_address, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?12, ?13, ?14, ?14)
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![
            &id,
            &input.user_id,
            &input.product_id,
            &input.variant_id,
            input.quantity,
            input.frequency.as_str(),
            input.unit_price_cents,
            input.discount_pct,
            input.amount_cents,
            &input.currency,
            &input.provider,
            input.customer_email.trim().to_lowercase(),
            to_json(&input.shipping_address)?,
            now,
        ],
        Subscription::from_row,
    )
    .map_err(Into::into)
}

pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

pub fn get_user_subscription(
    conn: &Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE id = ?1 AND user_id = ?2",
            SUBSCRIPTION_COLS
        ),
        &[&id, &user_id],
    )
}

pub fn get_subscription_by_gateway_id(
    conn: &Connection,
    provider: &str,
    gateway_subscription_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE provider = ?1 AND gateway_subscription_id = ?2",
            SUBSCRIPTION_COLS
        ),
        &[&provider, &gateway_subscription_id],
    )
}

pub fn list_user_subscriptions(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY created_at DESC, id",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn list_subscriptions(
    conn: &Connection,
    filters: &SubscriptionFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Subscription>, i64)> {
    match filters.status {
        Some(status) => {
            let status = status.as_str();
            let total = count(
                conn,
                "SELECT COUNT(*) FROM subscriptions WHERE status = ?1",
                &[&status],
            )?;
            let subs = query_all(
                conn,
                &format!(
                    "SELECT {} FROM subscriptions WHERE status = ?1
                     ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
                    SUBSCRIPTION_COLS
                ),
                &[&status, &limit, &offset],
            )?;
            Ok((subs, total))
        }
        None => {
            let total = count(conn, "SELECT COUNT(*) FROM subscriptions", &[])?;
            let subs = query_all(
                conn,
                &format!(
                    "SELECT {} FROM subscriptions ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2",
                    SUBSCRIPTION_COLS
                ),
                &[&limit, &offset],
            )?;
            Ok((subs, total))
        }
    }
}

/// Locally billed subscriptions whose period has come due.
pub fn list_due_subscriptions(conn: &Connection, now: i64, limit: i64) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions
             WHERE status = 'active'
               AND gateway_subscription_id IS NULL
               AND next_billing_at IS NOT NULL
               AND next_billing_at <= ?1
             ORDER BY next_billing_at, id
             LIMIT ?2",
            SUBSCRIPTION_COLS
        ),
        &[&now, &limit],
    )
}

pub fn set_gateway_subscription_id(
    conn: &Connection,
    id: &str,
    gateway_subscription_id: &str,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE subscriptions SET gateway_subscription_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![gateway_subscription_id, now(), id],
    )?;
    Ok(updated > 0)
}

/// Compare-and-set the subscription status. Cancelling stamps `cancelled_at`.
pub fn update_subscription_status(
    conn: &Connection,
    id: &str,
    from: SubscriptionStatus,
    to: SubscriptionStatus,
) -> Result<bool> {
    let now = now();
    let cancelled_at = (to == SubscriptionStatus::Cancelled).then_some(now);
    let updated = conn.execute(
        "UPDATE subscriptions SET
            status = ?1,
            cancelled_at = COALESCE(?2, cancelled_at),
            updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![to.as_str(), cancelled_at, now, id, from.as_str()],
    )?;
    Ok(updated > 0)
}

/// Set the next charge date, as reported by a gateway that bills on its own.
pub fn set_subscription_next_billing(conn: &Connection, id: &str, next_billing_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE subscriptions SET next_billing_at = ?1, updated_at = ?2 WHERE id = ?3",
        params![next_billing_at, now(), id],
    )?;
    Ok(())
}

/// Record a paid period: reset failures, move the schedule, keep the saved card.
pub fn mark_subscription_billed(
    conn: &Connection,
    id: &str,
    billed_at: i64,
    next_billing_at: i64,
    gateway_customer_id: Option<&str>,
    gateway_payment_method_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE subscriptions SET
            last_billed_at = ?1,
            next_billing_at = ?2,
            failed_attempts = 0,
            gateway_customer_id = COALESCE(?3, gateway_customer_id),
            gateway_payment_method_id = COALESCE(?4, gateway_payment_method_id),
            updated_at = ?5
         WHERE id = ?6",
        params![
            billed_at,
            next_billing_at,
            gateway_customer_id,
            gateway_payment_method_id,
            now(),
            id
        ],
    )?;
    Ok(())
}

/// Count a failed charge. Returns the new consecutive failure count.
pub fn increment_failed_attempts(conn: &Connection, id: &str) -> Result<i64> {
    conn.query_row(
        "UPDATE subscriptions SET failed_attempts = failed_attempts + 1, updated_at = ?1
         WHERE id = ?2 RETURNING failed_attempts",
        params![now(), id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Record a billing attempt. Returns None when this gateway payment was
/// already recorded.
pub fn insert_billing_attempt(
    conn: &Connection,
    subscription_id: &str,
    provider: &str,
    provider_payment_id: Option<&str>,
    amount_cents: i64,
    succeeded: bool,
    error: Option<&str>,
) -> Result<Option<BillingAttempt>> {
    conn.query_row(
        &format!(
            "INSERT OR IGNORE INTO billing_attempts (id, subscription_id, provider,
                provider_payment_id, amount_cents, succeeded, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING {}",
            BILLING_ATTEMPT_COLS
        ),
        params![
            EntityType::BillingAttempt.gen_id(),
            subscription_id,
            provider,
            provider_payment_id,
            amount_cents,
            succeeded as i32,
            error,
            now()
        ],
        BillingAttempt::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn set_billing_attempt_order(conn: &Connection, attempt_id: &str, order_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE billing_attempts SET order_id = ?1 WHERE id = ?2",
        params![order_id, attempt_id],
    )?;
    Ok(())
}

pub fn list_billing_attempts(conn: &Connection, subscription_id: &str) -> Result<Vec<BillingAttempt>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM billing_attempts WHERE subscription_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            BILLING_ATTEMPT_COLS
        ),
        &[&subscription_id],
    )
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
///
/// Uses INSERT OR IGNORE - if the (provider, event_id) pair already exists,
/// the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Gateways stop retrying after a few days; older dedupe rows are dead weight.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Webhook Logs ============

pub fn insert_webhook_log(conn: &Connection, log: &NewWebhookLog<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO webhook_logs (id, provider, event_id, event_type, resource_id, status,
            message, payload, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            EntityType::WebhookLog.gen_id(),
            log.provider,
            log.event_id,
            log.event_type,
            log.resource_id,
            log.status.as_str(),
            log.message,
            log.payload,
            log.duration_ms,
            now()
        ],
    )?;
    Ok(())
}

pub fn list_webhook_logs(
    conn: &Connection,
    filters: &WebhookLogFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<WebhookLog>, i64)> {
    match filters.provider.as_deref() {
        Some(provider) => {
            let total = count(
                conn,
                "SELECT COUNT(*) FROM webhook_logs WHERE provider = ?1",
                &[&provider],
            )?;
            let logs = query_all(
                conn,
                &format!(
                    "SELECT {} FROM webhook_logs WHERE provider = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                    WEBHOOK_LOG_COLS
                ),
                &[&provider, &limit, &offset],
            )?;
            Ok((logs, total))
        }
        None => {
            let total = count(conn, "SELECT COUNT(*) FROM webhook_logs", &[])?;
            let logs = query_all(
                conn,
                &format!(
                    "SELECT {} FROM webhook_logs ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                    WEBHOOK_LOG_COLS
                ),
                &[&limit, &offset],
            )?;
            Ok((logs, total))
        }
    }
}

pub fn purge_old_webhook_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_logs WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Dashboard ============

pub fn get_store_stats(conn: &Connection) -> Result<StoreStats> {
    let mut orders_by_status = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM orders GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            orders_by_status.insert(status, n);
        }
    }

    let mut subscriptions_by_status = BTreeMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM subscriptions GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            subscriptions_by_status.insert(status, n);
        }
    }

    let approved_revenue_cents = count(
        conn,
        "SELECT COALESCE(SUM(total_cents), 0) FROM orders WHERE payment_status = 'approved'",
        &[],
    )?;
    let active_products = count(conn, "SELECT COUNT(*) FROM products WHERE active = 1", &[])?;

    Ok(StoreStats {
        active_subscriptions: subscriptions_by_status.get("active").copied().unwrap_or(0),
        orders_by_status,
        subscriptions_by_status,
        approved_revenue_cents,
        active_products,
    })
}

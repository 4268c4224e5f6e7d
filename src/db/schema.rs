use rusqlite::Connection;

use super::migrations;

/// Baseline schema, applied by migration 1.
pub(super) const BASELINE: &str = r#"
        -- Profiles (id = auth provider user id)
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            full_name TEXT,
            phone TEXT,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_profiles_email ON profiles(email);

        -- Catalog
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            image_url TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            subscription_enabled INTEGER NOT NULL DEFAULT 0,
            weekly_discount_pct INTEGER NOT NULL DEFAULT 0 CHECK (weekly_discount_pct BETWEEN 0 AND 100),
            biweekly_discount_pct INTEGER NOT NULL DEFAULT 0 CHECK (biweekly_discount_pct BETWEEN 0 AND 100),
            monthly_discount_pct INTEGER NOT NULL DEFAULT 0 CHECK (monthly_discount_pct BETWEEN 0 AND 100),
            bimonthly_discount_pct INTEGER NOT NULL DEFAULT 0 CHECK (bimonthly_discount_pct BETWEEN 0 AND 100),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_active ON products(active, category);

        CREATE TABLE IF NOT EXISTS product_variants (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            label TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            attributes TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_variants_product ON product_variants(product_id);

        -- Orders (id doubles as the gateway external reference)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT REFERENCES profiles(id) ON DELETE SET NULL,
            subscription_id TEXT REFERENCES subscriptions(id) ON DELETE SET NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'shipped', 'delivered', 'cancelled')),
            payment_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (payment_status IN ('pending', 'in_process', 'approved', 'rejected', 'cancelled', 'refunded', 'charged_back')),
            payment_provider TEXT CHECK (payment_provider IS NULL OR payment_provider IN ('mercadopago', 'stripe')),
            provider_payment_id TEXT,
            subtotal_cents INTEGER NOT NULL,
            shipping_cents INTEGER NOT NULL,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            customer_email TEXT NOT NULL,
            shipping_address TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status, payment_status);
        CREATE INDEX IF NOT EXISTS idx_orders_subscription ON orders(subscription_id);

        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id),
            variant_id TEXT REFERENCES product_variants(id),
            product_name TEXT NOT NULL,
            variant_label TEXT,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price_cents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        -- Subscriptions (single authoritative table; id doubles as external reference)
        -- gateway_subscription_id set = gateway-managed billing (MercadoPago preapproval)
        -- gateway_customer_id + gateway_payment_method_id = locally billed saved card (Stripe)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id),
            variant_id TEXT REFERENCES product_variants(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            frequency TEXT NOT NULL CHECK (frequency IN ('weekly', 'biweekly', 'monthly', 'bimonthly')),
            unit_price_cents INTEGER NOT NULL,
            discount_pct INTEGER NOT NULL DEFAULT 0,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'active', 'paused', 'past_due', 'cancelled')),
            provider TEXT NOT NULL CHECK (provider IN ('mercadopago', 'stripe')),
            gateway_subscription_id TEXT,
            gateway_customer_id TEXT,
            gateway_payment_method_id TEXT,
            next_billing_at INTEGER,
            last_billed_at INTEGER,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            customer_email TEXT NOT NULL,
            shipping_address TEXT NOT NULL,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_due ON subscriptions(status, next_billing_at)
            WHERE gateway_subscription_id IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_gateway
            ON subscriptions(provider, gateway_subscription_id) WHERE gateway_subscription_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS billing_attempts (
            id TEXT PRIMARY KEY,
            subscription_id TEXT NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_payment_id TEXT,
            amount_cents INTEGER NOT NULL,
            succeeded INTEGER NOT NULL,
            error TEXT,
            order_id TEXT REFERENCES orders(id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_billing_attempts_subscription
            ON billing_attempts(subscription_id, created_at DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_billing_attempts_payment
            ON billing_attempts(provider, provider_payment_id) WHERE provider_payment_id IS NOT NULL;

        -- Webhook dedupe (durable, keyed by gateway event id)
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);

        -- Webhook delivery log (observability only)
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT,
            event_type TEXT,
            resource_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('processed', 'ignored', 'duplicate', 'failed')),
            message TEXT,
            payload TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_created ON webhook_logs(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_provider ON webhook_logs(provider, created_at DESC);
"#;

/// Enable connection pragmas and bring the schema up to date.
///
/// Used for in-memory databases in tests. File databases, `--ephemeral`
/// ones included, go through [`migrations::run_migrations`] so they get a
/// backup first.
pub fn init_db(conn: &mut Connection) -> Result<(), migrations::MigrationError> {
    configure_connection(conn)?;
    migrations::apply_pending(conn)?;
    Ok(())
}

/// Per-connection pragmas. Foreign keys are off by default in SQLite.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

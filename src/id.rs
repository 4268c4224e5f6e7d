//! Prefixed ID generation for Kibble entities.
//!
//! All IDs use a `kb_` brand prefix so they never collide with gateway IDs
//! (Stripe's `cus_`, `pi_`, MercadoPago's numeric payment ids, etc.).
//! Order and subscription ids double as the external reference sent to
//! payment gateways, so the prefix also tells webhook handlers what kind of
//! record a payment belongs to.
//!
//! Format: `kb_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use std::fmt;

use uuid::Uuid;

/// Entity types that have prefixed IDs in Kibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Product,
    Variant,
    Order,
    OrderItem,
    Subscription,
    BillingAttempt,
    WebhookLog,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Product => "kb_prod",
            Self::Variant => "kb_var",
            Self::Order => "kb_ord",
            Self::OrderItem => "kb_item",
            Self::Subscription => "kb_sub",
            Self::BillingAttempt => "kb_bill",
            Self::WebhookLog => "kb_whl",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }

    /// Checks `s` is `{prefix}_{32 hex chars}` for this entity type.
    pub fn matches(&self, s: &str) -> bool {
        let Some(rest) = s.strip_prefix(self.prefix()) else {
            return false;
        };
        let Some(hex_part) = rest.strip_prefix('_') else {
            return false;
        };
        hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
    }
}

/// The token a checkout or subscription intent carries through a payment gateway.
///
/// Gateways echo it back on payments and preapprovals; the prefix decides
/// whether the payment settles an order or bills a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalReference {
    Order(String),
    Subscription(String),
}

impl ExternalReference {
    /// Parse a gateway-supplied reference. Returns None for anything we did not issue.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if EntityType::Order.matches(s) {
            Some(Self::Order(s.to_string()))
        } else if EntityType::Subscription.matches(s) {
            Some(Self::Subscription(s.to_string()))
        } else {
            None
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Order(id) | Self::Subscription(id) => id,
        }
    }
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

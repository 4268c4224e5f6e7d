mod order;
mod product;
mod profile;
mod subscription;
mod webhook_log;

pub use order::*;
pub use product::*;
pub use profile::*;
pub use subscription::*;
pub use webhook_log::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Dashboard counters for the admin overview.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub orders_by_status: BTreeMap<String, i64>,
    pub subscriptions_by_status: BTreeMap<String, i64>,
    /// Sum of order totals with an approved payment
    pub approved_revenue_cents: i64,
    pub active_subscriptions: i64,
    pub active_products: i64,
}

/// Deserialize a double Option field where:
/// - Field absent in JSON → None (don't update)
/// - Field present with null → Some(None) (set to NULL in DB)
/// - Field present with value → Some(Some(value)) (set to value)
pub(crate) fn deserialize_optional_nullable<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(Some(value))
}

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

use serde::{Deserialize, Serialize};

use super::{Frequency, deserialize_optional_nullable};
use crate::error::{AppError, Result, msg};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Free-form grouping (e.g., "dog", "cat", "treats")
    pub category: Option<String>,
    /// Base price in cents, used when an order line names no variant
    pub price_cents: i64,
    pub image_url: Option<String>,
    pub active: bool,
    pub subscription_enabled: bool,
    /// Percentage off the per-period price for each billing frequency
    pub weekly_discount_pct: i64,
    pub biweekly_discount_pct: i64,
    pub monthly_discount_pct: i64,
    pub bimonthly_discount_pct: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Product {
    pub fn discount_pct(&self, frequency: Frequency) -> i64 {
        match frequency {
            Frequency::Weekly => self.weekly_discount_pct,
            Frequency::Biweekly => self.biweekly_discount_pct,
            Frequency::Monthly => self.monthly_discount_pct,
            Frequency::Bimonthly => self.bimonthly_discount_pct,
        }
    }
}

/// Apply a whole-percent discount, rounding the discounted price to the nearest cent.
pub fn apply_discount(amount_cents: i64, discount_pct: i64) -> i64 {
    let pct = discount_pct.clamp(0, 100);
    (amount_cents * (100 - pct) + 50) / 100
}

/// A purchasable size/flavour of a product (e.g., "3 kg bag").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub label: String,
    pub price_cents: i64,
    /// Arbitrary attributes (e.g., {"weight_kg": 3, "flavour": "chicken"})
    pub attributes: serde_json::Value,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: Product,
    pub variants: Vec<ProductVariant>,
}

fn validate_discount(pct: i64) -> Result<()> {
    if !(0..=100).contains(&pct) {
        return Err(AppError::BadRequest(msg::DISCOUNT_OUT_OF_RANGE.into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub subscription_enabled: bool,
    #[serde(default)]
    pub weekly_discount_pct: i64,
    #[serde(default)]
    pub biweekly_discount_pct: i64,
    #[serde(default)]
    pub monthly_discount_pct: i64,
    #[serde(default)]
    pub bimonthly_discount_pct: i64,
    #[serde(default)]
    pub variants: Vec<CreateVariant>,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        if self.price_cents < 0 {
            return Err(AppError::BadRequest(msg::PRICE_NEGATIVE.into()));
        }
        for pct in [
            self.weekly_discount_pct,
            self.biweekly_discount_pct,
            self.monthly_discount_pct,
            self.bimonthly_discount_pct,
        ] {
            validate_discount(pct)?;
        }
        for variant in &self.variants {
            variant.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub category: Option<Option<String>>,
    pub price_cents: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub image_url: Option<Option<String>>,
    pub active: Option<bool>,
    pub subscription_enabled: Option<bool>,
    pub weekly_discount_pct: Option<i64>,
    pub biweekly_discount_pct: Option<i64>,
    pub monthly_discount_pct: Option<i64>,
    pub bimonthly_discount_pct: Option<i64>,
}

impl UpdateProduct {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.name
            && name.trim().is_empty()
        {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        if let Some(price) = self.price_cents
            && price < 0
        {
            return Err(AppError::BadRequest(msg::PRICE_NEGATIVE.into()));
        }
        for pct in [
            self.weekly_discount_pct,
            self.biweekly_discount_pct,
            self.monthly_discount_pct,
            self.bimonthly_discount_pct,
        ]
        .into_iter()
        .flatten()
        {
            validate_discount(pct)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateVariant {
    pub label: String,
    pub price_cents: i64,
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
}

fn empty_attributes() -> serde_json::Value {
    serde_json::json!({})
}

impl CreateVariant {
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(AppError::BadRequest("Variant label cannot be empty".into()));
        }
        if self.price_cents < 0 {
            return Err(AppError::BadRequest(msg::PRICE_NEGATIVE.into()));
        }
        if !self.attributes.is_object() {
            return Err(AppError::BadRequest(
                "Variant attributes must be a JSON object".into(),
            ));
        }
        Ok(())
    }
}

/// Catalog listing filters.
#[derive(Debug, Default, Deserialize)]
pub struct ProductFilters {
    pub category: Option<String>,
    /// Case-insensitive substring match on name
    pub search: Option<String>,
}

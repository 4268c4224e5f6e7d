use serde::{Deserialize, Serialize};

use super::UnknownVariant;
use crate::error::{AppError, Result, msg};

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment state as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    InProcess,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProcess => "in_process",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
        }
    }

    /// Gateways deliver notifications out of order; a stale "pending" must not
    /// undo an approval, and money that has gone back to the buyer stays gone.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            Pending | InProcess => next != Pending,
            Approved => matches!(next, Refunded | ChargedBack),
            Rejected | Cancelled => matches!(next, Approved | InProcess),
            Refunded | ChargedBack => false,
        }
    }

    /// Money has been returned or clawed back.
    pub fn is_reversal(&self) -> bool {
        matches!(self, Self::Refunded | Self::ChargedBack)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_process" => Ok(Self::InProcess),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            "charged_back" => Ok(Self::ChargedBack),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery details, stored as JSON on the order row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingAddress {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ShippingAddress {
    pub fn validate(&self) -> Result<()> {
        let required = [
            &self.name,
            &self.street,
            &self.city,
            &self.postal_code,
            &self.country,
        ];
        if required.iter().any(|f| f.trim().is_empty()) {
            return Err(AppError::BadRequest(msg::ADDRESS_INCOMPLETE.into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: Option<String>,
    /// Set when the order is a subscription delivery
    pub subscription_id: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: Option<String>,
    pub provider_payment_id: Option<String>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub shipping_address: ShippingAddress,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub variant_label: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

pub const MAX_LINE_QUANTITY: i64 = 99;

pub(crate) fn validate_quantity(quantity: i64) -> Result<()> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(AppError::BadRequest(msg::INVALID_QUANTITY.into()));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL.into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrder {
    pub items: Vec<CreateOrderItem>,
    pub customer_email: String,
    pub shipping_address: ShippingAddress,
}

impl CreateOrder {
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(AppError::BadRequest(msg::NO_ITEMS.into()));
        }
        for item in &self.items {
            validate_quantity(item.quantity)?;
        }
        validate_email(&self.customer_email)?;
        self.shipping_address.validate()
    }
}

/// A priced order line, resolved against the catalog.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub variant_label: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Everything needed to insert an order and its items in one transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: Option<String>,
    pub provider_payment_id: Option<String>,
    pub shipping_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub shipping_address: ShippingAddress,
    pub lines: Vec<PricedLine>,
}

impl NewOrder {
    pub fn subtotal_cents(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.unit_price_cents * l.quantity)
            .sum()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatus {
    pub status: OrderStatus,
}

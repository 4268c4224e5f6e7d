use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

use super::{ShippingAddress, UnknownVariant, validate_quantity};
use crate::error::{AppError, Result};

/// How often a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Bimonthly => "bimonthly",
        }
    }

    /// Advance a unix timestamp by one billing period.
    ///
    /// Monthly periods follow the calendar and clamp to the last day of
    /// shorter months (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: i64) -> i64 {
        let Some(start) = DateTime::<Utc>::from_timestamp(from, 0) else {
            return from + self.approx_secs();
        };
        let next = match self {
            Self::Weekly => start.checked_add_days(Days::new(7)),
            Self::Biweekly => start.checked_add_days(Days::new(14)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
            Self::Bimonthly => start.checked_add_months(Months::new(2)),
        };
        next.map(|dt| dt.timestamp())
            .unwrap_or(from + self.approx_secs())
    }

    fn approx_secs(&self) -> i64 {
        const DAY: i64 = 86_400;
        match self {
            Self::Weekly => 7 * DAY,
            Self::Biweekly => 14 * DAY,
            Self::Monthly => 30 * DAY,
            Self::Bimonthly => 60 * DAY,
        }
    }

    /// `(frequency, frequency_type)` for a MercadoPago `auto_recurring` block.
    pub fn mercadopago_interval(&self) -> (u32, &'static str) {
        match self {
            Self::Weekly => (7, "days"),
            Self::Biweekly => (14, "days"),
            Self::Monthly => (1, "months"),
            Self::Bimonthly => (2, "months"),
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "bimonthly" => Ok(Self::Bimonthly),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created locally, waiting for the first payment or gateway authorization
    Pending,
    Active,
    Paused,
    /// Too many consecutive failed charges
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Paused)
                | (Active, PastDue)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
                | (PastDue, Active)
                | (PastDue, Cancelled)
        )
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub frequency: Frequency,
    pub unit_price_cents: i64,
    pub discount_pct: i64,
    /// Charged per period, after discount
    pub amount_cents: i64,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub provider: String,
    /// MercadoPago preapproval id; the gateway bills these itself
    pub gateway_subscription_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_payment_method_id: Option<String>,
    pub next_billing_at: Option<i64>,
    pub last_billed_at: Option<i64>,
    pub failed_attempts: i64,
    pub customer_email: String,
    pub shipping_address: ShippingAddress,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Billed by our cron rather than by the gateway.
    pub fn is_locally_billed(&self) -> bool {
        self.gateway_subscription_id.is_none()
    }

    pub fn has_saved_payment_method(&self) -> bool {
        self.gateway_customer_id.is_some() && self.gateway_payment_method_id.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscription {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub frequency: Frequency,
    #[serde(default)]
    pub provider: Option<String>,
    pub shipping_address: ShippingAddress,
}

fn default_quantity() -> i64 {
    1
}

impl CreateSubscription {
    pub fn validate(&self) -> Result<()> {
        validate_quantity(self.quantity)?;
        self.shipping_address.validate()
    }
}

/// Priced subscription ready to insert.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub frequency: Frequency,
    pub unit_price_cents: i64,
    pub discount_pct: i64,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: String,
    pub customer_email: String,
    pub shipping_address: ShippingAddress,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionStatus {
    pub status: SubscriptionStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionFilters {
    pub status: Option<SubscriptionStatus>,
}

/// One charge attempt against a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAttempt {
    pub id: String,
    pub subscription_id: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub amount_cents: i64,
    pub succeeded: bool,
    pub error: Option<String>,
    /// Delivery order created when the charge succeeded
    pub order_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionWithAttempts {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub billing_attempts: Vec<BillingAttempt>,
}

/// Map a user-facing action to the status it requests.
pub fn status_for_action(action: &str) -> Result<SubscriptionStatus> {
    match action {
        "pause" => Ok(SubscriptionStatus::Paused),
        "resume" => Ok(SubscriptionStatus::Active),
        "cancel" => Ok(SubscriptionStatus::Cancelled),
        _ => Err(AppError::NotFound(format!("Unknown action '{}'", action))),
    }
}

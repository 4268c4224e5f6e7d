use serde::{Deserialize, Serialize};

use super::UnknownVariant;

/// Outcome of a webhook delivery, as recorded in `webhook_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookLogStatus {
    Processed,
    Ignored,
    Duplicate,
    Failed,
}

impl WebhookLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for WebhookLogStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "ignored" => Ok(Self::Ignored),
            "duplicate" => Ok(Self::Duplicate),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookLog {
    pub id: String,
    pub provider: String,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub resource_id: Option<String>,
    pub status: WebhookLogStatus,
    pub message: Option<String>,
    pub payload: String,
    pub duration_ms: i64,
    pub created_at: i64,
}

/// Fields recorded for a delivery; `id` and `created_at` are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewWebhookLog<'a> {
    pub provider: &'a str,
    pub event_id: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub status: WebhookLogStatus,
    pub message: Option<&'a str>,
    pub payload: &'a str,
    pub duration_ms: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookLogFilters {
    pub provider: Option<String>,
}

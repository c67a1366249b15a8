use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingActivation,
    Active,
    PastDue,
    Canceled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Refused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProcessingStatus {
    Received,
    Processed,
    Failed,
    Ignored,
}

/// A customer known to this service. Immutable after creation except for
/// `provider_customer_id` (assigned lazily on first use) and `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Id,
    pub provider_customer_id: Option<String>,
    pub email: String,
    pub status: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A subscription bound to exactly one customer for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Id,
    pub customer_id: Id,
    pub plan_id: i64,
    pub status: SubscriptionStatus,
    pub current_period_end: NaiveDateTime,
    pub cancel_at_period_end: bool,
    pub past_due_since: Option<NaiveDateTime>,
    pub canceled_at: Option<NaiveDateTime>,
    pub expired_at: Option<NaiveDateTime>,
    pub provider_subscription_id: String,
    pub access_revoked: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// An append-only record of one approved or refused payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Id,
    pub customer_id: Id,
    pub subscription_id: Id,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    pub provider_payment_id: String,
    pub provider_invoice_id: String,
    pub processed_at: Option<NaiveDateTime>,
    pub provider: String,
}

/// The authoritative processing record for one inbound webhook delivery,
/// unique by `(provider, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Id,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload_raw: String,
    pub signature: String,
    pub signature_timestamp: i64,
    pub received_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub attempt_count: u32,
    pub next_retry_at: Option<NaiveDateTime>,
    pub needs_attention: bool,
    pub processing_status: WebhookProcessingStatus,
    pub error_message: Option<String>,
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

// ---- HTTP DTOs -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookEventIn {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload_json: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct VerifiedWebhookData {
    pub raw_body: String,
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionCreateIn {
    pub customer_id: Option<Id>,
    pub customer_email: Option<String>,
    pub plan_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionCreateOut {
    pub subscription_id: Id,
    pub provider_subscription_id: String,
    pub customer_id: Id,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub plan_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionCancelAtPeriodEndIn {
    #[serde(default = "default_true")]
    pub cancel_at_period_end: bool,
}

fn default_true() -> bool {
    true
}

/// Fields shared by both payment event payloads; `current_period_end`
/// accepts an ISO-8601 string with a `Z` suffix or a numeric epoch value.
#[derive(Debug, Deserialize)]
pub struct PaymentEventPayload {
    pub provider_customer_id: String,
    pub provider_subscription_id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub current_period_end: Option<serde_json::Value>,
    pub payment_id: Option<String>,
    pub invoice_id: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

use chrono::NaiveDateTime;

use crate::error::{AppError, Result};
use crate::models::{now, Customer, Payment, PaymentEventPayload, PaymentStatus, Subscription, SubscriptionStatus, WebhookEvent, WebhookProcessingStatus};
use crate::store::Txn;

/// Parses `current_period_end`, accepting either an ISO-8601 string (with
/// a trailing `Z`) or a numeric unix timestamp. Anything else, including
/// an absent field, resolves to the current time.
fn parse_period_end(value: &Option<serde_json::Value>) -> NaiveDateTime {
    match value {
        Some(serde_json::Value::String(s)) => {
            let normalized = s.replace('Z', "+00:00");
            chrono::DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.naive_utc())
                .unwrap_or_else(|_| now())
        }
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc())
            .unwrap_or_else(now),
        _ => now(),
    }
}

fn resolve_customer_by_provider_id(txn: &Txn, provider_customer_id: &str) -> Result<Customer> {
    txn.find_customer_by_provider_id(provider_customer_id)
        .ok_or_else(|| AppError::InvalidPayload("provider_customer_id not found".to_string()))
}

fn resolve_subscription(txn: &Txn, provider_subscription_id: &str, customer_id: crate::models::Id) -> Result<Subscription> {
    let subscription = txn
        .find_subscription_by_provider_id(provider_subscription_id)
        .ok_or_else(|| AppError::InvalidPayload("provider_subscription_id not found".to_string()))?;
    if subscription.customer_id != customer_id {
        return Err(AppError::InvalidPayload(
            "provider_subscription_id belongs to a different customer_id".to_string(),
        ));
    }
    Ok(subscription)
}

/// `payment.succeeded`: activates a pending or past-due subscription,
/// clears any cancellation/expiry markers, advances the period, and
/// appends an approved payment. A period end older than what is already
/// on file is an out-of-order delivery and is ignored rather than applied.
pub fn handle_payment_succeeded(txn: &mut Txn, event: &mut WebhookEvent, payload_data: &serde_json::Value) -> Result<()> {
    let payload: PaymentEventPayload = serde_json::from_value(payload_data.clone())
        .map_err(|e| AppError::InvalidPayload(e.to_string()))?;

    let customer = resolve_customer_by_provider_id(txn, &payload.provider_customer_id)?;
    let period_end = parse_period_end(&payload.current_period_end);
    let mut subscription = resolve_subscription(txn, &payload.provider_subscription_id, customer.id)?;

    if period_end < subscription.current_period_end {
        event.processing_status = WebhookProcessingStatus::Ignored;
        event.processed_at = Some(now());
        event.error_message = Some("stale event ignored".to_string());
        return Ok(());
    }

    if matches!(
        subscription.status,
        SubscriptionStatus::PendingActivation | SubscriptionStatus::PastDue
    ) {
        subscription.status = SubscriptionStatus::Active;
    }
    subscription.canceled_at = None;
    subscription.expired_at = None;
    subscription.current_period_end = period_end;
    subscription.past_due_since = None;
    subscription.access_revoked = false;
    subscription.updated_at = now();
    let subscription_id = subscription.id;
    txn.save_subscription(subscription);

    txn.insert_payment(Payment {
        id: 0,
        customer_id: customer.id,
        subscription_id,
        status: PaymentStatus::Approved,
        amount: payload.amount,
        currency: payload.currency,
        provider_payment_id: payload.payment_id.unwrap_or_else(|| event.event_id.clone()),
        provider_invoice_id: payload.invoice_id.unwrap_or_default(),
        processed_at: Some(now()),
        provider: event.provider.clone(),
    });
    Ok(())
}

/// `invoice.payment_failed`: marks an active subscription past-due and
/// appends a refused payment. Subscriptions already past-due, canceled,
/// or expired are left in their current status.
pub fn handle_invoice_payment_failed(txn: &mut Txn, event: &mut WebhookEvent, payload_data: &serde_json::Value) -> Result<()> {
    let payload: PaymentEventPayload = serde_json::from_value(payload_data.clone())
        .map_err(|e| AppError::InvalidPayload(e.to_string()))?;

    let customer = resolve_customer_by_provider_id(txn, &payload.provider_customer_id)?;
    let period_end = parse_period_end(&payload.current_period_end);
    let mut subscription = resolve_subscription(txn, &payload.provider_subscription_id, customer.id)?;

    if period_end < subscription.current_period_end {
        event.processing_status = WebhookProcessingStatus::Ignored;
        event.processed_at = Some(now());
        event.error_message = Some("stale event ignored".to_string());
        return Ok(());
    }

    if subscription.status == SubscriptionStatus::Active {
        subscription.status = SubscriptionStatus::PastDue;
        subscription.past_due_since = Some(now());
    }
    subscription.updated_at = now();
    let subscription_id = subscription.id;
    txn.save_subscription(subscription);

    txn.insert_payment(Payment {
        id: 0,
        customer_id: customer.id,
        subscription_id,
        status: PaymentStatus::Refused,
        amount: payload.amount,
        currency: payload.currency,
        provider_payment_id: payload.payment_id.unwrap_or_else(|| event.event_id.clone()),
        provider_invoice_id: payload.invoice_id.unwrap_or_default(),
        processed_at: Some(now()),
        provider: event.provider.clone(),
    });
    Ok(())
}

/// Any event type with no registered handler is accepted and ignored
/// rather than rejected, so an unrecognized but well-formed delivery
/// doesn't trip a sender's retry logic.
pub fn handle_unknown_event(event: &mut WebhookEvent) {
    event.processing_status = WebhookProcessingStatus::Ignored;
    event.processed_at = Some(now());
}

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::config::limits;
use crate::dispatcher::{dispatch_event, mark_failed, record_outcome};
use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::models::{now, Id, SubscriptionCancelAtPeriodEndIn, SubscriptionCreateIn, SubscriptionCreateOut, SubscriptionStatus, WebhookEvent};
use crate::store::Store;

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn ensure_provider_customer_id(txn: &mut crate::store::Txn, mut customer: crate::models::Customer) -> String {
    if let Some(id) = customer.provider_customer_id.clone() {
        return id;
    }
    let provider_customer_id = format!("cus_{}", short_hex());
    customer.provider_customer_id = Some(provider_customer_id.clone());
    txn.save_customer(customer);
    provider_customer_id
}

/// Creates a subscription for an existing customer (by id) or an
/// email-addressed one (created on first use), in `pending_activation`.
pub async fn create_subscription(store: &Arc<Store>, input: SubscriptionCreateIn) -> Result<SubscriptionCreateOut> {
    if input.customer_id.is_none() && input.customer_email.is_none() {
        return Err(AppError::InvalidPayload("customer_id or customer_email is required".to_string()));
    }

    let mut txn = store.begin().await;

    let customer = if let Some(customer_id) = input.customer_id {
        txn.get_customer(customer_id)
            .ok_or_else(|| AppError::NotFound(format!("Customer '{customer_id}' not found")))?
    } else {
        let email = input.customer_email.unwrap();
        match txn.find_customer_by_email(&email) {
            Some(existing) => existing,
            None => txn.insert_customer(email, Some("active".to_string())),
        }
    };

    let provider_customer_id = ensure_provider_customer_id(&mut txn, customer.clone());
    let provider_subscription_id = format!("sub_{}", short_hex());

    let subscription = txn.insert_subscription(crate::models::Subscription {
        id: 0,
        customer_id: customer.id,
        plan_id: input.plan_id,
        status: SubscriptionStatus::PendingActivation,
        current_period_end: now(),
        cancel_at_period_end: false,
        past_due_since: None,
        canceled_at: None,
        expired_at: None,
        provider_subscription_id,
        access_revoked: false,
        created_at: now(),
        updated_at: now(),
    });

    Ok(SubscriptionCreateOut {
        subscription_id: subscription.id,
        provider_subscription_id: subscription.provider_subscription_id,
        customer_id: customer.id,
        provider_customer_id,
        status: subscription.status,
        plan_id: subscription.plan_id,
    })
}

pub async fn set_subscription_cancel_at_period_end(
    store: &Arc<Store>,
    subscription_id: Id,
    input: SubscriptionCancelAtPeriodEndIn,
) -> Result<crate::models::Subscription> {
    let mut txn = store.begin().await;
    let mut subscription = txn
        .get_subscription(subscription_id)
        .ok_or_else(|| AppError::NotFound(format!("Subscription '{subscription_id}' not found")))?;
    subscription.cancel_at_period_end = input.cancel_at_period_end;
    subscription.updated_at = now();
    txn.save_subscription(subscription.clone());
    Ok(subscription)
}

pub async fn list_webhook_events(store: &Arc<Store>) -> Vec<WebhookEvent> {
    store.begin().await.list_events_desc()
}

pub async fn get_webhook_event(store: &Arc<Store>, event_id: &str, provider: Option<&str>) -> Result<WebhookEvent> {
    store.begin().await.find_event_by_event_id(event_id, provider)
}

#[derive(Debug, Serialize)]
pub struct GraceSweepReport {
    pub checked_at: chrono::NaiveDateTime,
    pub canceled_count: usize,
    pub canceled_subscription_ids: Vec<Id>,
}

/// Cancels `past_due` subscriptions whose grace period has elapsed.
pub async fn enforce_grace_period(store: &Arc<Store>) -> GraceSweepReport {
    let now_ts = now();
    let grace_limit = now_ts - chrono::Duration::seconds(limits::GRACE_PERIOD_SECONDS);
    let mut txn = store.begin().await;
    let mut canceled = Vec::new();

    for mut subscription in txn.list_subscriptions_by_status(SubscriptionStatus::PastDue) {
        let Some(past_due_since) = subscription.past_due_since else {
            continue;
        };
        if past_due_since > grace_limit {
            continue;
        }
        subscription.status = SubscriptionStatus::Canceled;
        subscription.canceled_at = Some(now_ts);
        subscription.access_revoked = true;
        subscription.updated_at = now_ts;
        canceled.push(subscription.id);
        txn.save_subscription(subscription);
    }

    GraceSweepReport {
        checked_at: now_ts,
        canceled_count: canceled.len(),
        canceled_subscription_ids: canceled,
    }
}

#[derive(Debug, Serialize)]
pub struct ExpirySweepReport {
    pub checked_at: chrono::NaiveDateTime,
    pub expired_ids: Vec<Id>,
    pub canceled_ids: Vec<Id>,
}

/// Resolves subscriptions whose current period has ended: those flagged
/// `cancel_at_period_end` are canceled, the rest expire.
pub async fn expire_subscriptions(store: &Arc<Store>) -> ExpirySweepReport {
    let now_ts = now();
    let mut txn = store.begin().await;
    let mut expired_ids = Vec::new();
    let mut canceled_ids = Vec::new();

    for mut subscription in txn.list_subscriptions_by_status(SubscriptionStatus::Active) {
        if subscription.current_period_end > now_ts {
            continue;
        }
        if subscription.cancel_at_period_end {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.canceled_at = Some(now_ts);
            subscription.access_revoked = true;
            canceled_ids.push(subscription.id);
        } else {
            subscription.status = SubscriptionStatus::Expired;
            subscription.expired_at = Some(now_ts);
            expired_ids.push(subscription.id);
        }
        subscription.updated_at = now_ts;
        txn.save_subscription(subscription);
    }

    ExpirySweepReport {
        checked_at: now_ts,
        expired_ids,
        canceled_ids,
    }
}

#[derive(Debug, Serialize)]
pub struct RetrySweepReport {
    pub checked: usize,
    pub processed_ids: Vec<Id>,
    pub failed_ids: Vec<Id>,
}

/// Re-dispatches failed, non-`needs_attention` events that are due for
/// retry, oldest first.
pub async fn retry_failed_webhooks(store: &Arc<Store>, limit: Option<usize>, metrics: &Metrics) -> RetrySweepReport {
    let limit = limit.unwrap_or(limits::DEFAULT_RETRY_LIMIT);
    let now_ts = now();
    let mut txn = store.begin().await;
    let candidates = txn.find_retry_candidates(limit, now_ts);
    let mut processed_ids = Vec::new();
    let mut failed_ids = Vec::new();

    for mut event in candidates {
        match dispatch_event(&mut txn, &mut event) {
            Ok(()) => {
                record_outcome(&event, metrics);
                event.next_retry_at = None;
                event.needs_attention = false;
                event.error_message = None;
                processed_ids.push(event.id);
                txn.save_event(event);
            }
            Err(err) => {
                mark_failed(&mut event, err.to_string(), metrics);
                failed_ids.push(event.id);
                txn.save_event(event);
            }
        }
    }

    RetrySweepReport {
        checked: processed_ids.len() + failed_ids.len(),
        processed_ids,
        failed_ids,
    }
}

/// Reprocesses a single event on operator request, regardless of its
/// current `needs_attention` flag.
pub async fn reprocess_webhook_event(store: &Arc<Store>, event_id: &str, metrics: &Metrics) -> Result<WebhookEvent> {
    let mut txn = store.begin().await;
    let mut event = txn.find_event_by_event_id(event_id, None)?;

    match dispatch_event(&mut txn, &mut event) {
        Ok(()) => {
            record_outcome(&event, metrics);
            event.next_retry_at = None;
            event.needs_attention = false;
            event.error_message = None;
        }
        Err(err) => {
            mark_failed(&mut event, err.to_string(), metrics);
        }
    }

    txn.save_event(event.clone());
    Ok(event)
}

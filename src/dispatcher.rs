use std::sync::Arc;

use crate::config::limits;
use crate::error::{AppError, Result};
use crate::handlers::{handle_invoice_payment_failed, handle_payment_succeeded, handle_unknown_event};
use crate::metrics::Metrics;
use crate::models::{now, VerifiedWebhookData, WebhookEvent, WebhookEventIn, WebhookProcessingStatus};
use crate::store::{Store, Txn};

/// Parses `event.payload_raw` (the full request body) and routes to the
/// handler registered for `event.event_type`, falling back to the ignore
/// handler for anything unrecognized. On success the event's
/// `processing_status` becomes `Processed` unless the handler already
/// finalized it (a stale delivery marks itself `Ignored`).
pub fn dispatch_event(txn: &mut Txn, event: &mut WebhookEvent) -> Result<()> {
    let parsed: serde_json::Value =
        serde_json::from_str(&event.payload_raw).map_err(|_| AppError::InvalidPayload("payload_json must be an object".to_string()))?;
    let parsed = parsed
        .as_object()
        .ok_or_else(|| AppError::InvalidPayload("payload_json must be an object".to_string()))?;
    let payload_data = parsed.get("payload_json").cloned().unwrap_or_else(|| serde_json::Value::Object(parsed.clone()));
    if !payload_data.is_object() {
        return Err(AppError::InvalidPayload("payload_json must be an object".to_string()));
    }

    match event.event_type.as_str() {
        "payment.succeeded" => handle_payment_succeeded(txn, event, &payload_data)?,
        "invoice.payment_failed" => handle_invoice_payment_failed(txn, event, &payload_data)?,
        _ => {
            handle_unknown_event(event);
            return Ok(());
        }
    }

    if event.processing_status == WebhookProcessingStatus::Received {
        event.processing_status = WebhookProcessingStatus::Processed;
        event.processed_at = Some(now());
    }
    Ok(())
}

pub(crate) fn mark_failed(event: &mut WebhookEvent, message: String, metrics: &Metrics) {
    event.attempt_count += 1;
    let delay = (limits::RETRY_BACKOFF_STEP_SECONDS * event.attempt_count as i64).min(limits::MAX_RETRY_BACKOFF_SECONDS);
    event.next_retry_at = Some(now() + chrono::Duration::seconds(delay));
    event.needs_attention = event.attempt_count >= limits::NEEDS_ATTENTION_THRESHOLD;
    event.processing_status = WebhookProcessingStatus::Failed;
    event.processed_at = Some(now());
    event.error_message = Some(message.clone());
    metrics.inc_failed();
    tracing::warn!(
        provider = %event.provider,
        event_id = %event.event_id,
        event_type = %event.event_type,
        error = %message,
        "webhook_failed"
    );
}

pub(crate) fn record_outcome(event: &WebhookEvent, metrics: &Metrics) {
    if event.processing_status == WebhookProcessingStatus::Ignored {
        metrics.inc_ignored();
    } else {
        metrics.inc_processed();
    }
    tracing::info!(
        provider = %event.provider,
        event_id = %event.event_id,
        event_type = %event.event_type,
        status = ?event.processing_status,
        "webhook_processed"
    );
}

/// Re-dispatches an event already on file: a timestamp or signature that
/// no longer matches what was stored is treated as a replay attack,
/// already-finalized events are reported without re-running handlers, and
/// previously failed events get another attempt.
fn handle_existing_event(txn: &mut Txn, mut event: WebhookEvent, verified: &VerifiedWebhookData, metrics: &Metrics) -> Result<WebhookEvent> {
    if verified.timestamp != event.signature_timestamp {
        mark_failed(&mut event, "replay timestamp mismatch".to_string(), metrics);
        txn.save_event(event);
        return Err(AppError::ReplayAttack("replay timestamp mismatch".to_string()));
    }
    if verified.signature != event.signature {
        mark_failed(&mut event, "replay signature mismatch".to_string(), metrics);
        txn.save_event(event);
        return Err(AppError::ReplayAttack("replay signature mismatch".to_string()));
    }

    if matches!(
        event.processing_status,
        WebhookProcessingStatus::Processed | WebhookProcessingStatus::Ignored
    ) {
        metrics.inc_replayed();
        return Ok(event);
    }

    if event.processing_status == WebhookProcessingStatus::Failed {
        match dispatch_event(txn, &mut event) {
            Ok(()) => {
                event.next_retry_at = None;
                event.needs_attention = false;
                event.error_message = None;
                txn.save_event(event.clone());
                record_outcome(&event, metrics);
                return Ok(event);
            }
            Err(err) => {
                mark_failed(&mut event, err.to_string(), metrics);
                txn.save_event(event);
                return Err(err);
            }
        }
    }

    Ok(event)
}

/// Top-level inbound entry point: resolves or creates the `(provider,
/// event_id)` row, guards against a race on first insert, then dispatches.
pub async fn process_webhook(
    store: &Arc<Store>,
    provider: &str,
    webhook: &WebhookEventIn,
    verified: &VerifiedWebhookData,
    metrics: &Metrics,
) -> Result<WebhookEvent> {
    let mut txn = store.begin().await;

    if let Some(existing) = txn.find_event_by_composite(provider, &webhook.event_id) {
        return handle_existing_event(&mut txn, existing, verified, metrics);
    }

    let event = WebhookEvent {
        id: 0,
        provider: provider.to_string(),
        event_id: webhook.event_id.clone(),
        event_type: webhook.event_type.clone(),
        payload_raw: verified.raw_body.clone(),
        signature: verified.signature.clone(),
        signature_timestamp: verified.timestamp,
        received_at: now(),
        processed_at: None,
        attempt_count: 1,
        next_retry_at: None,
        needs_attention: false,
        processing_status: WebhookProcessingStatus::Received,
        error_message: None,
    };

    let mut event = match txn.insert_event(event) {
        Ok(event) => event,
        Err(_) => {
            let existing = txn
                .find_event_by_composite(provider, &webhook.event_id)
                .ok_or_else(|| AppError::Internal("event vanished after insert race".to_string()))?;
            return handle_existing_event(&mut txn, existing, verified, metrics);
        }
    };

    match dispatch_event(&mut txn, &mut event) {
        Ok(()) => {
            record_outcome(&event, metrics);
            event.next_retry_at = None;
            event.needs_attention = false;
            txn.save_event(event.clone());
            Ok(event)
        }
        Err(err) => {
            mark_failed(&mut event, err.to_string(), metrics);
            txn.save_event(event);
            Err(err)
        }
    }
}

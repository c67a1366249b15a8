use chrono::Utc;
use hmac::{Hmac, Mac};
use ledgerhook::models::SubscriptionStatus;
use ledgerhook::{build_router, AppState};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::util::ServiceExt;

type HmacSha256 = Hmac<Sha256>;

const TEST_SECRET: &str = "whsec_dev_test_default";

fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn webhook_request(provider: &str, body: String, secret: &str, timestamp: i64) -> axum::http::Request<axum::body::Body> {
    let signature = sign(secret, timestamp, &body);
    axum::http::Request::builder()
        .method("POST")
        .uri(format!("/v1/webhooks/{provider}"))
        .header("content-type", "application/json")
        .header("x-webhook-timestamp", timestamp.to_string())
        .header("x-webhook-signature", signature)
        .body(axum::body::Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::http::Response<axum::body::Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn test_app() -> axum::Router {
    build_router(AppState::from_env())
}

/// `axum::serve` ordinarily supplies `ConnectInfo` from the accepted
/// socket; a `oneshot`-driven test has no socket, so the extension is
/// attached directly to the request instead.
async fn oneshot_with_peer(app: axum::Router, mut req: axum::http::Request<axum::body::Body>) -> axum::http::Response<axum::body::Body> {
    let peer: std::net::SocketAddr = "127.0.0.1:9999".parse().unwrap();
    req.extensions_mut().insert(axum::extract::ConnectInfo(peer));
    app.oneshot(req).await.unwrap()
}

#[tokio::test]
async fn invalid_signature_is_rejected() {
    let app = test_app();
    let body = json!({"event_id": "evt_invalid_sig", "event_type": "payment.succeeded", "payload_json": {}}).to_string();
    let now = Utc::now().timestamp();
    let signature = sign("wrong_secret", now, &body);
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/webhooks/test")
        .header("content-type", "application/json")
        .header("x-webhook-timestamp", now.to_string())
        .header("x-webhook-signature", signature)
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = oneshot_with_peer(app, req).await;
    assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn pending_to_active_and_idempotent_duplicate() {
    let app = test_app();

    let create_req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/subscriptions")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            json!({"customer_email": "x@y.com", "plan_id": 1}).to_string(),
        ))
        .unwrap();
    let create_resp = oneshot_with_peer(app.clone(), create_req).await;
    assert_eq!(create_resp.status(), axum::http::StatusCode::OK);
    let sub_data = body_json(create_resp).await;

    let future_period_end = (Utc::now() + chrono::Duration::days(30)).to_rfc3339();
    let payload = json!({
        "provider_customer_id": sub_data["provider_customer_id"],
        "provider_subscription_id": sub_data["provider_subscription_id"],
        "amount": 5000,
        "currency": "BRL",
        "current_period_end": future_period_end,
        "payment_id": "pay_ok",
        "invoice_id": "inv_ok",
    });
    let event = json!({"event_id": "evt_ok_1", "event_type": "payment.succeeded", "payload_json": payload}).to_string();
    let now = Utc::now().timestamp();

    let first = oneshot_with_peer(app.clone(), webhook_request("test", event.clone(), TEST_SECRET, now)).await;
    assert_eq!(first.status(), axum::http::StatusCode::OK);
    let first_data = body_json(first).await;
    assert_eq!(first_data["processing_status"], "processed");

    let second = oneshot_with_peer(app.clone(), webhook_request("test", event, TEST_SECRET, now)).await;
    assert_eq!(second.status(), axum::http::StatusCode::OK);
    let second_data = body_json(second).await;
    assert_eq!(second_data["event_id"], "evt_ok_1");
}

#[tokio::test]
async fn active_to_past_due_to_canceled_via_grace_sweep() {
    let state = AppState::from_env();
    let app = build_router(state.clone());

    let create_req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/subscriptions")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(json!({"customer_email": "z@y.com", "plan_id": 1}).to_string()))
        .unwrap();
    let sub_data = body_json(oneshot_with_peer(app.clone(), create_req).await).await;
    let subscription_id = sub_data["subscription_id"].as_u64().unwrap();

    let future_period_end = (Utc::now() + chrono::Duration::days(30)).to_rfc3339();
    let pay_payload = json!({
        "provider_customer_id": sub_data["provider_customer_id"],
        "provider_subscription_id": sub_data["provider_subscription_id"],
        "amount": 5000,
        "currency": "BRL",
        "current_period_end": future_period_end,
    });
    let pay_event = json!({"event_id": "evt_to_active", "event_type": "payment.succeeded", "payload_json": pay_payload}).to_string();
    let now = Utc::now().timestamp();
    let activated = oneshot_with_peer(app.clone(), webhook_request("test", pay_event, TEST_SECRET, now)).await;
    assert_eq!(activated.status(), axum::http::StatusCode::OK);

    let fail_payload = json!({
        "provider_customer_id": sub_data["provider_customer_id"],
        "provider_subscription_id": sub_data["provider_subscription_id"],
        "amount": 5000,
        "currency": "BRL",
        "current_period_end": future_period_end,
    });
    let fail_event = json!({"event_id": "evt_to_past_due", "event_type": "invoice.payment_failed", "payload_json": fail_payload}).to_string();
    let failed = oneshot_with_peer(app.clone(), webhook_request("test", fail_event, TEST_SECRET, now + 1)).await;
    assert_eq!(failed.status(), axum::http::StatusCode::OK);

    {
        let mut txn = state.store.begin().await;
        let mut subscription = txn.get_subscription(subscription_id).unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::PastDue);
        subscription.past_due_since = Some(Utc::now().naive_utc() - chrono::Duration::days(2));
        txn.save_subscription(subscription);
    }

    let grace_req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/jobs/enforce-grace")
        .body(axum::body::Body::empty())
        .unwrap();
    let grace_resp = oneshot_with_peer(app.clone(), grace_req).await;
    assert_eq!(grace_resp.status(), axum::http::StatusCode::OK);

    let txn = state.store.begin().await;
    let subscription = txn.get_subscription(subscription_id).unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);
    assert!(subscription.access_revoked);
}

#[tokio::test]
async fn stale_event_is_ignored_without_mutating_subscription() {
    let state = AppState::from_env();
    let app = build_router(state.clone());

    let create_req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/subscriptions")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(json!({"customer_email": "stale@y.com", "plan_id": 1}).to_string()))
        .unwrap();
    let sub_data = body_json(oneshot_with_peer(app.clone(), create_req).await).await;

    let far_future = (Utc::now() + chrono::Duration::days(60)).to_rfc3339();
    let payload = json!({
        "provider_customer_id": sub_data["provider_customer_id"],
        "provider_subscription_id": sub_data["provider_subscription_id"],
        "amount": 5000,
        "currency": "USD",
        "current_period_end": far_future,
    });
    let event = json!({"event_id": "evt_fresh", "event_type": "payment.succeeded", "payload_json": payload}).to_string();
    let now = Utc::now().timestamp();
    let fresh = oneshot_with_peer(app.clone(), webhook_request("test", event, TEST_SECRET, now)).await;
    assert_eq!(body_json(fresh).await["processing_status"], "processed");

    let stale_end = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
    let stale_payload = json!({
        "provider_customer_id": sub_data["provider_customer_id"],
        "provider_subscription_id": sub_data["provider_subscription_id"],
        "amount": 1,
        "currency": "USD",
        "current_period_end": stale_end,
    });
    let stale_event = json!({"event_id": "evt_stale", "event_type": "payment.succeeded", "payload_json": stale_payload}).to_string();
    let stale = oneshot_with_peer(app.clone(), webhook_request("test", stale_event, TEST_SECRET, now + 1)).await;
    let stale_data = body_json(stale).await;
    assert_eq!(stale_data["processing_status"], "ignored");
    assert_eq!(stale_data["error_message"], "stale event ignored");
}

#[tokio::test]
async fn replayed_event_with_forged_timestamp_is_rejected() {
    let app = test_app();
    let body = json!({"event_id": "evt_replay", "event_type": "payment.succeeded", "payload_json": {}}).to_string();
    let now = Utc::now().timestamp();

    let first = oneshot_with_peer(app.clone(), webhook_request("test", body.clone(), TEST_SECRET, now)).await;
    assert_eq!(first.status(), axum::http::StatusCode::OK);

    let forged = oneshot_with_peer(app.clone(), webhook_request("test", body, TEST_SECRET, now + 5)).await;
    assert_eq!(forged.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn retry_sweep_clears_a_failure_once_the_referenced_subscription_exists() {
    let state = AppState::from_env();
    let app = build_router(state.clone());

    let payload = json!({
        "provider_customer_id": "cus_does_not_exist_yet",
        "provider_subscription_id": "sub_does_not_exist_yet",
        "amount": 5000,
        "currency": "USD",
        "current_period_end": (Utc::now() + chrono::Duration::days(30)).to_rfc3339(),
    });
    let event = json!({"event_id": "evt_retry", "event_type": "payment.succeeded", "payload_json": payload}).to_string();
    let now = Utc::now().timestamp();
    let first = oneshot_with_peer(app.clone(), webhook_request("test", event, TEST_SECRET, now)).await;
    assert_eq!(body_json(first).await["processing_status"], "failed");

    // The subscription the event references didn't exist at delivery time;
    // create it now and rewind next_retry_at so the sweep picks the event
    // up immediately instead of waiting out the backoff.
    {
        let mut txn = state.store.begin().await;
        let mut customer = txn.insert_customer("retry@y.com".to_string(), Some("active".to_string()));
        customer.provider_customer_id = Some("cus_does_not_exist_yet".to_string());
        txn.save_customer(customer.clone());
        txn.insert_subscription(ledgerhook::models::Subscription {
            id: 0,
            customer_id: customer.id,
            plan_id: 1,
            status: SubscriptionStatus::PendingActivation,
            current_period_end: Utc::now().naive_utc(),
            cancel_at_period_end: false,
            past_due_since: None,
            canceled_at: None,
            expired_at: None,
            provider_subscription_id: "sub_does_not_exist_yet".to_string(),
            access_revoked: false,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        });

        let mut stored = txn.find_event_by_composite("test", "evt_retry").unwrap();
        stored.next_retry_at = Some(Utc::now().naive_utc() - chrono::Duration::seconds(1));
        txn.save_event(stored);
    }

    let retry_req = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/jobs/retry-failed-webhooks")
        .body(axum::body::Body::empty())
        .unwrap();
    let retry_resp = oneshot_with_peer(app.clone(), retry_req).await;
    let retry_data = body_json(retry_resp).await;
    assert_eq!(retry_data["processed_ids"].as_array().unwrap().len(), 1);

    let get_req = axum::http::Request::builder()
        .method("GET")
        .uri("/v1/webhooks/evt_retry")
        .body(axum::body::Body::empty())
        .unwrap();
    let event_after = body_json(oneshot_with_peer(app.clone(), get_req).await).await;
    assert_eq!(event_after["processing_status"], "processed");
}

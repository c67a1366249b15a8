use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::dispatcher::process_webhook;
use crate::error::{AppError, Result};
use crate::models::{SubscriptionCancelAtPeriodEndIn, SubscriptionCreateIn, WebhookEventIn};
use crate::subscription_fsm;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions/:id/cancel-at-period-end", post(cancel_at_period_end))
        .route("/webhooks/:provider", post(receive_webhook))
        .route("/webhooks", get(list_webhooks))
        .route("/webhooks/:event_id", get(get_webhook))
        .route("/jobs/enforce-grace", post(enforce_grace))
        .route("/jobs/expire-subscriptions", post(expire_subscriptions))
        .route("/jobs/retry-failed-webhooks", post(retry_failed_webhooks))
        .route("/admin/webhooks/:event_id/reprocess", post(reprocess_webhook))
        .route("/admin/metrics", get(admin_metrics));

    Router::new()
        .nest("/v1", v1)
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SubscriptionCreateIn>,
) -> Result<impl IntoResponse> {
    let out = subscription_fsm::create_subscription(&state.store, input).await?;
    Ok(Json(out))
}

async fn cancel_at_period_end(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(input): Json<SubscriptionCancelAtPeriodEndIn>,
) -> Result<impl IntoResponse> {
    let subscription = subscription_fsm::set_subscription_cancel_at_period_end(&state.store, id, input).await?;
    Ok(Json(subscription))
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse> {
    let client_ip = addr.ip().to_string();
    let verified = state
        .gatekeeper
        .verify(&provider, &headers, &client_ip, &body)?;

    let webhook: WebhookEventIn =
        serde_json::from_str(&verified.raw_body).map_err(|_| AppError::InvalidPayload("invalid webhook body".to_string()))?;

    let event = process_webhook(&state.store, &provider, &webhook, &verified, &state.metrics).await?;
    Ok(Json(event))
}

async fn list_webhooks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(subscription_fsm::list_webhook_events(&state.store).await)
}

#[derive(Debug, Deserialize)]
struct GetWebhookQuery {
    provider: Option<String>,
}

async fn get_webhook(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(query): Query<GetWebhookQuery>,
) -> Result<impl IntoResponse> {
    let event = subscription_fsm::get_webhook_event(&state.store, &event_id, query.provider.as_deref()).await?;
    Ok(Json(event))
}

async fn enforce_grace(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(subscription_fsm::enforce_grace_period(&state.store).await)
}

async fn expire_subscriptions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(subscription_fsm::expire_subscriptions(&state.store).await)
}

#[derive(Debug, Deserialize)]
struct RetryQuery {
    limit: Option<usize>,
}

async fn retry_failed_webhooks(State(state): State<Arc<AppState>>, Query(query): Query<RetryQuery>) -> impl IntoResponse {
    Json(subscription_fsm::retry_failed_webhooks(&state.store, query.limit, &state.metrics).await)
}

async fn reprocess_webhook(State(state): State<Arc<AppState>>, Path(event_id): Path<String>) -> Result<impl IntoResponse> {
    let event = subscription_fsm::reprocess_webhook_event(&state.store, &event_id, &state.metrics).await?;
    Ok(Json(event))
}

async fn admin_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render_prometheus(),
    )
}

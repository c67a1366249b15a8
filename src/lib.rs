pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gatekeeper;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limiter;
pub mod routes;
pub mod secrets;
pub mod store;
pub mod subscription_fsm;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use config::AppConfig;
use gatekeeper::Gatekeeper;
use metrics::Metrics;
use secrets::SecretRegistry;
use store::Store;

/// Shared state handed to every route handler.
pub struct AppState {
    pub store: Arc<Store>,
    pub gatekeeper: Gatekeeper,
    pub metrics: Metrics,
    port: u16,
}

impl AppState {
    pub fn from_env() -> Arc<Self> {
        let config = AppConfig::from_env();
        let port = config.port;
        let secrets = SecretRegistry::from_env();
        Arc::new(Self {
            store: Arc::new(Store::new()),
            gatekeeper: Gatekeeper::new(secrets, config),
            metrics: Metrics::new(),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}

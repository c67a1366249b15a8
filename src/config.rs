use std::collections::HashSet;
use std::time::Duration;

/// Compile-time constants governing the gatekeeper and sweep jobs.
pub mod limits {
    /// Maximum allowed clock skew between a webhook's asserted timestamp
    /// and wall-clock time, in either direction.
    pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 300;

    /// Grace period a `past_due` subscription is given before the
    /// enforce-grace sweep cancels it.
    pub const GRACE_PERIOD_SECONDS: i64 = 24 * 3600;

    /// Default page size for the retry-failed-webhooks sweep.
    pub const DEFAULT_RETRY_LIMIT: usize = 50;

    /// An event is flagged `needs_attention` once it has failed this many
    /// times, excluding it from automatic retries.
    pub const NEEDS_ATTENTION_THRESHOLD: u32 = 3;

    /// Backoff step applied per attempt when scheduling a retry, capped by
    /// `MAX_RETRY_BACKOFF_SECONDS`.
    pub const RETRY_BACKOFF_STEP_SECONDS: i64 = 300;
    pub const MAX_RETRY_BACKOFF_SECONDS: i64 = 3600;
}

pub mod timeouts {
    use super::Duration;

    /// Width of the sliding rate-limit window.
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
}

/// Runtime configuration resolved from the environment once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rate_limit_per_minute: u32,
    pub ip_allowlist: HashSet<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let rate_limit_per_minute = std::env::var("WEBHOOK_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let ip_allowlist = std::env::var("WEBHOOK_IP_ALLOWLIST")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        Self {
            rate_limit_per_minute,
            ip_allowlist,
            port,
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Four monotonically increasing counters tracking webhook dispatch
/// outcomes, exposed both as a JSON snapshot (`/v1/admin/metrics`) and in
/// Prometheus text exposition format (`/metrics`).
#[derive(Default)]
pub struct Metrics {
    webhook_processed: AtomicU64,
    webhook_failed: AtomicU64,
    webhook_ignored: AtomicU64,
    webhook_replayed: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub webhook_processed: u64,
    pub webhook_failed: u64,
    pub webhook_ignored: u64,
    pub webhook_replayed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_processed(&self) {
        self.webhook_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.webhook_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignored(&self) {
        self.webhook_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replayed(&self) {
        self.webhook_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            webhook_processed: self.webhook_processed.load(Ordering::Relaxed),
            webhook_failed: self.webhook_failed.load(Ordering::Relaxed),
            webhook_ignored: self.webhook_ignored.load(Ordering::Relaxed),
            webhook_replayed: self.webhook_replayed.load(Ordering::Relaxed),
        }
    }

    /// Renders the four counters as Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for (name, help, value) in [
            (
                "webhook_processed_total",
                "Webhook deliveries successfully processed",
                snapshot.webhook_processed,
            ),
            (
                "webhook_failed_total",
                "Webhook deliveries that raised an error during processing",
                snapshot.webhook_failed,
            ),
            (
                "webhook_ignored_total",
                "Webhook deliveries of an unrecognized event type",
                snapshot.webhook_ignored,
            ),
            (
                "webhook_replayed_total",
                "Webhook deliveries recognized as a repeat of an already-processed event",
                snapshot.webhook_replayed,
            ),
        ] {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {value}\n"));
        }
        out
    }
}

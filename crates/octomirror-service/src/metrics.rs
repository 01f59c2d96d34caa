//! Prometheus metrics for the service.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Counters and histograms the service maintains
pub struct ServiceMetrics {
    registry: Registry,
    pub webhooks_received: IntCounter,
    pub webhooks_rejected: IntCounterVec,
    pub webhooks_duplicate: IntCounter,
    pub sync_requests: IntCounterVec,
    pub github_request_duration: Histogram,
}

impl ServiceMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let webhooks_received = IntCounter::with_opts(Opts::new(
            "octomirror_webhooks_received_total",
            "Webhook deliveries accepted and enqueued",
        ))?;
        let webhooks_rejected = IntCounterVec::new(
            Opts::new(
                "octomirror_webhooks_rejected_total",
                "Webhook deliveries rejected before enqueueing",
            ),
            &["reason"],
        )?;
        let webhooks_duplicate = IntCounter::with_opts(Opts::new(
            "octomirror_webhooks_duplicate_total",
            "Webhook deliveries suppressed as replays",
        ))?;
        let sync_requests = IntCounterVec::new(
            Opts::new(
                "octomirror_sync_requests_total",
                "Pull-sync requests by resource",
            ),
            &["resource"],
        )?;
        let github_request_duration = Histogram::with_opts(HistogramOpts::new(
            "octomirror_github_request_duration_seconds",
            "Wall time of GitHub-backed request handling",
        ))?;

        registry.register(Box::new(webhooks_received.clone()))?;
        registry.register(Box::new(webhooks_rejected.clone()))?;
        registry.register(Box::new(webhooks_duplicate.clone()))?;
        registry.register(Box::new(sync_requests.clone()))?;
        registry.register(Box::new(github_request_duration.clone()))?;

        Ok(Self {
            registry,
            webhooks_received,
            webhooks_rejected,
            webhooks_duplicate,
            sync_requests,
            github_request_duration,
        })
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

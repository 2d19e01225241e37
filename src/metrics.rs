use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Describe every metric the service emits. Safe to call repeatedly.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("upstream_calls_total", "GraphQL calls sent to BirdWeather.");
        describe_counter!(
            "upstream_errors_total",
            "GraphQL calls that failed (transport, status or error payload)."
        );
        describe_counter!(
            "rate_limit_denied_total",
            "Detection queries refused by the rate limiter."
        );
        describe_counter!("detection_cache_hits_total", "Fresh cache hits.");
        describe_counter!(
            "detection_cache_stale_served_total",
            "Expired cache entries served as fallback."
        );
        describe_counter!(
            "detection_cache_misses_total",
            "Detection queries that went upstream."
        );
        describe_gauge!("detection_cache_ttl_secs", "TTL of the rolling-window cache.");
        describe_gauge!("poller_last_run_ts", "Unix ts when the poller last refreshed.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse it.
    pub fn init() -> anyhow::Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod fetcher;
pub mod highlights;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod rate_limit;
pub mod stations;
pub mod summary;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::axum::Router;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use crate::api::{create_router, AppState};
pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use crate::config::AppConfig;
pub use crate::fetcher::{DataService, DataState, FetchOutcome};

use crate::dashboard::{Dashboard, DashboardSnapshot};
use crate::stations::StationRegistry;
use crate::upstream::{HttpExecutor, MockExecutor, SharedExecutor};

/// Compact tracing logs, enabled by `BIRD_BUDDY_LOG=1` or any `RUST_LOG`.
/// Uses `try_init` so a subscriber installed by the host runtime wins.
pub fn enable_tracing() {
    let flag = std::env::var("BIRD_BUDDY_LOG")
        .ok()
        .is_some_and(|v| v == "1");
    let has_rust_log = std::env::var("RUST_LOG").is_ok();
    if !(flag || has_rust_log) {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bird_buddy=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

/// `METRICS_ENABLED=1` exposes `/metrics`.
pub fn metrics_enabled() -> bool {
    std::env::var("METRICS_ENABLED")
        .ok()
        .is_some_and(|v| v == "1")
}

/// Live BirdWeather client, or canned demo data in mock mode.
pub fn executor_from_config(cfg: &AppConfig, clock: &SharedClock) -> anyhow::Result<SharedExecutor> {
    if cfg.upstream.mock {
        info!("upstream in mock mode");
        return Ok(Arc::new(MockExecutor::with_demo_data(clock.now())));
    }
    let http = HttpExecutor::new(
        &cfg.upstream.endpoint,
        Duration::from_secs(cfg.upstream.timeout_secs),
    )
    .context("creating upstream executor")?;
    info!(endpoint = http.endpoint(), "upstream client ready");
    Ok(Arc::new(http))
}

/// Wire data service, station registry, dashboard and snapshot store.
pub fn build_state(cfg: &AppConfig, exec: SharedExecutor, clock: SharedClock) -> AppState {
    let data = Arc::new(DataService::new(
        exec,
        clock.clone(),
        cfg.rate_limits(),
        cfg.fetch_settings(),
    ));
    let registry = Arc::new(StationRegistry::new(data.clone(), cfg.stations.clone()));
    let dashboard = Arc::new(Dashboard::new(
        data.clone(),
        cfg.highlight_settings(),
        cfg.display_offset(),
    ));
    let snapshots = poller::new_store(DashboardSnapshot::empty(
        clock.now(),
        cfg.highlights.policy,
    ));
    AppState {
        data,
        registry,
        dashboard,
        snapshots,
    }
}

/// Install the Prometheus recorder when `METRICS_ENABLED=1`. Call before
/// building state so startup gauges land in the real recorder.
pub fn init_metrics() -> anyhow::Result<Option<crate::metrics::Metrics>> {
    if !metrics_enabled() {
        return Ok(None);
    }
    let m = crate::metrics::Metrics::init().context("installing prometheus recorder")?;
    Ok(Some(m))
}

/// Router over the given state, plus `/metrics` when a recorder is installed.
pub fn router(state: AppState, metrics: Option<&crate::metrics::Metrics>) -> Router {
    let router = create_router(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

/// Full app from config on disk/env, without the background poller.
pub fn app() -> anyhow::Result<Router> {
    let metrics = init_metrics()?;
    let cfg = AppConfig::load()?;
    let clock = SystemClock::shared();
    let exec = executor_from_config(&cfg, &clock)?;
    Ok(router(build_state(&cfg, exec, clock), metrics.as_ref()))
}

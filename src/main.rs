//! Bird Buddy binary entrypoint.
//! Boots the Axum HTTP server, wiring shared state, the background poller
//! and middleware.

use bird_buddy::{
    build_state, enable_tracing, executor_from_config, init_metrics,
    poller::{spawn_poller, PollerCfg},
    router, AppConfig, SystemClock,
};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_tracing();

    let metrics = init_metrics()?;
    let cfg = AppConfig::load()?;
    let clock = SystemClock::shared();
    let exec = executor_from_config(&cfg, &clock)?;
    let state = build_state(&cfg, exec, clock);

    spawn_poller(
        PollerCfg {
            interval_secs: cfg.poll.interval_secs,
        },
        state.dashboard.clone(),
        state.registry.clone(),
        state.snapshots.clone(),
    );
    tracing::info!(
        stations = state.registry.ids().len(),
        interval_secs = cfg.poll.interval_secs,
        policy = ?cfg.highlights.policy,
        "bird-buddy started"
    );

    Ok(router(state, metrics.as_ref()).into())
}

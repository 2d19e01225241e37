// src/poller.rs
use std::sync::{Arc, RwLock};

use metrics::gauge;
use tokio::task::JoinHandle;

use crate::dashboard::{Dashboard, DashboardSnapshot};
use crate::stations::StationRegistry;

/// Latest published snapshot; last write wins.
pub type SnapshotStore = Arc<RwLock<DashboardSnapshot>>;

#[derive(Clone, Copy, Debug)]
pub struct PollerCfg {
    pub interval_secs: u64,
}

pub fn new_store(initial: DashboardSnapshot) -> SnapshotStore {
    Arc::new(RwLock::new(initial))
}

pub fn latest(store: &SnapshotStore) -> DashboardSnapshot {
    store.read().unwrap_or_else(|p| p.into_inner()).clone()
}

/// Refresh for the current station set and publish the result.
pub async fn poll_once(
    dashboard: &Dashboard,
    registry: &StationRegistry,
    store: &SnapshotStore,
) -> DashboardSnapshot {
    let ids = registry.ids();
    let snap = dashboard.refresh(&ids).await;

    *store.write().unwrap_or_else(|p| p.into_inner()) = snap.clone();
    gauge!("poller_last_run_ts").set(snap.generated_at.timestamp() as f64);

    tracing::info!(
        target: "poller",
        stations = ids.len(),
        state = snap.state.as_str(),
        detections = snap.detection_count,
        highlights = snap.highlights.len(),
        species = snap.species.len(),
        "dashboard tick"
    );
    snap
}

/// Spawn the background refresh loop. The first tick fires immediately.
pub fn spawn_poller(
    cfg: PollerCfg,
    dashboard: Arc<Dashboard>,
    registry: Arc<StationRegistry>,
    store: SnapshotStore,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let secs = cfg.interval_secs.max(1);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            poll_once(&dashboard, &registry, &store).await;
        }
    })
}

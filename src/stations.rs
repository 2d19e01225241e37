//! Tracked station set. Any change to the set invalidates the data service,
//! since cached detections and history are keyed by the set.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fetcher::{valid_station_ids, DataService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedStation {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid station id: {0:?}")]
    InvalidId(String),
}

pub struct StationRegistry {
    stations: RwLock<Vec<TrackedStation>>,
    data: Arc<DataService>,
}

impl StationRegistry {
    /// Seed with `initial`; duplicate and malformed ids are dropped.
    pub fn new(data: Arc<DataService>, initial: Vec<TrackedStation>) -> Self {
        let mut seeded: Vec<TrackedStation> = Vec::with_capacity(initial.len());
        for st in initial {
            if valid_station_ids(&[st.id.as_str()]).is_some()
                && !seeded.iter().any(|s| s.id == st.id)
            {
                seeded.push(st);
            }
        }
        Self {
            stations: RwLock::new(seeded),
            data,
        }
    }

    pub fn list(&self) -> Vec<TrackedStation> {
        self.read().clone()
    }

    /// Ids in the order they were added.
    pub fn ids(&self) -> Vec<String> {
        self.read().iter().map(|s| s.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// `Ok(true)` when the station was added, `Ok(false)` when already tracked.
    pub fn add(&self, mut station: TrackedStation) -> Result<bool, RegistryError> {
        station.id = station.id.trim().to_string();
        if valid_station_ids(&[station.id.as_str()]).is_none() {
            return Err(RegistryError::InvalidId(station.id));
        }
        if station.name.trim().is_empty() {
            station.name = format!("Station {}", station.id);
        }

        {
            let mut g = self.write();
            if g.iter().any(|s| s.id == station.id) {
                return Ok(false);
            }
            info!(target: "stations", id = %station.id, name = %station.name, "station added");
            g.push(station);
        }
        self.data.invalidate_all();
        Ok(true)
    }

    /// `true` when a station was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut g = self.write();
            let before = g.len();
            g.retain(|s| s.id != id);
            g.len() != before
        };
        if removed {
            info!(target: "stations", id, "station removed");
            self.data.invalidate_all();
        }
        removed
    }

    /// Display name, or `Station <id>` for an id that is not tracked.
    pub fn station_name(&self, id: &str) -> String {
        self.read()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("Station {id}"))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<TrackedStation>> {
        self.stations.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TrackedStation>> {
        self.stations.write().unwrap_or_else(|p| p.into_inner())
    }
}

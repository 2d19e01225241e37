//! Dashboard view model: one detection batch, two derived lists.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::info;

use crate::fetcher::{DataService, DataState, FetchOutcome};
use crate::highlights::{
    classify, classify_with_history, HighlightPolicy, HighlightThresholds, HistoryThresholds,
};
use crate::model::{Detection, HighlightRecord, SpeciesSummary};
use crate::summary::summarize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightSettings {
    pub policy: HighlightPolicy,
    pub window: HighlightThresholds,
    pub history: HistoryThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub station_ids: Vec<String>,
    #[serde(rename = "dataState")]
    pub state: DataState,
    pub detection_count: usize,
    pub policy: HighlightPolicy,
    pub highlights: Vec<HighlightRecord>,
    pub species: Vec<SpeciesSummary>,
}

impl DashboardSnapshot {
    pub fn empty(now: DateTime<Utc>, policy: HighlightPolicy) -> Self {
        Self {
            generated_at: now,
            station_ids: Vec::new(),
            state: DataState::Empty,
            detection_count: 0,
            policy,
            highlights: Vec::new(),
            species: Vec::new(),
        }
    }
}

pub struct Dashboard {
    data: Arc<DataService>,
    highlights: HighlightSettings,
    display_offset: FixedOffset,
}

impl Dashboard {
    pub fn new(
        data: Arc<DataService>,
        highlights: HighlightSettings,
        display_offset: FixedOffset,
    ) -> Self {
        Self {
            data,
            highlights,
            display_offset,
        }
    }

    pub fn data(&self) -> &Arc<DataService> {
        &self.data
    }

    pub fn policy(&self) -> HighlightPolicy {
        self.highlights.policy
    }

    /// Fetch once and derive both lists from the same batch.
    pub async fn refresh(&self, station_ids: &[String]) -> DashboardSnapshot {
        let now = self.data.clock().now();
        if station_ids.is_empty() {
            return DashboardSnapshot::empty(now, self.highlights.policy);
        }

        let outcome = self.data.today_detections(station_ids).await;
        let state = outcome.state();
        let detections = outcome.into_inner();
        let highlights = self.derive_highlights(station_ids, &detections).await;
        let species = summarize(&detections, self.display_offset);

        DashboardSnapshot {
            generated_at: now,
            station_ids: station_ids.to_vec(),
            state,
            detection_count: detections.len(),
            policy: self.highlights.policy,
            highlights,
            species,
        }
    }

    pub async fn highlights(&self, station_ids: &[String]) -> (DataState, Vec<HighlightRecord>) {
        if station_ids.is_empty() {
            return (DataState::Empty, Vec::new());
        }
        let outcome = self.data.today_detections(station_ids).await;
        let state = outcome.state();
        let detections = outcome.into_inner();
        (state, self.derive_highlights(station_ids, &detections).await)
    }

    pub async fn species(&self, station_ids: &[String]) -> (DataState, Vec<SpeciesSummary>) {
        if station_ids.is_empty() {
            return (DataState::Empty, Vec::new());
        }
        let outcome = self.data.today_detections(station_ids).await;
        let state = outcome.state();
        (state, summarize(&outcome.into_inner(), self.display_offset))
    }

    async fn derive_highlights(
        &self,
        station_ids: &[String],
        detections: &[Detection],
    ) -> Vec<HighlightRecord> {
        let s = &self.highlights;
        if s.policy == HighlightPolicy::SameWindow || detections.is_empty() {
            return classify(detections, &s.window);
        }

        match self.data.historical_detections(station_ids).await {
            FetchOutcome::Empty => {
                info!(target: "dashboard", "historical backfill unavailable; using same-window highlights");
                classify(detections, &s.window)
            }
            FetchOutcome::Fresh(hist) | FetchOutcome::Stale(hist) => {
                let now = self.data.clock().now();
                classify_with_history(detections, &hist, now, &s.window, &s.history)
            }
        }
    }
}

//! # Highlight Classifier
//! Picks at most a handful of noteworthy detections out of a batch.
//!
//! Two policies, never blended:
//! - `same-window` (default): rarity judged within the batch itself.
//! - `historical`: rarity judged against a multi-year backfill
//!   (first-ever, first-of-season, unusual, rare-sighting).
//!
//! Both are pure functions of their inputs; thresholds come from config.

mod history;
mod window;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::Detection;

pub use history::{build_history, classify_with_history, is_common_bird, SpeciesHistory};
pub use window::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HighlightPolicy {
    #[default]
    SameWindow,
    Historical,
}

fn default_min_confidence() -> f64 {
    0.4
}
fn default_notable_confidence() -> f64 {
    0.85
}
fn default_rare_confidence() -> f64 {
    0.95
}
fn default_max_group_size() -> usize {
    5
}
fn default_max_results() -> usize {
    5
}

/// Same-window thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightThresholds {
    /// Groups averaging below this are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Single detection above this is `notable`.
    #[serde(default = "default_notable_confidence")]
    pub notable_confidence: f64,
    /// Single detection above this is `rare-sighting`.
    #[serde(default = "default_rare_confidence")]
    pub rare_confidence: f64,
    /// Species seen more often than this in the batch are too common.
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for HighlightThresholds {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            notable_confidence: default_notable_confidence(),
            rare_confidence: default_rare_confidence(),
            max_group_size: default_max_group_size(),
            max_results: default_max_results(),
        }
    }
}

impl HighlightThresholds {
    /// Clamp confidences into [0, 1] and keep `min <= notable <= rare`.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        for (v, d) in [
            (&mut self.min_confidence, defaults.min_confidence),
            (&mut self.notable_confidence, defaults.notable_confidence),
            (&mut self.rare_confidence, defaults.rare_confidence),
        ] {
            if !(0.0..=1.0).contains(v) {
                *v = d;
            }
        }
        if self.notable_confidence > self.rare_confidence {
            std::mem::swap(&mut self.notable_confidence, &mut self.rare_confidence);
        }
        if self.min_confidence > self.notable_confidence {
            self.min_confidence = self.notable_confidence;
        }
        if self.max_results == 0 {
            self.max_results = defaults.max_results;
        }
    }
}

fn default_season_gap_days() -> i64 {
    90
}
fn default_unusual_gap_days() -> i64 {
    120
}
fn default_unusual_max_count() -> usize {
    3
}
fn default_rare_max_count() -> usize {
    10
}
fn default_history_rare_confidence() -> f64 {
    0.9
}
fn default_common_names() -> Vec<String> {
    [
        "house sparrow",
        "eurasian collared-dove",
        "house finch",
        "american goldfinch",
        "chickadee",
        "cardinal",
        "blue jay",
        "robin",
        "crow",
        "raven",
        "pigeon",
        "starling",
        "mockingbird",
        "wren",
        "sparrow",
        "finch",
        "dove",
        "canada goose",
        "mallard",
        "woodpecker",
        "nuthatch",
        "titmouse",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Thresholds for the historical policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryThresholds {
    /// Not seen for this many days → `first-of-season`.
    #[serde(default = "default_season_gap_days")]
    pub season_gap_days: i64,
    /// Not seen for this many days → `unusual`.
    #[serde(default = "default_unusual_gap_days")]
    pub unusual_gap_days: i64,
    /// Fewer historical detections than this → `unusual`.
    #[serde(default = "default_unusual_max_count")]
    pub unusual_max_count: usize,
    /// Fewer historical detections than this (with high confidence) → `rare-sighting`.
    #[serde(default = "default_rare_max_count")]
    pub rare_max_count: usize,
    #[serde(default = "default_history_rare_confidence")]
    pub rare_confidence: f64,
    /// Never flagged `unusual`. Matched as a lowercase substring both ways.
    #[serde(default = "default_common_names")]
    pub common_names: Vec<String>,
}

impl Default for HistoryThresholds {
    fn default() -> Self {
        Self {
            season_gap_days: default_season_gap_days(),
            unusual_gap_days: default_unusual_gap_days(),
            unusual_max_count: default_unusual_max_count(),
            rare_max_count: default_rare_max_count(),
            rare_confidence: default_history_rare_confidence(),
            common_names: default_common_names(),
        }
    }
}

impl HistoryThresholds {
    pub fn sanitize(&mut self) {
        if !(0.0..=1.0).contains(&self.rare_confidence) {
            self.rare_confidence = default_history_rare_confidence();
        }
        if self.season_gap_days <= 0 {
            self.season_gap_days = default_season_gap_days();
        }
        if self.unusual_gap_days <= 0 {
            self.unusual_gap_days = default_unusual_gap_days();
        }
        self.common_names = self
            .common_names
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
    }
}

/// Detections grouped by species id; groups in first-appearance order, each
/// group sorted ascending by timestamp (stable).
pub(crate) fn group_by_species(detections: &[Detection]) -> Vec<Vec<&Detection>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Detection>> = Vec::new();
    for d in detections {
        let slot = *index.entry(d.species.id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(d);
    }
    for g in &mut groups {
        g.sort_by_key(|d| d.timestamp);
    }
    groups
}

pub(crate) fn mean_confidence(group: &[&Detection]) -> f64 {
    if group.is_empty() {
        return 0.0;
    }
    group.iter().map(|d| d.confidence).sum::<f64>() / group.len() as f64
}

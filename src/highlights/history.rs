use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{group_by_species, HighlightThresholds, HistoryThresholds};
use crate::model::{Detection, HighlightRecord, HighlightType};

/// What the backfill says about one species.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesHistory {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: usize,
    pub mean_confidence: f64,
    /// Detections within the season gap before `now`.
    pub recent_count: usize,
}

/// Per-species history keyed by species id. Detections dated today (UTC)
/// are left out so today's batch is never compared against itself.
pub fn build_history(
    historical: &[Detection],
    now: DateTime<Utc>,
    season_gap_days: i64,
) -> HashMap<String, SpeciesHistory> {
    let today = now.date_naive();
    let recent_cutoff = now - Duration::days(season_gap_days);
    let mut map: HashMap<String, SpeciesHistory> = HashMap::new();

    for d in historical.iter().filter(|d| d.timestamp.date_naive() != today) {
        let h = map
            .entry(d.species.id.clone())
            .or_insert_with(|| SpeciesHistory {
                first_seen: d.timestamp,
                last_seen: d.timestamp,
                count: 0,
                mean_confidence: 0.0,
                recent_count: 0,
            });
        h.count += 1;
        h.mean_confidence += (d.confidence - h.mean_confidence) / h.count as f64;
        h.first_seen = h.first_seen.min(d.timestamp);
        h.last_seen = h.last_seen.max(d.timestamp);
        if d.timestamp >= recent_cutoff {
            h.recent_count += 1;
        }
    }
    map
}

/// Lowercased substring match in either direction.
pub fn is_common_bird(common_name: &str, common_names: &[String]) -> bool {
    let name = common_name.to_lowercase();
    common_names
        .iter()
        .any(|c| name.contains(c.as_str()) || c.contains(name.as_str()))
}

fn is_unusual(
    rep: &Detection,
    h: &SpeciesHistory,
    now: DateTime<Utc>,
    t: &HistoryThresholds,
) -> bool {
    if is_common_bird(&rep.species.common_name, &t.common_names) {
        return false;
    }
    h.count < t.unusual_max_count || h.last_seen < now - Duration::days(t.unusual_gap_days)
}

/// Historical classification of today's batch against the backfill.
pub fn classify_with_history(
    today: &[Detection],
    historical: &[Detection],
    now: DateTime<Utc>,
    window: &HighlightThresholds,
    t: &HistoryThresholds,
) -> Vec<HighlightRecord> {
    if today.is_empty() {
        return Vec::new();
    }
    let history = build_history(historical, now, t.season_gap_days);

    let mut out: Vec<HighlightRecord> = Vec::new();
    for group in group_by_species(today) {
        let Some(rep) = group.first().copied() else {
            continue;
        };
        let name = &rep.species.common_name;

        let kind = match history.get(&rep.species.id) {
            None if historical.is_empty() => {
                debug!(target: "highlights", species = %name, "no backfill, skipping");
                continue;
            }
            None => HighlightType::FirstEver,
            Some(h) => {
                let days_since = (now - h.last_seen).num_days();
                if days_since >= t.season_gap_days {
                    HighlightType::FirstOfSeason
                } else if rep.confidence < window.min_confidence {
                    continue;
                } else if is_unusual(rep, h, now, t) {
                    HighlightType::Unusual
                } else if rep.confidence > t.rare_confidence && h.count < t.rare_max_count {
                    HighlightType::RareSighting
                } else {
                    continue;
                }
            }
        };

        debug!(target: "highlights", species = %name, kind = kind.as_str(), "historical highlight");
        out.push(HighlightRecord {
            detection: rep.clone(),
            highlight_type: kind,
        });
    }

    out.sort_by(|a, b| b.detection.confidence.total_cmp(&a.detection.confidence));
    out.truncate(window.max_results);
    out
}

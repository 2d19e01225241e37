//! Per-species rollup for the "today's species" view.

use chrono::{DateTime, FixedOffset, Utc};

use crate::highlights::group_by_species;
use crate::model::{Detection, SpeciesSummary};

fn hhmm(ts: DateTime<Utc>, offset: &FixedOffset) -> String {
    ts.with_timezone(offset).format("%H:%M").to_string()
}

/// Summaries sorted by descending count; ties keep first-appearance order.
pub fn summarize(detections: &[Detection], offset: FixedOffset) -> Vec<SpeciesSummary> {
    let mut out: Vec<SpeciesSummary> = group_by_species(detections)
        .into_iter()
        .filter_map(|group| {
            let first = *group.first()?;
            let last = *group.last()?;

            let mut station_names: Vec<&str> = Vec::new();
            let mut station_ids: Vec<&str> = Vec::new();
            for st in group.iter().filter_map(|d| d.station.as_ref()) {
                if !station_names.contains(&st.name.as_str()) {
                    station_names.push(&st.name);
                }
                if !station_ids.contains(&st.id.as_str()) {
                    station_ids.push(&st.id);
                }
            }

            let time_window = if group.len() == 1 {
                hhmm(first.timestamp, &offset)
            } else {
                format!(
                    "{}–{}",
                    hhmm(first.timestamp, &offset),
                    hhmm(last.timestamp, &offset)
                )
            };

            Some(SpeciesSummary {
                species: first.species.clone(),
                count: group.len(),
                time_window,
                station_names: station_names.join(", "),
                primary_station_id: station_ids.first().map(|s| s.to_string()).unwrap_or_default(),
                average_confidence: crate::highlights::mean_confidence(&group),
            })
        })
        .collect();

    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

use tracing::debug;

use super::{group_by_species, mean_confidence, HighlightThresholds};
use crate::model::{Detection, HighlightRecord, HighlightType};

/// Same-window classification: a species is interesting when it shows up
/// once, confidently, in this batch.
pub fn classify(detections: &[Detection], t: &HighlightThresholds) -> Vec<HighlightRecord> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<HighlightRecord> = Vec::new();
    for group in group_by_species(detections) {
        let Some(first) = group.first() else {
            continue;
        };
        let count = group.len();
        let avg = mean_confidence(&group);

        if avg < t.min_confidence || count > t.max_group_size {
            continue;
        }

        let kind = match count {
            1 if avg > t.rare_confidence => HighlightType::RareSighting,
            1 if avg > t.notable_confidence => HighlightType::Notable,
            _ => continue,
        };
        debug!(target: "highlights", species = %first.species.common_name, kind = kind.as_str(), "highlight");
        out.push(HighlightRecord {
            detection: (*first).clone(),
            highlight_type: kind,
        });
    }

    out.sort_by(|a, b| b.detection.confidence.total_cmp(&a.detection.confidence));
    out.truncate(t.max_results);
    out
}

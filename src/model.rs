//! Records returned by the BirdWeather API and the derived
//! highlight/summary shapes handed to the presentation layer.
//!
//! Upstream records are deserialized as-is (camelCase) and never mutated.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Species {
    pub id: String,
    /// Used for heuristic name matching only, never as a key.
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scientific_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Station as embedded in a detection node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default)]
    pub score: f64,
    pub species: Species,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<StationRef>,
}

/// Highlight category; serialized kebab-case (`first-ever`, `rare-sighting`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HighlightType {
    FirstEver,
    FirstOfSeason,
    RareSighting,
    Unusual,
    Notable,
}

impl HighlightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightType::FirstEver => "first-ever",
            HighlightType::FirstOfSeason => "first-of-season",
            HighlightType::RareSighting => "rare-sighting",
            HighlightType::Unusual => "unusual",
            HighlightType::Notable => "notable",
        }
    }
}

/// A detection flagged as noteworthy. Recomputed on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRecord {
    #[serde(flatten)]
    pub detection: Detection,
    pub highlight_type: HighlightType,
}

/// Per-species rollup of a detection batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesSummary {
    pub species: Species,
    pub count: usize,
    /// "HH:MM–HH:MM", or "HH:MM" for a single detection.
    pub time_window: String,
    /// Distinct station names joined with ", ".
    pub station_names: String,
    /// First station id seen for this species (empty when none).
    pub primary_station_id: String,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCounts {
    pub detections: u64,
    pub species: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coords>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_detection_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_detection_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<StationCounts>,
    /// Current weather block, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesCount {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_probability: Option<f64>,
    pub species: Species,
    pub species_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayBin {
    pub count: u64,
    /// Hour of day, 0-23.
    pub key: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfDayCount {
    pub species: Species,
    pub species_id: String,
    pub count: u64,
    pub bins: Vec<TimeOfDayBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySpeciesCount {
    pub count: u64,
    pub species: Species,
    pub species_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: u64,
    pub counts: Vec<DailySpeciesCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub detections: u64,
    pub species: u64,
    pub stations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birdnet: Option<u64>,
}

/// Calendar-day range understood by the upstream `InputDuration` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Period {
    /// The current UTC day.
    pub fn today(now: DateTime<Utc>) -> Self {
        let d = now.date_naive();
        Self { from: d, to: d }
    }

    /// Seven days back through today.
    pub fn last_week(now: DateTime<Utc>) -> Self {
        Self {
            from: (now - Duration::days(7)).date_naive(),
            to: now.date_naive(),
        }
    }

    /// Coarse day range covering `[window_start, now]`. The upstream filters on
    /// calendar days, so the end is pushed one day out and callers re-filter
    /// on exact instants.
    pub fn covering(window_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let to = now.date_naive();
        Self {
            from: window_start.date_naive(),
            to: to.succ_opt().unwrap_or(to),
        }
    }

    /// `years` back through today.
    pub fn years_back(now: DateTime<Utc>, years: u32) -> Self {
        let to = now.date_naive();
        let from = to
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN);
        Self { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn detection_parses_offset_timestamps_into_utc() {
        let raw = r#"{
            "id": "d1",
            "timestamp": "2025-05-01T08:00:00.000-04:00",
            "confidence": 0.91,
            "score": 7.2,
            "species": {"id": "s1", "commonName": "Wood Thrush"},
            "station": {"id": "st1", "name": "Backyard"}
        }"#;
        let d: Detection = serde_json::from_str(raw).unwrap();
        assert_eq!(d.timestamp, Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap());
        assert_eq!(d.species.common_name, "Wood Thrush");
        assert_eq!(d.station.unwrap().name, "Backyard");
    }

    #[test]
    fn highlight_type_serializes_kebab_case() {
        let s = serde_json::to_string(&HighlightType::FirstOfSeason).unwrap();
        assert_eq!(s, "\"first-of-season\"");
        assert_eq!(HighlightType::RareSighting.as_str(), "rare-sighting");
    }

    #[test]
    fn covering_period_is_looser_than_window() {
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 6, 30, 0).unwrap();
        let p = Period::covering(now - Duration::hours(24), now);
        assert_eq!(p.from, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
        assert_eq!(p.to, NaiveDate::from_ymd_opt(2025, 5, 3).unwrap());

        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["from"], "2025-05-01");
    }

    #[test]
    fn years_back_spans_calendar_years() {
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 6, 30, 0).unwrap();
        let p = Period::years_back(now, 2);
        assert_eq!(p.from, NaiveDate::from_ymd_opt(2023, 5, 2).unwrap());
    }
}

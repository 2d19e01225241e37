//! # Detection Fetcher
//! Data-access layer in front of the BirdWeather API.
//!
//! - Rolling 24 h detections through the rate limiter and a 5 min cache,
//!   re-filtered on exact instants every time they are served.
//! - Paginated historical backfill (2 years) through a 6 h cache.
//! - Auxiliary lookups (station search/info, top species, patterns, totals).
//!
//! Nothing here fails outward: upstream errors and limiter denials turn into
//! `FetchOutcome::Stale` or `FetchOutcome::Empty`, or an empty lookup result.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheEntry, CacheStatus, TtlCache};
use crate::clock::SharedClock;
use crate::model::{
    Counts, DailyCount, Detection, Period, SpeciesCount, Station, TimeOfDayCount,
};
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::upstream::{execute_typed, queries, SharedExecutor};

pub const ROLLING_WINDOW_HOURS: i64 = 24;

const TODAY_KIND: &str = "today";
const HISTORICAL_KIND: &str = "historical";

static STATION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("station id regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub today_ttl: Duration,
    pub today_page_size: u32,
    pub history_ttl: Duration,
    pub history_years: u32,
    pub history_page_size: u32,
    pub history_max_pages: usize,
    pub history_max_records: usize,
    pub history_page_delay: StdDuration,
    /// Quiet period after a backfill that produced no pages.
    pub history_retry: Duration,
    pub search_limit: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            today_ttl: Duration::minutes(5),
            today_page_size: 500,
            history_ttl: Duration::hours(6),
            history_years: 2,
            history_page_size: 100,
            history_max_pages: 50,
            history_max_records: 5000,
            history_page_delay: StdDuration::from_millis(150),
            history_retry: Duration::minutes(5),
            search_limit: 20,
        }
    }
}

/// Where the served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataState {
    Fresh,
    Stale,
    Empty,
}

impl DataState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataState::Fresh => "fresh",
            DataState::Stale => "stale",
            DataState::Empty => "empty",
        }
    }
}

/// Explicit result of a guarded fetch, so callers can render
/// "showing cached data" instead of losing the distinction.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Fresh(T),
    Stale(T),
    Empty,
}

impl<T> FetchOutcome<T> {
    pub fn state(&self) -> DataState {
        match self {
            FetchOutcome::Fresh(_) => DataState::Fresh,
            FetchOutcome::Stale(_) => DataState::Stale,
            FetchOutcome::Empty => DataState::Empty,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            FetchOutcome::Fresh(t) | FetchOutcome::Stale(t) => Some(t),
            FetchOutcome::Empty => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, FetchOutcome::Stale(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Fresh(t) => FetchOutcome::Fresh(f(t)),
            FetchOutcome::Stale(t) => FetchOutcome::Stale(f(t)),
            FetchOutcome::Empty => FetchOutcome::Empty,
        }
    }
}

impl<T: Default> FetchOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            FetchOutcome::Fresh(t) | FetchOutcome::Stale(t) => t,
            FetchOutcome::Empty => T::default(),
        }
    }
}

// --- upstream response shapes ---

#[derive(Debug, Deserialize)]
struct NodeList<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DetectionsData {
    detections: NodeList<Detection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedDetections {
    nodes: Vec<Detection>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct HistoricalPage {
    detections: PagedDetections,
}

#[derive(Debug, Deserialize)]
struct StationData {
    station: Option<Station>,
}

#[derive(Debug, Deserialize)]
struct StationsData {
    stations: NodeList<Station>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopSpeciesData {
    top_species: Vec<SpeciesCount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeOfDayData {
    time_of_day_detection_counts: Vec<TimeOfDayCount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyData {
    daily_detection_counts: Vec<DailyCount>,
}

#[derive(Debug, Deserialize)]
struct CountsData {
    counts: Counts,
}

/// Keep detections at or after `window_start`. Idempotent for a fixed boundary.
pub fn filter_window(detections: &[Detection], window_start: DateTime<Utc>) -> Vec<Detection> {
    detections
        .iter()
        .filter(|d| d.timestamp >= window_start)
        .cloned()
        .collect()
}

/// Trimmed, sorted, deduplicated ids; `None` if the set is empty or any id is malformed.
pub fn valid_station_ids<S: AsRef<str>>(station_ids: &[S]) -> Option<Vec<String>> {
    let mut ids = Vec::with_capacity(station_ids.len());
    for raw in station_ids {
        let id = raw.as_ref().trim();
        if !STATION_ID_RE.is_match(id) {
            return None;
        }
        ids.push(id.to_string());
    }
    if ids.is_empty() {
        return None;
    }
    ids.sort();
    ids.dedup();
    Some(ids)
}

pub struct DataService {
    exec: SharedExecutor,
    clock: SharedClock,
    limiter: RateLimiter,
    today: TtlCache<Vec<Detection>>,
    history: TtlCache<Vec<Detection>>,
    history_retry_at: Mutex<HashMap<String, DateTime<Utc>>>,
    settings: FetchSettings,
}

impl DataService {
    pub fn new(
        exec: SharedExecutor,
        clock: SharedClock,
        limits: RateLimits,
        settings: FetchSettings,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        gauge!("detection_cache_ttl_secs").set(settings.today_ttl.num_seconds() as f64);

        Self {
            limiter: RateLimiter::new(limits, clock.clone()),
            today: TtlCache::new(TODAY_KIND, settings.today_ttl, clock.clone()),
            history: TtlCache::new(HISTORICAL_KIND, settings.history_ttl, clock.clone()),
            history_retry_at: Mutex::new(HashMap::new()),
            exec,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Last-24 h detections, never failing outward.
    pub async fn get_today_detections<S: AsRef<str>>(&self, station_ids: &[S]) -> Vec<Detection> {
        self.today_detections(station_ids).await.into_inner()
    }

    pub async fn today_detections<S: AsRef<str>>(
        &self,
        station_ids: &[S],
    ) -> FetchOutcome<Vec<Detection>> {
        let Some(ids) = valid_station_ids(station_ids) else {
            debug!(target: "fetcher", "rejected station id set before any call");
            return FetchOutcome::Empty;
        };
        let key = cache_key(TODAY_KIND, &ids);
        let now = self.clock.now();
        let window_start = now - Duration::hours(ROLLING_WINDOW_HOURS);

        let cached = self.today.get(&key);
        if let Some(entry) = &cached {
            if entry.is_fresh(now) {
                counter!("detection_cache_hits_total").increment(1);
                debug!(target: "fetcher", %key, "fresh cache hit");
                return FetchOutcome::Fresh(filter_window(&entry.data, window_start));
            }
        }

        if !self.limiter.try_acquire(TODAY_KIND) {
            return serve_stale(cached, Some(window_start), &key);
        }
        counter!("detection_cache_misses_total").increment(1);

        let vars = json!({
            "stationIds": ids,
            "period": Period::covering(window_start, now),
            "first": self.settings.today_page_size,
        });
        match self.query::<DetectionsData>(queries::DETECTIONS, vars).await {
            Ok(data) => {
                let fetched = data.detections.nodes.len();
                let kept = filter_window(&data.detections.nodes, window_start);
                debug!(target: "fetcher", %key, fetched, kept = kept.len(), "refreshed today cache");
                self.today.put(&key, kept.clone());
                FetchOutcome::Fresh(kept)
            }
            Err(e) => {
                warn!(target: "fetcher", %key, error = %e, "today detections failed");
                serve_stale(cached, Some(window_start), &key)
            }
        }
    }

    /// Backfill of the last `history_years`, paginated by cursor.
    pub async fn historical_detections<S: AsRef<str>>(
        &self,
        station_ids: &[S],
    ) -> FetchOutcome<Vec<Detection>> {
        let Some(ids) = valid_station_ids(station_ids) else {
            return FetchOutcome::Empty;
        };
        let key = cache_key(HISTORICAL_KIND, &ids);
        let now = self.clock.now();

        let cached = self.history.get(&key);
        if let Some(entry) = &cached {
            if entry.is_fresh(now) {
                counter!("detection_cache_hits_total").increment(1);
                return FetchOutcome::Fresh(entry.data.clone());
            }
        }

        // Not rate limited; paced by the page delay, the 6 h TTL and the
        // retry gate after a failed run.
        if let Some(until) = self.history_retry_after(&key) {
            if now < until {
                debug!(target: "fetcher", %key, %until, "historical backfill waiting to retry");
                return serve_stale(cached, None, &key);
            }
        }
        counter!("detection_cache_misses_total").increment(1);

        let period = Period::years_back(now, self.settings.history_years);
        let mut all: Vec<Detection> = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0usize;
        let mut ok_pages = 0usize;

        while pages < self.settings.history_max_pages
            && all.len() < self.settings.history_max_records
        {
            pages += 1;
            let vars = json!({
                "stationIds": ids,
                "period": period,
                "first": self.settings.history_page_size,
                "after": after,
            });
            match self
                .query::<HistoricalPage>(queries::HISTORICAL_DETECTIONS, vars)
                .await
            {
                Ok(page) => {
                    ok_pages += 1;
                    all.extend(page.detections.nodes);
                    let info = page.detections.page_info;
                    if !info.has_next_page || info.end_cursor.is_none() {
                        break;
                    }
                    after = info.end_cursor;
                    if !self.settings.history_page_delay.is_zero() {
                        tokio::time::sleep(self.settings.history_page_delay).await;
                    }
                }
                Err(e) => {
                    warn!(target: "fetcher", %key, page = pages, error = %e, "historical page failed");
                    break;
                }
            }
        }

        if ok_pages == 0 {
            self.set_history_retry(&key, Some(now + self.settings.history_retry));
            return serve_stale(cached, None, &key);
        }
        self.set_history_retry(&key, None);

        info!(target: "fetcher", %key, records = all.len(), pages = ok_pages, "historical backfill done");
        self.history.put(&key, all.clone());
        FetchOutcome::Fresh(all)
    }

    pub async fn search_stations(&self, text: &str) -> Vec<Station> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let vars = json!({ "query": text, "first": self.settings.search_limit });
        self.lookup::<StationsData>("search stations", queries::SEARCH_STATIONS, vars)
            .await
            .map(|d| d.stations.nodes)
            .unwrap_or_default()
    }

    pub async fn station_info(&self, station_id: &str) -> Option<Station> {
        let ids = valid_station_ids(&[station_id])?;
        let vars = json!({ "id": ids[0] });
        self.lookup::<StationData>("station info", queries::STATION_INFO, vars)
            .await
            .and_then(|d| d.station)
    }

    pub async fn top_species<S: AsRef<str>>(&self, station_ids: &[S], limit: u32) -> Vec<SpeciesCount> {
        let Some(ids) = valid_station_ids(station_ids) else {
            return Vec::new();
        };
        let vars = json!({
            "stationIds": ids,
            "period": Period::today(self.clock.now()),
            "limit": limit,
        });
        self.lookup::<TopSpeciesData>("top species", queries::TOP_SPECIES, vars)
            .await
            .map(|d| d.top_species)
            .unwrap_or_default()
    }

    pub async fn time_of_day_counts<S: AsRef<str>>(&self, station_ids: &[S]) -> Vec<TimeOfDayCount> {
        let Some(ids) = valid_station_ids(station_ids) else {
            return Vec::new();
        };
        let vars = json!({ "stationIds": ids, "period": Period::today(self.clock.now()) });
        self.lookup::<TimeOfDayData>("time-of-day counts", queries::TIME_OF_DAY_COUNTS, vars)
            .await
            .map(|d| d.time_of_day_detection_counts)
            .unwrap_or_default()
    }

    pub async fn daily_detection_counts<S: AsRef<str>>(&self, station_ids: &[S]) -> Vec<DailyCount> {
        let Some(ids) = valid_station_ids(station_ids) else {
            return Vec::new();
        };
        let vars = json!({ "stationIds": ids, "period": Period::last_week(self.clock.now()) });
        self.lookup::<DailyData>("daily counts", queries::DAILY_DETECTION_COUNTS, vars)
            .await
            .map(|d| d.daily_detection_counts)
            .unwrap_or_default()
    }

    pub async fn counts<S: AsRef<str>>(&self, station_ids: &[S]) -> Option<Counts> {
        let ids = valid_station_ids(station_ids)?;
        let vars = json!({ "stationIds": ids, "period": Period::today(self.clock.now()) });
        self.lookup::<CountsData>("counts", queries::COUNTS, vars)
            .await
            .map(|d| d.counts)
    }

    /// Clear both caches and the rate window; call whenever the tracked
    /// station set changes.
    pub fn invalidate_all(&self) {
        self.today.invalidate_all();
        self.history.invalidate_all();
        self.history_retry_at
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.limiter.reset();
        info!(target: "fetcher", "caches and rate window cleared");
    }

    pub fn cache_status(&self) -> Vec<CacheStatus> {
        let mut rows = self.today.status();
        rows.extend(self.history.status());
        rows
    }

    fn history_retry_after(&self, key: &str) -> Option<DateTime<Utc>> {
        let g = self.history_retry_at.lock().unwrap_or_else(|p| p.into_inner());
        g.get(key).copied()
    }

    fn set_history_retry(&self, key: &str, until: Option<DateTime<Utc>>) {
        let mut g = self.history_retry_at.lock().unwrap_or_else(|p| p.into_inner());
        match until {
            Some(t) => {
                g.insert(key.to_string(), t);
            }
            None => {
                g.remove(key);
            }
        }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        vars: Value,
    ) -> Result<T, crate::upstream::UpstreamError> {
        execute_typed::<T>(self.exec.as_ref(), query, vars).await
    }

    async fn lookup<T: DeserializeOwned>(&self, what: &str, query: &str, vars: Value) -> Option<T> {
        match self.query::<T>(query, vars).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(target: "fetcher", lookup = what, error = %e, "lookup failed");
                None
            }
        }
    }
}

/// Stale fallback, re-filtered to the current window when one applies.
fn serve_stale(
    cached: Option<CacheEntry<Vec<Detection>>>,
    window_start: Option<DateTime<Utc>>,
    key: &str,
) -> FetchOutcome<Vec<Detection>> {
    match cached {
        Some(entry) => {
            counter!("detection_cache_stale_served_total").increment(1);
            debug!(target: "fetcher", %key, "serving stale cache");
            let data = match window_start {
                Some(ws) => filter_window(&entry.data, ws),
                None => entry.data,
            };
            FetchOutcome::Stale(data)
        }
        None => {
            debug!(target: "fetcher", %key, "no data to serve");
            FetchOutcome::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Species;
    use crate::upstream::{MockExecutor, MockReply};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 12, 0, 0).unwrap()
    }

    fn det(id: &str, ts: DateTime<Utc>) -> Detection {
        Detection {
            id: id.into(),
            timestamp: ts,
            confidence: 0.9,
            probability: None,
            score: 1.0,
            species: Species {
                id: "s1".into(),
                common_name: "Veery".into(),
                scientific_name: None,
                thumbnail_url: None,
                color: None,
            },
            station: None,
        }
    }

    fn detections_reply(items: &[Detection]) -> MockReply {
        MockReply::Data(json!({ "detections": { "nodes": items } }))
    }

    fn service(mock: Arc<MockExecutor>, clock: Arc<ManualClock>) -> DataService {
        DataService::new(
            mock,
            clock,
            RateLimits {
                max_calls_per_minute: 10,
                min_call_interval: Duration::seconds(1),
            },
            FetchSettings {
                history_page_delay: StdDuration::ZERO,
                ..FetchSettings::default()
            },
        )
    }

    #[test]
    fn window_filter_is_idempotent() {
        let ws = t0() - Duration::hours(24);
        let items = vec![
            det("old", ws - Duration::seconds(1)),
            det("edge", ws),
            det("new", t0()),
        ];
        let once = filter_window(&items, ws);
        let twice = filter_window(&once, ws);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn station_id_validation() {
        assert_eq!(
            valid_station_ids(&["b", " a ", "b"]),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(valid_station_ids::<&str>(&[]).is_none());
        assert!(valid_station_ids(&["ok", "bad id"]).is_none());
        assert!(valid_station_ids(&[""]).is_none());
    }

    #[tokio::test]
    async fn drops_detections_older_than_window() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        mock.set(
            "detections",
            detections_reply(&[
                det("yesterday", t0() - Duration::hours(25)),
                det("recent", t0() - Duration::hours(1)),
            ]),
        );
        let svc = service(mock.clone(), clock);

        let out = svc.today_detections(&["1001"]).await;
        assert_eq!(out.state(), DataState::Fresh);
        let ids: Vec<_> = out.into_inner().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["recent"]);
    }

    #[tokio::test]
    async fn fresh_cache_hit_issues_no_call_and_refilters() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        mock.set(
            "detections",
            detections_reply(&[
                det("a", t0() - Duration::hours(23) - Duration::minutes(58)),
                det("b", t0() - Duration::hours(1)),
            ]),
        );
        let svc = service(mock.clone(), clock.clone());

        assert_eq!(svc.get_today_detections(&["1001"]).await.len(), 2);
        clock.advance(Duration::minutes(3));
        let again = svc.today_detections(&["1001"]).await;
        assert_eq!(again.state(), DataState::Fresh);
        // "a" aged out of the rolling window while cached.
        assert_eq!(again.into_inner().len(), 1);
        assert_eq!(mock.call_count("detections"), 1);
    }

    #[tokio::test]
    async fn upstream_failure_serves_stale_then_empty_without_cache() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        mock.enqueue("detections", detections_reply(&[det("a", t0())]));
        mock.set("detections", MockReply::Fail("upstream down".into()));
        let svc = service(mock.clone(), clock.clone());

        assert_eq!(svc.today_detections(&["1001"]).await.state(), DataState::Fresh);
        clock.advance(Duration::minutes(6));
        let stale = svc.today_detections(&["1001"]).await;
        assert!(stale.is_stale());
        assert_eq!(stale.into_inner().len(), 1);

        clock.advance(Duration::seconds(2));
        assert_eq!(svc.today_detections(&["2002"]).await, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn limiter_denial_serves_stale() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        mock.set("detections", detections_reply(&[det("a", t0())]));
        let svc = service(mock.clone(), clock.clone());

        svc.today_detections(&["1001"]).await;
        clock.advance(Duration::minutes(6));
        // Another key takes the slot; the next refresh is inside the spacing.
        svc.today_detections(&["2002"]).await;
        let out = svc.today_detections(&["1001"]).await;
        assert!(out.is_stale());
        assert_eq!(mock.call_count("detections"), 2);
    }

    #[tokio::test]
    async fn invalid_ids_issue_no_call() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        let svc = service(mock.clone(), clock);

        assert_eq!(svc.today_detections(&["no spaces"]).await, FetchOutcome::Empty);
        assert!(svc.search_stations("   ").await.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn historical_backfill_follows_cursor() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        let page = |ids: &[&str], next: Option<&str>| {
            let nodes: Vec<Detection> = ids.iter().map(|i| det(i, t0() - Duration::days(30))).collect();
            MockReply::Data(json!({
                "detections": {
                    "nodes": nodes,
                    "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next }
                }
            }))
        };
        mock.enqueue("historicalDetections", page(&["h1", "h2"], Some("c1")));
        mock.enqueue("historicalDetections", page(&["h3"], None));
        let svc = service(mock.clone(), clock);

        let out = svc.historical_detections(&["1001"]).await;
        assert_eq!(out.state(), DataState::Fresh);
        assert_eq!(out.into_inner().len(), 3);

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].variables["after"], "c1");

        // Served from the 6 h cache.
        assert_eq!(svc.historical_detections(&["1001"]).await.into_inner().len(), 3);
        assert_eq!(mock.call_count("historicalDetections"), 2);
    }

    #[tokio::test]
    async fn invalidate_all_forgets_cached_keys() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mock = Arc::new(MockExecutor::new());
        mock.set("detections", detections_reply(&[det("a", t0())]));
        let svc = service(mock.clone(), clock);

        svc.today_detections(&["1001"]).await;
        assert_eq!(svc.cache_status().len(), 1);
        svc.invalidate_all();
        assert!(svc.cache_status().is_empty());
        assert_eq!(svc.limiter().recent_calls(), 0);
    }
}

// src/config.rs
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use crate::dashboard::HighlightSettings;
use crate::fetcher::FetchSettings;
use crate::highlights::{HighlightPolicy, HighlightThresholds, HistoryThresholds};
use crate::rate_limit::RateLimits;
use crate::stations::TrackedStation;
use crate::upstream::http::DEFAULT_ENDPOINT;

pub const ENV_CONFIG_PATH: &str = "BIRD_BUDDY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/bird_buddy.toml";

// Upper bounds for durations read from config; larger values are clamped.
const MAX_TTL_SECS: u64 = 7 * 24 * 3600;
const MAX_INTERVAL_MS: u64 = 3600 * 1000;
const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_POLL_SECS: u64 = 24 * 3600;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_search_limit() -> u32 {
    20
}
fn default_max_calls() -> usize {
    10
}
fn default_min_interval_ms() -> u64 {
    1000
}
fn default_today_ttl_secs() -> u64 {
    300
}
fn default_today_page_size() -> u32 {
    500
}
fn default_history_ttl_secs() -> u64 {
    6 * 3600
}
fn default_history_years() -> u32 {
    2
}
fn default_history_page_size() -> u32 {
    100
}
fn default_history_max_pages() -> usize {
    50
}
fn default_history_max_records() -> usize {
    5000
}
fn default_page_delay_ms() -> u64 {
    150
}
fn default_history_retry_secs() -> u64 {
    300
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_utc_offset() -> String {
    "+00:00".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCfg {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Serve canned data instead of calling BirdWeather.
    #[serde(default)]
    pub mock: bool,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            mock: false,
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitCfg {
    #[serde(default = "default_max_calls")]
    pub max_calls_per_minute: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_call_interval_ms: u64,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self {
            max_calls_per_minute: default_max_calls(),
            min_call_interval_ms: default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheCfg {
    #[serde(default = "default_today_ttl_secs")]
    pub today_ttl_secs: u64,
    #[serde(default = "default_today_page_size")]
    pub today_page_size: u32,
    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            today_ttl_secs: default_today_ttl_secs(),
            today_page_size: default_today_page_size(),
            history_ttl_secs: default_history_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighlightsCfg {
    #[serde(default)]
    pub policy: HighlightPolicy,
    #[serde(flatten)]
    pub thresholds: HighlightThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryCfg {
    #[serde(default = "default_history_years")]
    pub years: u32,
    #[serde(default = "default_history_page_size")]
    pub page_size: u32,
    #[serde(default = "default_history_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_history_max_records")]
    pub max_records: usize,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Wait before retrying a backfill that returned nothing.
    #[serde(default = "default_history_retry_secs")]
    pub retry_secs: u64,
    #[serde(flatten)]
    pub thresholds: HistoryThresholds,
}

impl Default for HistoryCfg {
    fn default() -> Self {
        Self {
            years: default_history_years(),
            page_size: default_history_page_size(),
            max_pages: default_history_max_pages(),
            max_records: default_history_max_records(),
            page_delay_ms: default_page_delay_ms(),
            retry_secs: default_history_retry_secs(),
            thresholds: HistoryThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCfg {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollCfg {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayCfg {
    /// Offset used for summary clock times, e.g. "-04:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamCfg,
    #[serde(default)]
    pub rate_limit: RateLimitCfg,
    #[serde(default)]
    pub cache: CacheCfg,
    #[serde(default)]
    pub highlights: HighlightsCfg,
    #[serde(default)]
    pub history: HistoryCfg,
    #[serde(default)]
    pub poll: PollCfg,
    #[serde(default)]
    pub display: DisplayCfg,
    /// Stations tracked at startup.
    #[serde(default)]
    pub stations: Vec<TrackedStation>,
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Config file via env var + fallbacks:
    /// 1) $BIRD_BUDDY_CONFIG_PATH (must exist)
    /// 2) config/bird_buddy.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
        if pb.exists() {
            return Self::load_from_file(&pb);
        }
        Ok(Self::default())
    }

    /// File (or defaults) plus environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_default()?;
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("UPSTREAM_ENDPOINT") {
            if !v.trim().is_empty() {
                self.upstream.endpoint = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("UPSTREAM_TEST_MODE") {
            self.upstream.mock = v.trim().eq_ignore_ascii_case("mock");
        }
        if let Some(secs) = std::env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.poll.interval_secs = secs;
        }
    }

    /// Replace zero limits with defaults, cap durations and clamp thresholds.
    pub fn sanitize(&mut self) {
        if self.rate_limit.max_calls_per_minute == 0 {
            self.rate_limit.max_calls_per_minute = default_max_calls();
        }
        if self.cache.today_ttl_secs == 0 {
            self.cache.today_ttl_secs = default_today_ttl_secs();
        }
        if self.cache.today_page_size == 0 {
            self.cache.today_page_size = default_today_page_size();
        }
        if self.cache.history_ttl_secs == 0 {
            self.cache.history_ttl_secs = default_history_ttl_secs();
        }
        if self.history.page_size == 0 {
            self.history.page_size = default_history_page_size();
        }
        if self.history.max_pages == 0 {
            self.history.max_pages = default_history_max_pages();
        }
        if self.history.max_records == 0 {
            self.history.max_records = default_history_max_records();
        }
        if self.history.years == 0 {
            self.history.years = default_history_years();
        }
        if self.poll.interval_secs == 0 {
            self.poll.interval_secs = default_poll_interval_secs();
        }
        if self.upstream.timeout_secs == 0 {
            self.upstream.timeout_secs = default_timeout_secs();
        }
        if self.history.retry_secs == 0 {
            self.history.retry_secs = default_history_retry_secs();
        }
        self.cache.today_ttl_secs = self.cache.today_ttl_secs.min(MAX_TTL_SECS);
        self.cache.history_ttl_secs = self.cache.history_ttl_secs.min(MAX_TTL_SECS);
        self.history.retry_secs = self.history.retry_secs.min(MAX_TTL_SECS);
        self.rate_limit.min_call_interval_ms =
            self.rate_limit.min_call_interval_ms.min(MAX_INTERVAL_MS);
        self.history.page_delay_ms = self.history.page_delay_ms.min(MAX_INTERVAL_MS);
        self.upstream.timeout_secs = self.upstream.timeout_secs.min(MAX_TIMEOUT_SECS);
        self.poll.interval_secs = self.poll.interval_secs.min(MAX_POLL_SECS);
        self.highlights.thresholds.sanitize();
        self.history.thresholds.sanitize();
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            max_calls_per_minute: self.rate_limit.max_calls_per_minute,
            min_call_interval: millis(self.rate_limit.min_call_interval_ms, MAX_INTERVAL_MS),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            today_ttl: secs(self.cache.today_ttl_secs, MAX_TTL_SECS),
            today_page_size: self.cache.today_page_size,
            history_ttl: secs(self.cache.history_ttl_secs, MAX_TTL_SECS),
            history_years: self.history.years,
            history_page_size: self.history.page_size,
            history_max_pages: self.history.max_pages,
            history_max_records: self.history.max_records,
            history_page_delay: StdDuration::from_millis(
                self.history.page_delay_ms.min(MAX_INTERVAL_MS),
            ),
            history_retry: secs(self.history.retry_secs, MAX_TTL_SECS),
            search_limit: self.upstream.search_limit,
        }
    }

    pub fn highlight_settings(&self) -> HighlightSettings {
        HighlightSettings {
            policy: self.highlights.policy,
            window: self.highlights.thresholds.clone(),
            history: self.history.thresholds.clone(),
        }
    }

    /// Display offset; malformed values fall back to UTC.
    pub fn display_offset(&self) -> FixedOffset {
        let utc = Utc.fix();
        let raw = self.display.utc_offset.trim();
        if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
            return utc;
        }
        raw.parse::<FixedOffset>().unwrap_or_else(|_| {
            tracing::warn!(offset = raw, "invalid display.utc_offset, using UTC");
            utc
        })
    }
}

// The caps keep every value well inside i64 and chrono's range.
fn secs(v: u64, max: u64) -> Duration {
    Duration::seconds(v.min(max) as i64)
}

fn millis(v: u64, max: u64) -> Duration {
    Duration::milliseconds(v.min(max) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.rate_limits(), RateLimits::default());
        assert_eq!(cfg.fetch_settings(), FetchSettings::default());
        assert_eq!(cfg.highlights.policy, HighlightPolicy::SameWindow);
    }

    #[test]
    fn sections_and_flattened_thresholds_parse() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [rate_limit]
            max_calls_per_minute = 4

            [highlights]
            policy = "historical"
            notable_confidence = 0.8

            [history]
            season_gap_days = 60
            common_names = ["Blue Jay"]

            [display]
            utc_offset = "-04:00"

            [[stations]]
            id = "1001"
            name = "Backyard"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limit.max_calls_per_minute, 4);
        assert_eq!(cfg.highlights.policy, HighlightPolicy::Historical);
        assert_eq!(cfg.highlights.thresholds.notable_confidence, 0.8);
        assert_eq!(cfg.highlights.thresholds.rare_confidence, 0.95);
        assert_eq!(cfg.history.thresholds.season_gap_days, 60);
        assert_eq!(cfg.history.page_size, 100);
        assert_eq!(cfg.display_offset(), FixedOffset::west_opt(4 * 3600).unwrap());
        assert_eq!(cfg.stations[0].name, "Backyard");
    }

    #[test]
    fn sanitize_repairs_zeros_and_bad_offset() {
        let mut cfg = AppConfig::default();
        cfg.rate_limit.max_calls_per_minute = 0;
        cfg.poll.interval_secs = 0;
        cfg.display.utc_offset = "nonsense".into();
        cfg.sanitize();
        assert_eq!(cfg.rate_limit.max_calls_per_minute, 10);
        assert_eq!(cfg.poll.interval_secs, 60);
        assert_eq!(cfg.display_offset(), FixedOffset::east_opt(0).unwrap());
    }

    #[test]
    fn sanitize_caps_oversized_durations() {
        let mut cfg = AppConfig::default();
        cfg.cache.today_ttl_secs = u64::MAX;
        cfg.cache.history_ttl_secs = u64::MAX / 2 + 1;
        cfg.rate_limit.min_call_interval_ms = u64::MAX;
        cfg.history.page_delay_ms = u64::MAX;
        cfg.history.retry_secs = u64::MAX;
        cfg.poll.interval_secs = u64::MAX;
        cfg.sanitize();

        let fs = cfg.fetch_settings();
        assert_eq!(fs.today_ttl, Duration::days(7));
        assert_eq!(fs.history_ttl, Duration::days(7));
        assert_eq!(fs.history_retry, Duration::days(7));
        assert_eq!(fs.history_page_delay, StdDuration::from_secs(3600));
        assert_eq!(cfg.rate_limits().min_call_interval, Duration::hours(1));
        assert_eq!(cfg.poll.interval_secs, 24 * 3600);
    }

    #[test]
    fn conversions_cap_durations_without_sanitize() {
        let mut cfg = AppConfig::default();
        cfg.cache.today_ttl_secs = u64::MAX;
        cfg.rate_limit.min_call_interval_ms = u64::MAX;
        assert_eq!(cfg.fetch_settings().today_ttl, Duration::days(7));
        assert!(cfg.rate_limits().min_call_interval > Duration::zero());
    }

    #[test]
    #[serial]
    fn env_path_and_overrides() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[poll]\ninterval_secs = 15").unwrap();

        std::env::set_var(ENV_CONFIG_PATH, f.path());
        std::env::set_var("UPSTREAM_TEST_MODE", "mock");
        std::env::set_var("UPSTREAM_ENDPOINT", "http://localhost:9999/graphql");
        let cfg = AppConfig::load().unwrap();
        std::env::remove_var(ENV_CONFIG_PATH);
        std::env::remove_var("UPSTREAM_TEST_MODE");
        std::env::remove_var("UPSTREAM_ENDPOINT");

        assert_eq!(cfg.poll.interval_secs, 15);
        assert!(cfg.upstream.mock);
        assert_eq!(cfg.upstream.endpoint, "http://localhost:9999/graphql");
    }

    #[test]
    #[serial]
    fn missing_env_path_is_an_error() {
        std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
        let res = AppConfig::load_default();
        std::env::remove_var(ENV_CONFIG_PATH);
        assert!(res.is_err());
    }
}

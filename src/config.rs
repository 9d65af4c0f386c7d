//! Feed configuration parsed from environment variables.

use std::str::FromStr;

use crate::error::FeedError;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_NEAR_TOP_THRESHOLD_PX: f64 = 0.0;
pub const DEFAULT_AUTO_SCROLL_DISTANCE_PX: f64 = 100.0;
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    /// Whole-request timeout. `None` leaves history requests unbounded.
    pub request_secs: Option<u64>,
    pub connect_secs: u64,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self { request_secs: None, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    /// Scroll offset at or below which older history is requested.
    pub near_top_threshold: f64,
    /// Distance from the bottom within which new messages pull the viewport down.
    pub auto_scroll_distance: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self { near_top_threshold: DEFAULT_NEAR_TOP_THRESHOLD_PX, auto_scroll_distance: DEFAULT_AUTO_SCROLL_DISTANCE_PX }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Origin of the history API, without trailing slash.
    pub api_base_url: String,
    pub timeouts: FetchTimeouts,
    pub scroll: ScrollConfig,
    /// Maximum number of conversations kept in the feed store.
    pub cache_capacity: usize,
}

impl FeedConfig {
    /// Config with defaults for everything but the API origin.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            timeouts: FetchTimeouts::default(),
            scroll: ScrollConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Build typed feed config from environment variables.
    ///
    /// Required:
    /// - `FEED_API_BASE_URL`
    ///
    /// Optional:
    /// - `FEED_REQUEST_TIMEOUT_SECS`: default unset (no request timeout)
    /// - `FEED_CONNECT_TIMEOUT_SECS`: default 10
    /// - `FEED_NEAR_TOP_THRESHOLD_PX`: default 0
    /// - `FEED_AUTO_SCROLL_DISTANCE_PX`: default 100
    /// - `FEED_CACHE_CAPACITY`: default 32, must be at least 1
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is missing or a value does not parse.
    pub fn from_env() -> Result<Self, FeedError> {
        let api_base_url = std::env::var("FEED_API_BASE_URL")
            .map_err(|_| FeedError::MissingConfig { var: "FEED_API_BASE_URL".into() })?;

        let timeouts = FetchTimeouts {
            request_secs: env_parse_opt("FEED_REQUEST_TIMEOUT_SECS")?,
            connect_secs: env_parse("FEED_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let scroll = ScrollConfig {
            near_top_threshold: env_parse("FEED_NEAR_TOP_THRESHOLD_PX", DEFAULT_NEAR_TOP_THRESHOLD_PX)?,
            auto_scroll_distance: env_parse("FEED_AUTO_SCROLL_DISTANCE_PX", DEFAULT_AUTO_SCROLL_DISTANCE_PX)?,
        };
        let cache_capacity = env_parse("FEED_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?;
        if cache_capacity == 0 {
            return Err(FeedError::ConfigParse("FEED_CACHE_CAPACITY must be at least 1".into()));
        }

        Ok(Self { timeouts, scroll, cache_capacity, ..Self::new(api_base_url) })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, FeedError> {
    Ok(env_parse_opt(key)?.unwrap_or(default))
}

fn env_parse_opt<T: FromStr>(key: &str) -> Result<Option<T>, FeedError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| FeedError::ConfigParse(format!("invalid {key}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

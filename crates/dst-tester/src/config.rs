//! Tester configuration.
//!
//! The CLI (or a test) builds a [`TesterConfig`] with [`TesterConfig::new`],
//! overrides defaults with the `with_*` methods, then calls
//! [`TesterConfig::validate`] before handing it to the session runner.

use crate::downloader::DEFAULT_SPECULATIVE_RANGE;
use common::bitrate::Bitrate;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// Default number of concurrent sessions.
pub const DEFAULT_THREADS: usize = 1;

/// Default low-water mark, in seconds of playback.
pub const DEFAULT_BUFFER_MIN_SECONDS: u64 = 1;

/// Default high-water mark, in seconds of playback.
pub const DEFAULT_BUFFER_MAX_SECONDS: u64 = 10;

/// Default wait after the buffer tops up before re-arming the downloader.
pub const DEFAULT_BUFFER_TOPPED_DELAY_SECONDS: u64 = 1;

/// Configuration error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL scheme must be http or https, got '{0}'")]
    UnsupportedScheme(String),

    #[error("buffer min must be > 0")]
    BufferMinNotPositive,

    #[error("buffer max must be >= buffer min ({max} < {min})")]
    BufferMaxBelowMin { min: u64, max: u64 },

    #[error("buffer topped delay must be <= buffer max ({delay} > {max})")]
    ToppedDelayAboveMax { delay: u64, max: u64 },

    #[error("number of threads must be >= 1")]
    NoThreads,

    #[error("speculative range must be > 0")]
    SpeculativeRangeNotPositive,
}

/// Byte thresholds derived from the buffer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Drain waiters are released once the level reaches this.
    pub low: u64,
    /// The producer is asked to pause once the level reaches this.
    pub high: u64,
}

impl Watermarks {
    #[must_use]
    pub const fn from_seconds(bitrate: Bitrate, min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            low: bitrate.over_seconds(min_seconds),
            high: bitrate.over_seconds(max_seconds),
        }
    }
}

/// Tester configuration.
#[derive(Debug, Clone)]
pub struct TesterConfig {
    /// Media URL every session downloads.
    pub url: Url,

    /// Target playback bitrate.
    pub bitrate: Bitrate,

    /// Number of independent sessions run concurrently.
    pub threads: usize,

    /// Low-water mark in seconds of playback.
    pub buffer_min_seconds: u64,

    /// High-water mark in seconds of playback.
    pub buffer_max_seconds: u64,

    /// Cooldown in seconds between a pause and the resume attempt.
    pub buffer_topped_delay_seconds: u64,

    /// Size of a speculative range when the content length is unknown.
    pub speculative_range: u64,

    /// A response body held across a pause longer than this is dropped.
    /// Unset by default: a parked body is always reused.
    pub idle_timeout: Option<Duration>,
}

impl TesterConfig {
    /// Create a configuration with default buffer bounds and one session.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute http(s) URL.
    pub fn new(url: &str, bitrate: Bitrate) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }

        Ok(Self {
            url,
            bitrate,
            threads: DEFAULT_THREADS,
            buffer_min_seconds: DEFAULT_BUFFER_MIN_SECONDS,
            buffer_max_seconds: DEFAULT_BUFFER_MAX_SECONDS,
            buffer_topped_delay_seconds: DEFAULT_BUFFER_TOPPED_DELAY_SECONDS,
            speculative_range: DEFAULT_SPECULATIVE_RANGE,
            idle_timeout: None,
        })
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_buffer_bounds(mut self, min_seconds: u64, max_seconds: u64) -> Self {
        self.buffer_min_seconds = min_seconds;
        self.buffer_max_seconds = max_seconds;
        self
    }

    #[must_use]
    pub fn with_buffer_topped_delay(mut self, seconds: u64) -> Self {
        self.buffer_topped_delay_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_speculative_range(mut self, bytes: u64) -> Self {
        self.speculative_range = bytes;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Check the cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.buffer_min_seconds == 0 {
            return Err(ConfigError::BufferMinNotPositive);
        }
        if self.buffer_max_seconds < self.buffer_min_seconds {
            return Err(ConfigError::BufferMaxBelowMin {
                min: self.buffer_min_seconds,
                max: self.buffer_max_seconds,
            });
        }
        if self.buffer_topped_delay_seconds > self.buffer_max_seconds {
            return Err(ConfigError::ToppedDelayAboveMax {
                delay: self.buffer_topped_delay_seconds,
                max: self.buffer_max_seconds,
            });
        }
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.speculative_range == 0 {
            return Err(ConfigError::SpeculativeRangeNotPositive);
        }
        Ok(self)
    }

    /// Byte thresholds for this configuration's bitrate and bounds.
    #[must_use]
    pub fn watermarks(&self) -> Watermarks {
        Watermarks::from_seconds(
            self.bitrate,
            self.buffer_min_seconds,
            self.buffer_max_seconds,
        )
    }

    #[must_use]
    pub fn buffer_topped_delay(&self) -> Duration {
        Duration::from_secs(self.buffer_topped_delay_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const URL: &str = "http://127.0.0.1:8080/video.mp4";

    fn bitrate() -> Bitrate {
        Bitrate::from_bytes_per_second(1_000_000)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TesterConfig::new(URL, bitrate()).unwrap().validate().unwrap();

        assert_eq!(config.threads, 1);
        assert_eq!(config.buffer_min_seconds, 1);
        assert_eq!(config.buffer_max_seconds, 10);
        assert_eq!(config.buffer_topped_delay_seconds, 1);
        assert_eq!(config.speculative_range, 100 * 1024 * 1024);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_watermarks() {
        let config = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_buffer_bounds(2, 5);

        assert_eq!(
            config.watermarks(),
            Watermarks {
                low: 2_000_000,
                high: 5_000_000
            }
        );
    }

    #[test]
    fn test_rejects_zero_buffer_min() {
        let err = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_buffer_bounds(0, 10)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::BufferMinNotPositive);
    }

    #[test]
    fn test_rejects_max_below_min() {
        let err = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_buffer_bounds(5, 4)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::BufferMaxBelowMin { min: 5, max: 4 });
    }

    #[test]
    fn test_equal_bounds_are_allowed() {
        assert!(TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_buffer_bounds(3, 3)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_rejects_delay_above_max() {
        let err = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_buffer_topped_delay(11)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::ToppedDelayAboveMax { delay: 11, max: 10 });
    }

    #[test]
    fn test_rejects_zero_threads() {
        let err = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_threads(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoThreads);
    }

    #[test]
    fn test_rejects_zero_speculative_range() {
        let err = TesterConfig::new(URL, bitrate())
            .unwrap()
            .with_speculative_range(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::SpeculativeRangeNotPositive);
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            TesterConfig::new("not a url", bitrate()),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert_eq!(
            TesterConfig::new("ftp://example.com/file", bitrate()).unwrap_err(),
            ConfigError::UnsupportedScheme("ftp".to_string())
        );
    }
}

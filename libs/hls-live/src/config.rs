use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::HlsLiveError;
use crate::timestamp::DEFAULT_PROBE_BYTES;

/// How failed requests are retried by the HTTP fetcher.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryParameters {
    /// Total attempts per request, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryParameters {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_factor
            .max(1.0)
            .powi(retry.saturating_sub(1) as i32);
        Duration::from_secs_f64((self.base_delay_ms as f64 * factor / 1000.0).min(3600.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HlsConfig {
    #[serde(default)]
    pub retry: RetryParameters,
    /// Seconds behind the live edge to start playback. 0 means three target
    /// durations.
    #[serde(default = "default_presentation_delay")]
    pub default_presentation_delay: f64,
    /// Playlist refresh period as a multiple of the target duration
    #[serde(default = "default_update_interval_multiplier")]
    pub update_interval_multiplier: f64,
    #[serde(default = "default_min_update_interval")]
    pub min_update_interval: f64,
    #[serde(default = "default_max_update_interval")]
    pub max_update_interval: f64,
    /// Network failures in a row after which a stream stops updating
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_start_time_probe_bytes")]
    pub start_time_probe_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_presentation_delay() -> f64 {
    0.0
}

fn default_update_interval_multiplier() -> f64 {
    1.0
}

fn default_min_update_interval() -> f64 {
    1.0
}

fn default_max_update_interval() -> f64 {
    30.0
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_start_time_probe_bytes() -> u64 {
    DEFAULT_PROBE_BYTES
}

fn default_user_agent() -> String {
    format!("hls-live/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            retry: RetryParameters::default(),
            default_presentation_delay: default_presentation_delay(),
            update_interval_multiplier: default_update_interval_multiplier(),
            min_update_interval: default_min_update_interval(),
            max_update_interval: default_max_update_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            start_time_probe_bytes: default_start_time_probe_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl HlsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HlsLiveError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, HlsLiveError> {
        Ok(toml::from_str(content)?)
    }

    /// Refresh period for the smallest target duration among live streams.
    pub fn update_interval(&self, target_duration: u64) -> Duration {
        let min = self.min_update_interval.max(0.0);
        let max = self.max_update_interval.max(min);
        let secs = (target_duration as f64 * self.update_interval_multiplier)
            .max(min)
            .min(max);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(1))
    }

    /// How far behind the live edge playback should begin.
    pub fn presentation_delay(&self, target_duration: u64) -> Duration {
        match Duration::try_from_secs_f64(self.default_presentation_delay) {
            Ok(delay) if !delay.is_zero() => delay,
            _ => Duration::from_secs(target_duration.saturating_mul(3)),
        }
    }
}

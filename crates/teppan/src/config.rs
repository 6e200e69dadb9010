//! # Scheduler Configuration
//!
//! [`SchedulerConfig`] carries the batching policy: how large a batch may grow,
//! how long the oldest queued request may wait before a partial batch is
//! dispatched, the optional request and backend deadlines, and how many
//! batches may be in flight against the backend at once.
//!
//! Durations are stored as integer fields so the type deserializes cleanly from
//! flat configuration files and environment variables; use the accessor methods
//! to obtain [`Duration`]s.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

const ENV_MAX_BATCH_SIZE: &str = "MAX_BATCH_SIZE";
const ENV_MAX_QUEUE_DELAY_US: &str = "MAX_QUEUE_DELAY_MICROSECONDS";
const ENV_BACKEND_TIMEOUT_S: &str = "INFERENCE_TIMEOUT_S";
const ENV_PER_REQUEST_TIMEOUT_MS: &str = "PER_REQUEST_TIMEOUT_MS";
const ENV_MAX_INFLIGHT_BATCHES: &str = "MAX_INFLIGHT_BATCHES";

/// Batching policy for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Largest number of requests dispatched in one backend call. Default: 8.
    pub max_batch_size: usize,

    /// Longest time (µs) the oldest queued request waits for its batch to fill. Default: 10.
    pub max_queue_delay_us: u64,

    /// Default deadline (ms) for a request to leave the queue. Default: none.
    pub per_request_timeout_ms: Option<u64>,

    /// Budget (ms) for a single backend call. Default: 10 000.
    pub backend_timeout_ms: Option<u64>,

    /// Number of batches allowed in flight against the backend. Default: 1.
    pub max_inflight_batches: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_queue_delay_us: 10,
            per_request_timeout_ms: None,
            backend_timeout_ms: Some(10_000),
            max_inflight_batches: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_queue_delay(mut self, delay: Duration) -> Self {
        self.max_queue_delay_us = delay.as_micros().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_per_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.per_request_timeout_ms = timeout.map(as_millis);
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.backend_timeout_ms = timeout.map(as_millis);
        self
    }

    pub fn with_max_inflight_batches(mut self, max_inflight_batches: usize) -> Self {
        self.max_inflight_batches = max_inflight_batches;
        self
    }

    pub fn max_queue_delay(&self) -> Duration {
        Duration::from_micros(self.max_queue_delay_us)
    }

    pub fn per_request_timeout(&self) -> Option<Duration> {
        self.per_request_timeout_ms.map(Duration::from_millis)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_ms.map(Duration::from_millis)
    }

    /// Checks the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Zero { field: "max_batch_size" });
        }
        if self.max_inflight_batches == 0 {
            return Err(ConfigError::Zero { field: "max_inflight_batches" });
        }
        Ok(())
    }

    /// Reads the configuration from unprefixed environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("")
    }

    /// Reads the configuration from environment variables named `{prefix}{KEY}`.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            std::env::var(format!("{prefix}{key}"))
                .ok()
                .filter(|v| !v.is_empty())
        })
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `MAX_BATCH_SIZE`, `MAX_QUEUE_DELAY_MICROSECONDS`,
    /// `INFERENCE_TIMEOUT_S`, `PER_REQUEST_TIMEOUT_MS`, `MAX_INFLIGHT_BATCHES`.
    /// The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where F: Fn(&str) -> Option<String>
    {
        let mut config = Self::default();

        if let Some(v) = parse_key::<usize, _>(&lookup, ENV_MAX_BATCH_SIZE)? {
            config.max_batch_size = v;
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, ENV_MAX_QUEUE_DELAY_US)? {
            config.max_queue_delay_us = v;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, ENV_BACKEND_TIMEOUT_S)? {
            // zero disables the backend budget
            config.backend_timeout_ms = (secs > 0).then(|| secs.saturating_mul(1000));
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, ENV_PER_REQUEST_TIMEOUT_MS)? {
            config.per_request_timeout_ms = Some(v);
        }
        if let Some(v) = parse_key::<usize, _>(&lookup, ENV_MAX_INFLIGHT_BATCHES)? {
            config.max_inflight_batches = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where T: std::str::FromStr, F: Fn(&str) -> Option<String>
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key: key.to_string(), value: raw }),
    }
}

#[inline]
fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.max_queue_delay(), Duration::from_micros(10));
        assert_eq!(config.backend_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.per_request_timeout(), None);
        assert_eq!(config.max_inflight_batches, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = SchedulerConfig::default().with_max_batch_size(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero { field: "max_batch_size" }));
    }

    #[test]
    fn test_validate_rejects_zero_inflight() {
        let config = SchedulerConfig::default().with_max_inflight_batches(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero { field: "max_inflight_batches" }));
    }

    #[test]
    fn test_builders_round_to_field_units() {
        let config = SchedulerConfig::default()
            .with_max_queue_delay(Duration::from_millis(50))
            .with_per_request_timeout(Some(Duration::from_millis(250)))
            .with_backend_timeout(None);
        assert_eq!(config.max_queue_delay_us, 50_000);
        assert_eq!(config.per_request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.backend_timeout(), None);
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let config = SchedulerConfig::from_lookup(lookup_from(&[
            ("MAX_BATCH_SIZE", "16"),
            ("MAX_QUEUE_DELAY_MICROSECONDS", "2500"),
            ("INFERENCE_TIMEOUT_S", "3"),
            ("PER_REQUEST_TIMEOUT_MS", "40"),
            ("MAX_INFLIGHT_BATCHES", "2"),
        ])).unwrap();

        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.max_queue_delay(), Duration::from_micros(2500));
        assert_eq!(config.backend_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.per_request_timeout(), Some(Duration::from_millis(40)));
        assert_eq!(config.max_inflight_batches, 2);
    }

    #[test]
    fn test_from_lookup_keeps_defaults_for_missing_keys() {
        let config = SchedulerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_from_lookup_zero_inference_timeout_disables_budget() {
        let config = SchedulerConfig::from_lookup(lookup_from(&[("INFERENCE_TIMEOUT_S", "0")])).unwrap();
        assert_eq!(config.backend_timeout(), None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(lookup_from(&[("MAX_BATCH_SIZE", "eight")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv {
            key: "MAX_BATCH_SIZE".to_string(),
            value: "eight".to_string(),
        });
    }

    #[test]
    fn test_from_lookup_validates() {
        let err = SchedulerConfig::from_lookup(lookup_from(&[("MAX_BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "max_batch_size" });
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{"max_batch_size": 4, "per_request_timeout_ms": 100}"#
        ).unwrap();
        assert_eq!(config.max_batch_size, 4);
        assert_eq!(config.per_request_timeout(), Some(Duration::from_millis(100)));
        assert_eq!(config.max_queue_delay_us, 10);
        assert_eq!(config.max_inflight_batches, 1);
    }
}

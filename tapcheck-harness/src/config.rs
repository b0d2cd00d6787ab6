//! Harness configuration
//!
//! Settings come from defaults, an optional JSON file, and command line
//! overrides, in that order. `validate()` runs before any service is created.

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tapcheck_node::HubConfig;

use crate::error::{HarnessError, Result};

/// Settings for one harness run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of publisher addresses messages are spread over
    pub fan_out: i64,

    /// Numbered messages sent before the sentinel
    pub max_msg_count: i32,

    /// Sent count at which the in-traffic listing check runs;
    /// defaults to half of all messages
    pub listing_check_at: Option<u64>,

    /// Settle wait before each post-teardown listing check
    pub settle_ms: u64,

    /// Sleep between two polls of the substrate
    pub poll_quantum_ms: u64,

    /// Upper bound for the traffic phase
    pub max_run_ms: u64,

    /// Service name prefix of the publisher role
    pub pub_prefix: String,

    /// Service name prefix of the tapping (subscriber) role
    pub sub_prefix: String,

    /// Service name prefix of the subscriber's second tapper of address 0
    pub copy_prefix: String,

    /// Cooperating processes that list and check alongside the publisher;
    /// the first one also takes the subscriber role
    pub peers: usize,

    /// Propagation delay of tap removal in the simulated substrate
    pub tap_propagation_delay_ms: u64,

    /// Extra random delay added to each deferred change in the simulated substrate
    pub propagation_jitter_ms: u64,

    /// Seed of the jitter RNG
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fan_out: 2,
            max_msg_count: 200,
            listing_check_at: None,
            settle_ms: 1000,
            poll_quantum_ms: 2,
            max_run_ms: 60_000,
            pub_prefix: "pubunistr".to_string(),
            sub_prefix: "subunistr".to_string(),
            copy_prefix: "copyunistr".to_string(),
            peers: 1,
            tap_propagation_delay_ms: 50,
            propagation_jitter_ms: 0,
            seed: 0,
        }
    }
}

impl HarnessConfig {
    pub fn with_fan_out(mut self, fan_out: i64) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_max_msg_count(mut self, max_msg_count: i32) -> Self {
        self.max_msg_count = max_msg_count;
        self
    }

    pub fn with_listing_check_at(mut self, sent: u64) -> Self {
        self.listing_check_at = Some(sent);
        self
    }

    pub fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    pub fn with_peers(mut self, peers: usize) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_tap_propagation_delay_ms(mut self, delay_ms: u64) -> Self {
        self.tap_propagation_delay_ms = delay_ms;
        self
    }

    pub fn with_propagation_jitter_ms(mut self, jitter_ms: u64, seed: u64) -> Self {
        self.propagation_jitter_ms = jitter_ms;
        self.seed = seed;
        self
    }

    /// Load configuration from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: HarnessConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?;
        Ok(config)
    }

    /// Total messages sent, sentinel included
    pub fn total_messages(&self) -> u64 {
        self.max_msg_count.max(0) as u64 + 1
    }

    /// Sent count of the in-traffic listing check
    pub fn listing_threshold(&self) -> u64 {
        self.listing_check_at
            .unwrap_or_else(|| self.total_messages().div_ceil(2))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_quantum(&self) -> Duration {
        Duration::from_millis(self.poll_quantum_ms)
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_millis(self.max_run_ms)
    }

    /// Propagation settings of the simulated substrate
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::default()
            .with_tap_propagation_delay(Duration::from_millis(self.tap_propagation_delay_ms))
            .with_propagation_jitter(Duration::from_millis(self.propagation_jitter_ms), self.seed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fan_out <= 0 {
            return Err(HarnessError::Config(format!(
                "fan_out must be at least 1, got {}",
                self.fan_out
            )));
        }
        if self.max_msg_count < 0 {
            return Err(HarnessError::Config(format!(
                "max_msg_count must not be negative, got {}",
                self.max_msg_count
            )));
        }
        let threshold = self.listing_threshold();
        if threshold == 0 || threshold > self.total_messages() {
            return Err(HarnessError::Config(format!(
                "listing_check_at must be within 1..={}, got {threshold}",
                self.total_messages()
            )));
        }
        if self.poll_quantum_ms == 0 {
            return Err(HarnessError::Config(
                "poll_quantum_ms must be at least 1".to_string(),
            ));
        }
        let prefixes = [&self.pub_prefix, &self.sub_prefix, &self.copy_prefix];
        if prefixes.iter().any(|p| p.is_empty()) {
            return Err(HarnessError::Config(
                "service prefixes must not be empty".to_string(),
            ));
        }
        for (i, a) in prefixes.iter().enumerate() {
            if let Some(b) = prefixes[i + 1..].iter().find(|b| b == &a) {
                return Err(HarnessError::Config(format!(
                    "service prefixes must differ, '{b}' is used twice"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarnessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.total_messages(), 201);
        assert_eq!(config.listing_threshold(), 101);
        assert_eq!(config.settle(), Duration::from_secs(1));
    }

    #[test]
    fn test_non_positive_fan_out_rejected() {
        for fan_out in [0, -3] {
            let err = HarnessConfig::default()
                .with_fan_out(fan_out)
                .validate()
                .unwrap_err();
            assert!(matches!(err, HarnessError::Config(_)));
        }
    }

    #[test]
    fn test_listing_threshold_bounds() {
        let config = HarnessConfig::default()
            .with_max_msg_count(10)
            .with_listing_check_at(12);
        assert!(config.validate().is_err());

        let config = HarnessConfig::default()
            .with_max_msg_count(10)
            .with_listing_check_at(11);
        config.validate().unwrap();

        let config = HarnessConfig::default().with_max_msg_count(0);
        assert_eq!(config.listing_threshold(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{"fan_out": 3, "settle_ms": 250}"#).unwrap();
        assert_eq!(config.fan_out, 3);
        assert_eq!(config.settle_ms, 250);
        assert_eq!(config.max_msg_count, 200);
        assert_eq!(config.pub_prefix, "pubunistr");
        assert_eq!(config.copy_prefix, "copyunistr");
    }

    #[test]
    fn test_prefixes_must_differ() {
        let mut config = HarnessConfig::default();
        config.copy_prefix = config.sub_prefix.clone();
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        let mut config = HarnessConfig::default();
        config.sub_prefix = config.pub_prefix.clone();
        assert!(config.validate().is_err());
    }
}

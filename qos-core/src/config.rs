//! Configuration keys read from the host engine's global/job configuration.
//!
//! The engine hands the QoS subsystem a flat string-keyed map (its own
//! config-file parsing is out of scope for this crate); [`QosConfig::from_map`]
//! is the thin adapter over that externally-supplied source, playing the
//! same role `timely_communication::Configuration::from_args` plays over
//! CLI args — generalized from argv to a key/value map since our
//! configuration source is the host engine's config object.

use crate::error::QosError;
use std::collections::HashMap;
use std::time::Duration;

const TAGGING_INTERVAL_KEY: &str = "plugins.streaming.qosreporter.tagginginterval";
const AGGREGATION_INTERVAL_KEY: &str = "plugins.streaming.qosreporter.aggregationinterval";
const ADJUSTMENT_INTERVAL_KEY: &str = "plugins.streaming.qosmanager.adjustmentinterval";
const ENABLED_KEY: &str = "plugins.streaming.qosmanager.enabled";
const SAMPLE_WINDOW_KEY: &str = "plugins.streaming.qosreporter.sample_window_millis";

const DEFAULT_TAGGING_INTERVAL: u32 = 7;
const DEFAULT_AGGREGATION_INTERVAL_MILLIS: u64 = 1000;

/// Resolved configuration for one job's QoS reporter/manager pairing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QosConfig {
    /// Records between tag emissions on the task-side reporter.
    pub tagging_interval: u32,
    /// Wall-clock period between forwarder report flushes.
    pub aggregation_interval: Duration,
    /// Windowing period for the per-constraint adjustment logger.
    pub adjustment_interval: Duration,
    /// Whether the QoS subsystem is active for this job at all.
    pub enabled: bool,
    /// Samples older than this are treated as missing during traversal.
    pub sample_window: Duration,
}

impl Default for QosConfig {
    fn default() -> Self {
        let aggregation_interval = Duration::from_millis(DEFAULT_AGGREGATION_INTERVAL_MILLIS);
        QosConfig {
            tagging_interval: DEFAULT_TAGGING_INTERVAL,
            aggregation_interval,
            adjustment_interval: aggregation_interval,
            enabled: true,
            sample_window: aggregation_interval * 2,
        }
    }
}

impl QosConfig {
    /// Builds a config by overlaying `map` on top of the defaults.
    ///
    /// Unlike `ConfigurationMissing`'s usual fatal treatment, absence here
    /// is the expected common case — the three tagging/aggregation/
    /// adjustment keys and the two supplemental keys all have defaults per
    /// §6. `ConfigurationMissing` is reserved for callers that require a
    /// specific key to be present and use [`QosConfig::require`] instead.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        QosConfig::overlay(&QosConfig::default(), map)
    }

    /// Builds a config by overlaying `map` on top of an explicit `base`
    /// rather than the crate defaults — for plugin-wide configuration that
    /// itself already overrides the built-in defaults, and whose values a
    /// job-local config map should further override only where present.
    pub fn overlay(base: &QosConfig, map: &HashMap<String, String>) -> Self {
        let defaults = base;
        QosConfig {
            tagging_interval: parse_or(map, TAGGING_INTERVAL_KEY, defaults.tagging_interval),
            aggregation_interval: Duration::from_millis(parse_or(
                map,
                AGGREGATION_INTERVAL_KEY,
                defaults.aggregation_interval.as_millis() as u64,
            )),
            adjustment_interval: Duration::from_millis(parse_or(
                map,
                ADJUSTMENT_INTERVAL_KEY,
                defaults.adjustment_interval.as_millis() as u64,
            )),
            enabled: parse_or(map, ENABLED_KEY, defaults.enabled),
            sample_window: Duration::from_millis(parse_or(
                map,
                SAMPLE_WINDOW_KEY,
                defaults.sample_window.as_millis() as u64,
            )),
        }
    }

    /// Looks up a single required key with no default, for callers that
    /// need to treat its absence as fatal per §7's `ConfigurationMissing`.
    pub fn require(map: &HashMap<String, String>, key: &str) -> Result<String, QosError> {
        map.get(key).cloned().ok_or_else(|| QosError::ConfigurationMissing { key: key.to_string() })
    }
}

fn parse_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_map_is_empty() {
        let config = QosConfig::from_map(&HashMap::new());
        assert_eq!(config, QosConfig::default());
    }

    #[test]
    fn overrides_take_effect() {
        let mut map = HashMap::new();
        map.insert(AGGREGATION_INTERVAL_KEY.to_string(), "500".to_string());
        map.insert(ENABLED_KEY.to_string(), "false".to_string());
        let config = QosConfig::from_map(&map);
        assert_eq!(config.aggregation_interval, Duration::from_millis(500));
        assert!(!config.enabled);
    }

    #[test]
    fn require_reports_missing_key() {
        let map = HashMap::new();
        let err = QosConfig::require(&map, "some.missing.key").unwrap_err();
        assert!(matches!(err, QosError::ConfigurationMissing { .. }));
    }

    proptest::proptest! {
        /// An unparseable value at any known key never panics; it falls back
        /// to that key's default exactly as an absent key would.
        #[test]
        fn garbage_values_fall_back_to_defaults(garbage in "\\PC*") {
            let mut map = HashMap::new();
            map.insert(AGGREGATION_INTERVAL_KEY.to_string(), garbage.clone());
            map.insert(ENABLED_KEY.to_string(), garbage);
            let config = QosConfig::from_map(&map);
            let defaults = QosConfig::default();
            prop_assert_eq!(config.aggregation_interval, defaults.aggregation_interval);
            prop_assert_eq!(config.enabled, defaults.enabled);
        }

        /// A valid millisecond count at the aggregation key always round-trips.
        #[test]
        fn valid_millis_round_trip(millis in 0u64..1_000_000) {
            let mut map = HashMap::new();
            map.insert(AGGREGATION_INTERVAL_KEY.to_string(), millis.to_string());
            let config = QosConfig::from_map(&map);
            prop_assert_eq!(config.aggregation_interval, Duration::from_millis(millis));
        }
    }
}

//! Harness configuration.

use multiverse_constants::env::{is_truthy, COLLECTOR_PORT, OMIT_FAKE_COLLECTOR, VERBOSE};
use multiverse_constants::wire::EPHEMERAL_PORT;

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Never start or stop the fake collector.
    pub omit_collector: bool,
    /// Port the fake collector listens on; 0 picks an ephemeral port.
    pub collector_port: u16,
    /// Log lifecycle transitions at info level.
    pub verbose: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HarnessConfig {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            omit_collector: lookup(OMIT_FAKE_COLLECTOR).is_some_and(|v| is_truthy(&v)),
            collector_port: lookup(COLLECTOR_PORT)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(EPHEMERAL_PORT),
            verbose: lookup(VERBOSE).is_some_and(|v| is_truthy(&v)),
        }
    }

    /// Configuration with the fake collector on an ephemeral port and no
    /// environment influence.
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            omit_collector: false,
            collector_port: EPHEMERAL_PORT,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let config = HarnessConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, HarnessConfig::isolated());
    }

    #[test]
    fn test_omit_collector_toggle() {
        for value in ["true", "1", "YES", "on"] {
            let config = HarnessConfig::from_lookup(lookup_from(&[(OMIT_FAKE_COLLECTOR, value)]));
            assert!(config.omit_collector, "{value:?} should omit the collector");
        }
        let config = HarnessConfig::from_lookup(lookup_from(&[(OMIT_FAKE_COLLECTOR, "false")]));
        assert!(!config.omit_collector);
    }

    #[test]
    fn test_collector_port() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(COLLECTOR_PORT, "18080")]));
        assert_eq!(config.collector_port, 18080);

        let config = HarnessConfig::from_lookup(lookup_from(&[(COLLECTOR_PORT, "nope")]));
        assert_eq!(config.collector_port, EPHEMERAL_PORT);
    }
}

/// Environment variable that skips starting and stopping the fake collector.
///
/// Read once per harness. Any of `true`, `1`, `yes` or `on` (case-insensitive)
/// enables it.
pub const OMIT_FAKE_COLLECTOR: &str = "NEWRELIC_OMIT_FAKE_COLLECTOR";

/// Environment variable holding the `tracing` filter used by test logging.
pub const LOG_FILTER: &str = "MULTIVERSE_LOG";

/// Environment variable pinning the fake collector to a fixed port.
///
/// Unset or unparsable means an ephemeral port.
pub const COLLECTOR_PORT: &str = "MULTIVERSE_COLLECTOR_PORT";

/// Environment variable enabling verbose harness output.
pub const VERBOSE: &str = "MULTIVERSE_VERBOSE";

/// Prefix of environment variables feeding the agent's environment config layer.
pub const AGENT_CONFIG_PREFIX: &str = "NEW_RELIC_";

/// Separator for nested agent config keys in environment variable names.
///
/// `NEW_RELIC_ERROR_COLLECTOR__ENABLED` maps to `error_collector.enabled`.
pub const AGENT_CONFIG_SPLIT: &str = "__";

/// Returns true if an environment value should be read as "enabled".
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    ["true", "1", "yes", "on"]
        .iter()
        .any(|candidate| value.eq_ignore_ascii_case(candidate))
}

//! Agent configuration.
//!
//! The effective configuration is assembled from layers, lowest precedence
//! first:
//!
//! 1. Built-in defaults
//! 2. Environment variables (`NEW_RELIC_*`, nested keys split on `__`)
//! 3. Manual settings passed to [`Agent::manual_start`](crate::Agent::manual_start)
//! 4. Server-side settings returned by `connect`
//!
//! Layers 1 and 2 form the baseline captured when the agent is constructed.
//! [`ConfigLayers::reset_to_defaults`] drops layers 3 and 4.
//!
//! ## Example
//!
//! ```text
//! NEW_RELIC_APP_NAME="checkout"
//! NEW_RELIC_ERROR_COLLECTOR__IGNORE_ERRORS='["NotFound"]'
//! NEW_RELIC_TRANSACTION_TRACER__TRANSACTION_THRESHOLD=0.5
//! ```

use crate::error::Result;
use figment::providers::{Env, Serialized};
use figment::Figment;
use multiverse_constants::env::{AGENT_CONFIG_PREFIX, AGENT_CONFIG_SPLIT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Effective agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Application names, separated by `;`.
    pub app_name: String,
    /// License key sent with every request.
    pub license_key: String,
    /// Collector host.
    pub host: String,
    /// Collector port.
    pub port: u16,
    /// Master switch; a disabled agent never starts.
    pub agent_enabled: bool,
    /// Whether the agent talks to the collector at all.
    pub monitor_mode: bool,
    /// Block `manual_start` until the connect handshake resolves.
    pub sync_startup: bool,
    /// Discard any existing connection on start.
    pub force_reconnect: bool,
    /// Timeout for a single collector request, in seconds.
    pub connect_timeout: u64,
    /// Apdex T, in seconds.
    pub apdex_t: f64,
    /// Harvest period the collector asked for, in seconds.
    pub data_report_period: u64,
    /// Error collection.
    pub error_collector: ErrorCollectorConfig,
    /// Slow transaction traces.
    pub transaction_tracer: TransactionTracerConfig,
    /// Transaction analytic events.
    pub analytics_events: EventsConfig,
    /// Custom events.
    pub custom_insights_events: EventsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: "My Application".to_string(),
            license_key: String::new(),
            host: "127.0.0.1".to_string(),
            port: 80,
            agent_enabled: true,
            monitor_mode: true,
            sync_startup: false,
            force_reconnect: false,
            connect_timeout: 10,
            apdex_t: 0.5,
            data_report_period: 60,
            error_collector: ErrorCollectorConfig::default(),
            transaction_tracer: TransactionTracerConfig::default(),
            analytics_events: EventsConfig::default(),
            custom_insights_events: EventsConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads defaults overlaid with `NEW_RELIC_*` environment variables.
    pub fn load() -> Result<Self> {
        Ok(Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(AGENT_CONFIG_PREFIX).split(AGENT_CONFIG_SPLIT))
            .extract()?)
    }

    /// Application names in the order they were configured.
    #[must_use]
    pub fn app_names(&self) -> Vec<String> {
        self.app_name
            .split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Error collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCollectorConfig {
    /// Collect noticed errors.
    pub enabled: bool,
    /// Error classes that are never collected.
    pub ignore_errors: Vec<String>,
    /// Maximum errors kept per harvest.
    pub max_error_count: usize,
}

impl Default for ErrorCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_errors: Vec::new(),
            max_error_count: 20,
        }
    }
}

/// Transaction tracer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionTracerConfig {
    /// Collect slow transaction traces.
    pub enabled: bool,
    /// Minimum duration, in seconds, for a transaction to be traced.
    pub transaction_threshold: f64,
}

impl Default for TransactionTracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transaction_threshold: 2.0,
        }
    }
}

/// Event aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Record events.
    pub enabled: bool,
    /// Maximum events kept per harvest.
    pub max_samples_stored: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples_stored: 1200,
        }
    }
}

/// Server-side `collect_*` flags and the settings they may switch off.
const SERVER_SWITCHES: &[(&str, &str)] = &[
    ("collect_errors", "error_collector.enabled"),
    ("collect_traces", "transaction_tracer.enabled"),
    ("collect_analytics_events", "analytics_events.enabled"),
    ("collect_custom_events", "custom_insights_events.enabled"),
];

/// Server-side values copied verbatim.
const SERVER_VALUES: &[&str] = &["apdex_t", "data_report_period"];

#[derive(Debug)]
struct Layers {
    baseline: AgentConfig,
    manual: BTreeMap<String, Value>,
    server: BTreeMap<String, Value>,
    current: AgentConfig,
}

impl Layers {
    fn rebuild(&mut self) -> Result<()> {
        let mut figment = Figment::from(Serialized::defaults(&self.baseline));
        for (key, value) in self.manual.iter().chain(self.server.iter()) {
            figment = figment.merge(Serialized::default(key, value));
        }
        self.current = figment.extract()?;
        Ok(())
    }
}

/// Layered configuration owned by an agent.
#[derive(Debug)]
pub struct ConfigLayers {
    layers: RwLock<Layers>,
}

impl ConfigLayers {
    /// Creates layers whose baseline is `baseline`.
    #[must_use]
    pub fn new(baseline: AgentConfig) -> Self {
        Self {
            layers: RwLock::new(Layers {
                current: baseline.clone(),
                baseline,
                manual: BTreeMap::new(),
                server: BTreeMap::new(),
            }),
        }
    }

    /// Returns a snapshot of the effective configuration.
    #[must_use]
    pub fn current(&self) -> AgentConfig {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Returns the baseline (defaults plus environment).
    #[must_use]
    pub fn baseline(&self) -> AgentConfig {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .baseline
            .clone()
    }

    /// Merges dotted-key settings into the manual layer.
    ///
    /// Nothing changes if the merged result does not deserialize.
    pub fn apply_manual(&self, settings: &BTreeMap<String, Value>) -> Result<()> {
        let mut layers = self.write();
        let previous = layers.manual.clone();
        layers
            .manual
            .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Err(e) = layers.rebuild() {
            layers.manual = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Replaces the server layer with the settings in a `connect` response.
    pub fn apply_server(&self, response: &Map<String, Value>) -> Result<()> {
        let mut server = BTreeMap::new();
        for key in SERVER_VALUES {
            if let Some(value) = response.get(*key) {
                server.insert((*key).to_string(), value.clone());
            }
        }
        for (flag, setting) in SERVER_SWITCHES {
            if response.get(*flag) == Some(&Value::Bool(false)) {
                server.insert((*setting).to_string(), Value::Bool(false));
            }
        }

        let mut layers = self.write();
        let previous = std::mem::replace(&mut layers.server, server);
        if let Err(e) = layers.rebuild() {
            layers.server = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Drops manual and server settings, restoring the baseline.
    pub fn reset_to_defaults(&self) {
        let mut layers = self.write();
        layers.manual.clear();
        layers.server.clear();
        layers.current = layers.baseline.clone();
        tracing::debug!("agent configuration reset to defaults");
    }

    /// Returns true if only the baseline is in effect.
    #[must_use]
    pub fn is_default(&self) -> bool {
        let layers = self.layers.read().unwrap_or_else(PoisonError::into_inner);
        layers.manual.is_empty() && layers.server.is_empty() && layers.current == layers.baseline
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Layers> {
        self.layers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Decoded views over recorded payloads.
//!
//! Payloads are JSON arrays whose first element is the agent run id. The
//! types here pick the interesting elements out positionally; serde accepts
//! sequences for named structs, so every record struct lists its fields in
//! wire order.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One slow transaction trace from `transaction_sample_data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionSample {
    /// Transaction start, milliseconds since the Unix epoch.
    pub start_ms: i64,
    /// Transaction duration in milliseconds.
    pub duration_ms: f64,
    /// Final (rule-applied) transaction name.
    pub name: String,
    /// Request URI, if the transaction had one.
    pub uri: Option<String>,
    /// Trace tree as sent by the agent.
    pub trace: Value,
    /// Trace GUID.
    pub guid: String,
}

impl TransactionSample {
    /// Returns the names of the trace's segments in recording order.
    #[must_use]
    pub fn segment_names(&self) -> Vec<String> {
        self.trace
            .get("segments")
            .and_then(Value::as_array)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(|segment| segment.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One noticed error from `error_data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorRecord {
    /// Time the error was noticed, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Transaction name (or path) the error happened in.
    pub path: String,
    /// Error message.
    pub message: String,
    /// Error class.
    pub class: String,
    /// Extra parameters.
    pub params: Value,
}

/// One analytic or custom event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalyticEvent {
    /// Agent-computed attributes (`type`, `name`, `timestamp`, ...).
    pub intrinsics: Map<String, Value>,
    /// Attributes supplied by the instrumented application.
    pub user_attributes: Map<String, Value>,
    /// Attributes the agent captured from the environment.
    pub agent_attributes: Map<String, Value>,
}

impl AnalyticEvent {
    /// Returns the event's `type` intrinsic.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.intrinsics.get("type").and_then(Value::as_str)
    }

    /// Returns an intrinsic attribute.
    #[must_use]
    pub fn intrinsic(&self, key: &str) -> Option<&Value> {
        self.intrinsics.get(key)
    }

    /// Returns a user attribute.
    #[must_use]
    pub fn user_attribute(&self, key: &str) -> Option<&Value> {
        self.user_attributes.get(key)
    }
}

/// Metric name and scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct MetricSpec {
    /// Metric name.
    pub name: String,
    /// Scope (empty for unscoped metrics).
    #[serde(default)]
    pub scope: String,
}

/// Timeslice values for one metric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricStats {
    /// Number of recorded values.
    pub call_count: u64,
    /// Sum of recorded values, in seconds.
    pub total_call_time: f64,
    /// Sum of exclusive time, in seconds.
    pub total_exclusive_time: f64,
    /// Smallest recorded value.
    pub min_call_time: f64,
    /// Largest recorded value.
    pub max_call_time: f64,
    /// Sum of squared values.
    pub sum_of_squares: f64,
}

/// One metric timeslice from `metric_data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricRecord {
    /// Name and scope.
    pub spec: MetricSpec,
    /// Values.
    pub stats: MetricStats,
}

/// Environment the agent reports in its `connect` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectSettings {
    /// Agent process id.
    pub pid: u32,
    /// Host the agent runs on.
    pub host: String,
    /// Application names.
    pub app_name: Vec<String>,
    /// Agent language.
    pub language: String,
    /// Agent version.
    pub agent_version: String,
    /// Effective agent settings at connect time.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// `[run_id, [item, ...]]`
#[derive(Debug, Deserialize)]
pub(crate) struct RunEnvelope<T>(pub(crate) serde::de::IgnoredAny, pub(crate) Vec<T>);

/// `[run_id, start, end, [metric, ...]]`
#[derive(Debug, Deserialize)]
pub(crate) struct MetricEnvelope(
    pub(crate) serde::de::IgnoredAny,
    pub(crate) serde::de::IgnoredAny,
    pub(crate) serde::de::IgnoredAny,
    pub(crate) Vec<MetricRecord>,
);

/// `[settings]`
#[derive(Debug, Deserialize)]
pub(crate) struct ConnectEnvelope(pub(crate) ConnectSettings);

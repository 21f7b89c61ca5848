//! Metric timeslice aggregation.

use crate::rules::RuleSet;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Metric name and scope. Unscoped metrics have an empty scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricSpec {
    /// Metric name.
    pub name: String,
    /// Scope, usually the transaction name.
    pub scope: String,
}

impl MetricSpec {
    /// Unscoped metric.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: String::new(),
        }
    }

    /// Metric scoped to a transaction.
    #[must_use]
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({ "name": self.name, "scope": self.scope })
    }
}

/// Aggregated values for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    /// Number of recorded values.
    pub call_count: u64,
    /// Sum of values, in seconds.
    pub total_call_time: f64,
    /// Sum of exclusive time, in seconds.
    pub total_exclusive_time: f64,
    /// Smallest value.
    pub min_call_time: f64,
    /// Largest value.
    pub max_call_time: f64,
    /// Sum of squared values.
    pub sum_of_squares: f64,
}

impl Stats {
    /// Adds one observation.
    pub fn record(&mut self, value: f64, exclusive: f64) {
        if self.call_count == 0 {
            self.min_call_time = value;
            self.max_call_time = value;
        } else {
            self.min_call_time = self.min_call_time.min(value);
            self.max_call_time = self.max_call_time.max(value);
        }
        self.call_count += 1;
        self.total_call_time += value;
        self.total_exclusive_time += exclusive;
        self.sum_of_squares += value * value;
    }

    /// Folds another set of stats into this one.
    pub fn merge(&mut self, other: &Stats) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 {
            *self = *other;
            return;
        }
        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.total_exclusive_time += other.total_exclusive_time;
        self.min_call_time = self.min_call_time.min(other.min_call_time);
        self.max_call_time = self.max_call_time.max(other.max_call_time);
        self.sum_of_squares += other.sum_of_squares;
    }

    fn to_json(self) -> Value {
        json!([
            self.call_count,
            self.total_call_time,
            self.total_exclusive_time,
            self.min_call_time,
            self.max_call_time,
            self.sum_of_squares,
        ])
    }
}

/// Metrics gathered since the last harvest.
#[derive(Debug, Default)]
pub struct StatsEngine {
    stats: Mutex<HashMap<MetricSpec, Stats>>,
    metric_rules: RuleSet,
}

impl StatsEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules applied to metric names at harvest.
    #[must_use]
    pub fn metric_rules(&self) -> &RuleSet {
        &self.metric_rules
    }

    /// Records an unscoped value.
    pub fn record_metric(&self, name: &str, value: f64) {
        self.record(MetricSpec::new(name), value, value);
    }

    /// Records a value scoped to `scope`.
    pub fn record_scoped(&self, name: &str, scope: &str, value: f64, exclusive: f64) {
        self.record(MetricSpec::scoped(name, scope), value, exclusive);
    }

    /// Records a value for `spec`.
    pub fn record(&self, spec: MetricSpec, value: f64, exclusive: f64) {
        self.lock().entry(spec).or_default().record(value, exclusive);
    }

    /// Current stats for `spec`, before naming rules.
    #[must_use]
    pub fn get_stats(&self, spec: &MetricSpec) -> Option<Stats> {
        self.lock().get(spec).copied()
    }

    /// Number of distinct metrics buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every buffered metric with naming rules applied.
    ///
    /// Metrics renamed onto the same spec are merged; ignored metrics are
    /// dropped. Output is sorted by spec.
    #[must_use]
    pub fn harvest(&self) -> Vec<(MetricSpec, Stats)> {
        let drained = std::mem::take(&mut *self.lock());

        let mut renamed: HashMap<MetricSpec, Stats> = HashMap::with_capacity(drained.len());
        for (spec, stats) in drained {
            let Some(name) = self.metric_rules.rename(&spec.name) else {
                continue;
            };
            renamed
                .entry(MetricSpec {
                    name,
                    scope: spec.scope,
                })
                .or_default()
                .merge(&stats);
        }

        let mut harvested: Vec<_> = renamed.into_iter().collect();
        harvested.sort_by(|a, b| a.0.cmp(&b.0));
        harvested
    }

    /// Drops every buffered metric.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MetricSpec, Stats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Encodes harvested metrics as `[[{"name","scope"}, [values]], ...]`.
#[must_use]
pub fn metrics_to_json(metrics: &[(MetricSpec, Stats)]) -> Value {
    Value::Array(
        metrics
            .iter()
            .map(|(spec, stats)| json!([spec.to_json(), stats.to_json()]))
            .collect(),
    )
}

//! Assertions over what the agent posted to the fake collector.
//!
//! Every `single_*` helper panics with the endpoint name, the expectation and
//! the count it found, so a failing test reads like
//! `Unexpected post count for 'error_data': expected 1, found 2`.

use crate::harness::AgentHarness;
use multiverse_collector::{
    AnalyticEvent, ErrorRecord, FakeCollector, MetricRecord, RecordedCall, TransactionSample,
};
use multiverse_constants::methods;
use std::fmt::Display;

/// Query and assertion helpers over a collector call log.
///
/// Implementors only provide [`recorded_calls`](Self::recorded_calls).
pub trait CollectorAssertions {
    /// Calls made to `method`, oldest first.
    fn recorded_calls(&self, method: &str) -> Vec<RecordedCall>;

    /// Number of calls made to `method`.
    fn posted_count(&self, method: &str) -> usize {
        self.recorded_calls(method).len()
    }

    /// The only call made to `method`.
    #[track_caller]
    fn single_post(&self, method: &str) -> RecordedCall {
        let calls = self.recorded_calls(method);
        expect_one(calls, || format!("Unexpected post count for '{method}'"))
    }

    /// The only transaction trace posted.
    #[track_caller]
    fn single_transaction_trace_posted(&self) -> TransactionSample {
        let call = self.single_post(methods::TRANSACTION_SAMPLE_DATA);
        single_item(methods::TRANSACTION_SAMPLE_DATA, call.samples())
    }

    /// The only error posted.
    #[track_caller]
    fn single_error_posted(&self) -> ErrorRecord {
        let call = self.single_post(methods::ERROR_DATA);
        single_item(methods::ERROR_DATA, call.errors())
    }

    /// The only analytic event posted.
    #[track_caller]
    fn single_event_posted(&self) -> AnalyticEvent {
        let call = self.single_post(methods::ANALYTIC_EVENT_DATA);
        single_item(methods::ANALYTIC_EVENT_DATA, call.events())
    }

    /// The only unscoped timeslice named `name` in the only `metric_data` post.
    #[track_caller]
    fn single_metric_posted(&self, name: &str) -> MetricRecord {
        let call = self.single_post(methods::METRIC_DATA);
        let metrics = decoded(methods::METRIC_DATA, call.metrics());
        let matching: Vec<MetricRecord> = metrics
            .into_iter()
            .filter(|record| record.spec.name == name && record.spec.scope.is_empty())
            .collect();
        expect_one(matching, || {
            format!(
                "Unexpected count of metric '{name}' in '{}'",
                methods::METRIC_DATA
            )
        })
    }
}

impl CollectorAssertions for FakeCollector {
    fn recorded_calls(&self, method: &str) -> Vec<RecordedCall> {
        self.calls_for(method)
    }
}

impl CollectorAssertions for AgentHarness {
    /// Empty when the collector is omitted or was never created.
    fn recorded_calls(&self, method: &str) -> Vec<RecordedCall> {
        self.collector()
            .map(|collector| collector.calls_for(method))
            .unwrap_or_default()
    }
}

#[track_caller]
fn expect_one<T>(mut items: Vec<T>, context: impl FnOnce() -> String) -> T {
    match items.len() {
        1 => items.remove(0),
        found => panic!("{}: expected 1, found {found}", context()),
    }
}

#[track_caller]
fn single_item<T, E: Display>(method: &str, items: Result<Vec<T>, E>) -> T {
    let items = decoded(method, items);
    expect_one(items, || format!("Unexpected item count in '{method}' post"))
}

#[track_caller]
fn decoded<T, E: Display>(method: &str, items: Result<Vec<T>, E>) -> Vec<T> {
    match items {
        Ok(items) => items,
        Err(e) => panic!("Could not decode '{method}' payload: {e}"),
    }
}

/// Asserts how many calls were made to a collector method.
#[macro_export]
macro_rules! assert_posted_count {
    ($source:expr, $method:expr, $expected:expr) => {{
        let found = {
            use $crate::CollectorAssertions as _;
            ($source).posted_count($method)
        };
        assert_eq!(
            found, $expected,
            "Unexpected post count for '{}': expected {}, found {}",
            $method, $expected, found
        )
    }};
}

/// Asserts that nothing was posted to a collector method.
#[macro_export]
macro_rules! assert_nothing_posted {
    ($source:expr, $method:expr) => {
        $crate::assert_posted_count!($source, $method, 0)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector() -> FakeCollector {
        FakeCollector::new().unwrap()
    }

    #[test]
    fn test_single_error_posted() {
        let collector = collector();
        collector.record(
            methods::ERROR_DATA,
            Some(1),
            json!([1, [[1_700_000_000_000_i64, "WebTransaction/Controller/home", "boom", "RuntimeError", {}]]]),
        );

        let error = collector.single_error_posted();
        assert_eq!(error.message, "boom");
        assert_eq!(collector.posted_count(methods::ERROR_DATA), 1);
    }

    #[test]
    #[should_panic(expected = "Unexpected post count for 'error_data': expected 1, found 2")]
    fn test_two_posts_panic() {
        let collector = collector();
        collector.record(methods::ERROR_DATA, Some(1), json!([1, []]));
        collector.record(methods::ERROR_DATA, Some(1), json!([1, []]));

        collector.single_error_posted();
    }

    #[test]
    #[should_panic(expected = "Unexpected item count in 'analytic_event_data' post: expected 1, found 0")]
    fn test_empty_post_panics() {
        let collector = collector();
        collector.record(methods::ANALYTIC_EVENT_DATA, Some(1), json!([1, []]));

        collector.single_event_posted();
    }

    #[test]
    #[should_panic(expected = "Could not decode 'transaction_sample_data' payload")]
    fn test_malformed_payload_panics() {
        let collector = collector();
        collector.record(methods::TRANSACTION_SAMPLE_DATA, Some(1), json!({"not": "an array"}));

        collector.single_transaction_trace_posted();
    }

    #[test]
    fn test_single_metric_posted_ignores_scoped() {
        let collector = collector();
        collector.record(
            methods::METRIC_DATA,
            Some(1),
            json!([1, 0, 60, [
                [{"name": "Datastore/select", "scope": ""}, [2, 0.5, 0.5, 0.2, 0.3, 0.13]],
                [{"name": "Datastore/select", "scope": "WebTransaction/home"}, [2, 0.5, 0.5, 0.2, 0.3, 0.13]]
            ]]),
        );

        let metric = collector.single_metric_posted("Datastore/select");
        assert_eq!(metric.stats.call_count, 2);
    }

    #[test]
    fn test_macros() {
        let collector = collector();
        collector.record(methods::SHUTDOWN, Some(1), json!([]));

        crate::assert_posted_count!(collector, methods::SHUTDOWN, 1);
        crate::assert_nothing_posted!(collector, methods::ERROR_DATA);
    }
}

//! Per-thread transaction state.
//!
//! At most one transaction is active on a thread. Instrumented code reaches
//! it through the `tl_*` associated functions on [`TransactionState`].

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use uuid::Uuid;

thread_local! {
    static CURRENT: RefCell<Option<TransactionState>> = const { RefCell::new(None) };
}

/// A timed unit of work inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Metric name of the segment.
    pub name: String,
    /// Offset from the transaction start.
    pub start_offset: Duration,
    /// Time spent.
    pub duration: Duration,
}

/// An error noticed while a transaction was running.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingError {
    /// When it was noticed.
    pub timestamp: DateTime<Utc>,
    /// Error class.
    pub class: String,
    /// Error message.
    pub message: String,
    /// Extra parameters.
    pub params: Map<String, Value>,
}

/// The transaction running on the current thread.
#[derive(Debug)]
pub struct TransactionState {
    name: String,
    web: bool,
    uri: Option<String>,
    start: DateTime<Utc>,
    started: Instant,
    segments: Vec<Segment>,
    attributes: Map<String, Value>,
    errors: Vec<PendingError>,
}

impl TransactionState {
    fn new(name: &str, web: bool, uri: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            web,
            uri: uri.map(String::from),
            start: Utc::now(),
            started: Instant::now(),
            segments: Vec::new(),
            attributes: Map::new(),
            errors: Vec::new(),
        }
    }

    /// Starts a transaction on this thread, replacing any running one.
    ///
    /// Returns true if a running transaction was discarded.
    pub fn tl_start(name: &str, web: bool, uri: Option<&str>) -> bool {
        let replaced = CURRENT.with(|current| {
            current
                .borrow_mut()
                .replace(Self::new(name, web, uri))
                .is_some()
        });
        if replaced {
            tracing::warn!(name, "discarding unfinished transaction on this thread");
        }
        replaced
    }

    /// Ends the running transaction and returns it.
    #[must_use]
    pub fn tl_finish() -> Option<FinishedTransaction> {
        CURRENT
            .with(|current| current.borrow_mut().take())
            .map(Self::into_finished)
    }

    /// Returns true if a transaction is running on this thread.
    #[must_use]
    pub fn tl_in_transaction() -> bool {
        CURRENT.with(|current| current.borrow().is_some())
    }

    /// Name of the running transaction.
    #[must_use]
    pub fn tl_current_name() -> Option<String> {
        CURRENT.with(|current| current.borrow().as_ref().map(|tx| tx.name.clone()))
    }

    /// Runs `f` against the running transaction, if any.
    pub fn tl_with<R>(f: impl FnOnce(&mut TransactionState) -> R) -> Option<R> {
        CURRENT.with(|current| current.borrow_mut().as_mut().map(f))
    }

    /// Drops whatever transaction this thread was running.
    pub fn tl_clear_for_testing() {
        CURRENT.with(|current| current.borrow_mut().take());
    }

    /// Renames the transaction.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Adds a finished segment.
    pub fn push_segment(&mut self, name: &str, started: Instant, duration: Duration) {
        self.segments.push(Segment {
            name: name.to_string(),
            start_offset: started.saturating_duration_since(self.started),
            duration,
        });
    }

    /// Adds a user attribute.
    pub fn add_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    /// Buffers an error until the transaction finishes.
    pub fn push_error(&mut self, error: PendingError) {
        self.errors.push(error);
    }

    fn into_finished(self) -> FinishedTransaction {
        FinishedTransaction {
            name: self.name,
            web: self.web,
            uri: self.uri,
            start: self.start,
            duration: self.started.elapsed(),
            segments: self.segments,
            attributes: self.attributes,
            errors: self.errors,
            guid: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// A transaction that has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTransaction {
    /// Name as instrumented, before naming rules.
    pub name: String,
    /// Web or background transaction.
    pub web: bool,
    /// Request URI for web transactions.
    pub uri: Option<String>,
    /// Wall-clock start.
    pub start: DateTime<Utc>,
    /// Total duration.
    pub duration: Duration,
    /// Segments in recording order.
    pub segments: Vec<Segment>,
    /// User attributes.
    pub attributes: Map<String, Value>,
    /// Errors noticed while it ran.
    pub errors: Vec<PendingError>,
    /// Trace GUID.
    pub guid: String,
}

impl FinishedTransaction {
    /// Metric name prefix: `WebTransaction` or `OtherTransaction`.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        if self.web {
            "WebTransaction"
        } else {
            "OtherTransaction"
        }
    }

    /// Fully qualified metric name for `name`.
    #[must_use]
    pub fn metric_name(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix())
    }

    /// Trace tree sent in `transaction_sample_data`.
    #[must_use]
    pub fn trace_json(&self) -> Value {
        let segments: Vec<Value> = self
            .segments
            .iter()
            .map(|segment| {
                json!({
                    "name": segment.name,
                    "start_ms": millis(segment.start_offset),
                    "duration_ms": millis(segment.duration),
                })
            })
            .collect();
        json!({ "segments": segments, "attributes": self.attributes })
    }
}

/// Duration in fractional milliseconds.
#[must_use]
pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

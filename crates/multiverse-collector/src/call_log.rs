//! Ordered log of calls received by the fake collector.

use crate::error::{CollectorError, Result};
use crate::payload::{
    AnalyticEvent, ConnectEnvelope, ConnectSettings, ErrorRecord, MetricEnvelope, MetricRecord,
    RunEnvelope, TransactionSample,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// One request received by the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Arrival position since the last reset.
    pub sequence: u64,
    /// Collector method (endpoint name) the call was made to.
    pub method: String,
    /// Agent run id from the query string, if the agent sent one.
    pub run_id: Option<u64>,
    /// Raw JSON body.
    pub payload: Value,
    /// Time the call was recorded.
    pub received_at: DateTime<Utc>,
}

impl RecordedCall {
    /// Decodes the payload as a `transaction_sample_data` post.
    pub fn samples(&self) -> Result<Vec<TransactionSample>> {
        self.decode::<RunEnvelope<TransactionSample>>().map(|env| env.1)
    }

    /// Decodes the payload as an `error_data` post.
    pub fn errors(&self) -> Result<Vec<ErrorRecord>> {
        self.decode::<RunEnvelope<ErrorRecord>>().map(|env| env.1)
    }

    /// Decodes the payload as an `analytic_event_data` or `custom_event_data` post.
    pub fn events(&self) -> Result<Vec<AnalyticEvent>> {
        self.decode::<RunEnvelope<AnalyticEvent>>().map(|env| env.1)
    }

    /// Decodes the payload as a `metric_data` post.
    pub fn metrics(&self) -> Result<Vec<MetricRecord>> {
        self.decode::<MetricEnvelope>().map(|env| env.3)
    }

    /// Decodes the payload as a `connect` call.
    pub fn connect_settings(&self) -> Result<ConnectSettings> {
        self.decode::<ConnectEnvelope>().map(|env| env.0)
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|source| CollectorError::Decode {
            method: self.method.clone(),
            source,
        })
    }
}

/// Calls in arrival order.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Vec<RecordedCall>,
    next_sequence: u64,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call and returns its sequence number.
    pub fn record(&mut self, method: &str, run_id: Option<u64>, payload: Value) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        tracing::debug!(method, ?run_id, sequence, "recorded collector call");
        self.calls.push(RecordedCall {
            sequence,
            method: method.to_string(),
            run_id,
            payload,
            received_at: Utc::now(),
        });
        sequence
    }

    /// Returns every call made to `method`, oldest first.
    #[must_use]
    pub fn calls_for(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// Returns every call, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<RecordedCall> {
        self.calls.clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Forgets every call and restarts sequence numbering.
    pub fn clear(&mut self) {
        self.calls.clear();
        self.next_sequence = 0;
    }
}

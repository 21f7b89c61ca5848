//! Slow transaction trace selection.

use crate::transaction::{millis, FinishedTransaction};
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A transaction kept for `transaction_sample_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSample {
    /// Final transaction name.
    pub name: String,
    /// The transaction.
    pub transaction: FinishedTransaction,
}

impl TraceSample {
    /// `[start_ms, duration_ms, name, uri, trace, guid]`
    #[must_use]
    pub fn to_json(&self) -> Value {
        let tx = &self.transaction;
        json!([
            tx.start.timestamp_millis(),
            millis(tx.duration),
            self.name,
            tx.uri,
            tx.trace_json(),
            tx.guid,
        ])
    }
}

/// Keeps the slowest transaction at or above the trace threshold.
#[derive(Debug, Default)]
pub struct TransactionSampler {
    slowest: Mutex<Option<TraceSample>>,
}

impl TransactionSampler {
    /// Creates an empty sampler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a finished transaction.
    ///
    /// Returns true if it became the current slowest sample.
    pub fn offer(&self, name: &str, transaction: &FinishedTransaction, threshold: Duration) -> bool {
        if transaction.duration < threshold {
            return false;
        }
        let mut slowest = self.lock();
        if slowest
            .as_ref()
            .is_some_and(|kept| kept.transaction.duration >= transaction.duration)
        {
            return false;
        }
        *slowest = Some(TraceSample {
            name: name.to_string(),
            transaction: transaction.clone(),
        });
        true
    }

    /// Returns true if a sample is waiting for harvest.
    #[must_use]
    pub fn has_sample(&self) -> bool {
        self.lock().is_some()
    }

    /// Takes the kept sample.
    #[must_use]
    pub fn harvest(&self) -> Option<TraceSample> {
        self.lock().take()
    }

    /// Forgets the kept sample.
    pub fn reset(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TraceSample>> {
        self.slowest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

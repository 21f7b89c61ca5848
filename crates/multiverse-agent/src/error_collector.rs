//! Noticed error buffering.

use crate::config::ErrorCollectorConfig;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};

/// An error the agent will report in `error_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoticedError {
    /// When it was noticed.
    pub timestamp: DateTime<Utc>,
    /// Transaction name (after naming rules) or `Unknown`.
    pub path: String,
    /// Error message.
    pub message: String,
    /// Error class.
    pub class: String,
    /// Extra parameters.
    pub params: Map<String, Value>,
}

impl NoticedError {
    /// `[timestamp_ms, path, message, class, params]`
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!([
            self.timestamp.timestamp_millis(),
            self.path,
            self.message,
            self.class,
            self.params,
        ])
    }
}

type IgnoreFilter = Box<dyn Fn(&NoticedError) -> bool + Send + Sync>;

/// Settings the collector consults on every `notice`.
#[derive(Debug, Clone, Default)]
pub struct ErrorPolicy {
    /// Collect at all.
    pub enabled: bool,
    /// Error classes to drop.
    pub ignore_errors: Vec<String>,
    /// Buffer capacity.
    pub max_error_count: usize,
}

impl From<&ErrorCollectorConfig> for ErrorPolicy {
    fn from(config: &ErrorCollectorConfig) -> Self {
        Self {
            enabled: config.enabled,
            ignore_errors: config.ignore_errors.clone(),
            max_error_count: config.max_error_count,
        }
    }
}

/// Buffers noticed errors until harvest.
#[derive(Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<NoticedError>>,
    ignore_filter: RwLock<Option<IgnoreFilter>>,
}

impl fmt::Debug for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCollector")
            .field("buffered", &self.len())
            .field("has_ignore_filter", &self.has_ignore_filter())
            .finish()
    }
}

impl ErrorCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a filter; errors for which it returns true are dropped.
    pub fn set_ignore_filter<F>(&self, filter: F)
    where
        F: Fn(&NoticedError) -> bool + Send + Sync + 'static,
    {
        *self
            .ignore_filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(filter));
    }

    /// Removes the ignore filter.
    pub fn clear_ignore_filter(&self) {
        *self
            .ignore_filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns true if an ignore filter is installed.
    #[must_use]
    pub fn has_ignore_filter(&self) -> bool {
        self.ignore_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Buffers `error` unless the policy or the ignore filter rejects it.
    ///
    /// Returns true if the error was kept.
    pub fn notice(&self, error: NoticedError, policy: &ErrorPolicy) -> bool {
        if !policy.enabled {
            return false;
        }
        if policy.ignore_errors.iter().any(|class| *class == error.class) {
            tracing::debug!(class = %error.class, "error class ignored by configuration");
            return false;
        }
        if let Some(filter) = self
            .ignore_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if filter(&error) {
                tracing::debug!(class = %error.class, "error dropped by ignore filter");
                return false;
            }
        }

        let mut errors = self.lock();
        if errors.len() >= policy.max_error_count {
            return false;
        }
        errors.push(error);
        true
    }

    /// Number of buffered errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every buffered error.
    #[must_use]
    pub fn harvest(&self) -> Vec<NoticedError> {
        std::mem::take(&mut *self.lock())
    }

    /// Drops buffered errors. The ignore filter stays.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<NoticedError>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

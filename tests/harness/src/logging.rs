//! Test logging.

use multiverse_constants::env::LOG_FILTER;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs a global fmt subscriber writing through the test harness.
///
/// The filter comes from `MULTIVERSE_LOG` and defaults to `warn`. Safe to
/// call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_env(LOG_FILTER).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Layer capturing `WARN` events whose target starts with a prefix.
#[derive(Debug, Clone)]
pub struct WarningCounter {
    target_prefix: String,
    messages: Arc<Mutex<Vec<String>>>,
}

impl WarningCounter {
    /// Captures warnings from targets starting with `target_prefix`.
    #[must_use]
    pub fn new(target_prefix: &str) -> Self {
        Self {
            target_prefix: target_prefix.to_string(),
            messages: Arc::default(),
        }
    }

    /// Number of warnings captured.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Captured messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Subscriber> Layer<S> for WarningCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::WARN || !metadata.target().starts_with(&self.target_prefix)
        {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.lock().push(visitor.0);
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[test]
    fn test_counts_only_matching_warnings() {
        let counter = WarningCounter::new("multiverse_harness");
        let subscriber = Registry::default().with(counter.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "multiverse_harness::harness", "leaked state");
            tracing::warn!(target: "other_crate", "not ours");
            tracing::info!(target: "multiverse_harness::harness", "not a warning");
        });

        assert_eq!(counter.count(), 1);
        assert_eq!(counter.messages(), vec!["leaked state".to_string()]);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}

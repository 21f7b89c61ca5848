//! Analytic and custom event buffering.

use serde_json::{json, Map, Value};
use std::sync::{Mutex, PoisonError};

/// One event: `[intrinsics, user_attributes, agent_attributes]` on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    /// Agent-computed attributes; always carries `type` and `timestamp`.
    pub intrinsics: Map<String, Value>,
    /// Application-supplied attributes.
    pub user_attributes: Map<String, Value>,
    /// Environment attributes.
    pub agent_attributes: Map<String, Value>,
}

impl Event {
    /// Creates an event of `event_type` stamped with the current time.
    #[must_use]
    pub fn new(event_type: &str) -> Self {
        let mut intrinsics = Map::new();
        intrinsics.insert("type".to_string(), json!(event_type));
        intrinsics.insert(
            "timestamp".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        Self {
            intrinsics,
            ..Self::default()
        }
    }

    /// Adds an intrinsic.
    #[must_use]
    pub fn with_intrinsic(mut self, key: &str, value: Value) -> Self {
        self.intrinsics.insert(key.to_string(), value);
        self
    }

    /// Replaces the user attributes.
    #[must_use]
    pub fn with_user_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.user_attributes = attributes;
        self
    }

    /// Wire form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!([self.intrinsics, self.user_attributes, self.agent_attributes])
    }
}

#[derive(Debug, Default)]
struct Reservoir {
    events: Vec<Event>,
    seen: u64,
}

/// Bounded event buffer. Events beyond capacity are counted and dropped.
#[derive(Debug, Default)]
pub struct EventAggregator {
    reservoir: Mutex<Reservoir>,
}

impl EventAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `event` if fewer than `capacity` are held.
    ///
    /// Returns true if the event was kept.
    pub fn record(&self, event: Event, capacity: usize) -> bool {
        let mut reservoir = self.lock();
        reservoir.seen += 1;
        if reservoir.events.len() >= capacity {
            return false;
        }
        reservoir.events.push(event);
        true
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events offered since the last harvest, kept or not.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.lock().seen
    }

    /// Takes every buffered event.
    #[must_use]
    pub fn harvest(&self) -> Vec<Event> {
        let mut reservoir = self.lock();
        reservoir.seen = 0;
        std::mem::take(&mut reservoir.events)
    }

    /// Drops every buffered event.
    pub fn reset(&self) {
        *self.lock() = Reservoir::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Reservoir> {
        self.reservoir.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Encodes events as `[[intrinsics, user, agent], ...]`.
#[must_use]
pub fn events_to_json(events: &[Event]) -> Value {
    Value::Array(events.iter().map(Event::to_json).collect())
}

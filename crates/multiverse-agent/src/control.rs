//! Plugin-level control state.
//!
//! Tracks whether the agent was initialized and caches facts about the local
//! environment that are reported in the `connect` call.

use std::sync::{Mutex, PoisonError};

/// Facts about the process the agent runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEnvironment {
    /// Host name.
    pub hostname: String,
    /// Process id.
    pub pid: u32,
}

impl LocalEnvironment {
    /// Discovers the current environment.
    #[must_use]
    pub fn discover() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            hostname,
            pid: std::process::id(),
        }
    }
}

#[derive(Debug, Default)]
struct ControlState {
    initialized: bool,
    environment: Option<LocalEnvironment>,
}

/// Initialization flag and cached local environment.
#[derive(Debug, Default)]
pub struct Control {
    state: Mutex<ControlState>,
}

impl Control {
    /// Creates uninitialized control state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the agent initialized. Idempotent.
    pub fn init_plugin(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.initialized {
            state.initialized = true;
            tracing::debug!("agent plugin initialized");
        }
    }

    /// Returns true after [`init_plugin`](Self::init_plugin) until the next reset.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialized
    }

    /// Returns the local environment, discovering it on first use.
    #[must_use]
    pub fn local_environment(&self) -> LocalEnvironment {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .environment
            .get_or_insert_with(LocalEnvironment::discover)
            .clone()
    }

    /// Forgets initialization and the cached environment.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ControlState::default();
    }
}

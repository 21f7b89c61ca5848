//! Collector router and shared state.

use crate::call_log::CallLog;
use crate::handlers;
use crate::responses::{self, StubbedResponse};
use axum::routing::post;
use axum::Router;
use multiverse_constants::methods;
use multiverse_constants::wire::{FIRST_RUN_ID, INVOKE_PATH, LOCAL_HOST};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mutable collector state shared between the HTTP service and the test.
#[derive(Debug)]
pub struct CollectorState {
    /// Calls received since the last reset.
    pub calls: CallLog,
    /// Per-method canned responses.
    pub stubs: HashMap<String, StubbedResponse>,
    /// Delay applied before every response.
    pub latency: Option<Duration>,
    /// Host returned by `preconnect`.
    pub redirect_host: String,
    next_run_id: u64,
}

impl Default for CollectorState {
    fn default() -> Self {
        Self {
            calls: CallLog::new(),
            stubs: HashMap::new(),
            latency: None,
            redirect_host: LOCAL_HOST.to_string(),
            next_run_id: FIRST_RUN_ID,
        }
    }
}

impl CollectorState {
    /// Clears per-test state. Run ids keep increasing so every connect
    /// observed across resets is distinguishable.
    pub fn reset(&mut self) {
        self.calls.clear();
        self.stubs.clear();
        self.latency = None;
    }

    /// Builds the response for a call to `method`.
    pub fn respond_to(&mut self, method: &str) -> StubbedResponse {
        let run_id = if method == methods::CONNECT {
            let id = self.next_run_id;
            self.next_run_id += 1;
            id
        } else {
            self.next_run_id
        };

        match self.stubs.get(method).cloned() {
            Some(stub) if method == methods::CONNECT => responses::complete_connect_stub(stub, run_id),
            Some(stub) => stub,
            None => responses::default_response(method, &self.redirect_host, run_id),
        }
    }
}

/// Application state shared with handlers.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    inner: Arc<Mutex<CollectorState>>,
}

impl AppState {
    /// Creates fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state. A panic while the lock was held (for example a failed
    /// assertion inside a test closure) does not make the log unreadable.
    pub fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates the collector router.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(INVOKE_PATH, post(handlers::invoke_raw_method))
        .with_state(state)
}

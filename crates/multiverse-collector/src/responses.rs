//! Responses the collector sends back to the agent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use multiverse_constants::methods;
use multiverse_constants::wire::{EXCEPTION_KEY, RETURN_VALUE_KEY};
use serde_json::{json, Value};

/// A canned response installed with [`FakeCollector::stub`] or
/// [`FakeCollector::stub_exception`].
///
/// [`FakeCollector::stub`]: crate::FakeCollector::stub
/// [`FakeCollector::stub_exception`]: crate::FakeCollector::stub_exception
#[derive(Debug, Clone, PartialEq)]
pub enum StubbedResponse {
    /// `{"return_value": value}` with the given status.
    Value {
        /// HTTP status.
        status: StatusCode,
        /// Wrapped return value.
        value: Value,
    },
    /// `{"exception": {"error_type": .., "message": ..}}` with the given status.
    Exception {
        /// HTTP status.
        status: StatusCode,
        /// Exception class the agent sees.
        error_type: String,
        /// Exception message.
        message: String,
    },
}

impl StubbedResponse {
    /// Returns the HTTP status of this response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Value { status, .. } | Self::Exception { status, .. } => *status,
        }
    }

    fn body(&self) -> Value {
        match self {
            Self::Value { value, .. } => json!({ RETURN_VALUE_KEY: value }),
            Self::Exception {
                error_type,
                message,
                ..
            } => json!({
                EXCEPTION_KEY: {
                    "error_type": error_type,
                    "message": message,
                }
            }),
        }
    }
}

impl IntoResponse for StubbedResponse {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.body())).into_response()
    }
}

/// Builds the response for `method` when no stub is installed.
pub(crate) fn default_response(method: &str, redirect_host: &str, run_id: u64) -> StubbedResponse {
    let value = match method {
        methods::PRECONNECT => json!({ "redirect_host": redirect_host }),
        methods::CONNECT => connect_return_value(run_id),
        _ => Value::Null,
    };

    StubbedResponse::Value {
        status: StatusCode::OK,
        value,
    }
}

/// Fills in an agent run id for a stubbed `connect` response that lacks one,
/// so tests can seed server-side settings without managing run ids.
pub(crate) fn complete_connect_stub(stub: StubbedResponse, run_id: u64) -> StubbedResponse {
    match stub {
        StubbedResponse::Value {
            status,
            value: Value::Object(mut settings),
        } => {
            settings
                .entry("agent_run_id")
                .or_insert_with(|| json!(run_id));
            StubbedResponse::Value {
                status,
                value: Value::Object(settings),
            }
        }
        other => other,
    }
}

fn connect_return_value(run_id: u64) -> Value {
    json!({
        "agent_run_id": run_id,
        "data_report_period": 60,
        "collect_errors": true,
        "collect_traces": true,
        "collect_analytics_events": true,
        "collect_custom_events": true,
    })
}

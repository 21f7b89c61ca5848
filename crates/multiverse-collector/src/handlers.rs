//! Request handler for the collector entry point.

use crate::api::AppState;
use crate::error::{CollectorError, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

/// Query parameters sent with every collector request.
#[derive(Debug, Deserialize)]
pub struct InvokeQuery {
    /// Collector method being invoked.
    pub method: Option<String>,
    /// Agent run id (absent before `connect`).
    pub run_id: Option<u64>,
    /// Protocol version.
    pub protocol_version: Option<u32>,
    /// License key.
    pub license_key: Option<String>,
    /// Payload marshalling format.
    pub marshal_format: Option<String>,
}

/// Records the call and answers with the stubbed or default response.
pub async fn invoke_raw_method(
    State(state): State<AppState>,
    Query(query): Query<InvokeQuery>,
    body: Bytes,
) -> Result<Response> {
    let method = query
        .method
        .filter(|method| !method.is_empty())
        .ok_or_else(|| CollectorError::InvalidRequest("missing 'method' parameter".to_string()))?;

    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            CollectorError::InvalidRequest(format!("'{method}' body is not JSON: {e}"))
        })?
    };

    let (response, latency) = {
        let mut collector = state.lock();
        collector.calls.record(&method, query.run_id, payload);
        (collector.respond_to(&method), collector.latency)
    };

    if let Some(delay) = latency {
        tokio::time::sleep(delay).await;
    }

    Ok(response.into_response())
}

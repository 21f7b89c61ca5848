//! # multiverse-collector
//!
//! A fake ingestion endpoint for exercising a monitoring agent in tests.
//!
//! The collector speaks the agent's wire contract over plain HTTP on a
//! loopback port, records every inbound call under its method name and
//! answers with the minimal acknowledgements the agent expects. Tests inject
//! responses before the agent connects and query the call log afterwards.
//!
//! ## Architecture
//!
//! ```text
//! agent ──► POST /agent_listener/invoke_raw_method?method=X ──► axum router
//!                                                                  │
//!                                                                  ▼
//!                                                           CollectorState
//!                                                      (call log, stubs, latency)
//!                                                                  ▲
//! test  ──► FakeCollector::calls_for("X") ─────────────────────────┘
//! ```
//!
//! The HTTP service runs on a private tokio runtime owned by the
//! [`FakeCollector`]; every public method is blocking so the collector can be
//! driven from ordinary `#[test]` functions.

pub mod api;
pub mod call_log;
pub mod error;
pub mod handlers;
pub mod payload;
pub mod responses;
pub mod server;

pub use call_log::{CallLog, RecordedCall};
pub use error::{CollectorError, Result};
pub use payload::{
    AnalyticEvent, ConnectSettings, ErrorRecord, MetricRecord, MetricSpec, MetricStats,
    TransactionSample,
};
pub use responses::StubbedResponse;
pub use server::FakeCollector;

pub use axum::http::StatusCode;

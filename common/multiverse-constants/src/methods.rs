/// Handshake step returning the host the agent should connect to.
pub const PRECONNECT: &str = "preconnect";

/// Handshake step returning the agent run id and server-side settings.
pub const CONNECT: &str = "connect";

/// Aggregated metric timeslices.
pub const METRIC_DATA: &str = "metric_data";

/// Noticed errors.
pub const ERROR_DATA: &str = "error_data";

/// Slow transaction traces.
pub const TRANSACTION_SAMPLE_DATA: &str = "transaction_sample_data";

/// Transaction analytic events.
pub const ANALYTIC_EVENT_DATA: &str = "analytic_event_data";

/// Custom (user-recorded) events.
pub const CUSTOM_EVENT_DATA: &str = "custom_event_data";

/// Sent by the agent when it shuts down while connected.
pub const SHUTDOWN: &str = "shutdown";

/// Every method the fake collector understands.
pub const ALL: &[&str] = &[
    PRECONNECT,
    CONNECT,
    METRIC_DATA,
    ERROR_DATA,
    TRANSACTION_SAMPLE_DATA,
    ANALYTIC_EVENT_DATA,
    CUSTOM_EVENT_DATA,
    SHUTDOWN,
];

/// Path of the single collector entry point; the method travels in the query.
pub const INVOKE_PATH: &str = "/agent_listener/invoke_raw_method";

/// Collector protocol version sent with every request.
pub const PROTOCOL_VERSION: u32 = 17;

/// Loopback host the fake collector binds to.
pub const LOCAL_HOST: &str = "127.0.0.1";

/// Port value asking the OS for an ephemeral port.
pub const EPHEMERAL_PORT: u16 = 0;

/// First agent run id handed out by a freshly constructed collector.
pub const FIRST_RUN_ID: u64 = 1;

/// Key wrapping a successful collector response.
pub const RETURN_VALUE_KEY: &str = "return_value";

/// Key wrapping a collector exception response.
pub const EXCEPTION_KEY: &str = "exception";

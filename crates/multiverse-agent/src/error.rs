//! Error types for the agent.

use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration could not be loaded or merged.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The HTTP transport failed.
    #[error("transport error calling '{method}': {source}")]
    Transport {
        /// Collector method being invoked.
        method: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The collector answered with an exception.
    #[error("collector rejected '{method}' ({status}): {error_type}: {message}")]
    Collector {
        /// Collector method being invoked.
        method: String,
        /// HTTP status.
        status: u16,
        /// Exception class reported by the collector.
        error_type: String,
        /// Exception message.
        message: String,
    },

    /// The collector answered with something the agent cannot use.
    #[error("unexpected response to '{method}': {reason}")]
    UnexpectedResponse {
        /// Collector method being invoked.
        method: String,
        /// What was wrong.
        reason: String,
    },

    /// A naming rule's pattern did not compile.
    #[error("invalid naming rule '{pattern}': {source}")]
    InvalidRule {
        /// Offending pattern.
        pattern: String,
        /// Regex compiler error.
        #[source]
        source: regex::Error,
    },

    /// The background connect thread could not be spawned or panicked.
    #[error("connect thread failed: {0}")]
    ConnectThread(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for AgentError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl AgentError {
    /// Returns true if the collector asked the agent to stop talking to it.
    #[must_use]
    pub fn is_force_disconnect(&self) -> bool {
        matches!(self, Self::Collector { error_type, .. } if error_type.contains("ForceDisconnect"))
    }
}

//! # multiverse-agent
//!
//! A small monitoring agent with the lifecycle surface integration tests
//! drive: start, connect, harvest, shutdown and per-component resets.
//!
//! ## Components
//!
//! - [`ConfigLayers`]: defaults, environment, manual and server settings
//! - [`CollectorService`]: blocking transport for the collector protocol
//! - [`StatsEngine`] and [`RuleSet`]: metric timeslices and naming rules
//! - [`ErrorCollector`], [`TransactionSampler`], [`EventAggregator`]:
//!   buffered telemetry until harvest
//! - [`TransactionState`]: the transaction running on the current thread
//!
//! ## Usage
//!
//! ```ignore
//! use multiverse_agent::{Agent, StartOptions};
//!
//! let agent = Agent::instance()?;
//! agent.service().set_collector("127.0.0.1", port);
//! agent.manual_start(StartOptions::new().sync_startup(true))?;
//!
//! agent.start_web_transaction("Controller/home", "/");
//! agent.finish_transaction();
//! agent.transmit_data()?;
//! agent.shutdown()?;
//! ```

pub mod agent;
pub mod config;
pub mod control;
pub mod error;
pub mod error_collector;
pub mod events;
pub mod rules;
pub mod sampler;
pub mod service;
pub mod stats;
pub mod transaction;

pub use agent::{Agent, ConnectState, StartOptions};
pub use config::{AgentConfig, ConfigLayers};
pub use control::{Control, LocalEnvironment};
pub use error::{AgentError, Result};
pub use error_collector::{ErrorCollector, NoticedError};
pub use events::{Event, EventAggregator};
pub use rules::{NamingRule, RuleSet, RuleSpec};
pub use sampler::{TraceSample, TransactionSampler};
pub use service::CollectorService;
pub use stats::{MetricSpec, Stats, StatsEngine};
pub use transaction::{FinishedTransaction, TransactionState};

//! Integration test harness for a monitoring agent.
//!
//! This crate drives an agent through start, connect, harvest and shutdown
//! against an in-process fake collector, and resets everything between
//! tests.
//!
//! ## Pieces
//!
//! 1. **Lifecycle** - [`AgentHarness`] sets up, reconnects and tears down the
//!    agent, with guaranteed teardown through [`AgentHarness::run_agent`] and
//!    [`AgentSession`]
//! 2. **Assertions** - [`CollectorAssertions`] pulls "the single posted X"
//!    out of the collector's call log
//! 3. **Logging** - [`init_test_logging`] and [`WarningCounter`]
//!
//! ## Example
//!
//! ```ignore
//! use multiverse_harness::{AgentHarness, CollectorAssertions, LifecycleOptions};
//!
//! let mut harness = AgentHarness::with_defaults()?;
//! harness.run_agent(LifecycleOptions::new(), |h| {
//!     h.agent().start_transaction("Job/import");
//!     h.agent().finish_transaction();
//!     h.run_harvest().unwrap();
//!     h.single_event_posted();
//! })?;
//! ```

pub mod assertions;
pub mod config;
pub mod harness;
pub mod logging;

pub use assertions::CollectorAssertions;
pub use config::HarnessConfig;
pub use harness::{AgentHarness, AgentSession, LifecycleState};
pub use logging::{init_test_logging, WarningCounter};
pub use options::LifecycleOptions;

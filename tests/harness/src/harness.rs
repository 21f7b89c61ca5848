//! Agent lifecycle controller.
//!
//! The harness manages:
//! - The fake collector slot (created lazily, reset per test)
//! - Agent start, reconnect and shutdown
//! - Resetting every piece of agent state between tests

use crate::config::HarnessConfig;
use crate::options::LifecycleOptions;
use anyhow::{Context, Result};
use multiverse_agent::{Agent, AgentConfig, TransactionState};
use multiverse_collector::FakeCollector;
use multiverse_constants::wire::LOCAL_HOST;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};

/// Where the harness is in a test's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No test is running.
    Idle,
    /// Preparing the collector and agent.
    Configuring,
    /// Starting the agent and handshaking.
    Connecting,
    /// The test body may run.
    Ready,
    /// Resetting agent state.
    TornDown,
}

type TeardownStep = fn(&Agent) -> multiverse_agent::Result<()>;

/// Ordered teardown. Every step runs even if an earlier one fails.
const TEARDOWN_STEPS: &[(&str, TeardownStep)] = &[
    ("reset configuration", |agent: &Agent| {
        agent.config().reset_to_defaults();
        Ok(())
    }),
    ("clear transaction rules", |agent: &Agent| {
        agent.transaction_rules().clear();
        Ok(())
    }),
    ("clear metric rules", |agent: &Agent| {
        agent.stats_engine().metric_rules().clear();
        Ok(())
    }),
    ("drop buffered data", |agent: &Agent| {
        agent.drop_buffered_data();
        Ok(())
    }),
    ("clear error ignore filter", |agent: &Agent| {
        agent.error_collector().clear_ignore_filter();
        Ok(())
    }),
    ("clear transaction state", |_: &Agent| {
        TransactionState::tl_clear_for_testing();
        Ok(())
    }),
    ("reset transaction sampler", |agent: &Agent| {
        agent.transaction_sampler().reset();
        Ok(())
    }),
    ("shut down agent", Agent::shutdown),
    ("reset control", |agent: &Agent| {
        agent.control().reset();
        Ok(())
    }),
];

/// Drives one agent through setup, test body and teardown.
///
/// Each test should own its harness: the fake collector listens on its own
/// port, so tests running in parallel never see each other's calls.
pub struct AgentHarness {
    /// Harness configuration.
    pub config: HarnessConfig,
    agent: Agent,
    collector: Option<FakeCollector>,
    state: LifecycleState,
}

impl AgentHarness {
    /// Creates a harness around `agent`.
    #[must_use]
    pub fn new(agent: Agent, config: HarnessConfig) -> Self {
        if config.verbose {
            tracing::info!(omit_collector = config.omit_collector, "created agent harness");
        }
        Self {
            config,
            agent,
            collector: None,
            state: LifecycleState::Idle,
        }
    }

    /// Creates a harness with a fresh agent configured from the environment.
    pub fn with_defaults() -> Result<Self> {
        let agent = Agent::new().context("failed to create agent")?;
        Ok(Self::new(agent, HarnessConfig::from_env()))
    }

    /// Creates a harness with a fresh agent and no environment influence.
    pub fn isolated() -> Result<Self> {
        let agent = Agent::with_config(AgentConfig::default()).context("failed to create agent")?;
        Ok(Self::new(agent, HarnessConfig::isolated()))
    }

    /// Creates a harness around the process-wide agent.
    pub fn for_process_agent() -> Result<Self> {
        let agent = Agent::instance().context("failed to create process agent")?;
        Ok(Self::new(agent, HarnessConfig::from_env()))
    }

    /// The agent under test.
    #[must_use]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// The fake collector, if one was created.
    #[must_use]
    pub fn collector(&self) -> Option<&FakeCollector> {
        self.collector.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns true if the fake collector is never started or stopped.
    #[must_use]
    pub fn omit_collector(&self) -> bool {
        self.config.omit_collector
    }

    /// Creates the fake collector if needed and resets it.
    pub fn ensure_fake_collector(&mut self) -> Result<&FakeCollector> {
        let collector = match self.collector.take() {
            Some(collector) => collector,
            None => FakeCollector::with_port(self.config.collector_port)
                .context("failed to create fake collector")?,
        };
        collector.reset();
        let collector: &FakeCollector = self.collector.insert(collector);
        Ok(collector)
    }

    /// Brings the fake collector online and points the agent at it.
    pub fn start_fake_collector(&mut self) -> Result<()> {
        let collector = self
            .collector
            .as_ref()
            .context("fake collector was not created")?;
        collector.set_port(self.config.collector_port);
        collector
            .restart_if_needed()
            .context("failed to start fake collector")?;
        let port = collector
            .port()
            .context("fake collector is not listening")?;

        self.agent.service().set_collector(LOCAL_HOST, port);
        if self.config.verbose {
            tracing::info!(port, "agent pointed at fake collector");
        }
        Ok(())
    }

    /// Prepares the collector and starts the agent.
    pub fn setup_agent(&mut self, options: LifecycleOptions) -> Result<()> {
        self.setup_agent_with(options, |_| {})
    }

    /// Like [`setup_agent`](Self::setup_agent), running `hook` after the
    /// collector was reset and before the agent connects.
    ///
    /// The hook receives `None` when the collector is omitted.
    pub fn setup_agent_with<F>(&mut self, options: LifecycleOptions, hook: F) -> Result<()>
    where
        F: FnOnce(Option<&FakeCollector>),
    {
        self.state = LifecycleState::Configuring;
        self.shut_down_leaked_agent()?;

        if self.omit_collector() {
            hook(None);
        } else {
            self.ensure_fake_collector()?;
            hook(self.collector.as_ref());
            self.start_fake_collector()?;
        }

        self.agent.drop_buffered_data();
        self.trigger_agent_reconnect(options)?;

        self.state = LifecycleState::Ready;
        if self.config.verbose {
            tracing::info!(connect_state = ?self.agent.connect_state(), "agent ready");
        }
        Ok(())
    }

    /// Restarts the agent with a fresh handshake.
    ///
    /// An agent still running from a previous test is shut down first, with
    /// a warning.
    pub fn trigger_agent_reconnect(&mut self, options: LifecycleOptions) -> Result<()> {
        self.state = LifecycleState::Connecting;
        self.shut_down_leaked_agent()?;

        self.agent.mark_connect_pending();
        self.agent
            .manual_start(options.to_start_options())
            .context("failed to start agent")
    }

    /// Shuts down an agent left started by a previous test.
    ///
    /// Must run before the collector is reset: shutdown joins a pending
    /// background handshake and posts `shutdown`.
    fn shut_down_leaked_agent(&self) -> Result<()> {
        if !self.agent.is_started() {
            return Ok(());
        }
        let shutdown = self.agent.shutdown();
        tracing::warn!("agent wasn't shut down before test");
        shutdown.context("failed to shut down leaked agent")
    }

    /// Resets every piece of agent state and shuts the agent down.
    ///
    /// All steps run; failures are returned together once the last step
    /// finished.
    pub fn teardown_agent(&mut self) -> Result<()> {
        self.state = LifecycleState::TornDown;

        let mut failures = Vec::new();
        for (step, run) in TEARDOWN_STEPS {
            if let Err(e) = run(&self.agent) {
                tracing::warn!(step, error = %e, "teardown step failed");
                failures.push(format!("{step}: {e}"));
            }
        }

        self.state = LifecycleState::Idle;
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("agent teardown failed: {}", failures.join("; "))
        }
    }

    /// Runs `block` between setup and teardown.
    ///
    /// Teardown runs on every exit path. A panic in `block` resumes after
    /// teardown finished.
    pub fn run_agent<R, F>(&mut self, options: LifecycleOptions, block: F) -> Result<R>
    where
        F: FnOnce(&AgentHarness) -> R,
    {
        if let Err(e) = self.setup_agent(options) {
            if let Err(teardown) = self.teardown_agent() {
                tracing::warn!(error = %teardown, "teardown after failed setup also failed");
            }
            return Err(e);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| block(self)));
        let teardown = self.teardown_agent();

        match outcome {
            Ok(value) => teardown.map(|()| value),
            Err(payload) => {
                if let Err(e) = teardown {
                    tracing::warn!(error = %e, "teardown after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Sets up the agent and returns a guard that tears it down on drop.
    pub fn session(&mut self, options: LifecycleOptions) -> Result<AgentSession<'_>> {
        self.setup_agent(options)?;
        Ok(AgentSession { harness: self })
    }

    /// Sends everything the agent buffered to the collector.
    pub fn run_harvest(&self) -> Result<()> {
        self.agent
            .transmit_data()
            .context("failed to transmit agent data")?;
        self.agent
            .transmit_event_data()
            .context("failed to transmit agent events")
    }
}

impl Drop for AgentHarness {
    fn drop(&mut self) {
        if self.state == LifecycleState::Idle {
            return;
        }
        tracing::debug!(state = ?self.state, "tearing down agent left running by harness");
        if let Err(e) = self.teardown_agent() {
            tracing::warn!(error = %e, "teardown on drop failed");
        }
    }
}

/// A running test session; tears the agent down when dropped.
pub struct AgentSession<'a> {
    harness: &'a mut AgentHarness,
}

impl AgentSession<'_> {
    /// Tears down now and reports failures.
    pub fn finish(self) -> Result<()> {
        self.harness.teardown_agent()
    }
}

impl Deref for AgentSession<'_> {
    type Target = AgentHarness;

    fn deref(&self) -> &AgentHarness {
        self.harness
    }
}

impl DerefMut for AgentSession<'_> {
    fn deref_mut(&mut self) -> &mut AgentHarness {
        self.harness
    }
}

impl Drop for AgentSession<'_> {
    fn drop(&mut self) {
        if self.harness.state == LifecycleState::Idle {
            return;
        }
        if let Err(e) = self.harness.teardown_agent() {
            tracing::warn!(error = %e, "session teardown failed");
        }
    }
}

//! The agent handle and its lifecycle.

use crate::config::{AgentConfig, ConfigLayers};
use crate::control::Control;
use crate::error::{AgentError, Result};
use crate::error_collector::{ErrorCollector, ErrorPolicy, NoticedError};
use crate::events::{events_to_json, Event, EventAggregator};
use crate::rules::{RuleSet, RuleSpec};
use crate::sampler::TransactionSampler;
use crate::service::CollectorService;
use crate::stats::{metrics_to_json, StatsEngine};
use crate::transaction::{FinishedTransaction, PendingError, TransactionState};
use chrono::{DateTime, Utc};
use multiverse_constants::methods;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

static INSTANCE: OnceLock<Agent> = OnceLock::new();

/// Path recorded for errors noticed outside a transaction.
const UNKNOWN_PATH: &str = "Unknown";

/// Where the agent stands with the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// A handshake is due on the next start.
    Pending,
    /// Handshake completed.
    Connected {
        /// Run id assigned by the collector.
        run_id: u64,
    },
    /// The last handshake failed, the collector disconnected us, or the run
    /// was shut down.
    Disconnected,
}

/// Options for [`Agent::manual_start`].
///
/// `sync_startup` and `force_reconnect` override the configured values when
/// set. `settings` are dotted config keys merged into the manual layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// Block until the handshake resolves.
    pub sync_startup: Option<bool>,
    /// Discard an existing connection.
    pub force_reconnect: Option<bool>,
    /// Manual configuration overrides.
    pub settings: BTreeMap<String, Value>,
}

impl StartOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `sync_startup`.
    #[must_use]
    pub fn sync_startup(mut self, value: bool) -> Self {
        self.sync_startup = Some(value);
        self
    }

    /// Sets `force_reconnect`.
    #[must_use]
    pub fn force_reconnect(mut self, value: bool) -> Self {
        self.force_reconnect = Some(value);
        self
    }

    /// Adds a configuration override.
    #[must_use]
    pub fn setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    fn manual_layer(&self) -> BTreeMap<String, Value> {
        let mut layer = self.settings.clone();
        if let Some(sync) = self.sync_startup {
            layer.insert("sync_startup".to_string(), Value::Bool(sync));
        }
        if let Some(force) = self.force_reconnect {
            layer.insert("force_reconnect".to_string(), Value::Bool(force));
        }
        layer
    }
}

#[derive(Debug)]
struct Lifecycle {
    started: bool,
    connect: ConnectState,
    connect_thread: Option<JoinHandle<()>>,
    harvest_started: DateTime<Utc>,
}

#[derive(Debug)]
struct AgentInner {
    config: ConfigLayers,
    service: CollectorService,
    control: Control,
    transaction_rules: RuleSet,
    stats: StatsEngine,
    errors: ErrorCollector,
    sampler: TransactionSampler,
    analytic_events: EventAggregator,
    custom_events: EventAggregator,
    lifecycle: Mutex<Lifecycle>,
    connect_attempts: AtomicU64,
}

/// Handle to one monitoring agent. Clones share the same agent.
#[derive(Debug, Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Returns the process-wide agent, creating it on first use.
    pub fn instance() -> Result<Self> {
        if let Some(agent) = INSTANCE.get() {
            return Ok(agent.clone());
        }
        let agent = Self::new()?;
        Ok(INSTANCE.get_or_init(|| agent).clone())
    }

    /// Creates an agent configured from defaults and the environment.
    pub fn new() -> Result<Self> {
        Self::with_config(AgentConfig::load()?)
    }

    /// Creates an agent whose baseline configuration is `config`.
    pub fn with_config(config: AgentConfig) -> Result<Self> {
        let service = CollectorService::new(&config.host, config.port, config.request_timeout())?;
        Ok(Self {
            inner: Arc::new(AgentInner {
                config: ConfigLayers::new(config),
                service,
                control: Control::new(),
                transaction_rules: RuleSet::new(),
                stats: StatsEngine::new(),
                errors: ErrorCollector::new(),
                sampler: TransactionSampler::new(),
                analytic_events: EventAggregator::new(),
                custom_events: EventAggregator::new(),
                lifecycle: Mutex::new(Lifecycle {
                    started: false,
                    connect: ConnectState::Pending,
                    connect_thread: None,
                    harvest_started: Utc::now(),
                }),
                connect_attempts: AtomicU64::new(0),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Layered configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigLayers {
        &self.inner.config
    }

    /// Collector transport.
    #[must_use]
    pub fn service(&self) -> &CollectorService {
        &self.inner.service
    }

    /// Plugin control state.
    #[must_use]
    pub fn control(&self) -> &Control {
        &self.inner.control
    }

    /// Rules applied to transaction names.
    #[must_use]
    pub fn transaction_rules(&self) -> &RuleSet {
        &self.inner.transaction_rules
    }

    /// Metric aggregation.
    #[must_use]
    pub fn stats_engine(&self) -> &StatsEngine {
        &self.inner.stats
    }

    /// Noticed errors.
    #[must_use]
    pub fn error_collector(&self) -> &ErrorCollector {
        &self.inner.errors
    }

    /// Slow transaction traces.
    #[must_use]
    pub fn transaction_sampler(&self) -> &TransactionSampler {
        &self.inner.sampler
    }

    /// Transaction analytic events.
    #[must_use]
    pub fn analytic_events(&self) -> &EventAggregator {
        &self.inner.analytic_events
    }

    /// Custom events.
    #[must_use]
    pub fn custom_events(&self) -> &EventAggregator {
        &self.inner.custom_events
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts the agent.
    ///
    /// A no-op when already started. With `sync_startup` the connect
    /// handshake has resolved, successfully or not, when this returns;
    /// otherwise it runs on a background thread. A failed handshake leaves
    /// the agent started and [`ConnectState::Disconnected`].
    pub fn manual_start(&self, options: StartOptions) -> Result<()> {
        if self.is_started() {
            tracing::debug!("agent already started");
            return Ok(());
        }
        self.join_connect_thread()?;

        self.inner.config.apply_manual(&options.manual_layer())?;
        let config = self.inner.config.current();
        if !config.agent_enabled {
            tracing::warn!("agent disabled by configuration, not starting");
            return Ok(());
        }

        self.inner.control.init_plugin();
        self.inner.service.set_timeout(config.request_timeout())?;
        self.inner.service.set_license_key(&config.license_key);

        let needs_connect = {
            let mut lifecycle = self.lifecycle();
            lifecycle.started = true;
            if config.force_reconnect {
                lifecycle.connect = ConnectState::Pending;
            }
            config.monitor_mode && !matches!(lifecycle.connect, ConnectState::Connected { .. })
        };
        tracing::info!(
            sync = config.sync_startup,
            force_reconnect = config.force_reconnect,
            "agent started"
        );

        if !needs_connect {
            return Ok(());
        }

        if config.sync_startup {
            self.connect_logged();
        } else {
            let agent = self.clone();
            let handle = std::thread::Builder::new()
                .name("multiverse-connect".to_string())
                .spawn(move || agent.connect_logged())
                .map_err(|e| AgentError::ConnectThread(e.to_string()))?;
            self.lifecycle().connect_thread = Some(handle);
        }
        Ok(())
    }

    /// Performs the preconnect/connect handshake now.
    ///
    /// Applies server-side settings and appends the naming rules the
    /// collector sent. Returns the new run id.
    pub fn connect_now(&self) -> Result<u64> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let config = self.inner.config.current();

        let redirect_host = self.inner.service.preconnect()?;
        let (_, port) = self.inner.service.collector();
        self.inner.service.set_collector(&redirect_host, port);

        let environment = self.inner.control.local_environment();
        let settings = json!({
            "pid": environment.pid,
            "host": environment.hostname,
            "app_name": config.app_names(),
            "language": "rust",
            "agent_version": env!("CARGO_PKG_VERSION"),
            "settings": serde_json::to_value(&config)?,
        });
        let response = self.inner.service.connect(settings)?;
        let run_id = self.inner.service.run_id().unwrap_or_default();

        self.inner.config.apply_server(&response)?;
        self.inner
            .transaction_rules
            .append(rule_specs(&response, "transaction_name_rules")?)?;
        self.inner
            .stats
            .metric_rules()
            .append(rule_specs(&response, "metric_name_rules")?)?;

        let mut lifecycle = self.lifecycle();
        lifecycle.connect = ConnectState::Connected { run_id };
        lifecycle.harvest_started = Utc::now();
        Ok(run_id)
    }

    fn connect_logged(&self) {
        if let Err(e) = self.connect_now() {
            tracing::warn!(error = %e, "agent failed to connect");
            self.lifecycle().connect = ConnectState::Disconnected;
        }
    }

    /// Forces a handshake on the next start.
    pub fn mark_connect_pending(&self) {
        self.lifecycle().connect = ConnectState::Pending;
        self.inner.service.clear_run_id();
    }

    /// Stops the agent, ending the run with the collector if connected.
    ///
    /// Waits for a background handshake first. A no-op when not started.
    /// The agent is stopped even if the `shutdown` call fails.
    pub fn shutdown(&self) -> Result<()> {
        let joined = self.join_connect_thread();

        let was_connected = {
            let mut lifecycle = self.lifecycle();
            if !lifecycle.started {
                return joined;
            }
            lifecycle.started = false;
            let was_connected = matches!(lifecycle.connect, ConnectState::Connected { .. });
            if was_connected {
                lifecycle.connect = ConnectState::Disconnected;
            }
            was_connected
        };

        let sent = if was_connected {
            self.inner.service.shutdown()
        } else {
            Ok(())
        };
        tracing::info!("agent shut down");
        joined.and(sent)
    }

    fn join_connect_thread(&self) -> Result<()> {
        let handle = self.lifecycle().connect_thread.take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| AgentError::ConnectThread("connect thread panicked".to_string())),
            None => Ok(()),
        }
    }

    /// Returns true between a successful start and shutdown.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lifecycle().started
    }

    /// Current connection state.
    #[must_use]
    pub fn connect_state(&self) -> ConnectState {
        self.lifecycle().connect
    }

    /// Run id of the current connection.
    #[must_use]
    pub fn run_id(&self) -> Option<u64> {
        match self.connect_state() {
            ConnectState::Connected { run_id } => Some(run_id),
            _ => None,
        }
    }

    /// Handshakes attempted since this agent was created.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Harvest
    // ------------------------------------------------------------------

    /// Discards everything collected since the last harvest.
    pub fn drop_buffered_data(&self) {
        self.inner.stats.reset();
        self.inner.errors.reset();
        self.inner.sampler.reset();
        self.inner.analytic_events.reset();
        self.inner.custom_events.reset();
        tracing::debug!("buffered agent data dropped");
    }

    /// Sends `metric_data`, then `error_data` and `transaction_sample_data`
    /// when there is something to send.
    ///
    /// Skipped when not connected; buffered data then waits for the next
    /// harvest. Every send is attempted; the first failure is returned.
    pub fn transmit_data(&self) -> Result<()> {
        let Some(run_id) = self.run_id() else {
            tracing::debug!("not connected, skipping data harvest");
            return Ok(());
        };

        let end = Utc::now();
        let start = std::mem::replace(&mut self.lifecycle().harvest_started, end);
        let metrics = self.inner.stats.harvest();
        let mut outcome = self.send(
            methods::METRIC_DATA,
            &json!([run_id, start.timestamp(), end.timestamp(), metrics_to_json(&metrics)]),
        );

        let errors = self.inner.errors.harvest();
        if !errors.is_empty() {
            let errors: Vec<Value> = errors.iter().map(NoticedError::to_json).collect();
            outcome = outcome.and(self.send(methods::ERROR_DATA, &json!([run_id, errors])));
        }

        if let Some(sample) = self.inner.sampler.harvest() {
            outcome = outcome.and(self.send(
                methods::TRANSACTION_SAMPLE_DATA,
                &json!([run_id, [sample.to_json()]]),
            ));
        }

        outcome
    }

    /// Sends `analytic_event_data` and `custom_event_data` when there is
    /// something to send. Skipped when not connected.
    pub fn transmit_event_data(&self) -> Result<()> {
        let Some(run_id) = self.run_id() else {
            tracing::debug!("not connected, skipping event harvest");
            return Ok(());
        };

        let mut outcome = Ok(());
        for (method, aggregator) in [
            (methods::ANALYTIC_EVENT_DATA, &self.inner.analytic_events),
            (methods::CUSTOM_EVENT_DATA, &self.inner.custom_events),
        ] {
            let events = aggregator.harvest();
            if !events.is_empty() {
                outcome = outcome.and(self.send(method, &json!([run_id, events_to_json(&events)])));
            }
        }
        outcome
    }

    fn send(&self, method: &str, payload: &Value) -> Result<()> {
        match self.inner.service.send(method, payload) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(method, error = %e, "harvest send failed");
                if e.is_force_disconnect() {
                    self.lifecycle().connect = ConnectState::Disconnected;
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Instrumentation
    // ------------------------------------------------------------------

    /// Starts a background transaction on this thread.
    pub fn start_transaction(&self, name: &str) {
        TransactionState::tl_start(name, false, None);
    }

    /// Starts a web transaction on this thread.
    pub fn start_web_transaction(&self, name: &str, uri: &str) {
        TransactionState::tl_start(name, true, Some(uri));
    }

    /// Returns true if this thread is inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        TransactionState::tl_in_transaction()
    }

    /// Times `f` as a segment of the current transaction.
    pub fn trace_segment<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        TransactionState::tl_with(|tx| tx.push_segment(name, started, elapsed));
        result
    }

    /// Attaches a user attribute to the current transaction.
    ///
    /// Returns false outside a transaction.
    pub fn add_custom_attribute(&self, key: &str, value: Value) -> bool {
        TransactionState::tl_with(|tx| tx.add_attribute(key, value)).is_some()
    }

    /// Notices an error.
    ///
    /// Inside a transaction the error is held until the transaction finishes
    /// and then reported under its final name. Returns false if the error
    /// was dropped right away.
    pub fn notice_error(&self, class: &str, message: &str, params: Map<String, Value>) -> bool {
        let pending = PendingError {
            timestamp: Utc::now(),
            class: class.to_string(),
            message: message.to_string(),
            params,
        };
        match TransactionState::tl_with(|tx| tx.push_error(pending.clone())) {
            Some(()) => true,
            None => self.notice_pending(UNKNOWN_PATH, pending, &self.inner.config.current()),
        }
    }

    fn notice_pending(&self, path: &str, error: PendingError, config: &AgentConfig) -> bool {
        self.inner.errors.notice(
            NoticedError {
                timestamp: error.timestamp,
                path: path.to_string(),
                message: error.message,
                class: error.class,
                params: error.params,
            },
            &ErrorPolicy::from(&config.error_collector),
        )
    }

    /// Records an unscoped metric value, in seconds.
    pub fn record_metric(&self, name: &str, value: f64) {
        self.inner.stats.record_metric(name, value);
    }

    /// Records a custom event. Returns true if it was kept.
    pub fn record_custom_event(&self, event_type: &str, attributes: Map<String, Value>) -> bool {
        let config = self.inner.config.current();
        if !config.custom_insights_events.enabled {
            return false;
        }
        self.inner.custom_events.record(
            Event::new(event_type).with_user_attributes(attributes),
            config.custom_insights_events.max_samples_stored,
        )
    }

    /// Ends the current transaction and records what it produced.
    ///
    /// Returns the final transaction name, or `None` when no transaction was
    /// running or a naming rule ignored it.
    pub fn finish_transaction(&self) -> Option<String> {
        let finished = TransactionState::tl_finish()?;
        let Some(name) = self
            .inner
            .transaction_rules
            .rename(&finished.metric_name(&finished.name))
        else {
            tracing::debug!(name = %finished.name, "transaction ignored by naming rule");
            return None;
        };

        let config = self.inner.config.current();
        self.record_transaction_metrics(&name, &finished);

        for error in finished.errors.iter().cloned() {
            self.notice_pending(&name, error, &config);
        }

        if config.transaction_tracer.enabled {
            let threshold = Duration::try_from_secs_f64(
                config.transaction_tracer.transaction_threshold.max(0.0),
            )
            .unwrap_or(Duration::MAX);
            self.inner.sampler.offer(&name, &finished, threshold);
        }

        if config.analytics_events.enabled {
            let event = Event::new("Transaction")
                .with_intrinsic("name", json!(name))
                .with_intrinsic("duration", json!(finished.duration.as_secs_f64()))
                .with_intrinsic("error", json!(!finished.errors.is_empty()))
                .with_user_attributes(finished.attributes.clone());
            self.inner
                .analytic_events
                .record(event, config.analytics_events.max_samples_stored);
        }

        Some(name)
    }

    fn record_transaction_metrics(&self, name: &str, finished: &FinishedTransaction) {
        let duration = finished.duration.as_secs_f64();
        let stats = &self.inner.stats;
        stats.record_metric(name, duration);
        if finished.web {
            stats.record_metric("HttpDispatcher", duration);
        } else {
            stats.record_metric("OtherTransaction/all", duration);
        }
        for segment in &finished.segments {
            let value = segment.duration.as_secs_f64();
            stats.record_metric(&segment.name, value);
            stats.record_scoped(&segment.name, name, value, value);
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn rule_specs(response: &Map<String, Value>, key: &str) -> Result<Vec<RuleSpec>> {
    match response.get(key) {
        Some(rules) => Ok(serde_json::from_value(rules.clone())?),
        None => Ok(Vec::new()),
    }
}

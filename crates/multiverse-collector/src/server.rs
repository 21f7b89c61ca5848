//! Fake collector lifecycle.

use crate::api::{create_router, AppState};
use crate::call_log::RecordedCall;
use crate::error::{CollectorError, Result};
use crate::responses::StubbedResponse;
use axum::http::StatusCode;
use multiverse_constants::wire::{EPHEMERAL_PORT, LOCAL_HOST};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// How long a stopping listener may take to drain connections.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ServerHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

struct ListenerControl {
    requested_port: u16,
    needs_restart: bool,
    server: Option<ServerHandle>,
}

impl ListenerControl {
    fn is_listening(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| !server.task.is_finished())
    }
}

/// In-process fake collector.
///
/// Construction does not bind anything; call [`start`](Self::start) to bring
/// the listener online. Queries work at any time and return empty results
/// until something was recorded.
///
/// Must be dropped outside of an async context: it owns a tokio runtime.
pub struct FakeCollector {
    state: AppState,
    control: Mutex<ListenerControl>,
    runtime: Runtime,
}

impl FakeCollector {
    /// Creates a collector that will listen on an ephemeral loopback port.
    pub fn new() -> Result<Self> {
        Self::with_port(EPHEMERAL_PORT)
    }

    /// Creates a collector that will listen on `port`.
    pub fn with_port(port: u16) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("fake-collector")
            .enable_all()
            .build()
            .map_err(CollectorError::Runtime)?;

        Ok(Self {
            state: AppState::new(),
            control: Mutex::new(ListenerControl {
                requested_port: port,
                needs_restart: false,
                server: None,
            }),
            runtime,
        })
    }

    /// Clears recorded calls, stubs and simulated latency.
    ///
    /// The listener keeps running.
    pub fn reset(&self) {
        self.state.lock().reset();
        tracing::debug!("fake collector reset");
    }

    /// Brings the listener online.
    ///
    /// A no-op when already listening and no rebinding change is pending.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control();
        if control.is_listening() && !control.needs_restart {
            return Ok(());
        }
        self.stop_locked(&mut control);
        self.spawn_locked(&mut control)
    }

    /// Stops and starts the listener unconditionally.
    pub fn restart(&self) -> Result<()> {
        let mut control = self.control();
        self.stop_locked(&mut control);
        self.spawn_locked(&mut control)
    }

    /// Restarts the listener if [`needs_restart`](Self::needs_restart).
    ///
    /// Returns true if a restart happened.
    pub fn restart_if_needed(&self) -> Result<bool> {
        let mut control = self.control();
        if control.is_listening() && !control.needs_restart {
            return Ok(false);
        }
        self.stop_locked(&mut control);
        self.spawn_locked(&mut control)?;
        Ok(true)
    }

    /// Returns true if the listener is down or must be rebound.
    #[must_use]
    pub fn needs_restart(&self) -> bool {
        let control = self.control();
        !control.is_listening() || control.needs_restart
    }

    /// Stops the listener. Recorded calls are kept.
    pub fn stop(&self) {
        let mut control = self.control();
        self.stop_locked(&mut control);
    }

    /// Returns true if the listener is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control().is_listening()
    }

    /// Requests a different listening port; takes effect on the next
    /// (re)start.
    pub fn set_port(&self, port: u16) {
        let mut control = self.control();
        if control.requested_port != port {
            control.requested_port = port;
            control.needs_restart = true;
        }
    }

    /// Bound port, if listening.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.address().map(|addr| addr.port())
    }

    /// Bound address, if listening.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        let control = self.control();
        if control.is_listening() {
            control.server.as_ref().map(|server| server.addr)
        } else {
            None
        }
    }

    /// `http://host:port`, if listening.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.address().map(|addr| format!("http://{addr}"))
    }

    /// Appends a call to the log as if the agent had made it.
    pub fn record(&self, method: &str, run_id: Option<u64>, payload: Value) {
        self.state.lock().calls.record(method, run_id, payload);
    }

    /// Returns every call made to `method` since the last reset, oldest first.
    #[must_use]
    pub fn calls_for(&self, method: &str) -> Vec<RecordedCall> {
        self.state.lock().calls.calls_for(method)
    }

    /// Returns every call since the last reset, oldest first.
    #[must_use]
    pub fn agent_data(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.all()
    }

    /// Answers `method` with `{"return_value": value}` and `status`.
    pub fn stub(&self, method: &str, value: Value, status: StatusCode) {
        self.install(method, StubbedResponse::Value { status, value });
    }

    /// Answers `method` with an exception body and `status`.
    pub fn stub_exception(&self, method: &str, error_type: &str, message: &str, status: StatusCode) {
        self.install(
            method,
            StubbedResponse::Exception {
                status,
                error_type: error_type.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Delays every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Shared state, for driving the router directly.
    #[must_use]
    pub fn app_state(&self) -> &AppState {
        &self.state
    }

    fn install(&self, method: &str, response: StubbedResponse) {
        tracing::debug!(method, status = %response.status(), "stubbed collector response");
        self.state.lock().stubs.insert(method.to_string(), response);
    }

    fn control(&self) -> MutexGuard<'_, ListenerControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_locked(&self, control: &mut ListenerControl) -> Result<()> {
        let port = control.requested_port;
        let std_listener = std::net::TcpListener::bind((LOCAL_HOST, port))
            .map_err(|source| CollectorError::Bind { port, source })?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?;

        let listener = {
            let _guard = self.runtime.enter();
            tokio::net::TcpListener::from_std(std_listener)?
        };

        self.state.lock().redirect_host = addr.ip().to_string();

        let app = create_router(self.state.clone()).layer(TraceLayer::new_for_http());
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = self.runtime.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        control.server = Some(ServerHandle {
            addr,
            shutdown,
            task,
        });
        control.needs_restart = false;

        tracing::info!(%addr, "fake collector listening");
        Ok(())
    }

    fn stop_locked(&self, control: &mut ListenerControl) {
        let Some(server) = control.server.take() else {
            return;
        };

        let _ = server.shutdown.send(());
        let addr = server.addr;
        let abort = server.task.abort_handle();
        let outcome = self
            .runtime
            .block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, server.task).await });

        match outcome {
            Ok(Ok(Ok(()))) => tracing::info!(%addr, "fake collector stopped"),
            Ok(Ok(Err(e))) => tracing::warn!(%addr, error = %e, "fake collector exited with error"),
            Ok(Err(e)) => tracing::warn!(%addr, error = %e, "fake collector task failed"),
            Err(_) => {
                abort.abort();
                tracing::warn!(%addr, "fake collector did not drain in time, aborted");
            }
        }
    }
}

impl Drop for FakeCollector {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(server) = control.server.take() {
            let _ = server.shutdown.send(());
            server.task.abort();
        }
    }
}

//! Collector transport.
//!
//! Every collector method is a `POST` to the invoke path with the method name,
//! run id and protocol version in the query string and a JSON body. The
//! collector answers `{"return_value": ...}` or `{"exception": {...}}`.

use crate::error::{AgentError, Result};
use multiverse_constants::methods;
use multiverse_constants::wire::{EXCEPTION_KEY, INVOKE_PATH, PROTOCOL_VERSION, RETURN_VALUE_KEY};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Endpoint {
    host: String,
    port: u16,
    run_id: Option<u64>,
}

/// Blocking client for the collector protocol.
#[derive(Debug)]
pub struct CollectorService {
    client: Mutex<reqwest::blocking::Client>,
    endpoint: Mutex<Endpoint>,
    license_key: Mutex<String>,
}

impl CollectorService {
    /// Creates a service pointed at `host:port`.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Mutex::new(build_client(timeout)?),
            endpoint: Mutex::new(Endpoint {
                host: host.to_string(),
                port,
                run_id: None,
            }),
            license_key: Mutex::new(String::new()),
        })
    }

    /// Points the service at a different collector and forgets the run id.
    pub fn set_collector(&self, host: &str, port: u16) {
        let mut endpoint = self.endpoint();
        endpoint.host = host.to_string();
        endpoint.port = port;
        endpoint.run_id = None;
        tracing::debug!(host, port, "collector endpoint changed");
    }

    /// Current `(host, port)`.
    #[must_use]
    pub fn collector(&self) -> (String, u16) {
        let endpoint = self.endpoint();
        (endpoint.host.clone(), endpoint.port)
    }

    /// Run id assigned by the last successful `connect`.
    #[must_use]
    pub fn run_id(&self) -> Option<u64> {
        self.endpoint().run_id
    }

    /// Forgets the run id.
    pub fn clear_run_id(&self) {
        self.endpoint().run_id = None;
    }

    /// Replaces the request timeout.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = build_client(timeout)?;
        Ok(())
    }

    /// Sets the license key sent with every request.
    pub fn set_license_key(&self, key: &str) {
        *self.license_key.lock().unwrap_or_else(PoisonError::into_inner) = key.to_string();
    }

    /// Asks the collector which host to connect to.
    pub fn preconnect(&self) -> Result<String> {
        let value = self.invoke(methods::PRECONNECT, &Value::Array(Vec::new()))?;
        value
            .get("redirect_host")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| AgentError::UnexpectedResponse {
                method: methods::PRECONNECT.to_string(),
                reason: "missing 'redirect_host'".to_string(),
            })
    }

    /// Performs the `connect` call and stores the returned run id.
    ///
    /// Returns the full server-side settings object.
    pub fn connect(&self, settings: Value) -> Result<Map<String, Value>> {
        let value = self.invoke(methods::CONNECT, &Value::Array(vec![settings]))?;
        let Value::Object(response) = value else {
            return Err(AgentError::UnexpectedResponse {
                method: methods::CONNECT.to_string(),
                reason: "return value is not an object".to_string(),
            });
        };
        let run_id = response
            .get("agent_run_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| AgentError::UnexpectedResponse {
                method: methods::CONNECT.to_string(),
                reason: "missing 'agent_run_id'".to_string(),
            })?;

        self.endpoint().run_id = Some(run_id);
        tracing::info!(run_id, "agent connected");
        Ok(response)
    }

    /// Posts a data payload for the current run.
    pub fn send(&self, method: &str, payload: &Value) -> Result<Value> {
        self.invoke(method, payload)
    }

    /// Tells the collector this run is over and forgets the run id.
    pub fn shutdown(&self) -> Result<()> {
        let result = self.invoke(methods::SHUTDOWN, &Value::Array(Vec::new()));
        self.clear_run_id();
        result.map(drop)
    }

    fn invoke(&self, method: &str, payload: &Value) -> Result<Value> {
        let (url, run_id) = {
            let endpoint = self.endpoint();
            (
                format!("http://{}:{}{INVOKE_PATH}", endpoint.host, endpoint.port),
                endpoint.run_id,
            )
        };
        let license_key = self
            .license_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut query = vec![
            ("method", method.to_string()),
            ("protocol_version", PROTOCOL_VERSION.to_string()),
            ("marshal_format", "json".to_string()),
            ("license_key", license_key),
        ];
        if let Some(id) = run_id {
            query.push(("run_id", id.to_string()));
        }

        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::trace!(method, ?run_id, "invoking collector method");
        let transport = |source| AgentError::Transport {
            method: method.to_string(),
            source,
        };
        let response = client
            .post(url)
            .query(&query)
            .json(payload)
            .send()
            .map_err(transport)?;
        let status = response.status();
        let body: Value = response.json().map_err(transport)?;

        parse_envelope(method, status.as_u16(), body)
    }

    fn endpoint(&self) -> std::sync::MutexGuard<'_, Endpoint> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| AgentError::Transport {
            method: "client".to_string(),
            source,
        })
}

fn parse_envelope(method: &str, status: u16, mut body: Value) -> Result<Value> {
    if let Some(exception) = body.get(EXCEPTION_KEY) {
        let field = |key: &str| {
            exception
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Err(AgentError::Collector {
            method: method.to_string(),
            status,
            error_type: field("error_type"),
            message: field("message"),
        });
    }

    if !(200..300).contains(&status) {
        return Err(AgentError::Collector {
            method: method.to_string(),
            status,
            error_type: "HttpError".to_string(),
            message: body.to_string(),
        });
    }

    match body.get_mut(RETURN_VALUE_KEY) {
        Some(value) => Ok(value.take()),
        None => Err(AgentError::UnexpectedResponse {
            method: method.to_string(),
            reason: format!("missing '{RETURN_VALUE_KEY}'"),
        }),
    }
}

//! Lifecycle handshake: `initialize`, `initialized` and `shutdown`.
//!
//! The server accepts one session per connection:
//!
//! 1. **`initialize`** creates a session in the registry, applies the
//!    client's capabilities and answers with server identity, capabilities
//!    and session information.
//! 2. **`initialized`** (notification) moves the session to `Active`.
//! 3. **`shutdown`** cancels in-flight work, waits a bounded time for
//!    pending requests to drain, then terminates the session.
//!
//! The current session is held in a slot guarded by a mutex so two
//! concurrent `initialize` requests cannot both create a session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::methods;
use crate::config::GlobalConfig;
use crate::dispatch::MethodRouter;
use crate::rpc::{ErrorCode, RpcError};
use crate::session::{Session, SessionManager, SessionState};
use crate::{AppError, Result};

const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(50);

/// Context key holding the client's reported name.
pub const CONTEXT_CLIENT_NAME: &str = "clientName";
/// Context key holding the client's reported version.
pub const CONTEXT_CLIENT_VERSION: &str = "clientVersion";
/// Context key holding the protocol version the client requested.
pub const CONTEXT_PROTOCOL_VERSION: &str = "protocolVersion";

/// Static answers and timing for the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    /// `serverInfo.name`.
    pub server_name: String,
    /// `serverInfo.version`.
    pub server_version: String,
    /// Protocol version the server speaks.
    pub protocol_version: String,
    /// Capabilities advertised in the `initialize` result.
    pub capabilities: Value,
    /// Reported as `sessionInfo.timeoutMs`.
    pub session_timeout: Duration,
    /// Upper bound on the `shutdown` drain wait.
    pub drain_timeout: Duration,
    /// How often `shutdown` re-checks the pending count.
    pub drain_poll_interval: Duration,
}

impl HandshakeOptions {
    /// Build options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            server_name: config.server.name.clone(),
            server_version: config.server.version.clone(),
            protocol_version: config.server.protocol_version.clone(),
            capabilities: Value::Object(Map::new()),
            session_timeout: config.session.timeout(),
            drain_timeout: config.session.shutdown_drain(),
            drain_poll_interval: DEFAULT_DRAIN_POLL,
        }
    }

    /// Replace the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// `clientInfo` in `initialize` params.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    #[serde(default)]
    pub name: Option<String>,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// `initialize` params. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client speaks.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Client identity.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
    /// Client capabilities, applied verbatim to the session.
    #[serde(default)]
    pub capabilities: Option<Value>,
}

/// `serverInfo` in the `initialize` result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// `sessionInfo` in the `initialize` result.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Registry ID of the new session.
    pub session_id: String,
    /// Inactivity timeout in milliseconds.
    pub timeout_ms: u64,
    /// Creation time and client identity.
    pub metadata: Value,
}

/// The `initialize` result.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Server protocol version.
    pub protocol_version: String,
    /// Server identity.
    pub server_info: ServerInfo,
    /// Server capabilities.
    pub capabilities: Value,
    /// Session details.
    pub session_info: SessionInfo,
}

/// Handles the three lifecycle methods and owns the current-session slot.
pub struct LifecycleHandler {
    options: HandshakeOptions,
    registry: Arc<SessionManager>,
    current: Mutex<Option<Arc<Session>>>,
}

impl LifecycleHandler {
    /// Create a handler backed by `registry`.
    #[must_use]
    pub fn new(options: HandshakeOptions, registry: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            options,
            registry,
            current: Mutex::new(None),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `initialize`, `initialized` and `shutdown` on `router`.
    pub fn register(self: &Arc<Self>, router: &MethodRouter) {
        let this = Arc::clone(self);
        router.register_method(methods::INITIALIZE, move |params, _cancel| {
            let this = Arc::clone(&this);
            async move { this.initialize(params) }
        });

        let this = Arc::clone(self);
        router.register_method(methods::INITIALIZED, move |_params, _cancel| {
            let this = Arc::clone(&this);
            async move { this.initialized() }
        });

        let this = Arc::clone(self);
        router.register_method(methods::SHUTDOWN, move |_params, cancel| {
            let this = Arc::clone(&this);
            async move { this.shutdown(cancel).await }
        });
    }

    /// The session created by the last successful `initialize`, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.slot().clone()
    }

    /// The current session, provided it is `Initialized` or `Active`.
    ///
    /// # Errors
    ///
    /// Returns a `SessionNotInitialized` protocol error otherwise.
    pub fn require_session(&self) -> Result<Arc<Session>> {
        match self.current_session() {
            Some(session) if session.is_healthy() => Ok(session),
            Some(session) => Err(AppError::Protocol(RpcError::new(
                ErrorCode::SessionNotInitialized,
                Some(format!(
                    "session {} is {}",
                    session.id(),
                    session.state()
                )),
            ))),
            None => Err(AppError::Protocol(RpcError::new(
                ErrorCode::SessionNotInitialized,
                None,
            ))),
        }
    }

    /// Handle `initialize`.
    ///
    /// # Errors
    ///
    /// - `SessionAlreadyInitialized` if a live session exists.
    /// - `InvalidRequest` if the current session is shutting down.
    /// - `InvalidParams` if a params field has the wrong type. Session
    ///   checks come first, so a second `initialize` never reaches this.
    /// - `InternalError` if the session rejects the capabilities.
    pub fn initialize(&self, params: Option<Value>) -> Result<Value> {
        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            return Err(match existing.state() {
                SessionState::ShuttingDown | SessionState::Terminated => {
                    AppError::Protocol(RpcError::invalid_request(format!(
                        "session {} is shutting down",
                        existing.id()
                    )))
                }
                _ => AppError::Protocol(RpcError::new(
                    ErrorCode::SessionAlreadyInitialized,
                    Some(format!("session {} is already initialized", existing.id())),
                )),
            });
        }

        let params = parse_initialize_params(params)?;
        if let Some(requested) = params.protocol_version.as_deref() {
            if requested != self.options.protocol_version {
                warn!(
                    client = requested,
                    server = %self.options.protocol_version,
                    "protocol version mismatch, continuing"
                );
            }
        }

        let session = self.registry.create_session(None)?;
        if let Err(err) = session.initialize(params.capabilities.clone()) {
            error!(session_id = %session.id(), %err, "session initialization failed");
            self.registry.terminate_session(session.id());
            return Err(AppError::Protocol(RpcError::new(
                ErrorCode::InternalError,
                Some(format!("failed to initialize session: {}", err.detail())),
            )));
        }

        let client = params.client_info.unwrap_or_default();
        let mut metadata = Map::new();
        metadata.insert("createdAt".into(), json!(session.created_at().to_rfc3339()));
        if let Some(name) = client.name {
            session.set_context(CONTEXT_CLIENT_NAME, json!(name));
            metadata.insert(CONTEXT_CLIENT_NAME.into(), json!(name));
        }
        if let Some(version) = client.version {
            session.set_context(CONTEXT_CLIENT_VERSION, json!(version));
            metadata.insert(CONTEXT_CLIENT_VERSION.into(), json!(version));
        }
        if let Some(requested) = params.protocol_version {
            session.set_context(CONTEXT_PROTOCOL_VERSION, json!(requested));
        }

        *slot = Some(Arc::clone(&session));
        drop(slot);

        info!(session_id = %session.id(), "session initialized");

        let result = InitializeResult {
            protocol_version: self.options.protocol_version.clone(),
            server_info: ServerInfo {
                name: self.options.server_name.clone(),
                version: self.options.server_version.clone(),
            },
            capabilities: self.options.capabilities.clone(),
            session_info: SessionInfo {
                session_id: session.id().to_owned(),
                timeout_ms: u64::try_from(self.options.session_timeout.as_millis())
                    .unwrap_or(u64::MAX),
                metadata: Value::Object(metadata),
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle `initialized`.
    ///
    /// # Errors
    ///
    /// - `SessionNotInitialized` when no session exists.
    /// - `InvalidRequest` when the session is terminating.
    pub fn initialized(&self) -> Result<Value> {
        let Some(session) = self.current_session() else {
            return Err(AppError::Protocol(RpcError::new(
                ErrorCode::SessionNotInitialized,
                None,
            )));
        };
        if session.is_terminating() {
            return Err(AppError::Protocol(RpcError::invalid_request(format!(
                "session {} is terminating",
                session.id()
            ))));
        }
        session.mark_active();
        info!(session_id = %session.id(), "session active");
        Ok(Value::Null)
    }

    /// Handle `shutdown`.
    ///
    /// Never fails: without a session it answers `success: false`.
    ///
    /// # Errors
    ///
    /// This handler does not return errors; the `Result` matches the
    /// handler signature.
    pub async fn shutdown(&self, cancel: CancellationToken) -> Result<Value> {
        let Some(session) = self.current_session() else {
            return Ok(json!({ "success": false, "message": "No active session" }));
        };

        info!(session_id = %session.id(), pending = session.pending_count(), "session shutting down");
        session.shutdown();

        if self.wait_for_drain(&session, &cancel).await {
            info!(session_id = %session.id(), "pending requests drained");
        } else {
            warn!(
                session_id = %session.id(),
                abandoned = session.pending_count(),
                "drain timeout elapsed, abandoning pending requests"
            );
        }

        self.registry.terminate_session(session.id());
        {
            let mut slot = self.slot();
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &session)) {
                *slot = None;
            }
        }

        Ok(json!({ "success": true, "message": "Session terminated successfully" }))
    }

    async fn wait_for_drain(&self, session: &Session, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + self.options.drain_timeout;
        loop {
            if session.pending_count() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let pause = self.options.drain_poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn parse_initialize_params(params: Option<Value>) -> Result<InitializeParams> {
    match params {
        None | Some(Value::Null) => Ok(InitializeParams::default()),
        Some(value @ Value::Object(_)) => serde_json::from_value(value)
            .map_err(|err| AppError::InvalidParams(format!("invalid initialize params: {err}"))),
        Some(other) => {
            warn!(kind = json_kind(&other), "initialize params are not an object, using defaults");
            Ok(InitializeParams::default())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Server loop.
//!
//! Reads one framed message at a time, classifies it, dispatches requests
//! through the [`MethodRouter`] and writes the response back. Malformed
//! input produces an error response with a null id and the loop keeps
//! going; end of stream or cancellation ends it cleanly.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::acp::{methods, HandshakeOptions, LifecycleHandler};
use crate::config::GlobalConfig;
use crate::dispatch::MethodRouter;
use crate::rpc::{self, ErrorCode, Message, Request, Response};
use crate::session::{RegistryOptions, Session, SessionManager};
use crate::transport::Transport;
use crate::{AppError, Result};

/// Sends server-initiated notifications over the shared transport.
///
/// Writes go through the transport's write lock, so they never interleave
/// with responses.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl Notifier {
    /// Send `method` as a notification.
    ///
    /// # Errors
    ///
    /// Propagates transport write failures.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let body = Message::from(Request::notification(method, params)).to_json()?;
        self.transport.write_message(&body, &self.cancel).await
    }

    /// Send a `session/update` notification for `session_id`.
    ///
    /// # Errors
    ///
    /// Propagates transport write failures.
    pub async fn session_update(&self, session_id: &str, update: Value) -> Result<()> {
        self.notify(
            methods::SESSION_UPDATE,
            Some(json!({ "sessionId": session_id, "update": update })),
        )
        .await
    }
}

/// A single-connection protocol server.
pub struct Server {
    transport: Arc<dyn Transport>,
    router: Arc<MethodRouter>,
    registry: Arc<SessionManager>,
    lifecycle: Arc<LifecycleHandler>,
    cancel: CancellationToken,
}

impl Server {
    /// Assemble a server from prebuilt parts.
    ///
    /// `lifecycle` should already be registered on `router`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<MethodRouter>,
        registry: Arc<SessionManager>,
        lifecycle: Arc<LifecycleHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            router,
            registry,
            lifecycle,
            cancel,
        }
    }

    /// Wire a router, registry and lifecycle handler from `config`.
    ///
    /// The returned server answers the lifecycle methods; further methods
    /// are added through [`router`](Self::router).
    #[must_use]
    pub fn from_config(
        config: &GlobalConfig,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_handshake(
            config,
            HandshakeOptions::from_config(config),
            transport,
            cancel,
        )
    }

    /// Like [`from_config`](Self::from_config) with explicit handshake options.
    #[must_use]
    pub fn with_handshake(
        config: &GlobalConfig,
        handshake: HandshakeOptions,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = SessionManager::new(RegistryOptions::from(&config.session), cancel.child_token());
        let router = Arc::new(MethodRouter::new());
        let lifecycle = LifecycleHandler::new(handshake, Arc::clone(&registry));
        lifecycle.register(&router);
        Self::new(transport, router, registry, lifecycle, cancel)
    }

    /// The method router.
    #[must_use]
    pub fn router(&self) -> &Arc<MethodRouter> {
        &self.router
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionManager> {
        &self.registry
    }

    /// The lifecycle handler.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleHandler> {
        &self.lifecycle
    }

    /// A handle for server-initiated notifications.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        Notifier {
            transport: Arc::clone(&self.transport),
            cancel: self.cancel.clone(),
        }
    }

    /// Run until end of stream, cancellation or a fatal transport error.
    ///
    /// The registry is started before the first read and stopped, and the
    /// transport closed, on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the fatal transport error, if any.
    pub async fn run(&self) -> Result<()> {
        self.registry.start();
        info!(methods = ?self.router.supported_methods(), "server loop started");

        let outcome = self.serve().await;

        self.registry.stop().await;
        if let Err(err) = self.transport.close().await {
            warn!(%err, "transport close failed");
        }
        match &outcome {
            Ok(()) => info!("server loop finished"),
            Err(err) => error!(%err, "server loop failed"),
        }
        outcome
    }

    async fn serve(&self) -> Result<()> {
        loop {
            let raw = match self.transport.read_message(&self.cancel).await {
                Ok(raw) => raw,
                Err(AppError::EndOfStream(reason)) => {
                    info!(reason, "peer closed the stream");
                    return Ok(());
                }
                Err(AppError::Cancelled | AppError::Closed) => {
                    info!("server loop cancelled");
                    return Ok(());
                }
                Err(AppError::Framing(reason)) => {
                    warn!(reason, "discarding malformed frame");
                    let response = Response::error(None, ErrorCode::ParseError, Some(reason), None);
                    if self.send(response).await? {
                        continue;
                    }
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            if let Some(response) = self.handle_message(&raw).await {
                if !self.send(response).await? {
                    return Ok(());
                }
            }
        }
    }

    /// Process one raw message body and produce the reply, if any.
    pub async fn handle_message(&self, raw: &str) -> Option<Response> {
        match rpc::parse(raw) {
            Err(err) => {
                debug!(code = err.code, message = %err.message, "rejecting unparseable message");
                Some(Response::from_error(None, err))
            }
            Ok(Message::Response(response)) => {
                debug!(id = ?response.id, "ignoring response from client");
                None
            }
            Ok(Message::Request(request)) => self.dispatch(request).await,
        }
    }

    async fn dispatch(&self, request: Request) -> Option<Response> {
        let tracked = self.track(&request);
        let cancel = tracked
            .as_ref()
            .map_or_else(|| self.cancel.child_token(), |(_, token)| token.clone());

        let span = info_span!(
            "request",
            method = %request.method,
            request_id = ?request.id,
        );
        let response = self.router.handle(&request, cancel).instrument(span).await;

        let Some((session, _)) = tracked else {
            return response;
        };
        let Some(id) = request.id.as_ref() else {
            return response;
        };
        // An entry already gone from a live session was evicted by the sweep.
        let evicted = !session.complete_pending_request(id) && !session.is_terminating();
        match response {
            Some(response) if evicted && is_cancellation(&response) => {
                warn!(method = %request.method, request_id = %id, "request exceeded its deadline");
                Some(Response::error(
                    response.id,
                    ErrorCode::Timeout,
                    Some(format!("request {id} exceeded the request timeout")),
                    None,
                ))
            }
            other => other,
        }
    }

    /// Register a non-lifecycle request with the current healthy session.
    fn track(&self, request: &Request) -> Option<(Arc<Session>, CancellationToken)> {
        if methods::is_lifecycle(&request.method) {
            return None;
        }
        let session = self.lifecycle.current_session()?;
        if !session.is_healthy() {
            return None;
        }
        session.record_activity();
        let token = session.add_pending_request(request.id.clone(), &request.method)?;
        Some((session, token))
    }

    /// Write a response. `Ok(false)` means the loop should stop quietly.
    async fn send(&self, response: Response) -> Result<bool> {
        let body = Message::from(response).to_json()?;
        match self.transport.write_message(&body, &self.cancel).await {
            Ok(()) => Ok(true),
            Err(AppError::Cancelled | AppError::Closed) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn is_cancellation(response: &Response) -> bool {
    response
        .error
        .as_ref()
        .is_some_and(|error| error.code == ErrorCode::Cancelled.code())
}

//! Method dispatch engine.
//!
//! [`MethodRouter`] maps method names to async handlers. It is agnostic
//! about `params`: each handler receives the raw [`Value`] and performs its
//! own typed extraction. Handler failures are converted into JSON-RPC error
//! responses here and never propagate further; for notifications they are
//! logged and swallowed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::{ErrorCode, Request, Response, RpcError};
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Type-erased async method handler.
pub type MethodHandler =
    Arc<dyn Fn(Option<Value>, CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Instrumentation around handler invocation.
///
/// Both methods default to no-ops.
pub trait DispatchHook: Send + Sync {
    /// Runs before lookup. Returning a response skips the registered handler.
    fn before(&self, _request: &Request) -> Option<Response> {
        None
    }

    /// Runs after the response (if any) has been produced.
    fn after(&self, _request: &Request, _response: Option<&Response>) {}
}

/// Registry of method handlers.
#[derive(Default)]
pub struct MethodRouter {
    handlers: RwLock<HashMap<String, MethodHandler>>,
    hooks: RwLock<Vec<Arc<dyn DispatchHook>>>,
}

impl MethodRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous registration.
    pub fn register_method<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let erased: MethodHandler = Arc::new(move |params, cancel| Box::pin(handler(params, cancel)));
        let name = name.into();
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), erased)
            .is_some();
        if replaced {
            debug!(method = %name, "dispatch: handler replaced");
        }
    }

    /// Append a hook; hooks run in registration order.
    pub fn add_hook(&self, hook: Arc<dyn DispatchHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Whether a handler is registered for `name`.
    #[must_use]
    pub fn supports_method(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn supported_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Route `request` to its handler.
    ///
    /// Returns `None` for every notification, whatever the outcome.
    pub async fn handle(&self, request: &Request, cancel: CancellationToken) -> Option<Response> {
        let hooks: Vec<Arc<dyn DispatchHook>> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let response = match hooks.iter().find_map(|hook| hook.before(request)) {
            Some(short_circuit) => (!request.is_notification()).then_some(short_circuit),
            None => self.invoke(request, cancel).await,
        };

        for hook in &hooks {
            hook.after(request, response.as_ref());
        }
        response
    }

    async fn invoke(&self, request: &Request, cancel: CancellationToken) -> Option<Response> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.method)
            .cloned();

        let Some(handler) = handler else {
            if request.is_notification() {
                debug!(method = %request.method, "dispatch: unknown notification ignored");
                return None;
            }
            return Some(Response::error(
                request.id.clone(),
                ErrorCode::MethodNotFound,
                Some(format!("Method not found: {}", request.method)),
                None,
            ));
        };

        let outcome = handler(request.params.clone(), cancel).await;

        match outcome {
            Ok(result) => (!request.is_notification())
                .then(|| Response::success(request.id.clone(), result)),
            Err(err) if request.is_notification() => {
                warn!(method = %request.method, error = %err, "dispatch: notification handler failed");
                None
            }
            Err(err) => {
                debug!(method = %request.method, error = %err, "dispatch: handler failed");
                Some(Response::from_error(request.id.clone(), to_rpc_error(err)))
            }
        }
    }
}

/// Map a handler failure onto the JSON-RPC error taxonomy.
///
/// Cancellation, timeouts and argument errors keep their own codes, explicit
/// protocol errors pass through verbatim, and everything else becomes
/// `InternalError` carrying the underlying message.
#[must_use]
pub fn to_rpc_error(err: AppError) -> RpcError {
    match err {
        AppError::Protocol(rpc) => rpc,
        AppError::Cancelled => RpcError::new(ErrorCode::Cancelled, None),
        AppError::Timeout(msg) => RpcError::new(ErrorCode::Timeout, Some(msg)),
        AppError::InvalidParams(msg) => RpcError::new(ErrorCode::InvalidParams, Some(msg)),
        other => RpcError::new(ErrorCode::InternalError, Some(other.detail())),
    }
}

//! The session entity.
//!
//! All mutable state lives behind a single mutex so a state transition and
//! the event it emits are observed atomically. Observers receive events over
//! unbounded channels; a closed channel is dropped on the next emit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pending::{elapsed_since, PendingRequest};
use super::state::{SessionEvent, SessionState};
use crate::rpc::RequestId;
use crate::{AppError, Result};

/// Handle returned by [`Session::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    state: SessionState,
    last_activity_at: Option<DateTime<Utc>>,
    capabilities: Option<Map<String, Value>>,
    context: HashMap<String, Value>,
    pending: HashMap<RequestId, PendingRequest>,
    observers: Vec<(SubscriptionId, mpsc::UnboundedSender<SessionEvent>)>,
    next_subscription: u64,
}

impl Inner {
    fn emit(&mut self, event: &SessionEvent) {
        self.observers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

/// A protocol session between the server and its connected client.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the `Created` state.
    ///
    /// `cancel` becomes the session's own token; pending requests derive
    /// child tokens from it.
    #[must_use]
    pub fn new(id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            cancel,
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                last_activity_at: None,
                capabilities: None,
                context: HashMap::new(),
                pending: HashMap::new(),
                observers: Vec::new(),
                next_subscription: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, new: SessionState) {
        let old = inner.state;
        if old == new {
            return;
        }
        inner.state = new;
        debug!(session_id = %self.id, %old, %new, "session state changed");
        inner.emit(&SessionEvent::StateChanged {
            session_id: self.id.clone(),
            old,
            new,
        });
    }

    /// Unique session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last recorded activity, if any.
    #[must_use]
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_activity_at
    }

    /// Time since the last activity, falling back to creation time.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        elapsed_since(self.last_activity_at().unwrap_or(self.created_at))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// `Initialized` or `Active`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    /// `ShuttingDown`, `Terminated` or `Faulted`.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.state().is_terminating()
    }

    /// Client capabilities recorded by [`initialize`](Self::initialize).
    #[must_use]
    pub fn capabilities(&self) -> Option<Map<String, Value>> {
        self.lock().capabilities.clone()
    }

    /// The session-scoped cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply client capabilities and move `Created → Initialized`.
    ///
    /// # Errors
    ///
    /// - `AppError::Session` if the session is not in `Created`; the state is
    ///   left unchanged.
    /// - `AppError::InvalidParams` if `capabilities` is present but not a JSON
    ///   object; the session moves to `Faulted`.
    pub fn initialize(&self, capabilities: Option<Value>) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Created {
            return Err(AppError::Session(format!(
                "cannot initialize session {} in state {}",
                self.id, inner.state
            )));
        }

        let capabilities = match capabilities {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                warn!(session_id = %self.id, "capabilities are not an object, faulting session");
                self.transition(&mut inner, SessionState::Faulted);
                self.cancel.cancel();
                return Err(AppError::InvalidParams(
                    "capabilities must be a JSON object".into(),
                ));
            }
        };

        self.transition(&mut inner, SessionState::Initializing);
        inner.capabilities = Some(capabilities);
        self.transition(&mut inner, SessionState::Initialized);
        Ok(())
    }

    /// Record activity and advance `Initialized → Active`.
    pub fn mark_active(&self) {
        let mut inner = self.lock();
        inner.last_activity_at = Some(Utc::now());
        if inner.state == SessionState::Initialized {
            self.transition(&mut inner, SessionState::Active);
        }
    }

    /// Refresh the activity timestamp without touching state.
    pub fn record_activity(&self) {
        self.lock().last_activity_at = Some(Utc::now());
    }

    /// Begin shutdown: cancel all pending requests and the session token,
    /// then move to `ShuttingDown`.
    ///
    /// Pending entries stay registered so callers can wait for their
    /// handlers to complete. No-op once terminal.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        for pending in inner.pending.values() {
            pending.cancel.cancel();
        }
        self.cancel.cancel();
        self.transition(&mut inner, SessionState::ShuttingDown);
    }

    /// Move to `Terminated`. Idempotent once terminal.
    pub fn terminate(&self) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        self.cancel.cancel();
        self.transition(&mut inner, SessionState::Terminated);
    }

    /// Move to `Faulted`. Idempotent once terminal.
    pub fn fault(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        warn!(session_id = %self.id, reason, "session faulted");
        self.cancel.cancel();
        self.transition(&mut inner, SessionState::Faulted);
    }

    /// Track an in-flight request.
    ///
    /// Returns the request's cancellation token (a child of the session
    /// token). Returns `None` for notifications and for IDs that are already
    /// pending; a duplicate leaves the existing entry untouched and emits
    /// [`SessionEvent::DuplicateRequest`].
    pub fn add_pending_request(
        &self,
        id: Option<RequestId>,
        method: &str,
    ) -> Option<CancellationToken> {
        let id = id?;
        let mut inner = self.lock();
        if inner.pending.contains_key(&id) {
            warn!(session_id = %self.id, request_id = %id, method, "duplicate request id, not tracked");
            inner.emit(&SessionEvent::DuplicateRequest {
                session_id: self.id.clone(),
                request_id: id,
                method: method.to_owned(),
            });
            return None;
        }
        let pending = PendingRequest::new(id.clone(), method, &self.cancel);
        let token = pending.cancel.clone();
        inner.pending.insert(id, pending);
        Some(token)
    }

    /// Remove a pending request. Returns whether it was present.
    pub fn complete_pending_request(&self, id: &RequestId) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    /// Cancel one pending request without affecting its siblings.
    ///
    /// The entry stays registered until its handler completes.
    pub fn cancel_pending_request(&self, id: &RequestId) -> bool {
        match self.lock().pending.get(id) {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether `id` is currently pending.
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Cancel and evict every pending request older than `timeout`.
    ///
    /// Emits [`SessionEvent::RequestTimedOut`] per eviction and returns the
    /// number evicted.
    pub fn check_timeouts(&self, timeout: Duration) -> usize {
        let mut inner = self.lock();
        let expired: Vec<(RequestId, Duration)> = inner
            .pending
            .values()
            .map(|pending| (pending.id.clone(), pending.age()))
            .filter(|(_, age)| *age > timeout)
            .collect();

        for (id, elapsed) in &expired {
            let Some(pending) = inner.pending.remove(id) else {
                continue;
            };
            pending.cancel.cancel();
            info!(
                session_id = %self.id,
                request_id = %id,
                method = %pending.method,
                elapsed_ms = elapsed.as_millis(),
                "pending request timed out"
            );
            inner.emit(&SessionEvent::RequestTimedOut {
                session_id: self.id.clone(),
                request_id: id.clone(),
                method: pending.method,
                elapsed: *elapsed,
            });
        }
        expired.len()
    }

    /// Store a context value, replacing any previous one.
    pub fn set_context(&self, key: impl Into<String>, value: Value) {
        self.lock().context.insert(key.into(), value);
    }

    /// Fetch a context value.
    #[must_use]
    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.lock().context.get(key).cloned()
    }

    /// Remove a context value, returning it.
    pub fn remove_context(&self, key: &str) -> Option<Value> {
        self.lock().context.remove(key)
    }

    /// Subscribe to this session's events.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.attach_observer(tx), rx)
    }

    /// Forward this session's events into an existing channel.
    pub fn attach_observer(&self, tx: mpsc::UnboundedSender<SessionEvent>) -> SubscriptionId {
        let mut inner = self.lock();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner.observers.push((id, tx));
        id
    }

    /// Drop a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(sub, _)| *sub != id);
        inner.observers.len() != before
    }

    /// Release everything the session holds: cancel its token and all
    /// pending requests, then clear pending entries and observers.
    pub fn dispose(&self) {
        self.cancel.cancel();
        let mut inner = self.lock();
        for (_, pending) in inner.pending.drain() {
            pending.cancel.cancel();
        }
        inner.observers.clear();
    }
}

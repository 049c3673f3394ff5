//! Session registry.
//!
//! Owns every live [`Session`], evicts idle ones on a periodic sweep, and
//! removes sessions that reach a terminal state on their own. Session state
//! events are forwarded over a shared channel to a pump task; registry-level
//! events are published on a broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entity::{Session, SubscriptionId};
use super::state::SessionEvent;
use crate::config::SessionConfig;
use crate::{AppError, Result};

const EVENT_CAPACITY: usize = 64;
const DRAIN_POLL: Duration = Duration::from_millis(25);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Timing knobs for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Inactivity after which a session is evicted.
    pub session_timeout: Duration,
    /// Age after which a pending request is cancelled.
    pub request_timeout: Duration,
    /// Sweep period. Values below one millisecond are raised to it.
    pub sweep_interval: Duration,
    /// Bound on [`SessionManager::stop`] waiting for sessions to drain.
    pub stop_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for RegistryOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            session_timeout: config.timeout(),
            request_timeout: config.request_timeout(),
            sweep_interval: config.sweep_interval(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Registry-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A session was registered.
    Created {
        /// New session ID.
        session_id: String,
    },
    /// A session exceeded the inactivity timeout.
    TimedOut {
        /// Evicted session ID.
        session_id: String,
        /// How long it had been idle.
        idle: Duration,
    },
    /// A session was removed from the registry.
    Terminated {
        /// Removed session ID.
        session_id: String,
    },
}

struct Entry {
    session: Arc<Session>,
    subscription: SubscriptionId,
}

struct BackgroundTasks {
    stop: CancellationToken,
    sweep: JoinHandle<()>,
    pump: JoinHandle<mpsc::UnboundedReceiver<SessionEvent>>,
}

/// Thread-safe collection of live sessions.
pub struct SessionManager {
    options: RegistryOptions,
    cancel: CancellationToken,
    sessions: Mutex<HashMap<String, Entry>>,
    events: broadcast::Sender<RegistryEvent>,
    state_tx: mpsc::UnboundedSender<SessionEvent>,
    state_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl SessionManager {
    /// Create a registry. Session tokens derive from `cancel`.
    #[must_use]
    pub fn new(options: RegistryOptions, cancel: CancellationToken) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            options,
            cancel,
            sessions: Mutex::new(HashMap::new()),
            events,
            state_tx,
            state_rx: Mutex::new(Some(state_rx)),
            watchers: Mutex::new(Vec::new()),
            tasks: Mutex::new(None),
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry timing.
    #[must_use]
    pub fn options(&self) -> RegistryOptions {
        self.options
    }

    /// Subscribe to registry events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Receive the events of every session created from now on.
    ///
    /// The observer is attached when the session is registered, so the
    /// stream starts with the session's first transition.
    #[must_use]
    pub fn watch_sessions(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Register a new session. A fresh UUID is generated when `id` is `None`
    /// or empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` if a session with `id` is registered.
    pub fn create_session(&self, id: Option<String>) -> Result<Arc<Session>> {
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let session = {
            let mut sessions = self.sessions();
            if sessions.contains_key(&id) {
                return Err(AppError::AlreadyExists(format!("session {id}")));
            }
            let session = Arc::new(Session::new(id.clone(), self.cancel.child_token()));
            let subscription = session.attach_observer(self.state_tx.clone());
            let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.retain(|tx| !tx.is_closed());
            for tx in watchers.iter() {
                session.attach_observer(tx.clone());
            }
            drop(watchers);
            sessions.insert(
                id.clone(),
                Entry {
                    session: Arc::clone(&session),
                    subscription,
                },
            );
            session
        };

        info!(session_id = %id, "session created");
        self.publish(RegistryEvent::Created { session_id: id });
        Ok(session)
    }

    /// Look up a session.
    #[must_use]
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions().get(id).map(|entry| Arc::clone(&entry.session))
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// IDs of registered sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }

    fn detach(&self, id: &str) -> Option<Entry> {
        let entry = self.sessions().remove(id)?;
        entry.session.unsubscribe(entry.subscription);
        Some(entry)
    }

    fn finish(&self, entry: &Entry) {
        entry.session.terminate();
        let session_id = entry.session.id().to_owned();
        info!(session_id = %session_id, "session removed");
        self.publish(RegistryEvent::Terminated { session_id });
        entry.session.dispose();
    }

    /// Remove, terminate and dispose a session. Returns `false` if it was
    /// not registered.
    pub fn terminate_session(&self, id: &str) -> bool {
        match self.detach(id) {
            Some(entry) => {
                self.finish(&entry);
                true
            }
            None => false,
        }
    }

    /// Evict sessions idle beyond the session timeout or already
    /// terminating, and time out stale pending requests on the rest.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_timed_out_sessions(&self) -> usize {
        let snapshot: Vec<Arc<Session>> = self
            .sessions()
            .values()
            .map(|entry| Arc::clone(&entry.session))
            .collect();

        let mut expired = Vec::new();
        for session in snapshot {
            if session.is_terminating() {
                expired.push((session, None));
                continue;
            }
            let idle = session.idle_for();
            if idle > self.options.session_timeout {
                expired.push((session, Some(idle)));
            } else {
                let evicted = session.check_timeouts(self.options.request_timeout);
                if evicted > 0 {
                    debug!(session_id = %session.id(), evicted, "pending requests timed out");
                }
            }
        }

        let mut removed = 0;
        for (session, idle) in expired {
            let Some(entry) = self.detach(session.id()) else {
                continue;
            };
            if let Some(idle) = idle {
                warn!(session_id = %session.id(), idle_secs = idle.as_secs(), "session timed out");
                self.publish(RegistryEvent::TimedOut {
                    session_id: session.id().to_owned(),
                    idle,
                });
            }
            self.finish(&entry);
            removed += 1;
        }
        removed
    }

    fn on_session_event(&self, event: &SessionEvent) {
        if let SessionEvent::StateChanged {
            session_id, new, ..
        } = event
        {
            if new.is_terminal() {
                if let Some(entry) = self.detach(session_id) {
                    debug!(session_id = %session_id, state = %new, "session reached terminal state");
                    self.finish(&entry);
                }
            }
        }
    }

    /// Start the sweep and event pump. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_some() {
            return;
        }
        let Some(rx) = self
            .state_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let period = if self.options.sweep_interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = self.options.sweep_interval.as_millis(),
                "sweep interval too small, using 1 ms"
            );
            MIN_SWEEP_INTERVAL
        } else {
            self.options.sweep_interval
        };

        let stop = self.cancel.child_token();
        let sweep = spawn_sweep_task(Arc::downgrade(self), period, stop.clone());
        let pump = spawn_event_pump(Arc::downgrade(self), rx, stop.clone());
        *tasks = Some(BackgroundTasks { stop, sweep, pump });
        info!(
            sweep_ms = period.as_millis(),
            "session registry started"
        );
    }

    /// Stop background work and terminate every session.
    ///
    /// Waits up to the configured stop timeout for the registry to empty.
    pub async fn stop(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.stop.cancel();
            if let Err(err) = tasks.sweep.await {
                warn!(%err, "session sweep task failed");
            }
            match tasks.pump.await {
                Ok(rx) => {
                    *self.state_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
                }
                Err(err) => warn!(%err, "session event pump failed"),
            }
        }

        for id in self.session_ids() {
            self.terminate_session(&id);
        }

        let deadline = Instant::now() + self.options.stop_timeout;
        while self.session_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let remaining = self.session_count();
        if remaining > 0 {
            warn!(remaining, "session registry stopped with sessions still registered");
        } else {
            info!("session registry stopped");
        }
    }
}

fn spawn_sweep_task(
    manager: Weak<SessionManager>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    debug!("session sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    let removed = manager.cleanup_timed_out_sessions();
                    if removed > 0 {
                        info!(removed, "session sweep evicted sessions");
                    }
                }
            }
        }
    })
}

fn spawn_event_pump(
    manager: Weak<SessionManager>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    stop: CancellationToken,
) -> JoinHandle<mpsc::UnboundedReceiver<SessionEvent>> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                event = rx.recv() => {
                    let (Some(event), Some(manager)) = (event, manager.upgrade()) else {
                        break;
                    };
                    manager.on_session_event(&event);
                }
            }
        }
        rx
    })
}

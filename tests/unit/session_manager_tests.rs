//! Unit tests for the session registry: creation, lookup, termination,
//! the timeout sweep and automatic removal of terminal sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use acp_engine::rpc::RequestId;
use acp_engine::session::{
    RegistryEvent, RegistryOptions, SessionEvent, SessionManager, SessionState,
};
use acp_engine::AppError;

fn options(session_timeout: Duration) -> RegistryOptions {
    RegistryOptions {
        session_timeout,
        request_timeout: Duration::from_secs(60),
        sweep_interval: Duration::from_millis(20),
        stop_timeout: Duration::from_millis(200),
    }
}

fn registry() -> Arc<SessionManager> {
    SessionManager::new(options(Duration::from_secs(60)), CancellationToken::new())
}

fn drain(rx: &mut broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}

// ── Creation and lookup ─────────────────────────────────────────────────────

/// Sessions get unique generated IDs and are retrievable.
#[test]
fn create_and_get() {
    let registry = registry();
    let a = registry.create_session(None).expect("a");
    let b = registry.create_session(None).expect("b");

    assert_ne!(a.id(), b.id());
    assert_eq!(a.state(), SessionState::Created);
    assert_eq!(registry.session_count(), 2);
    assert!(Arc::ptr_eq(&registry.get_session(a.id()).expect("lookup"), &a));
    assert!(registry.get_session("missing").is_none());
}

/// An explicit ID that is already registered is rejected.
#[test]
fn duplicate_explicit_id_is_rejected() {
    let registry = registry();
    registry.create_session(Some("fixed".into())).expect("first");

    let err = registry.create_session(Some("fixed".into())).unwrap_err();

    assert!(matches!(err, AppError::AlreadyExists(_)));
    assert_eq!(registry.session_count(), 1);
}

/// Session tokens derive from the registry token.
#[test]
fn registry_cancellation_reaches_sessions() {
    let root = CancellationToken::new();
    let registry = SessionManager::new(options(Duration::from_secs(60)), root.clone());
    let session = registry.create_session(None).expect("create");

    root.cancel();

    assert!(session.cancellation_token().is_cancelled());
}

// ── Termination ─────────────────────────────────────────────────────────────

/// Termination removes, terminates and disposes; a second call is a no-op.
#[test]
fn terminate_session_disposes() {
    let registry = registry();
    let mut events = registry.subscribe();
    let session = registry.create_session(Some("t".into())).expect("create");
    session
        .add_pending_request(Some(RequestId::Number(1)), "m")
        .expect("tracked");

    assert!(registry.terminate_session("t"));
    assert!(!registry.terminate_session("t"));

    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(session.pending_count(), 0);
    assert!(registry.get_session("t").is_none());
    assert_eq!(
        drain(&mut events),
        vec![
            RegistryEvent::Created { session_id: "t".into() },
            RegistryEvent::Terminated { session_id: "t".into() },
        ]
    );
}

// ── Sweep ───────────────────────────────────────────────────────────────────

/// An idle session is evicted with exactly one timeout event; a fresh one
/// survives.
#[tokio::test]
async fn sweep_evicts_idle_sessions() {
    let registry = SessionManager::new(options(Duration::from_millis(40)), CancellationToken::new());
    let mut events = registry.subscribe();
    let idle = registry.create_session(Some("idle".into())).expect("idle");

    tokio::time::sleep(Duration::from_millis(60)).await;
    let fresh = registry.create_session(Some("fresh".into())).expect("fresh");

    assert_eq!(registry.cleanup_timed_out_sessions(), 1);
    assert_eq!(registry.cleanup_timed_out_sessions(), 0);

    assert_eq!(idle.state(), SessionState::Terminated);
    assert_eq!(fresh.state(), SessionState::Created);
    let timeouts: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, RegistryEvent::TimedOut { .. }))
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert!(matches!(
        &timeouts[0],
        RegistryEvent::TimedOut { session_id, .. } if session_id == "idle"
    ));
}

/// Recent activity keeps a session alive past its creation age.
#[tokio::test]
async fn activity_defers_eviction() {
    let registry = SessionManager::new(options(Duration::from_millis(40)), CancellationToken::new());
    let session = registry.create_session(None).expect("create");

    tokio::time::sleep(Duration::from_millis(60)).await;
    session.record_activity();

    assert_eq!(registry.cleanup_timed_out_sessions(), 0);
    assert_eq!(registry.session_count(), 1);
}

/// Already-terminating sessions are removed without a timeout event.
#[test]
fn terminating_sessions_are_swept_quietly() {
    let registry = registry();
    let mut events = registry.subscribe();
    let session = registry.create_session(None).expect("create");
    session.initialize(None).expect("initialize");
    session.shutdown();

    assert_eq!(registry.cleanup_timed_out_sessions(), 1);
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, RegistryEvent::TimedOut { .. })));
}

/// The sweep also times out stale pending requests of live sessions.
#[tokio::test]
async fn sweep_times_out_pending_requests() {
    let registry = SessionManager::new(
        RegistryOptions {
            request_timeout: Duration::from_millis(10),
            ..options(Duration::from_secs(60))
        },
        CancellationToken::new(),
    );
    let session = registry.create_session(None).expect("create");
    let token = session
        .add_pending_request(Some(RequestId::Number(1)), "slow")
        .expect("tracked");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(registry.cleanup_timed_out_sessions(), 0);

    assert!(token.is_cancelled());
    assert_eq!(session.pending_count(), 0);
}

// ── Background tasks ────────────────────────────────────────────────────────

/// The periodic sweep runs once started.
#[tokio::test]
async fn started_registry_sweeps_periodically() {
    let registry = SessionManager::new(options(Duration::from_millis(30)), CancellationToken::new());
    registry.start();
    registry.start();
    registry.create_session(None).expect("create");

    wait_until(|| registry.session_count() == 0).await;
    registry.stop().await;
}

/// A zero sweep interval is raised to the minimum instead of failing the
/// sweep task.
#[tokio::test]
async fn zero_sweep_interval_still_sweeps() {
    let registry = SessionManager::new(
        RegistryOptions {
            sweep_interval: Duration::ZERO,
            ..options(Duration::from_millis(30))
        },
        CancellationToken::new(),
    );
    registry.start();
    registry.create_session(None).expect("create");

    wait_until(|| registry.session_count() == 0).await;
    registry.stop().await;
}

/// Session watchers see every session registered after they subscribe.
#[tokio::test]
async fn watchers_receive_session_events() {
    let registry = registry();
    let early = registry.create_session(Some("early".into())).expect("early");
    let mut watch = registry.watch_sessions();
    let late = registry.create_session(Some("late".into())).expect("late");

    early.terminate();
    late.terminate();

    let event = watch.try_recv().expect("event");
    assert_eq!(
        event,
        SessionEvent::StateChanged {
            session_id: "late".into(),
            old: SessionState::Created,
            new: SessionState::Terminated,
        }
    );
    assert!(watch.try_recv().is_err());
}

/// A session that faults on its own leaves the registry.
#[tokio::test]
async fn faulted_sessions_are_removed_automatically() {
    let registry = registry();
    registry.start();
    let mut events = registry.subscribe();
    let session = registry.create_session(Some("f".into())).expect("create");

    session.fault("peer vanished");

    wait_until(|| registry.get_session("f").is_none()).await;
    wait_until(|| {
        drain(&mut events)
            .iter()
            .any(|event| matches!(event, RegistryEvent::Terminated { session_id } if session_id == "f"))
    })
    .await;
    registry.stop().await;
}

/// Stopping terminates every session and can be followed by a restart.
#[tokio::test]
async fn stop_terminates_everything() {
    let registry = registry();
    registry.start();
    let a = registry.create_session(None).expect("a");
    let b = registry.create_session(None).expect("b");

    registry.stop().await;

    assert_eq!(registry.session_count(), 0);
    assert_eq!(a.state(), SessionState::Terminated);
    assert_eq!(b.state(), SessionState::Terminated);

    registry.start();
    let c = registry.create_session(None).expect("c");
    c.fault("boom");
    wait_until(|| registry.session_count() == 0).await;
    registry.stop().await;
}

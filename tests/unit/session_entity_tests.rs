//! Unit tests for the session state machine and pending-request tracking.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use acp_engine::rpc::RequestId;
use acp_engine::session::{Session, SessionEvent, SessionState};
use acp_engine::AppError;

fn new_session() -> Session {
    Session::new("session-1", CancellationToken::new())
}

fn drain_transitions(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<(SessionState, SessionState)> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::StateChanged { old, new, .. } = event {
            seen.push((old, new));
        }
    }
    seen
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

/// `initialize` then `mark_active` walks the full happy path and emits one
/// event per transition, in order.
#[test]
fn happy_path_emits_ordered_transitions() {
    let session = new_session();
    let (_, mut rx) = session.subscribe();

    session
        .initialize(Some(json!({"fs": {"read": true}})))
        .expect("initialize");
    session.mark_active();

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(
        drain_transitions(&mut rx),
        vec![
            (SessionState::Created, SessionState::Initializing),
            (SessionState::Initializing, SessionState::Initialized),
            (SessionState::Initialized, SessionState::Active),
        ]
    );
    assert_eq!(
        session.capabilities().expect("capabilities")["fs"]["read"],
        json!(true)
    );
    assert!(session.last_activity_at().is_some());
}

/// Missing capabilities are recorded as an empty object.
#[test]
fn absent_capabilities_become_empty_map() {
    let session = new_session();
    session.initialize(None).expect("initialize");

    assert_eq!(session.state(), SessionState::Initialized);
    assert!(session.capabilities().expect("capabilities").is_empty());
}

/// A second `initialize` fails and leaves state untouched.
#[test]
fn initialize_twice_fails_without_state_change() {
    let session = new_session();
    session.initialize(None).expect("first initialize");
    let (_, mut rx) = session.subscribe();

    let err = session.initialize(None).unwrap_err();

    assert!(matches!(err, AppError::Session(_)));
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(drain_transitions(&mut rx).is_empty());
}

/// Non-object capabilities fault the session.
#[test]
fn invalid_capabilities_fault_the_session() {
    let token = CancellationToken::new();
    let session = Session::new("s", token.clone());

    let err = session.initialize(Some(json!("not an object"))).unwrap_err();

    assert!(matches!(err, AppError::InvalidParams(_)));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(token.is_cancelled());
}

/// `mark_active` before initialization only records activity.
#[test]
fn mark_active_requires_initialized() {
    let session = new_session();
    session.mark_active();

    assert_eq!(session.state(), SessionState::Created);
    assert!(session.last_activity_at().is_some());
}

/// `terminate` and `fault` are idempotent once terminal.
#[test]
fn terminal_states_are_sticky() {
    let session = new_session();
    session.initialize(None).expect("initialize");
    session.fault("broken pipe");
    session.terminate();
    session.fault("again");

    assert_eq!(session.state(), SessionState::Faulted);
    assert!(session.is_terminating());
    assert!(!session.is_healthy());
}

/// `shutdown` cancels the session token and every pending request but keeps
/// the entries so a drain can observe them.
#[test]
fn shutdown_cancels_pending_work() {
    let session = new_session();
    session.initialize(None).expect("initialize");
    let first = session
        .add_pending_request(Some(RequestId::Number(1)), "tools/call")
        .expect("tracked");
    let second = session
        .add_pending_request(Some(RequestId::Number(2)), "tools/call")
        .expect("tracked");

    session.shutdown();

    assert_eq!(session.state(), SessionState::ShuttingDown);
    assert!(first.is_cancelled() && second.is_cancelled());
    assert!(session.cancellation_token().is_cancelled());
    assert_eq!(session.pending_count(), 2);
}

// ── Pending requests ────────────────────────────────────────────────────────

/// Notifications are never tracked.
#[test]
fn notifications_are_not_tracked() {
    let session = new_session();
    assert!(session.add_pending_request(None, "initialized").is_none());
    assert_eq!(session.pending_count(), 0);
}

/// A duplicate ID is rejected, the original entry survives and an event
/// reports the collision.
#[test]
fn duplicate_ids_are_rejected() {
    let session = new_session();
    let (_, mut rx) = session.subscribe();
    let id = RequestId::from("dup");

    let original = session
        .add_pending_request(Some(id.clone()), "first")
        .expect("tracked");
    assert!(session.add_pending_request(Some(id.clone()), "second").is_none());

    assert_eq!(session.pending_count(), 1);
    assert!(!original.is_cancelled());
    assert!(matches!(
        rx.try_recv(),
        Ok(SessionEvent::DuplicateRequest { method, .. }) if method == "second"
    ));
}

/// Completion removes exactly once.
#[test]
fn complete_removes_entry_once() {
    let session = new_session();
    let id = RequestId::Number(3);
    session.add_pending_request(Some(id.clone()), "m").expect("tracked");

    assert!(session.complete_pending_request(&id));
    assert!(!session.complete_pending_request(&id));
    assert!(!session.is_pending(&id));
}

/// Cancelling one request leaves its siblings running.
#[test]
fn cancel_one_request_only() {
    let session = new_session();
    let a = session.add_pending_request(Some(RequestId::Number(1)), "m").expect("a");
    let b = session.add_pending_request(Some(RequestId::Number(2)), "m").expect("b");

    assert!(session.cancel_pending_request(&RequestId::Number(1)));

    assert!(a.is_cancelled());
    assert!(!b.is_cancelled());
    assert!(!session.cancellation_token().is_cancelled());
}

/// Requests older than the timeout are cancelled, evicted and reported.
#[tokio::test]
async fn stale_requests_time_out() {
    let session = new_session();
    let (_, mut rx) = session.subscribe();
    let stale = session
        .add_pending_request(Some(RequestId::Number(1)), "slow")
        .expect("tracked");

    tokio::time::sleep(Duration::from_millis(30)).await;
    let fresh = session
        .add_pending_request(Some(RequestId::Number(2)), "fast")
        .expect("tracked");

    let evicted = session.check_timeouts(Duration::from_millis(15));

    assert_eq!(evicted, 1);
    assert!(stale.is_cancelled());
    assert!(!fresh.is_cancelled());
    assert_eq!(session.pending_count(), 1);
    assert!(matches!(
        rx.try_recv(),
        Ok(SessionEvent::RequestTimedOut { request_id: RequestId::Number(1), .. })
    ));
}

/// Pending-request tokens derive from the session token.
#[test]
fn session_cancellation_reaches_requests() {
    let parent = CancellationToken::new();
    let session = Session::new("s", parent.clone());
    let token = session
        .add_pending_request(Some(RequestId::Number(1)), "m")
        .expect("tracked");

    parent.cancel();

    assert!(token.is_cancelled());
}

// ── Context and observers ───────────────────────────────────────────────────

/// Context values can be set, replaced and removed.
#[test]
fn context_round_trip() {
    let session = new_session();
    session.set_context("clientName", json!("zed"));
    session.set_context("clientName", json!("helix"));

    assert_eq!(session.get_context("clientName"), Some(json!("helix")));
    assert_eq!(session.remove_context("clientName"), Some(json!("helix")));
    assert_eq!(session.get_context("clientName"), None);
}

/// Unsubscribed observers stop receiving events; dispose clears the rest.
#[test]
fn unsubscribe_and_dispose() {
    let session = new_session();
    let (first_id, mut first) = session.subscribe();
    let (_, mut second) = session.subscribe();

    assert!(session.unsubscribe(first_id));
    assert!(!session.unsubscribe(first_id));
    session.initialize(None).expect("initialize");

    assert!(drain_transitions(&mut first).is_empty());
    assert_eq!(drain_transitions(&mut second).len(), 2);

    session
        .add_pending_request(Some(RequestId::Number(9)), "m")
        .expect("tracked");
    session.dispose();
    assert_eq!(session.pending_count(), 0);
    assert!(session.cancellation_token().is_cancelled());
}

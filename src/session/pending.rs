//! In-flight request bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::rpc::RequestId;

/// A request that entered a session and has not completed yet.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation ID, unique within the owning session.
    pub id: RequestId,
    /// Method being executed.
    pub method: String,
    /// When the request was registered.
    pub started_at: DateTime<Utc>,
    /// Child of the session token; cancelled on timeout or shutdown.
    pub cancel: CancellationToken,
}

impl PendingRequest {
    /// Register a request whose cancellation derives from `parent`.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            id,
            method: method.into(),
            started_at: Utc::now(),
            cancel: parent.child_token(),
        }
    }

    /// Time since registration.
    #[must_use]
    pub fn age(&self) -> Duration {
        elapsed_since(self.started_at)
    }
}

/// Wall-clock time since `at`, clamped to zero for timestamps in the future.
#[must_use]
pub fn elapsed_since(at: DateTime<Utc>) -> Duration {
    (Utc::now() - at).to_std().unwrap_or_default()
}

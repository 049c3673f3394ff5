//! Session lifecycle states and events.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;

use crate::rpc::RequestId;

/// Lifecycle state of a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created by the registry, `initialize` not yet applied.
    Created,
    /// Capabilities are being applied.
    Initializing,
    /// Handshake response sent; waiting for `initialized`.
    Initialized,
    /// Client confirmed the handshake; normal operation.
    Active,
    /// `shutdown` received; pending requests are draining.
    ShuttingDown,
    /// Session ended normally or was evicted.
    Terminated,
    /// Session ended because of an error.
    Faulted,
}

impl SessionState {
    /// `Initialized` or `Active`.
    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Initialized | Self::Active)
    }

    /// `ShuttingDown`, `Terminated` or `Faulted`.
    #[must_use]
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Terminated | Self::Faulted)
    }

    /// `Terminated` or `Faulted`; no further transitions happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Faulted)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Events emitted by a session to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved between states.
    StateChanged {
        /// Session that transitioned.
        session_id: String,
        /// State before the transition.
        old: SessionState,
        /// State after the transition.
        new: SessionState,
    },
    /// A pending request exceeded the request timeout and was cancelled.
    RequestTimedOut {
        /// Owning session.
        session_id: String,
        /// ID of the cancelled request.
        request_id: RequestId,
        /// Method of the cancelled request.
        method: String,
        /// Age of the request when it was evicted.
        elapsed: Duration,
    },
    /// A request arrived with an ID that is already pending; it was not tracked.
    DuplicateRequest {
        /// Owning session.
        session_id: String,
        /// The conflicting ID.
        request_id: RequestId,
        /// Method of the rejected duplicate.
        method: String,
    },
}

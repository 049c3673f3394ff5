//! Session lifecycle.
//!
//! - `state`: [`SessionState`] and [`SessionEvent`].
//! - `pending`: [`PendingRequest`] bookkeeping for in-flight requests.
//! - `entity`: [`Session`], the per-client state machine.
//! - `manager`: [`SessionManager`], the registry with its timeout sweep.

pub mod entity;
pub mod manager;
pub mod pending;
pub mod state;

pub use entity::{Session, SubscriptionId};
pub use manager::{RegistryEvent, RegistryOptions, SessionManager};
pub use pending::PendingRequest;
pub use state::{SessionEvent, SessionState};

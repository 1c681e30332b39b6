//! Session lifecycle and orchestration for courier.
//!
//! A [`Session`] owns one logical connection to a backend account: it drives
//! the status state machine, normalizes the engine's raw event stream into
//! the canonical taxonomy, and populates the session's event channels. The
//! [`SessionManager`] is the registry of sessions: it serializes mutating
//! operations per session name, aggregates every session's events into
//! manager-wide channels, and wires webhook delivery.

pub mod error;
pub mod lock;
pub mod manager;
pub mod normalize;
pub mod session;
pub mod status;
#[cfg(test)]
pub(crate) mod testing;
pub mod timing;
pub mod wait;

pub use {
    error::SessionError,
    lock::{LockTimeout, NamedLocks},
    manager::{ManagerConfig, SessionManager, SessionSnapshot},
    session::Session,
    status::SessionStatus,
    timing::Timings,
};

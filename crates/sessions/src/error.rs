//! Typed failures returned by session operations.

use crate::{lock::LockTimeout, status::SessionStatus};

/// Failure of a directly-invoked session operation.
///
/// Transient connectivity problems never surface here; they are absorbed by
/// the engine's reconnect path and visible only as a `STARTING` status.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A live session already exists under this name.
    #[error("session '{0}' is already started")]
    AlreadyStarted(String),

    /// The session was never created, or has been removed.
    #[error("session '{0}' does not exist")]
    NotFound(String),

    /// The session exists but never reached one of the expected statuses.
    #[error("session '{name}' has status {actual}, expected one of {expected:?}")]
    UnexpectedStatus {
        name: String,
        actual: SessionStatus,
        expected: Vec<SessionStatus>,
    },

    /// The per-name lock could not be acquired in time.
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    /// A webhook configuration referenced an unknown event name.
    #[error(transparent)]
    BadEventFilter(#[from] courier_events::UnknownEventType),

    /// The engine failed a directly-requested operation.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

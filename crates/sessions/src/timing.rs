//! Fixed timing defaults, overridable through [`ManagerConfig`].
//!
//! [`ManagerConfig`]: crate::manager::ManagerConfig

use std::time::Duration;

/// Delays and deadlines used across session orchestration.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// How long to wait for self-identity before emitting `WORKING` anyway.
    pub identity_grace: Duration,
    /// Settle time after a stop, letting engine teardown finish.
    pub stop_settle: Duration,
    /// How long to wait for the engine's own `STOPPED` signal after an
    /// unpair.
    pub unpair_wait: Duration,
    /// Deadline for acquiring a session's named lock.
    pub lock_timeout: Duration,
    /// Poll interval for the wait-until-status helpers.
    pub wait_poll_interval: Duration,
    /// Default deadline for the wait-until-status helpers.
    pub wait_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            identity_grace: Duration::from_secs(2),
            stop_settle: Duration::from_secs(2),
            unpair_wait: Duration::from_secs(2),
            lock_timeout: Duration::from_secs(20),
            wait_poll_interval: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

impl Timings {
    /// Compressed timings for tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            identity_grace: Duration::from_millis(40),
            stop_settle: Duration::from_millis(10),
            unpair_wait: Duration::from_millis(10),
            lock_timeout: Duration::from_millis(500),
            wait_poll_interval: Duration::from_millis(10),
            wait_timeout: Duration::from_millis(300),
        }
    }
}

//! Session status values.

use serde::{Deserialize, Serialize};

/// Lifecycle status of one session.
///
/// Ordered only by the transition rules the session applies; there is no
/// meaningful ordering between the values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Not connected; the resting state.
    Stopped,
    /// Connecting or reconnecting to the backend.
    Starting,
    /// The engine is waiting for the account to be paired.
    ScanQrCode,
    /// Authenticated and serving events.
    Working,
    /// Unrecoverable engine error; will not retry on its own.
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::ScanQrCode => "SCAN_QR_CODE",
            Self::Working => "WORKING",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

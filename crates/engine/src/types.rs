//! Shared engine-facing types.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use courier_webhooks::WebhookConfig;

/// The three supported engine kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Drives a real client through browser automation.
    Browser,
    /// Links into an in-process protocol library.
    Embedded,
    /// Talks to an out-of-process helper over a control socket.
    #[default]
    Sidecar,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Embedded => "embedded",
            Self::Sidecar => "sidecar",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw engine notification, pre-normalization.
///
/// `kind` is whatever tag the engine's wire protocol uses; the session maps
/// it onto the canonical taxonomy and generates its own event ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub session: String,
    #[serde(rename = "event")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// The account's own identity, once the engine has learned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeInfo {
    pub id: String,
    #[serde(default)]
    pub push_name: Option<String>,
}

/// Stored configuration for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// Opaque engine-specific settings, passed through untouched.
    #[serde(default)]
    pub engine_config: Value,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Free-form metadata echoed on webhook deliveries.
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

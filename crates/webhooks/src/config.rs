//! Webhook sink configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry delay growth between attempts to one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay every attempt.
    Constant,
    /// Delay grows by the base delay each attempt.
    Linear,
    /// Delay doubles each attempt.
    #[default]
    Exponential,
}

/// Retry policy for one webhook sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default)]
    pub policy: Backoff,
    /// Retry attempts after the initial send.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay between attempts.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
}

fn default_attempts() -> u32 {
    15
}

fn default_delay_seconds() -> u64 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            policy: Backoff::default(),
            attempts: default_attempts(),
            delay_seconds: default_delay_seconds(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_seconds;
        let seconds = match self.policy {
            Backoff::Constant => base,
            Backoff::Linear => base.saturating_mul(u64::from(attempt) + 1),
            Backoff::Exponential => {
                let shift = attempt.min(16);
                base.saturating_mul(1_u64 << shift)
            },
        };
        // One reconnect window is plenty; don't let exponential growth park
        // a delivery for hours.
        Duration::from_secs(seconds.min(300))
    }
}

/// HMAC signing settings for one sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmacConfig {
    pub key: String,
}

/// Extra header sent with every delivery to one sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomHeader {
    pub name: String,
    pub value: String,
}

/// One configured HTTP sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    /// Event names to deliver; may contain the `*` wildcard.
    #[serde(default = "default_events")]
    pub events: Vec<String>,
    #[serde(default)]
    pub retries: RetryPolicy,
    #[serde(default)]
    pub hmac: Option<HmacConfig>,
    #[serde(default)]
    pub custom_headers: Vec<CustomHeader>,
}

fn default_events() -> Vec<String> {
    vec![courier_events::types::WILDCARD.to_owned()]
}

impl WebhookConfig {
    /// A sink is active when it has somewhere to deliver and something to
    /// deliver.
    pub fn is_active(&self) -> bool {
        !self.url.is_empty() && !self.events.is_empty()
    }
}

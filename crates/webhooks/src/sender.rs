//! HTTP delivery to a single webhook sink.

use {
    hmac::{Hmac, Mac},
    serde_json::Value,
    sha2::Sha256,
    tracing::{debug, warn},
};

use crate::config::WebhookConfig;

type HmacSha256 = Hmac<Sha256>;

/// Delivers enriched events to one configured URL, applying that sink's own
/// retry policy, HMAC signing, and custom headers.
///
/// Delivery failures are logged and contained here; they never propagate
/// back into the event pipeline.
pub struct WebhookSender {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Send one event body, retrying per the sink's policy. Never fails the
    /// caller.
    pub async fn send(&self, body: &Value) {
        let payload = match serde_json::to_vec(body) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %self.config.url, error = %e, "failed to serialize webhook body");
                return;
            },
        };

        let total = self.config.retries.attempts;
        for attempt in 0..=total {
            match self.post(&payload).await {
                Ok(()) => {
                    debug!(url = %self.config.url, attempt, "webhook delivered");
                    return;
                },
                Err(e) => {
                    warn!(
                        url = %self.config.url,
                        attempt,
                        remaining = total.saturating_sub(attempt),
                        error = %e,
                        "webhook delivery failed"
                    );
                },
            }
            if attempt < total {
                tokio::time::sleep(self.config.retries.delay_for_attempt(attempt)).await;
            }
        }
        warn!(url = %self.config.url, attempts = total + 1, "webhook delivery gave up");
    }

    async fn post(&self, payload: &[u8]) -> anyhow::Result<()> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json");

        for header in &self.config.custom_headers {
            request = request.header(&header.name, &header.value);
        }

        if let Some(ref hmac) = self.config.hmac {
            request = request
                .header("X-Webhook-Hmac", sign(hmac.key.as_bytes(), payload)?)
                .header("X-Webhook-Hmac-Algorithm", "sha256");
        }

        let response = request.body(payload.to_vec()).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("webhook endpoint returned {status}");
        }
        Ok(())
    }
}

/// Hex HMAC-SHA256 of the request body.
fn sign(key: &[u8], payload: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("invalid hmac key: {e}"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

//! Server configuration from flags and environment.

use std::path::PathBuf;

use clap::Parser;

use courier_webhooks::WebhookConfig;

/// Courier server options. Every flag can also come from the environment,
/// so container deployments need no argv plumbing.
#[derive(Parser, Debug, Clone)]
#[command(name = "courier", about = "Messaging gateway fronting protocol engines")]
pub struct ServerConfig {
    /// Host to bind.
    #[arg(long, env = "COURIER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "COURIER_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Sidecar binary. Absent means the operator runs the sidecar
    /// externally and only the control endpoint is verified.
    #[arg(long, env = "COURIER_SIDECAR_BIN")]
    pub sidecar_bin: Option<PathBuf>,

    /// Extra arguments for the sidecar binary (repeatable).
    #[arg(long = "sidecar-arg", env = "COURIER_SIDECAR_ARGS", value_delimiter = ' ')]
    pub sidecar_args: Vec<String>,

    /// Sidecar control endpoint: a unix socket path or host:port.
    #[arg(
        long,
        env = "COURIER_SIDECAR_ENDPOINT",
        default_value = "/run/courier/sidecar.sock"
    )]
    pub sidecar_endpoint: String,

    /// Session names to start at boot.
    #[arg(long, env = "COURIER_PREDEFINED_SESSIONS", value_delimiter = ',')]
    pub predefined_sessions: Vec<String>,

    /// Webhook URL applied to every session.
    #[arg(long, env = "COURIER_GLOBAL_WEBHOOK_URL")]
    pub global_webhook_url: Option<String>,

    /// Event names delivered to the global webhook.
    #[arg(
        long,
        env = "COURIER_GLOBAL_WEBHOOK_EVENTS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub global_webhook_events: Vec<String>,

    /// HMAC key for signing global webhook deliveries.
    #[arg(long, env = "COURIER_GLOBAL_WEBHOOK_HMAC_KEY")]
    pub global_webhook_hmac_key: Option<String>,
}

impl ServerConfig {
    /// The global webhook sink, when one is configured.
    pub fn global_webhook(&self) -> Option<WebhookConfig> {
        let url = self.global_webhook_url.clone()?;
        Some(WebhookConfig {
            url,
            events: self.global_webhook_events.clone(),
            retries: Default::default(),
            hmac: self
                .global_webhook_hmac_key
                .clone()
                .map(|key| courier_webhooks::HmacConfig { key }),
            custom_headers: Vec::new(),
        })
    }
}

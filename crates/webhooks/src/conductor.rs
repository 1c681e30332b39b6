//! Fan-out from session event channels to configured webhook sinks.

use std::sync::Arc;

use {
    serde_json::{Map, Value},
    tokio::task::JoinHandle,
    tracing::{debug, info},
};

use courier_events::{ChannelSet, Event, UnknownEventType, resolve_event_names};

use crate::{config::WebhookConfig, sender::WebhookSender};

/// Session-level context attached to every delivered event.
///
/// Captured as a snapshot at delivery time, because the account identity is
/// usually unknown when a sink is bound and appears only once the session is
/// working.
#[derive(Debug, Clone, Default)]
pub struct SinkMetadata {
    /// Engine kind backing the session, as a wire string.
    pub engine: String,
    /// Account self-identity, once known.
    pub me: Option<Value>,
    /// User-supplied session metadata.
    pub metadata: Value,
    /// Server build/environment info.
    pub environment: Value,
}

/// Source of the per-delivery metadata snapshot.
pub trait MetadataProvider: Send + Sync {
    fn snapshot(&self) -> SinkMetadata;
}

/// Binds webhook sinks to a session's event channels.
pub struct WebhookConductor;

impl WebhookConductor {
    /// Resolve each active config's event names against the canonical
    /// taxonomy (wildcard included), subscribe to the matching channels, and
    /// start delivering. Sinks are fully independent: each gets its own
    /// sender, retry state, and subscriber tasks.
    ///
    /// Resolution is pure name matching; an unknown name is a configuration
    /// error reported before anything is bound.
    pub async fn configure(
        channels: &ChannelSet,
        meta: Arc<dyn MetadataProvider>,
        configs: &[WebhookConfig],
    ) -> Result<WebhookBinding, UnknownEventType> {
        let mut tasks = Vec::new();
        for config in configs.iter().filter(|c| c.is_active()) {
            let resolved = resolve_event_names(&config.events)?;
            let sender = Arc::new(WebhookSender::new(config.clone()));
            info!(url = %config.url, events = resolved.len(), "binding webhook sink");

            for event_type in resolved {
                let mut subscription = channels.channel(event_type).subscribe().await;
                let sender = Arc::clone(&sender);
                let meta = Arc::clone(&meta);
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = subscription.recv().await {
                        let body = enrich(&event, &meta.snapshot());
                        sender.send(&body).await;
                    }
                    debug!(url = %sender.url(), %event_type, "webhook subscription ended");
                }));
            }
        }
        Ok(WebhookBinding { tasks })
    }
}

/// Merge session-level metadata into the event body.
fn enrich(event: &Event, meta: &SinkMetadata) -> Value {
    let mut body = match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    body.insert("engine".into(), Value::String(meta.engine.clone()));
    body.insert("me".into(), meta.me.clone().unwrap_or(Value::Null));
    body.insert("metadata".into(), meta.metadata.clone());
    body.insert("environment".into(), meta.environment.clone());
    Value::Object(body)
}

/// Handle over the subscriber tasks of one `configure` call. Dropping it
/// detaches every sink bound by that call.
#[derive(Debug)]
pub struct WebhookBinding {
    tasks: Vec<JoinHandle<()>>,
}

impl WebhookBinding {
    pub fn sink_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for WebhookBinding {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

//! The sidecar-backed engine.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, stream::BoxStream},
    serde_json::Value,
    tokio::sync::{Mutex, broadcast, mpsc},
    tracing::{debug, warn},
};

use courier_engine::{Engine, EngineEvent, EngineFactory, EngineKind, MeInfo, SessionConfig};

use crate::{
    endpoint::{ControlEndpoint, WsConnection},
    process::SidecarSupervisor,
    rpc::SidecarClient,
    stream::{EventStreamFactory, ResilientStream, StreamClient, StreamConfig},
};

const ENGINE_EVENT_CAPACITY: usize = 256;

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds [`SidecarEngine`]s against one supervised sidecar process.
pub struct SidecarEngineFactory {
    supervisor: Arc<SidecarSupervisor>,
    endpoint: ControlEndpoint,
    stream_config: StreamConfig,
    rpc_timeout: Duration,
    ready_timeout: Duration,
}

impl SidecarEngineFactory {
    pub fn new(supervisor: Arc<SidecarSupervisor>, endpoint: ControlEndpoint) -> Self {
        Self {
            supervisor,
            endpoint,
            stream_config: StreamConfig::default(),
            rpc_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl EngineFactory for SidecarEngineFactory {
    async fn build(&self, session: &str, config: &SessionConfig) -> Result<Arc<dyn Engine>> {
        Ok(Arc::new(SidecarEngine {
            session: session.to_owned(),
            config: config.clone(),
            supervisor: Arc::clone(&self.supervisor),
            client: SidecarClient::new(self.endpoint.clone(), self.rpc_timeout),
            endpoint: self.endpoint.clone(),
            stream_config: self.stream_config,
            ready_timeout: self.ready_timeout,
            events_tx: broadcast::channel(ENGINE_EVENT_CAPACITY).0,
            me: Arc::new(StdMutex::new(None)),
            qr: Arc::new(StdMutex::new(None)),
            stream: Mutex::new(None),
        }))
    }
}

/// Engine implementation that drives one session on the sidecar: RPC for
/// lifecycle calls, the resilient stream for the event feed.
pub struct SidecarEngine {
    session: String,
    config: SessionConfig,
    supervisor: Arc<SidecarSupervisor>,
    client: SidecarClient,
    endpoint: ControlEndpoint,
    stream_config: StreamConfig,
    ready_timeout: Duration,
    events_tx: broadcast::Sender<EngineEvent>,
    me: Arc<StdMutex<Option<MeInfo>>>,
    qr: Arc<StdMutex<Option<String>>>,
    stream: Mutex<Option<ResilientStream>>,
}

#[async_trait]
impl Engine for SidecarEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sidecar
    }

    async fn start(&self) -> Result<()> {
        self.supervisor
            .wait_when_ready(self.ready_timeout)
            .await
            .context("sidecar is not ready")?;

        // Open the event feed before asking the sidecar to start the
        // session, so nothing emitted during startup is missed.
        let (tx, mut rx) = mpsc::channel(ENGINE_EVENT_CAPACITY);
        let factory = Arc::new(WsEventStreamFactory {
            endpoint: self.endpoint.clone(),
            session: self.session.clone(),
        });
        let stream = ResilientStream::spawn(factory, self.stream_config, tx);
        *self.stream.lock().await = Some(stream);

        let events_tx = self.events_tx.clone();
        let me = Arc::clone(&self.me);
        let qr = Arc::clone(&self.qr);
        let session = self.session.clone();
        let _ = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                track_pairing_state(&event, &me, &qr);
                let _ = events_tx.send(event);
            }
            debug!(session = %session, "sidecar event feed ended");
        });

        let auth_dir = self
            .config
            .engine_config
            .get("authDir")
            .and_then(Value::as_str);
        let _ = self
            .client
            .start_session(&self.session, auth_dir, self.config.proxy.as_deref())
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let result = self.client.stop_session(&self.session).await;
        if let Some(stream) = self.stream.lock().await.take() {
            stream.stop().await;
        }
        result.map(|_| ())
    }

    async fn unpair(&self) -> Result<()> {
        self.client.unpair_session(&self.session).await.map(|_| ())
    }

    async fn request_pair_code(&self, phone: &str) -> Result<String> {
        let data = self.client.request_pair_code(&self.session, phone).await?;
        data.get("code")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("sidecar returned no pair code"))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    fn me(&self) -> Option<MeInfo> {
        lock(&self.me).clone()
    }

    fn qr(&self) -> Option<String> {
        lock(&self.qr).clone()
    }
}

/// Keep the engine's pairing view in sync with the feed: remember the last
/// QR payload while pairing, capture identity once authenticated.
fn track_pairing_state(
    event: &EngineEvent,
    me: &Arc<StdMutex<Option<MeInfo>>>,
    qr: &Arc<StdMutex<Option<String>>>,
) {
    match event.kind.as_str() {
        "qr" => {
            if let Some(code) = event.payload.get("qr").and_then(Value::as_str) {
                *lock(qr) = Some(code.to_owned());
            }
        },
        "authenticated" | "ready" => {
            *lock(qr) = None;
            if let Some(info) = event
                .payload
                .get("me")
                .and_then(|v| serde_json::from_value::<MeInfo>(v.clone()).ok())
            {
                *lock(me) = Some(info);
            }
        },
        "logged.out" => {
            *lock(me) = None;
            *lock(qr) = None;
        },
        _ => {},
    }
}

/// Connects the event feed for one session.
struct WsEventStreamFactory {
    endpoint: ControlEndpoint,
    session: String,
}

#[async_trait]
impl EventStreamFactory for WsEventStreamFactory {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn StreamClient>, BoxStream<'static, Result<EngineEvent>>)> {
        let ws = self
            .endpoint
            .connect(&format!("/events?session={}", self.session))
            .await?;
        let (sink, stream) = ws.split();
        let session = self.session.clone();

        use tokio_tungstenite::tungstenite::Message;
        let stream = stream
            .take_while(|message| {
                futures::future::ready(!matches!(message, Ok(Message::Close(_))))
            })
            .filter_map(move |message| {
                let session = session.clone();
                futures::future::ready(match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<EngineEvent>(&text) {
                            Ok(event) => Some(Ok(event)),
                            Err(e) => {
                                // One bad payload must not kill the feed.
                                warn!(session = %session, error = %e, "undecodable sidecar event, dropped");
                                None
                            },
                        }
                    },
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow::Error::from(e))),
                })
            })
            .boxed();

        Ok((Box::new(WsClient { sink }), stream))
    }
}

struct WsClient {
    sink: futures::stream::SplitSink<WsConnection, tokio_tungstenite::tungstenite::Message>,
}

#[async_trait]
impl StreamClient for WsClient {
    async fn close(&mut self) {
        let _ = self
            .sink
            .send(tokio_tungstenite::tungstenite::Message::Close(None))
            .await;
    }
}

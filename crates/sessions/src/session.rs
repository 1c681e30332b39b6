//! One logical connection to a backend account.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::Result,
    futures::StreamExt,
    serde_json::json,
    tokio::{
        sync::{Mutex, broadcast, watch},
        task::JoinHandle,
    },
    tokio_stream::wrappers::BroadcastStream,
    tracing::{debug, info, warn},
};

use {
    courier_engine::{Engine, EngineEvent, EngineKind, IdentityStore, MeInfo, SessionConfig},
    courier_events::{ALL_EVENT_TYPES, ChannelSet, Event, EventType},
};

use crate::{
    normalize::{Normalized, StatusSignal, normalize},
    status::SessionStatus,
};

/// Buffer for the session's internal event firehose.
const FIREHOSE_CAPACITY: usize = 256;

/// A session owns the status state machine for one account, normalizes the
/// engine's raw stream into canonical events, and feeds its per-type
/// channels.
///
/// The owning [`SessionManager`] is the only mutator; everything handed to
/// subscribers is read-only.
///
/// [`SessionManager`]: crate::manager::SessionManager
pub struct Session {
    name: String,
    config: SessionConfig,
    engine: Arc<dyn Engine>,
    identity_store: Arc<dyn IdentityStore>,
    channels: ChannelSet,
    events_tx: broadcast::Sender<Event>,
    status_tx: watch::Sender<SessionStatus>,
    /// Serializes status mutation + publish so transitions hit the stream in
    /// the order they were decided.
    status_gate: Mutex<()>,
    /// Once set, every status change except the terminal `Stopped` is
    /// swallowed: the unpair must finish in its own time without the
    /// engine's reconnect noise overwriting it.
    unpairing: AtomicBool,
    /// Set by `stop`; late engine events are dropped from here on.
    stopped: AtomicBool,
    identity_grace: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        config: SessionConfig,
        engine: Arc<dyn Engine>,
        identity_store: Arc<dyn IdentityStore>,
        identity_grace: Duration,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(FIREHOSE_CAPACITY);
        let (status_tx, _) = watch::channel(SessionStatus::Stopped);
        Arc::new(Self {
            name: name.into(),
            config,
            engine,
            identity_store,
            channels: ChannelSet::new(),
            events_tx,
            status_tx,
            status_gate: Mutex::new(()),
            unpairing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            identity_grace,
            pump: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// The last published status.
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn me(&self) -> Option<MeInfo> {
        self.engine.me()
    }

    pub fn qr(&self) -> Option<String> {
        self.engine.qr()
    }

    pub async fn request_pair_code(&self, phone: &str) -> Result<String> {
        self.engine.request_pair_code(phone).await
    }

    /// The per-type event channels subscribers attach to.
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Every canonical event of this session, unfiltered. Used by the
    /// manager to feed its aggregate channels.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Transition to `STARTING`, begin pumping the engine's raw stream, and
    /// connect the engine. An engine start failure transitions to `FAILED`
    /// and propagates.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.wire_channels().await;
        self.set_status(SessionStatus::Starting).await;

        // Subscribe before connecting so nothing emitted during startup is
        // missed.
        let raw = self.engine.subscribe();
        let session = Arc::clone(self);
        let pump = tokio::spawn(async move { session.pump(raw).await });
        *self.pump.lock().await = Some(pump);

        if let Err(e) = self.engine.start().await {
            self.set_status(SessionStatus::Failed).await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop the engine and publish the terminal `STOPPED`. Idempotent. The
    /// event channels stay open until [`teardown`](Self::teardown) so the
    /// final status event reaches subscribers.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.engine.stop().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.set_status(SessionStatus::Stopped).await;
        result
    }

    /// Complete all event channels. Called once by the owner after the
    /// post-stop settle delay.
    pub async fn teardown(&self) {
        self.channels.complete_all().await;
    }

    /// Flag the session as unpairing and ask the engine to unpair. Engine
    /// errors are logged, never propagated; the engine's own `STOPPED`
    /// signal concludes the flow.
    pub async fn unpair(&self) {
        self.unpairing.store(true, Ordering::SeqCst);
        info!(session = %self.name, "unpairing, status updates suppressed until stopped");
        if let Err(e) = self.engine.unpair().await {
            warn!(session = %self.name, error = %e, "engine unpair failed");
        }
    }

    /// Attach each per-type channel to a filtered view of the firehose.
    /// Re-attaching on a later start swaps the source under any subscribers
    /// that are still around.
    async fn wire_channels(&self) {
        for &event_type in ALL_EVENT_TYPES {
            let source = BroadcastStream::new(self.events_tx.subscribe()).filter(move |item| {
                futures::future::ready(match item {
                    Ok(event) => event.event_type == event_type,
                    // Keep lag errors so the channel can log them.
                    Err(_) => true,
                })
            });
            self.channels.channel(event_type).attach_source(source).await;
        }
    }

    fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        let _ = self
            .events_tx
            .send(Event::new(self.name.clone(), event_type, payload));
    }

    async fn pump(self: Arc<Self>, mut raw: broadcast::Receiver<EngineEvent>) {
        loop {
            match raw.recv().await {
                Ok(event) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    match normalize(&event) {
                        Normalized::Status(signal) => self.apply_signal(signal).await,
                        Normalized::Payload(event_type, payload) => {
                            self.publish(event_type, payload);
                        },
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session = %self.name, skipped, "raw engine stream lagged");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn apply_signal(self: &Arc<Self>, signal: StatusSignal) {
        match signal {
            StatusSignal::RequiresPairing => {
                self.set_status(SessionStatus::ScanQrCode).await;
            },
            StatusSignal::Authenticated => self.on_authenticated().await,
            StatusSignal::Disconnected => {
                // Reconnecting, not terminal.
                self.set_status(SessionStatus::Starting).await;
            },
            StatusSignal::Fatal => {
                self.set_status(SessionStatus::Failed).await;
            },
            StatusSignal::Stopped => {
                self.set_status(SessionStatus::Stopped).await;
            },
        }
    }

    /// The working signal can arrive before the engine knows who the account
    /// is. Hold the transition for a short grace period, re-check once, then
    /// emit `WORKING` regardless. Best effort, not a guarantee.
    async fn on_authenticated(self: &Arc<Self>) {
        if self.engine.me().is_some() {
            self.became_working().await;
            return;
        }
        debug!(session = %self.name, "working signal before identity, delaying emission");
        let session = Arc::clone(self);
        let _ = tokio::spawn(async move {
            tokio::time::sleep(session.identity_grace).await;
            session.became_working().await;
        });
    }

    async fn became_working(&self) {
        if !self.set_status(SessionStatus::Working).await {
            return;
        }
        if let Some(me) = self.engine.me()
            && let Err(e) = self.identity_store.set(&self.name, me).await
        {
            warn!(session = %self.name, error = %e, "failed to persist identity");
        }
    }

    /// Apply a status transition and publish it. Returns whether anything
    /// changed: consecutive duplicates are suppressed, updates during an
    /// unpair are swallowed (except the terminal `Stopped`), and a stopped
    /// session no longer transitions at all.
    async fn set_status(&self, next: SessionStatus) -> bool {
        if self.stopped.load(Ordering::SeqCst) && next != SessionStatus::Stopped {
            return false;
        }
        if self.unpairing.load(Ordering::SeqCst) && next != SessionStatus::Stopped {
            debug!(session = %self.name, status = %next, "status update swallowed during unpair");
            return false;
        }

        let _gate = self.status_gate.lock().await;
        let current = *self.status_tx.borrow();
        if current == next {
            return false;
        }
        self.status_tx.send_replace(next);
        info!(session = %self.name, from = %current, to = %next, "session status changed");
        self.publish(EventType::SessionStatus, json!({ "status": next }));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use courier_engine::MemoryIdentityStore;
    use courier_events::EventSubscription;

    use super::*;
    use crate::{testing::MockEngine, timing::Timings};

    fn new_session(engine: &Arc<MockEngine>) -> Arc<Session> {
        Session::new(
            "s1",
            SessionConfig::default(),
            Arc::clone(engine) as Arc<dyn Engine>,
            Arc::new(MemoryIdentityStore::new()),
            Timings::fast().identity_grace,
        )
    }

    async fn status_feed(session: &Session) -> EventSubscription {
        session
            .channels()
            .channel(EventType::SessionStatus)
            .subscribe()
            .await
    }

    async fn next_status(sub: &mut EventSubscription) -> SessionStatus {
        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for status event")
            .expect("status channel completed");
        serde_json::from_value(event.payload["status"].clone()).unwrap()
    }

    async fn assert_quiet(sub: &mut EventSubscription) {
        assert!(
            timeout(Duration::from_millis(80), sub.recv()).await.is_err(),
            "expected no further status events"
        );
    }

    #[tokio::test]
    async fn pairing_flow_reaches_working() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut feed = status_feed(&session).await;

        session.start().await.unwrap();
        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);

        engine.emit("qr", serde_json::json!({"qr": "otp://pair"}));
        assert_eq!(next_status(&mut feed).await, SessionStatus::ScanQrCode);

        engine.set_me(MeInfo {
            id: "15551234567".into(),
            push_name: Some("Work".into()),
        });
        engine.emit("authenticated", serde_json::Value::Null);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Working);
        assert_eq!(session.status(), SessionStatus::Working);
    }

    #[tokio::test]
    async fn consecutive_working_signals_emit_once() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut feed = status_feed(&session).await;

        session.start().await.unwrap();
        engine.set_me(MeInfo {
            id: "1".into(),
            push_name: None,
        });
        engine.emit("authenticated", serde_json::Value::Null);
        engine.emit("authenticated", serde_json::Value::Null);
        engine.emit("ready", serde_json::Value::Null);

        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Working);
        assert_quiet(&mut feed).await;
    }

    #[tokio::test]
    async fn working_is_delayed_until_identity_or_grace() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        session.start().await.unwrap();

        engine.emit("authenticated", serde_json::Value::Null);
        sleep(Duration::from_millis(10)).await;
        // Identity unknown: the transition is held back.
        assert_eq!(session.status(), SessionStatus::Starting);

        // After the grace period it is emitted regardless.
        sleep(Timings::fast().identity_grace * 2).await;
        assert_eq!(session.status(), SessionStatus::Working);
    }

    #[tokio::test]
    async fn identity_is_persisted_on_working() {
        let engine = MockEngine::new();
        let store = Arc::new(MemoryIdentityStore::new());
        let session = Session::new(
            "s1",
            SessionConfig::default(),
            Arc::clone(&engine) as Arc<dyn Engine>,
            Arc::clone(&store) as Arc<dyn IdentityStore>,
            Timings::fast().identity_grace,
        );
        session.start().await.unwrap();

        let me = MeInfo {
            id: "15551234567".into(),
            push_name: Some("Work".into()),
        };
        engine.set_me(me.clone());
        engine.emit("authenticated", serde_json::Value::Null);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get("s1").await.unwrap(), Some(me));
    }

    #[tokio::test]
    async fn disconnect_falls_back_to_starting_and_recovers() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut feed = status_feed(&session).await;

        session.start().await.unwrap();
        engine.set_me(MeInfo {
            id: "1".into(),
            push_name: None,
        });
        engine.emit("authenticated", serde_json::Value::Null);
        engine.emit("disconnected", serde_json::json!({"reason": "socket closed"}));
        engine.emit("authenticated", serde_json::Value::Null);

        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Working);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Working);
    }

    #[tokio::test]
    async fn unpairing_swallows_everything_but_stopped() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut feed = status_feed(&session).await;

        session.start().await.unwrap();
        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);

        session.unpair().await;
        engine.set_me(MeInfo {
            id: "1".into(),
            push_name: None,
        });
        engine.emit("authenticated", serde_json::Value::Null);
        engine.emit("disconnected", serde_json::Value::Null);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(session.status(), SessionStatus::Starting);

        engine.emit("stopped", serde_json::Value::Null);
        assert_eq!(next_status(&mut feed).await, SessionStatus::Stopped);

        engine.emit("stopped", serde_json::Value::Null);
        assert_quiet(&mut feed).await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_emits_one_stopped() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut feed = status_feed(&session).await;

        session.start().await.unwrap();
        assert_eq!(next_status(&mut feed).await, SessionStatus::Starting);

        session.stop().await.unwrap();
        assert_eq!(next_status(&mut feed).await, SessionStatus::Stopped);

        session.stop().await.unwrap();
        assert_quiet(&mut feed).await;
        assert_eq!(engine.stop_calls(), 1);
    }

    #[tokio::test]
    async fn late_engine_events_after_stop_are_dropped() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut messages = session
            .channels()
            .channel(EventType::Message)
            .subscribe()
            .await;

        session.start().await.unwrap();
        session.stop().await.unwrap();

        engine.emit("message", serde_json::json!({"body": "too late"}));
        assert!(
            timeout(Duration::from_millis(80), messages.recv()).await.is_err(),
            "no message may be delivered after stop"
        );
    }

    #[tokio::test]
    async fn engine_start_failure_transitions_to_failed() {
        let engine = MockEngine::failing_start();
        let session = new_session(&engine);

        let err = session.start().await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn payload_events_get_fresh_unique_ids() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut messages = session
            .channels()
            .channel(EventType::Message)
            .subscribe()
            .await;

        session.start().await.unwrap();
        engine.emit("message", serde_json::json!({"body": "one"}));
        engine.emit("message", serde_json::json!({"body": "two"}));

        let first = timeout(Duration::from_secs(1), messages.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(1), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("evt_"));
        assert_eq!(first.session, "s1");
        assert_eq!(first.event_type, EventType::Message);
    }

    #[tokio::test]
    async fn unknown_engine_tags_arrive_as_passthrough() {
        let engine = MockEngine::new();
        let session = new_session(&engine);
        let mut passthrough = session
            .channels()
            .channel(EventType::EngineEvent)
            .subscribe()
            .await;

        session.start().await.unwrap();
        engine.emit("call.offer", serde_json::json!({"from": "x"}));

        let event = timeout(Duration::from_secs(1), passthrough.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload["event"], "call.offer");
    }
}

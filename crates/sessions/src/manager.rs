//! The session registry and its serialized operations.

use std::sync::Arc;

use {
    dashmap::DashMap,
    futures::StreamExt,
    serde::Serialize,
    serde_json::Value,
    tokio::sync::broadcast,
    tokio_stream::wrappers::BroadcastStream,
    tracing::{info, warn},
};

use {
    courier_engine::{
        AuthStore, EngineKind, EngineRegistry, IdentityStore, MeInfo, SessionConfig,
    },
    courier_events::{ALL_EVENT_TYPES, ChannelSet, Event},
    courier_webhooks::{
        MetadataProvider, SinkMetadata, WebhookBinding, WebhookConductor, WebhookConfig,
    },
};

use crate::{
    error::SessionError,
    lock::NamedLocks,
    session::Session,
    status::SessionStatus,
    timing::Timings,
    wait::poll_until,
};

/// Buffer for the manager-wide merged event stream.
const AGGREGATE_CAPACITY: usize = 1024;

/// Manager-level settings.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub timings: Timings,
    /// Webhook sink applied to every session, merged with the session-level
    /// list.
    pub global_webhook: Option<WebhookConfig>,
    /// Session names started at process bootstrap.
    pub predefined: Vec<String>,
    /// Build/environment info attached to webhook deliveries.
    pub environment: Value,
}

/// Point-in-time view of one session, as returned to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub name: String,
    pub status: SessionStatus,
    pub engine: EngineKind,
    pub config: SessionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me: Option<MeInfo>,
}

/// A live session plus the plumbing bound to it.
struct RunningSession {
    session: Arc<Session>,
    /// Keeps the webhook subscriber tasks alive.
    _webhooks: WebhookBinding,
}

/// Existence is tri-state on purpose: a session that was stopped is a
/// different thing from one that never existed or was removed.
enum EntryState {
    Running(RunningSession),
    Stopped,
    Removed,
}

struct RegistryEntry {
    config: SessionConfig,
    state: EntryState,
}

/// Registry of sessions. Every mutating operation on a name runs inside that
/// name's lock, so at most one start/stop/delete/update is in flight per
/// session at any time.
pub struct SessionManager {
    config: ManagerConfig,
    engines: Arc<EngineRegistry>,
    auth_store: Arc<dyn AuthStore>,
    identity_store: Arc<dyn IdentityStore>,
    registry: DashMap<String, RegistryEntry>,
    locks: NamedLocks,
    aggregate: ChannelSet,
    aggregate_tx: broadcast::Sender<Event>,
}

impl SessionManager {
    pub async fn new(
        config: ManagerConfig,
        engines: Arc<EngineRegistry>,
        auth_store: Arc<dyn AuthStore>,
        identity_store: Arc<dyn IdentityStore>,
    ) -> Arc<Self> {
        let (aggregate_tx, _) = broadcast::channel::<Event>(AGGREGATE_CAPACITY);
        let aggregate = ChannelSet::new();

        // The aggregate channels are views of one merged firehose; sessions
        // feed the firehose and each per-type channel filters it.
        for &event_type in ALL_EVENT_TYPES {
            let source = BroadcastStream::new(aggregate_tx.subscribe()).filter(move |item| {
                futures::future::ready(match item {
                    Ok(event) => event.event_type == event_type,
                    Err(_) => true,
                })
            });
            aggregate.channel(event_type).attach_source(source).await;
        }

        let locks = NamedLocks::new(config.timings.lock_timeout);
        Arc::new(Self {
            config,
            engines,
            auth_store,
            identity_store,
            registry: DashMap::new(),
            locks,
            aggregate,
            aggregate_tx,
        })
    }

    /// Manager-wide event channels, merged across all sessions.
    pub fn events(&self) -> &ChannelSet {
        &self.aggregate
    }

    /// The merged firehose itself, unfiltered.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.aggregate_tx.subscribe()
    }

    /// Create or replace the stored configuration for `name`. Starts
    /// nothing. Re-creates a removed entry.
    pub async fn upsert(&self, name: &str, config: SessionConfig) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(name).await?;
        let mut entry = self
            .registry
            .entry(name.to_owned())
            .or_insert_with(|| RegistryEntry {
                config: SessionConfig::default(),
                state: EntryState::Stopped,
            });
        entry.config = config;
        if matches!(entry.state, EntryState::Removed) {
            entry.state = EntryState::Stopped;
        }
        Ok(())
    }

    /// Start `name`, building a fresh session around the configured engine.
    /// Fails with [`SessionError::AlreadyStarted`] when a live session
    /// exists; a name never configured gets the default configuration.
    pub async fn start(&self, name: &str) -> Result<SessionSnapshot, SessionError> {
        let _guard = self.locks.acquire(name).await?;
        self.start_locked(name).await
    }

    async fn start_locked(&self, name: &str) -> Result<SessionSnapshot, SessionError> {
        if let Some(entry) = self.registry.get(name)
            && matches!(entry.state, EntryState::Running(_))
        {
            return Err(SessionError::AlreadyStarted(name.to_owned()));
        }

        let config = self
            .registry
            .get(name)
            .map(|entry| entry.config.clone())
            .unwrap_or_default();

        let engine = self.engines.build(name, &config).await?;
        let session = Session::new(
            name,
            config.clone(),
            engine,
            Arc::clone(&self.identity_store),
            self.config.timings.identity_grace,
        );

        // Ends on its own once the session (and with it the firehose
        // sender) is dropped.
        self.spawn_aggregate_feeder(&session);

        let mut sinks = config.webhooks.clone();
        if let Some(global) = &self.config.global_webhook {
            sinks.push(global.clone());
        }
        let meta = Arc::new(SessionSinkMetadata {
            session: Arc::clone(&session),
            environment: self.config.environment.clone(),
        });
        let webhooks = WebhookConductor::configure(session.channels(), meta, &sinks).await?;

        let _ = self.registry.insert(name.to_owned(), RegistryEntry {
            config,
            state: EntryState::Running(RunningSession {
                session: Arc::clone(&session),
                _webhooks: webhooks,
            }),
        });

        info!(session = name, engine = %session.engine_kind(), "starting session");
        session.start().await?;
        Ok(self.snapshot_of(&session))
    }

    fn spawn_aggregate_feeder(&self, session: &Arc<Session>) {
        let mut all = session.subscribe_all();
        let aggregate_tx = self.aggregate_tx.clone();
        let name = session.name().to_owned();
        let _ = tokio::spawn(async move {
            loop {
                match all.recv().await {
                    Ok(event) => {
                        let _ = aggregate_tx.send(event);
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session = %name, skipped, "aggregate feed lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Stop `name`. A session that is not running is a no-op. On engine
    /// failure the error is returned or swallowed per `silent`; either way
    /// the registry keeps an explicit stopped placeholder and the call waits
    /// the settle delay for engine teardown to finish.
    pub async fn stop(&self, name: &str, silent: bool) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(name).await?;
        self.stop_locked(name, silent).await
    }

    async fn stop_locked(&self, name: &str, silent: bool) -> Result<(), SessionError> {
        let running = {
            let Some(mut entry) = self.registry.get_mut(name) else {
                return Ok(());
            };
            match std::mem::replace(&mut entry.state, EntryState::Stopped) {
                EntryState::Running(running) => running,
                other => {
                    entry.state = other;
                    return Ok(());
                },
            }
        };

        let result = running.session.stop().await;
        // The settle delay lets in-flight teardown finish and the terminal
        // status event reach subscribers; the aggregate feeder drains and
        // ends on its own once the session drops.
        tokio::time::sleep(self.config.timings.stop_settle).await;
        running.session.teardown().await;
        drop(running);
        info!(session = name, "session stopped");

        match result {
            Ok(()) => Ok(()),
            Err(e) if silent => {
                warn!(session = name, error = %e, "engine stop failed");
                Ok(())
            },
            Err(e) => Err(SessionError::Engine(e)),
        }
    }

    /// Stop (if needed) and mark `name` removed. Removed sessions disappear
    /// from listings until recreated via [`upsert`](Self::upsert).
    pub async fn delete(&self, name: &str) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(name).await?;
        self.stop_locked(name, true).await?;
        if let Some(mut entry) = self.registry.get_mut(name) {
            entry.state = EntryState::Removed;
        }
        info!(session = name, "session removed");
        Ok(())
    }

    /// Clear persisted auth material for `name`. The session itself is left
    /// alone; a running engine keeps its in-memory credentials until it
    /// stops.
    pub async fn logout(&self, name: &str) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(name).await?;
        self.auth_store.delete(name).await?;
        self.identity_store.delete(name).await?;
        info!(session = name, "cleared persisted auth material");
        Ok(())
    }

    /// Flag `name` as unpairing and ask its engine to unpair. Engine errors
    /// are logged, not propagated; the call then waits a short fixed delay
    /// for the engine's own stopped signal to land.
    pub async fn unpair(&self, name: &str) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(name).await?;
        let Some(session) = self.running_session(name) else {
            return Err(SessionError::NotFound(name.to_owned()));
        };
        session.unpair().await;
        tokio::time::sleep(self.config.timings.unpair_wait).await;
        Ok(())
    }

    /// Replace the configuration and, if the session is running, restart it
    /// so the new configuration takes effect.
    pub async fn update(
        &self,
        name: &str,
        config: SessionConfig,
    ) -> Result<SessionSnapshot, SessionError> {
        let _guard = self.locks.acquire(name).await?;
        let was_running = self.running_session(name).is_some();
        {
            let mut entry = self
                .registry
                .entry(name.to_owned())
                .or_insert_with(|| RegistryEntry {
                    config: SessionConfig::default(),
                    state: EntryState::Stopped,
                });
            entry.config = config.clone();
            if matches!(entry.state, EntryState::Removed) {
                entry.state = EntryState::Stopped;
            }
        }
        if was_running {
            self.stop_locked(name, true).await?;
            return self.start_locked(name).await;
        }
        Ok(SessionSnapshot {
            name: name.to_owned(),
            status: SessionStatus::Stopped,
            engine: config.engine,
            config,
            me: None,
        })
    }

    /// Block until `name` is running and its status is one of `expected`.
    ///
    /// A name that never existed (or was removed) fails with
    /// [`SessionError::NotFound`]; a session that exists but does not reach
    /// an expected status within the deadline fails with
    /// [`SessionError::UnexpectedStatus`] carrying what was observed.
    pub async fn wait_until_status(
        &self,
        name: &str,
        expected: &[SessionStatus],
    ) -> Result<SessionStatus, SessionError> {
        let timings = self.config.timings;
        let deadline = tokio::time::Instant::now() + timings.wait_timeout;

        let started = poll_until(timings.wait_poll_interval, deadline, || async move {
            self.running_session(name).is_some()
        })
        .await;
        if !started {
            let exists = self
                .registry
                .get(name)
                .is_some_and(|entry| !matches!(entry.state, EntryState::Removed));
            return Err(if exists {
                SessionError::UnexpectedStatus {
                    name: name.to_owned(),
                    actual: SessionStatus::Stopped,
                    expected: expected.to_vec(),
                }
            } else {
                SessionError::NotFound(name.to_owned())
            });
        }

        let Some(session) = self.running_session(name) else {
            return Err(SessionError::NotFound(name.to_owned()));
        };
        let reached = poll_until(timings.wait_poll_interval, deadline, || {
            let session = Arc::clone(&session);
            async move { expected.contains(&session.status()) }
        })
        .await;
        if reached {
            Ok(session.status())
        } else {
            Err(SessionError::UnexpectedStatus {
                name: name.to_owned(),
                actual: session.status(),
                expected: expected.to_vec(),
            })
        }
    }

    /// Start every predefined session, logging failures instead of
    /// propagating them so one bad session cannot block the rest.
    pub async fn start_predefined(&self) {
        for name in self.config.predefined.clone() {
            info!(session = %name, "starting predefined session");
            if let Err(e) = self.start(&name).await {
                warn!(session = %name, error = %e, "failed to start predefined session");
            }
        }
    }

    /// Stop every running session. Used for process shutdown.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self
            .registry
            .iter()
            .filter(|entry| matches!(entry.value().state, EntryState::Running(_)))
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            if let Err(e) = self.stop(&name, true).await {
                warn!(session = %name, error = %e, "failed to stop session during shutdown");
            }
        }
    }

    /// Snapshots of known sessions. Removed entries never appear; stopped
    /// placeholders appear only when `include_stopped` is set.
    pub fn list(&self, include_stopped: bool) -> Vec<SessionSnapshot> {
        self.registry
            .iter()
            .filter_map(|entry| match &entry.value().state {
                EntryState::Running(running) => Some(self.snapshot_of(&running.session)),
                EntryState::Stopped if include_stopped => Some(SessionSnapshot {
                    name: entry.key().clone(),
                    status: SessionStatus::Stopped,
                    engine: entry.value().config.engine,
                    config: entry.value().config.clone(),
                    me: None,
                }),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of one session, if it exists (running or stopped).
    pub fn get(&self, name: &str) -> Option<SessionSnapshot> {
        let entry = self.registry.get(name)?;
        match &entry.value().state {
            EntryState::Running(running) => Some(self.snapshot_of(&running.session)),
            EntryState::Stopped => Some(SessionSnapshot {
                name: name.to_owned(),
                status: SessionStatus::Stopped,
                engine: entry.value().config.engine,
                config: entry.value().config.clone(),
                me: None,
            }),
            EntryState::Removed => None,
        }
    }

    /// Current pairing QR payload for a running session.
    pub fn qr(&self, name: &str) -> Result<Option<String>, SessionError> {
        self.running_session(name)
            .map(|session| session.qr())
            .ok_or_else(|| SessionError::NotFound(name.to_owned()))
    }

    /// Request a pairing code from a running session's engine.
    pub async fn request_pair_code(
        &self,
        name: &str,
        phone: &str,
    ) -> Result<String, SessionError> {
        let Some(session) = self.running_session(name) else {
            return Err(SessionError::NotFound(name.to_owned()));
        };
        Ok(session.request_pair_code(phone).await?)
    }

    fn running_session(&self, name: &str) -> Option<Arc<Session>> {
        self.registry.get(name).and_then(|entry| match &entry.state {
            EntryState::Running(running) => Some(Arc::clone(&running.session)),
            _ => None,
        })
    }

    fn snapshot_of(&self, session: &Session) -> SessionSnapshot {
        SessionSnapshot {
            name: session.name().to_owned(),
            status: session.status(),
            engine: session.engine_kind(),
            config: session.config().clone(),
            me: session.me(),
        }
    }
}

/// Per-delivery webhook metadata, snapshotted from the live session.
struct SessionSinkMetadata {
    session: Arc<Session>,
    environment: Value,
}

impl MetadataProvider for SessionSinkMetadata {
    fn snapshot(&self) -> SinkMetadata {
        SinkMetadata {
            engine: self.session.engine_kind().to_string(),
            me: self
                .session
                .me()
                .and_then(|me| serde_json::to_value(me).ok()),
            metadata: self.session.config().metadata.clone(),
            environment: self.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use {
        courier_engine::{MemoryAuthStore, MemoryIdentityStore},
        courier_events::{EventSubscription, EventType},
        courier_webhooks::{Backoff, RetryPolicy},
    };

    use super::*;
    use crate::testing::MockEngineFactory;

    struct Harness {
        manager: Arc<SessionManager>,
        factory: Arc<MockEngineFactory>,
        auth: Arc<MemoryAuthStore>,
    }

    async fn harness() -> Harness {
        harness_with(ManagerConfig {
            timings: Timings::fast(),
            ..ManagerConfig::default()
        })
        .await
    }

    async fn harness_with(config: ManagerConfig) -> Harness {
        let factory = MockEngineFactory::new();
        let engines = Arc::new(EngineRegistry::new());
        engines.register(
            EngineKind::Sidecar,
            Arc::clone(&factory) as Arc<dyn courier_engine::EngineFactory>,
        );
        engines.register(
            EngineKind::Embedded,
            MockEngineFactory::failing_start() as Arc<dyn courier_engine::EngineFactory>,
        );
        let auth = Arc::new(MemoryAuthStore::new());
        let manager = SessionManager::new(
            config,
            engines,
            Arc::clone(&auth) as Arc<dyn AuthStore>,
            Arc::new(MemoryIdentityStore::new()) as Arc<dyn IdentityStore>,
        )
        .await;
        Harness {
            manager,
            factory,
            auth,
        }
    }

    fn embedded_config() -> SessionConfig {
        SessionConfig {
            engine: EngineKind::Embedded,
            ..SessionConfig::default()
        }
    }

    async fn next_status(sub: &mut EventSubscription) -> SessionStatus {
        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for status event")
            .expect("status channel completed");
        serde_json::from_value(event.payload["status"].clone()).unwrap()
    }

    #[tokio::test]
    async fn start_reports_a_snapshot_and_rejects_double_start() {
        let h = harness().await;
        let snapshot = h.manager.start("s1").await.unwrap();
        assert_eq!(snapshot.name, "s1");
        assert_eq!(snapshot.status, SessionStatus::Starting);
        assert_eq!(snapshot.engine, EngineKind::Sidecar);

        let err = h.manager.start("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyStarted(name) if name == "s1"));
    }

    #[tokio::test]
    async fn concurrent_starts_agree_on_a_single_winner() {
        let h = harness().await;
        let first = Arc::clone(&h.manager);
        let second = Arc::clone(&h.manager);

        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.start("s1").await }),
            tokio::spawn(async move { second.start("s1").await }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let winners = usize::from(a.is_ok()) + usize::from(b.is_ok());
        assert_eq!(winners, 1, "exactly one start may win");
        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(loser, SessionError::AlreadyStarted(name) if name == "s1"));
    }

    #[tokio::test]
    async fn stop_twice_is_a_quiet_noop() {
        let h = harness().await;
        let mut statuses = h
            .manager
            .events()
            .channel(EventType::SessionStatus)
            .subscribe()
            .await;

        h.manager.start("s1").await.unwrap();
        assert_eq!(next_status(&mut statuses).await, SessionStatus::Starting);

        h.manager.stop("s1", true).await.unwrap();
        assert_eq!(next_status(&mut statuses).await, SessionStatus::Stopped);

        h.manager.stop("s1", true).await.unwrap();
        assert!(
            timeout(Duration::from_millis(80), statuses.recv()).await.is_err(),
            "a second stop must not emit another STOPPED"
        );
        assert_eq!(h.factory.engine("s1").stop_calls(), 1);
    }

    #[tokio::test]
    async fn wait_for_a_ghost_session_is_not_found() {
        let h = harness().await;
        let err = h
            .manager
            .wait_until_status("ghost", &[SessionStatus::Working])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn wait_on_a_stuck_session_reports_observed_status() {
        let h = harness().await;
        h.manager.start("s1").await.unwrap();

        let err = h
            .manager
            .wait_until_status("s1", &[SessionStatus::Working])
            .await
            .unwrap_err();
        match err {
            SessionError::UnexpectedStatus {
                name,
                actual,
                expected,
            } => {
                assert_eq!(name, "s1");
                assert_eq!(actual, SessionStatus::Starting);
                assert_eq!(expected, vec![SessionStatus::Working]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn wait_resolves_once_the_session_is_working() {
        let h = harness().await;
        h.manager.start("s1").await.unwrap();

        let engine = h.factory.engine("s1");
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            engine.set_me(MeInfo {
                id: "1".into(),
                push_name: None,
            });
            engine.emit("authenticated", serde_json::Value::Null);
        });

        let status = h
            .manager
            .wait_until_status("s1", &[SessionStatus::Working])
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Working);
    }

    #[tokio::test]
    async fn wait_on_a_configured_but_never_started_session_reports_stopped() {
        let h = harness().await;
        h.manager.upsert("s1", SessionConfig::default()).await.unwrap();

        let err = h
            .manager
            .wait_until_status("s1", &[SessionStatus::Working])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnexpectedStatus {
                actual: SessionStatus::Stopped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn delete_hides_the_session_until_upsert_revives_it() {
        let h = harness().await;
        h.manager.start("s1").await.unwrap();
        h.manager.delete("s1").await.unwrap();

        assert!(h.manager.get("s1").is_none());
        assert!(h.manager.list(true).is_empty());
        let err = h
            .manager
            .wait_until_status("s1", &[SessionStatus::Working])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));

        h.manager.upsert("s1", SessionConfig::default()).await.unwrap();
        let snapshot = h.manager.get("s1").expect("revived by upsert");
        assert_eq!(snapshot.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn logout_clears_persisted_auth_material() {
        let h = harness().await;
        h.auth
            .set("s1", serde_json::json!({"creds": "blob"}))
            .await
            .unwrap();

        h.manager.logout("s1").await.unwrap();
        assert!(h.auth.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unpair_asks_the_engine_and_waits() {
        let h = harness().await;
        h.manager.start("s1").await.unwrap();

        h.manager.unpair("s1").await.unwrap();
        assert_eq!(h.factory.engine("s1").unpair_calls(), 1);

        let err = h.manager.unpair("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn aggregate_channels_merge_all_sessions() {
        let h = harness().await;
        let mut messages = h
            .manager
            .events()
            .channel(EventType::Message)
            .subscribe()
            .await;

        h.manager.start("s1").await.unwrap();
        h.manager.start("s2").await.unwrap();
        h.factory
            .engine("s1")
            .emit("message", serde_json::json!({"body": "from s1"}));
        h.factory
            .engine("s2")
            .emit("message", serde_json::json!({"body": "from s2"}));

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_secs(1), messages.recv())
                .await
                .unwrap()
                .unwrap();
            let _ = seen.insert(event.session);
        }
        assert_eq!(
            seen.into_iter().collect::<Vec<_>>(),
            vec!["s1".to_owned(), "s2".to_owned()]
        );
    }

    #[tokio::test]
    async fn engine_start_failure_surfaces_and_marks_failed() {
        let h = harness().await;
        h.manager.upsert("s1", embedded_config()).await.unwrap();

        let err = h.manager.start("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::Engine(_)));
        let snapshot = h.manager.get("s1").expect("failed session stays visible");
        assert_eq!(snapshot.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn predefined_failures_do_not_block_the_rest() {
        let h = harness_with(ManagerConfig {
            timings: Timings::fast(),
            predefined: vec!["bad".into(), "good".into()],
            ..ManagerConfig::default()
        })
        .await;
        h.manager.upsert("bad", embedded_config()).await.unwrap();

        h.manager.start_predefined().await;

        assert_eq!(
            h.manager.get("bad").map(|s| s.status),
            Some(SessionStatus::Failed)
        );
        assert_eq!(
            h.manager.get("good").map(|s| s.status),
            Some(SessionStatus::Starting)
        );
    }

    #[tokio::test]
    async fn update_restarts_a_running_session_with_the_new_config() {
        let h = harness().await;
        h.manager.start("s1").await.unwrap();
        let first_engine = h.factory.engine("s1");

        let new_config = SessionConfig {
            metadata: serde_json::json!({"tenant": "acme"}),
            ..SessionConfig::default()
        };
        let snapshot = h.manager.update("s1", new_config).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Starting);
        assert_eq!(snapshot.config.metadata["tenant"], "acme");
        assert_eq!(first_engine.stop_calls(), 1, "old engine must be stopped");

        // A fresh engine instance backs the restarted session.
        assert!(!Arc::ptr_eq(&first_engine, &h.factory.engine("s1")));
    }

    #[tokio::test]
    async fn global_webhook_applies_to_every_session() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/global")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "session": "s1",
                "event": "message",
                "engine": "sidecar",
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let h = harness_with(ManagerConfig {
            timings: Timings::fast(),
            global_webhook: Some(WebhookConfig {
                url: format!("{}/global", server.url()),
                events: vec!["message".into()],
                retries: RetryPolicy {
                    policy: Backoff::Constant,
                    attempts: 0,
                    delay_seconds: 0,
                },
                hmac: None,
                custom_headers: Vec::new(),
            }),
            ..ManagerConfig::default()
        })
        .await;

        h.manager.start("s1").await.unwrap();
        h.factory
            .engine("s1")
            .emit("message", serde_json::json!({"body": "hi"}));
        sleep(Duration::from_millis(300)).await;

        hook.assert_async().await;
    }
}

//! Scripted engine double for state-machine and manager tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::broadcast,
};

use courier_engine::{
    Engine, EngineEvent, EngineFactory, EngineKind, MeInfo, SessionConfig,
};

/// An engine whose raw stream the test drives by hand.
pub struct MockEngine {
    tx: broadcast::Sender<EngineEvent>,
    me: Mutex<Option<MeInfo>>,
    qr: Mutex<Option<String>>,
    fail_start: bool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    unpair_calls: AtomicU32,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tx: broadcast::channel(64).0,
            me: Mutex::new(None),
            qr: Mutex::new(None),
            fail_start: false,
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            unpair_calls: AtomicU32::new(0),
        })
    }

    pub fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            tx: broadcast::channel(64).0,
            me: Mutex::new(None),
            qr: Mutex::new(None),
            fail_start: true,
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            unpair_calls: AtomicU32::new(0),
        })
    }

    /// Push one raw notification into the stream.
    pub fn emit(&self, kind: &str, payload: Value) {
        let _ = self.tx.send(EngineEvent {
            session: "mock".into(),
            kind: kind.into(),
            payload,
        });
    }

    pub fn set_me(&self, me: MeInfo) {
        *self.me.lock().unwrap() = Some(me);
    }

    pub fn set_qr(&self, qr: &str) {
        *self.qr.lock().unwrap() = Some(qr.to_owned());
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn unpair_calls(&self) -> u32 {
        self.unpair_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sidecar
    }

    async fn start(&self) -> Result<()> {
        let _ = self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            anyhow::bail!("engine refused to start");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unpair(&self) -> Result<()> {
        let _ = self.unpair_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    fn me(&self) -> Option<MeInfo> {
        self.me.lock().unwrap().clone()
    }

    fn qr(&self) -> Option<String> {
        self.qr.lock().unwrap().clone()
    }
}

/// Factory that records every engine it hands out so tests can drive them.
#[derive(Default)]
pub struct MockEngineFactory {
    engines: Mutex<Vec<(String, Arc<MockEngine>)>>,
    fail_start: bool,
}

impl MockEngineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            engines: Mutex::new(Vec::new()),
            fail_start: true,
        })
    }

    /// The engine most recently built for `session`.
    pub fn engine(&self, session: &str) -> Arc<MockEngine> {
        self.engines
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, _)| name == session)
            .map(|(_, engine)| Arc::clone(engine))
            .expect("no engine built for session")
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn build(&self, session: &str, _config: &SessionConfig) -> Result<Arc<dyn Engine>> {
        let engine = if self.fail_start {
            MockEngine::failing_start()
        } else {
            MockEngine::new()
        };
        self.engines
            .lock()
            .unwrap()
            .push((session.to_owned(), Arc::clone(&engine)));
        Ok(engine)
    }
}

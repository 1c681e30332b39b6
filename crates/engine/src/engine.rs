//! The engine trait and the registry that builds engines per kind.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, dashmap::DashMap, tokio::sync::broadcast};

use crate::types::{EngineEvent, EngineKind, MeInfo, SessionConfig};

/// One protocol backend, driven by a session.
///
/// Implementations own their transport (browser, in-process library, or
/// sidecar) and surface everything the session needs: lifecycle calls, a raw
/// event stream, and self-identity once pairing has completed.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Connect the backend. Raw events start flowing after this resolves.
    async fn start(&self) -> Result<()>;

    /// Disconnect the backend. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Remove the pairing with the remote account.
    async fn unpair(&self) -> Result<()>;

    /// Request a pairing code for the given phone number, where the
    /// protocol supports code-based pairing.
    async fn request_pair_code(&self, _phone: &str) -> Result<String> {
        anyhow::bail!("pair codes are not supported by the {} engine", self.kind())
    }

    /// Subscribe to the raw event stream.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// The account's own identity, once known.
    fn me(&self) -> Option<MeInfo>;

    /// The current pairing QR payload, while the engine is waiting for a
    /// scan.
    fn qr(&self) -> Option<String> {
        None
    }
}

/// Builds an engine instance for one session.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, session: &str, config: &SessionConfig) -> Result<Arc<dyn Engine>>;
}

/// No factory is registered for the requested kind in this build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine kind '{0}' is not available in this build")]
pub struct EngineUnavailable(pub EngineKind);

/// Factories keyed by the closed [`EngineKind`] set.
///
/// Which kinds are available is a deployment decision: the server registers
/// the factories it ships with, and starting a session whose kind has no
/// factory fails with [`EngineUnavailable`].
#[derive(Default)]
pub struct EngineRegistry {
    factories: DashMap<EngineKind, Arc<dyn EngineFactory>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EngineKind, factory: Arc<dyn EngineFactory>) {
        let _ = self.factories.insert(kind, factory);
    }

    /// Build an engine for `session` according to its configured kind.
    pub async fn build(&self, session: &str, config: &SessionConfig) -> Result<Arc<dyn Engine>> {
        let factory = self
            .factories
            .get(&config.engine)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineUnavailable(config.engine))?;
        factory.build(session, config).await
    }
}

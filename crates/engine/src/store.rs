//! Persistent-store boundaries.
//!
//! The core only depends on these traits existing; deployments can back them
//! with whatever storage they like. The in-memory implementations are the
//! defaults and what the tests use.

use {anyhow::Result, async_trait::async_trait, dashmap::DashMap, serde_json::Value};

use crate::types::MeInfo;

/// Engine authentication material, keyed by session name.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn get(&self, session: &str) -> Result<Option<Value>>;
    async fn set(&self, session: &str, material: Value) -> Result<()>;
    async fn delete(&self, session: &str) -> Result<()>;
}

/// Account self-identity, keyed by session name.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get(&self, session: &str) -> Result<Option<MeInfo>>;
    async fn set(&self, session: &str, me: MeInfo) -> Result<()>;
    async fn delete(&self, session: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryAuthStore {
    entries: DashMap<String, Value>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn get(&self, session: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(session).map(|e| e.value().clone()))
    }

    async fn set(&self, session: &str, material: Value) -> Result<()> {
        let _ = self.entries.insert(session.to_owned(), material);
        Ok(())
    }

    async fn delete(&self, session: &str) -> Result<()> {
        let _ = self.entries.remove(session);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    entries: DashMap<String, MeInfo>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self, session: &str) -> Result<Option<MeInfo>> {
        Ok(self.entries.get(session).map(|e| e.value().clone()))
    }

    async fn set(&self, session: &str, me: MeInfo) -> Result<()> {
        let _ = self.entries.insert(session.to_owned(), me);
        Ok(())
    }

    async fn delete(&self, session: &str) -> Result<()> {
        let _ = self.entries.remove(session);
        Ok(())
    }
}

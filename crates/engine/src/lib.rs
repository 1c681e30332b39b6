//! Engine interface boundary for courier.
//!
//! A session delegates all protocol work to an [`Engine`]; the three
//! supported kinds are a closed set, and concrete wire protocols live
//! behind this trait. The crate also carries the persistent-store traits the
//! core depends on (auth material, self-identity) with in-memory
//! implementations.

pub mod engine;
pub mod store;
pub mod types;

pub use {
    engine::{Engine, EngineFactory, EngineRegistry, EngineUnavailable},
    store::{AuthStore, IdentityStore, MemoryAuthStore, MemoryIdentityStore},
    types::{EngineEvent, EngineKind, MeInfo, SessionConfig},
};

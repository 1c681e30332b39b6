//! Sidecar engine support for courier.
//!
//! One engine kind runs as an out-of-process helper. This crate owns both
//! halves of that relationship: the [`SidecarSupervisor`] that boots and
//! health-checks the subprocess, and the resilient event stream that keeps a
//! reconnecting WebSocket to the sidecar's control endpoint. The
//! [`SidecarEngine`] ties them together behind the `Engine` trait.

pub mod endpoint;
pub mod engine;
pub mod process;
pub mod protocol;
pub mod rpc;
pub mod stream;

pub use {
    endpoint::ControlEndpoint,
    engine::{SidecarEngine, SidecarEngineFactory},
    process::{SidecarSupervisor, SupervisorConfig, SupervisorState},
    rpc::SidecarClient,
    stream::{EventStreamFactory, ResilientStream, StreamClient, StreamConfig},
};

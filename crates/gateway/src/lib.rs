//! HTTP/WebSocket surface for courier.
//!
//! Thin axum handlers over the session manager: session CRUD and lifecycle
//! routes, pairing endpoints, and a WebSocket streaming the manager's
//! aggregate event channels.

pub mod routes;
pub mod ws;

pub use routes::{AppState, router};

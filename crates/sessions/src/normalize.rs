//! Mapping from raw engine notifications onto the canonical model.
//!
//! Engines speak their own wire vocabulary. Lifecycle tags drive the status
//! state machine; everything else either matches a canonical event type by
//! name or is passed through as a raw `engine.event`.

use serde_json::json;

use {
    courier_engine::EngineEvent,
    courier_events::EventType,
};

/// Lifecycle signal extracted from the raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    /// The engine needs the account paired (QR scan or pair code).
    RequiresPairing,
    /// The engine is authenticated and ready.
    Authenticated,
    /// Transport dropped or keep-alive timed out; the engine reconnects.
    Disconnected,
    /// Unrecoverable: auth failure, remote logout, dead engine.
    Fatal,
    /// The engine finished shutting down.
    Stopped,
}

/// Result of normalizing one raw engine notification.
#[derive(Debug)]
pub enum Normalized {
    Status(StatusSignal),
    Payload(EventType, serde_json::Value),
}

/// Classify a raw engine notification.
pub fn normalize(raw: &EngineEvent) -> Normalized {
    match raw.kind.as_str() {
        "qr" | "pairing.required" => Normalized::Status(StatusSignal::RequiresPairing),
        "authenticated" | "ready" => Normalized::Status(StatusSignal::Authenticated),
        "disconnected" | "keepalive.timeout" => Normalized::Status(StatusSignal::Disconnected),
        "auth.failure" | "logged.out" | "engine.failure" => {
            Normalized::Status(StatusSignal::Fatal)
        },
        "stopped" => Normalized::Status(StatusSignal::Stopped),
        // Status events are minted by the state machine, never relayed from
        // the engine.
        "session.status" => passthrough(raw),
        kind => match EventType::from_wire(kind) {
            Some(event_type) => Normalized::Payload(event_type, raw.payload.clone()),
            None => passthrough(raw),
        },
    }
}

fn passthrough(raw: &EngineEvent) -> Normalized {
    Normalized::Payload(
        EventType::EngineEvent,
        json!({ "event": raw.kind, "payload": raw.payload }),
    )
}

//! The canonical event envelope and the closed event-type taxonomy.

use std::collections::BTreeSet;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Event types a session can publish.
///
/// The set is closed: engines may emit whatever wire tags they like, but
/// everything a subscriber sees is one of these. Unrecognized engine
/// notifications are passed through as [`EventType::EngineEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Session status transition.
    #[serde(rename = "session.status")]
    SessionStatus,
    /// Inbound or outbound message.
    #[serde(rename = "message")]
    Message,
    /// Delivery/read acknowledgement for a message.
    #[serde(rename = "message.ack")]
    MessageAck,
    /// Reaction added to or removed from a message.
    #[serde(rename = "message.reaction")]
    MessageReaction,
    /// Message deleted for everyone.
    #[serde(rename = "message.revoked")]
    MessageRevoked,
    /// Contact presence change (online/offline/typing).
    #[serde(rename = "presence.update")]
    PresenceUpdate,
    /// Account joined a group.
    #[serde(rename = "group.join")]
    GroupJoin,
    /// Account left a group.
    #[serde(rename = "group.leave")]
    GroupLeave,
    /// Group subject/settings changed.
    #[serde(rename = "group.update")]
    GroupUpdate,
    /// Group participant list changed.
    #[serde(rename = "group.participants")]
    GroupParticipants,
    /// Label created or renamed.
    #[serde(rename = "label.upsert")]
    LabelUpsert,
    /// Label deleted.
    #[serde(rename = "label.deleted")]
    LabelDeleted,
    /// Raw engine notification passed through unmodified.
    #[serde(rename = "engine.event")]
    EngineEvent,
}

/// Every event type, for wildcard resolution and exhaustive tests.
pub const ALL_EVENT_TYPES: &[EventType] = &[
    EventType::SessionStatus,
    EventType::Message,
    EventType::MessageAck,
    EventType::MessageReaction,
    EventType::MessageRevoked,
    EventType::PresenceUpdate,
    EventType::GroupJoin,
    EventType::GroupLeave,
    EventType::GroupUpdate,
    EventType::GroupParticipants,
    EventType::LabelUpsert,
    EventType::LabelDeleted,
    EventType::EngineEvent,
];

/// The wildcard accepted wherever a list of event names is configured.
pub const WILDCARD: &str = "*";

impl EventType {
    /// Stable dotted wire name.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::SessionStatus => "session.status",
            Self::Message => "message",
            Self::MessageAck => "message.ack",
            Self::MessageReaction => "message.reaction",
            Self::MessageRevoked => "message.revoked",
            Self::PresenceUpdate => "presence.update",
            Self::GroupJoin => "group.join",
            Self::GroupLeave => "group.leave",
            Self::GroupUpdate => "group.update",
            Self::GroupParticipants => "group.participants",
            Self::LabelUpsert => "label.upsert",
            Self::LabelDeleted => "label.deleted",
            Self::EngineEvent => "engine.event",
        }
    }

    /// Parse a dotted wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        ALL_EVENT_TYPES.iter().copied().find(|t| t.as_wire() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A configured event name did not match the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

/// Resolve configured event names (possibly containing the `*` wildcard)
/// into a concrete set of event types.
///
/// Resolution is pure name matching; it never inspects payloads.
pub fn resolve_event_names(names: &[String]) -> Result<BTreeSet<EventType>, UnknownEventType> {
    let mut resolved = BTreeSet::new();
    for name in names {
        if name == WILDCARD {
            resolved.extend(ALL_EVENT_TYPES.iter().copied());
            continue;
        }
        match EventType::from_wire(name) {
            Some(t) => {
                resolved.insert(t);
            },
            None => return Err(UnknownEventType(name.clone())),
        }
    }
    Ok(resolved)
}

/// Canonical event envelope moving through [`EventChannel`]s.
///
/// [`EventChannel`]: crate::channel::EventChannel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Unique, time-ordered id, generated at normalization time. Engine ids
    /// never leak into this field.
    pub id: String,
    /// Generation time in unix milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    /// Originating session name.
    pub session: String,
    /// Canonical type.
    #[serde(rename = "event")]
    pub event_type: EventType,
    /// Type-specific structured data.
    pub payload: Value,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(session: impl Into<String>, event_type: EventType, payload: Value) -> Self {
        Self {
            id: Self::generate_id(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            session: session.into(),
            event_type,
            payload,
        }
    }

    /// Generate a fresh event id.
    pub fn generate_id() -> String {
        format!("evt_{}", uuid::Uuid::now_v7())
    }
}

//! Canonical event model for courier.
//!
//! Every engine-specific notification is normalized into an [`Event`] with a
//! fresh time-ordered id and one of the closed [`EventType`] variants, then
//! distributed through [`EventChannel`]s: hot multicast streams whose
//! upstream source can be swapped without disturbing subscribers.

pub mod channel;
pub mod types;

pub use {
    channel::{ChannelSet, EventChannel, EventSubscription},
    types::{ALL_EVENT_TYPES, Event, EventType, UnknownEventType, resolve_event_names},
};

//! Webhook delivery for courier.
//!
//! A session's canonical events are fanned out to configured HTTP sinks by
//! the [`WebhookConductor`]; each sink gets its own [`WebhookSender`] with
//! independent retry state and optional HMAC signing, so one misbehaving
//! endpoint never affects another.

pub mod conductor;
pub mod config;
pub mod sender;

pub use {
    conductor::{MetadataProvider, SinkMetadata, WebhookBinding, WebhookConductor},
    config::{Backoff, CustomHeader, HmacConfig, RetryPolicy, WebhookConfig},
    sender::WebhookSender,
};

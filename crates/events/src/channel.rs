//! Hot multicast event channels with swappable sources.
//!
//! An [`EventChannel`] stays subscribable for its whole life: before any
//! source is attached it is simply quiet, and `attach_source` can replace
//! the upstream at any time without subscribers re-subscribing. Fan-out is
//! tokio `broadcast`, so a slow subscriber lags on its own buffer instead of
//! stalling delivery to everyone else.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    dashmap::DashMap,
    futures::{Stream, StreamExt},
    tokio::{
        sync::{Mutex, broadcast},
        task::JoinHandle,
    },
    tracing::warn,
};

use crate::types::{Event, EventType};

/// Per-subscriber buffer size. A subscriber further behind than this starts
/// lagging and skips ahead.
const CHANNEL_CAPACITY: usize = 256;

struct ChannelState {
    /// `None` once the channel has been completed.
    tx: Option<broadcast::Sender<Event>>,
    /// Forwarding task for the currently attached source.
    source: Option<JoinHandle<()>>,
}

/// A multicast stream of [`Event`]s with a replaceable upstream source.
///
/// Cheap to clone; all clones share the same underlying channel.
#[derive(Clone)]
pub struct EventChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    /// Create a live channel with no source attached yet.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                tx: Some(tx),
                source: None,
            })),
        }
    }

    /// Create a channel that is already completed: every subscriber sees an
    /// immediate end-of-stream.
    pub fn completed() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                tx: None,
                source: None,
            })),
        }
    }

    /// Subscribe to the channel. Never fails: an unset source behaves as an
    /// always-empty stream, and a completed channel yields an immediate end.
    pub async fn subscribe(&self) -> EventSubscription {
        let state = self.state.lock().await;
        let rx = match state.tx.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Completed: hand out a receiver whose sender is gone.
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            },
        };
        EventSubscription { rx }
    }

    /// Atomically replace the upstream source.
    ///
    /// Existing subscribers keep their subscription and start receiving from
    /// the new source; nothing from the old source is replayed. Items that
    /// arrive as `Err` are logged and dropped so one bad payload cannot kill
    /// the stream. Attaching to a completed channel is a no-op.
    pub async fn attach_source<S, E>(&self, source: S)
    where
        S: Stream<Item = Result<Event, E>> + Send + 'static,
        E: std::fmt::Display + Send,
    {
        let mut state = self.state.lock().await;
        let Some(tx) = state.tx.clone() else {
            return;
        };
        if let Some(previous) = state.source.take() {
            previous.abort();
        }
        state.source = Some(tokio::spawn(async move {
            futures::pin_mut!(source);
            while let Some(item) = source.next().await {
                match item {
                    Ok(event) => {
                        // No receivers is fine; the channel is hot.
                        let _ = tx.send(event);
                    },
                    Err(e) => {
                        warn!(error = %e, "event source yielded an error, dropping item");
                    },
                }
            }
        }));
    }

    /// Permanently terminate the channel: the source is detached and all
    /// current and future subscribers observe end-of-stream.
    pub async fn complete(&self) {
        let mut state = self.state.lock().await;
        if let Some(source) = state.source.take() {
            source.abort();
        }
        state.tx = None;
    }
}

/// One subscriber's view of an [`EventChannel`].
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Receive the next event, or `None` once the channel has completed.
    ///
    /// A lagged subscriber skips the overwritten events and keeps going;
    /// the gap is logged, not fatal.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind, skipping events");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Lazily created map of one [`EventChannel`] per [`EventType`].
///
/// `channel` is idempotent and safe to call concurrently; the channel for a
/// type is created on first access. Once the set is completed, channels for
/// types never accessed before are handed out already completed.
#[derive(Clone, Default)]
pub struct ChannelSet {
    channels: Arc<DashMap<EventType, EventChannel>>,
    closed: Arc<AtomicBool>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel for `event_type`, created on first access.
    pub fn channel(&self, event_type: EventType) -> EventChannel {
        if self.closed.load(Ordering::Acquire) {
            return self
                .channels
                .entry(event_type)
                .or_insert_with(EventChannel::completed)
                .clone();
        }
        self.channels
            .entry(event_type)
            .or_insert_with(EventChannel::new)
            .clone()
    }

    /// Complete every channel in the set. Called exactly once, when the
    /// owning session is torn down.
    pub async fn complete_all(&self) {
        self.closed.store(true, Ordering::Release);
        for entry in self.channels.iter() {
            entry.value().complete().await;
        }
    }
}

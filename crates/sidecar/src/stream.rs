//! The resilient event stream.
//!
//! Consumers see one logical stream of raw engine events. Underneath, the
//! connection is rebuilt from a factory whenever it errors, with a fixed
//! backoff, forever; a subscriber never has to re-subscribe. Cancellation
//! tears down in a fixed order: close the client, wait a drain window, then
//! cancel the stream, so an in-flight server push never races the cancel.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    futures::{StreamExt, stream::BoxStream},
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use courier_engine::EngineEvent;

/// Stream timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Grace period after a stream error, letting in-flight completion
    /// handlers run before the reconnect is triggered.
    pub error_grace: Duration,
    /// Drain window between closing the client and cancelling the stream.
    pub drain_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            error_grace: Duration::from_millis(200),
            drain_delay: Duration::from_secs(1),
        }
    }
}

/// Closeable handle over one live connection.
#[async_trait]
pub trait StreamClient: Send {
    /// Close the connection. Always called before the stream is dropped.
    async fn close(&mut self);
}

/// Produces a fresh client+stream pair per (re)connection attempt.
#[async_trait]
pub trait EventStreamFactory: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn StreamClient>, BoxStream<'static, Result<EngineEvent>>)>;
}

enum ConnectionEnd {
    Cancelled,
    Clean,
    Errored,
}

/// Handle over the reconnect loop.
pub struct ResilientStream {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResilientStream {
    /// Start the loop, pushing decoded events into `downstream`. The
    /// downstream channel closing ends the loop like a cancellation.
    pub fn spawn(
        factory: Arc<dyn EventStreamFactory>,
        config: StreamConfig,
        downstream: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(factory, config, downstream, cancel.clone()));
        Self { cancel, task }
    }

    /// Unsubscribe: triggers the ordered close/drain/cancel teardown and
    /// waits for the loop to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    factory: Arc<dyn EventStreamFactory>,
    config: StreamConfig,
    downstream: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let (mut client, mut stream) = match factory.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "event stream connect failed, retrying");
                if sleep_or_cancel(config.retry_delay, &cancel).await {
                    return;
                }
                continue;
            },
        };
        debug!("event stream connected");

        let end = loop {
            tokio::select! {
                () = cancel.cancelled() => break ConnectionEnd::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if downstream.send(event).await.is_err() {
                            // Nobody listens anymore; same as a cancel.
                            break ConnectionEnd::Cancelled;
                        }
                    },
                    Some(Err(e)) => {
                        if cancel.is_cancelled() {
                            // Error caused by our own teardown.
                            break ConnectionEnd::Cancelled;
                        }
                        warn!(error = %e, "event stream error");
                        tokio::time::sleep(config.error_grace).await;
                        break ConnectionEnd::Errored;
                    },
                    None => break ConnectionEnd::Clean,
                },
            }
        };

        match end {
            ConnectionEnd::Cancelled => {
                client.close().await;
                tokio::time::sleep(config.drain_delay).await;
                drop(stream);
                return;
            },
            ConnectionEnd::Clean => {
                info!("event stream ended cleanly");
                client.close().await;
                return;
            },
            ConnectionEnd::Errored => {
                client.close().await;
                if sleep_or_cancel(config.retry_delay, &cancel).await {
                    return;
                }
            },
        }
    }
}

/// Sleep for `duration`, returning early (true) on cancellation.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

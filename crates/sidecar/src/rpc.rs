//! Request/response calls over the sidecar control socket.
//!
//! Each call opens a short-lived WebSocket, sends one tagged request, and
//! waits for the response carrying the same request id.

use std::time::Duration;

use {
    anyhow::{Context, Result},
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio_tungstenite::tungstenite::Message,
    tracing::{debug, warn},
};

use crate::{
    endpoint::ControlEndpoint,
    protocol::{SidecarRequest, SidecarResponse},
};

pub(crate) fn next_request_id() -> String {
    format!("req_{}", uuid::Uuid::now_v7())
}

/// RPC surface of the sidecar.
#[derive(Clone)]
pub struct SidecarClient {
    endpoint: ControlEndpoint,
    timeout: Duration,
}

impl SidecarClient {
    pub fn new(endpoint: ControlEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub async fn start_session(
        &self,
        session: &str,
        auth_dir: Option<&str>,
        proxy: Option<&str>,
    ) -> Result<Value> {
        self.call(SidecarRequest::StartSession {
            request_id: next_request_id(),
            session: session.to_owned(),
            auth_dir: auth_dir.map(str::to_owned),
            proxy: proxy.map(str::to_owned),
        })
        .await
    }

    pub async fn stop_session(&self, session: &str) -> Result<Value> {
        self.call(SidecarRequest::StopSession {
            request_id: next_request_id(),
            session: session.to_owned(),
        })
        .await
    }

    pub async fn unpair_session(&self, session: &str) -> Result<Value> {
        self.call(SidecarRequest::UnpairSession {
            request_id: next_request_id(),
            session: session.to_owned(),
        })
        .await
    }

    pub async fn request_pair_code(&self, session: &str, phone: &str) -> Result<Value> {
        self.call(SidecarRequest::RequestPairCode {
            request_id: next_request_id(),
            session: session.to_owned(),
            phone: phone.to_owned(),
        })
        .await
    }

    async fn call(&self, request: SidecarRequest) -> Result<Value> {
        tokio::time::timeout(self.timeout, self.call_inner(request))
            .await
            .context("sidecar rpc timed out")?
    }

    async fn call_inner(&self, request: SidecarRequest) -> Result<Value> {
        let mut ws = self.endpoint.connect("/rpc").await?;
        let id = request.request_id().to_owned();
        let body = serde_json::to_string(&request)?;
        ws.send(Message::Text(body.into()))
            .await
            .context("failed to send rpc request")?;

        while let Some(message) = ws.next().await {
            match message.context("rpc connection error")? {
                Message::Text(text) => match serde_json::from_str::<SidecarResponse>(&text) {
                    Ok(SidecarResponse::Result {
                        request_id,
                        success,
                        data,
                        error,
                    }) => {
                        if request_id != id {
                            debug!(request_id, "ignoring response for another request");
                            continue;
                        }
                        let _ = ws.send(Message::Close(None)).await;
                        if success {
                            return Ok(data);
                        }
                        anyhow::bail!(
                            "sidecar rpc failed: {}",
                            error.unwrap_or_else(|| "unknown error".into())
                        );
                    },
                    Err(e) => warn!(error = %e, "undecodable rpc frame"),
                },
                Message::Close(_) => break,
                _ => {},
            }
        }
        anyhow::bail!("sidecar closed the rpc connection without responding")
    }
}

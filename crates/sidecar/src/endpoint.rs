//! The sidecar control endpoint: a unix socket path or a TCP address.

use std::path::PathBuf;

use {
    anyhow::{Context, Result},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpStream, UnixStream},
    },
    tokio_tungstenite::{WebSocketStream, client_async},
};

/// Byte stream the WebSocket handshake runs over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// A WebSocket connection to the sidecar, over either transport.
pub type WsConnection = WebSocketStream<Box<dyn Transport>>;

/// Where the sidecar's control surface lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl ControlEndpoint {
    /// Parse an endpoint string: `unix://` prefixes and absolute paths are
    /// socket paths, everything else is `host:port`.
    pub fn parse(value: &str) -> Self {
        if let Some(path) = value.strip_prefix("unix://") {
            Self::Unix(PathBuf::from(path))
        } else if let Some(addr) = value.strip_prefix("tcp://") {
            Self::Tcp(addr.to_owned())
        } else if value.starts_with('/') {
            Self::Unix(PathBuf::from(value))
        } else {
            Self::Tcp(value.to_owned())
        }
    }

    /// Precondition check for an externally-managed sidecar: the endpoint
    /// must already exist and actually be a socket, not a stale file left
    /// behind by a previous run.
    pub fn verify(&self) -> Result<()> {
        match self {
            Self::Unix(path) => {
                let metadata = std::fs::metadata(path).with_context(|| {
                    format!("sidecar control endpoint {} does not exist", path.display())
                })?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "sidecar control endpoint {} is not a socket",
                            path.display()
                        );
                    }
                }
                Ok(())
            },
            Self::Tcp(_) => Ok(()),
        }
    }

    /// Open a WebSocket to `path` on the control endpoint.
    pub async fn connect(&self, path: &str) -> Result<WsConnection> {
        let transport: Box<dyn Transport> = match self {
            Self::Unix(socket) => Box::new(
                UnixStream::connect(socket)
                    .await
                    .with_context(|| format!("connecting to sidecar at {}", socket.display()))?,
            ),
            Self::Tcp(addr) => Box::new(
                TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("connecting to sidecar at {addr}"))?,
            ),
        };
        // The authority is ignored; the transport is already connected.
        let url = format!("ws://sidecar{path}");
        let (ws, _) = client_async(url.as_str(), transport)
            .await
            .context("sidecar websocket handshake failed")?;
        Ok(ws)
    }
}

impl std::fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

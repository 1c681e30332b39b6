//! Sidecar subprocess bootstrap and supervision.

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    serde::Serialize,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
        sync::{Mutex, broadcast, oneshot, watch},
    },
    tracing::{debug, error, info, trace, warn},
};

use crate::endpoint::ControlEndpoint;

/// Bootstrap state of the sidecar process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorState {
    NotStarted,
    Launching,
    Ready,
    Stopped,
    Failed,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Launching => "LAUNCHING",
            Self::Ready => "READY",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sidecar binary. `None` means the operator runs it externally and the
    /// supervisor only verifies the control endpoint.
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
    pub endpoint: ControlEndpoint,
    /// Stdout marker that signals the control surface is coming up.
    pub ready_marker: String,
    /// Settle time after the marker before flipping to `READY`; the marker
    /// alone does not guarantee the endpoint is connectable yet.
    pub ready_settle: Duration,
    /// How long a graceful shutdown may take before we stop waiting.
    pub shutdown_grace: Duration,
}

impl SupervisorConfig {
    pub fn new(endpoint: ControlEndpoint) -> Self {
        Self {
            binary: None,
            args: Vec::new(),
            endpoint,
            ready_marker: "control endpoint listening".into(),
            ready_settle: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// Boots the sidecar subprocess, relays its log output, watches readiness,
/// and reports unexpected exits so the owner can escalate.
pub struct SidecarSupervisor {
    config: SupervisorConfig,
    state_tx: watch::Sender<SupervisorState>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_tx: broadcast::Sender<Option<i32>>,
}

impl SidecarSupervisor {
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SupervisorState::NotStarted);
        let (exit_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            config,
            state_tx,
            shutdown_tx: Mutex::new(None),
            exit_tx,
        })
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Exit notifications for a subprocess that died while it was expected
    /// to keep running. The owner should treat this as fatal and escalate.
    pub fn subscribe_exit(&self) -> broadcast::Receiver<Option<i32>> {
        self.exit_tx.subscribe()
    }

    /// Launch the sidecar. With no binary configured, verify the
    /// externally-managed control endpoint and declare readiness instead.
    pub async fn launch(self: &Arc<Self>) -> Result<()> {
        let Some(binary) = self.config.binary.clone() else {
            if let Err(e) = self.config.endpoint.verify() {
                self.set_state(SupervisorState::Failed);
                return Err(e);
            }
            info!(endpoint = %self.config.endpoint, "sidecar is externally managed, endpoint verified");
            self.set_state(SupervisorState::Ready);
            return Ok(());
        };

        self.set_state(SupervisorState::Launching);
        info!(binary = %binary.display(), endpoint = %self.config.endpoint, "launching sidecar");

        let mut child = match Command::new(&binary)
            .args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn sidecar {}", binary.display()))
        {
            Ok(child) => child,
            Err(e) => {
                self.set_state(SupervisorState::Failed);
                return Err(e);
            },
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            let marker = self.config.ready_marker.clone();
            let _ = tokio::spawn(pump_output(stdout, marker, Some(ready_tx)));
        }
        if let Some(stderr) = child.stderr.take() {
            let marker = self.config.ready_marker.clone();
            let _ = tokio::spawn(pump_output(stderr, marker, None));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let supervisor = Arc::clone(self);
        let _ = tokio::spawn(supervisor.monitor(child, shutdown_rx));

        let supervisor = Arc::clone(self);
        let _ = tokio::spawn(async move {
            if ready_rx.await.is_ok() {
                tokio::time::sleep(supervisor.config.ready_settle).await;
                if supervisor.state() == SupervisorState::Launching {
                    supervisor.set_state(SupervisorState::Ready);
                }
            }
        });

        Ok(())
    }

    /// Wait until the supervisor is `READY`, failing hard on the deadline or
    /// on a terminal state.
    pub async fn wait_when_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut state = self.state_tx.subscribe();
        loop {
            match *state.borrow_and_update() {
                SupervisorState::Ready => return Ok(()),
                SupervisorState::Failed | SupervisorState::Stopped => {
                    anyhow::bail!("sidecar is {} and will not become ready", self.state())
                },
                SupervisorState::NotStarted | SupervisorState::Launching => {},
            }
            match tokio::time::timeout_at(deadline, state.changed()).await {
                Ok(Ok(())) => {},
                Ok(Err(_)) => anyhow::bail!("sidecar supervisor went away"),
                Err(_) => anyhow::bail!("sidecar not ready within {timeout:?}"),
            }
        }
    }

    /// Gracefully terminate a subprocess we spawned. A supervisor for an
    /// externally-managed sidecar does nothing here.
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.lock().await.take() else {
            debug!("sidecar shutdown requested but no subprocess was spawned");
            return;
        };
        let _ = tx.send(());

        // Best effort: give the monitor a chance to reap the child.
        let mut state = self.state_tx.subscribe();
        let deadline =
            tokio::time::Instant::now() + self.config.shutdown_grace + Duration::from_secs(1);
        while !matches!(
            *state.borrow_and_update(),
            SupervisorState::Stopped | SupervisorState::Failed
        ) {
            if tokio::time::timeout_at(deadline, state.changed())
                .await
                .map_or(true, |changed| changed.is_err())
            {
                break;
            }
        }
    }

    async fn monitor(self: Arc<Self>, mut child: Child, shutdown_rx: oneshot::Receiver<()>) {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                error!(?code, "sidecar exited unexpectedly");
                self.set_state(SupervisorState::Failed);
                let _ = self.exit_tx.send(code);
            },
            _ = shutdown_rx => {
                info!("shutting down sidecar");
                let _ = child.start_kill();
                let _ = tokio::time::timeout(self.config.shutdown_grace, child.wait()).await;
                self.set_state(SupervisorState::Stopped);
            },
        }
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = *self.state_tx.borrow();
        if previous != next {
            info!(from = %previous, to = %next, "sidecar supervisor state changed");
            self.state_tx.send_replace(next);
        }
    }
}

/// Relay one output pipe line-by-line into the structured log, classifying
/// by the leading level tag, and complete `ready` on the first marker hit.
async fn pump_output<R: AsyncRead + Unpin>(
    reader: R,
    marker: String,
    mut ready: Option<oneshot::Sender<()>>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains(&marker)
            && let Some(tx) = ready.take()
        {
            let _ = tx.send(());
        }
        match classify_line(&line) {
            (LineLevel::Error, rest) => error!(target: "sidecar", "{rest}"),
            (LineLevel::Warn, rest) => warn!(target: "sidecar", "{rest}"),
            (LineLevel::Info, rest) => info!(target: "sidecar", "{rest}"),
            (LineLevel::Debug, rest) => debug!(target: "sidecar", "{rest}"),
            (LineLevel::Trace, rest) => trace!(target: "sidecar", "{rest}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Split a log line into its level tag and the rest. Untagged lines default
/// to info.
fn classify_line(line: &str) -> (LineLevel, &str) {
    let trimmed = line.trim_start();
    for (tag, level) in [
        ("ERROR", LineLevel::Error),
        ("WARN", LineLevel::Warn),
        ("INFO", LineLevel::Info),
        ("DEBUG", LineLevel::Debug),
        ("TRACE", LineLevel::Trace),
    ] {
        if let Some(rest) = trimmed.strip_prefix(tag) {
            return (level, rest.trim_start_matches([':', ' ']));
        }
    }
    (LineLevel::Info, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_sidecar(script: &str, marker: &str) -> SupervisorConfig {
        SupervisorConfig {
            binary: Some(PathBuf::from("/bin/sh")),
            args: vec!["-c".into(), script.into()],
            ready_marker: marker.into(),
            ready_settle: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(500),
            ..SupervisorConfig::new(ControlEndpoint::Tcp("127.0.0.1:1".into()))
        }
    }

    #[test]
    fn classifies_tagged_lines_and_defaults_to_info() {
        assert_eq!(classify_line("ERROR it broke"), (LineLevel::Error, "it broke"));
        assert_eq!(classify_line("WARN: careful"), (LineLevel::Warn, "careful"));
        assert_eq!(classify_line("DEBUG details"), (LineLevel::Debug, "details"));
        assert_eq!(classify_line("TRACE deep"), (LineLevel::Trace, "deep"));
        assert_eq!(classify_line("plain line"), (LineLevel::Info, "plain line"));
    }

    #[tokio::test]
    async fn becomes_ready_on_marker_after_settle() {
        let supervisor = SidecarSupervisor::new(shell_sidecar(
            "echo 'INFO control endpoint listening'; sleep 30",
            "control endpoint listening",
        ));
        supervisor.launch().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Launching);

        supervisor.wait_when_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Ready);

        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn wait_when_ready_times_out_hard() {
        let supervisor =
            SidecarSupervisor::new(shell_sidecar("sleep 30", "never printed"));
        supervisor.launch().await.unwrap();

        let err = supervisor
            .wait_when_ready(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready"));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unexpected_exit_is_reported_for_escalation() {
        let supervisor =
            SidecarSupervisor::new(shell_sidecar("echo oops; exit 3", "never printed"));
        let mut exits = supervisor.subscribe_exit();
        supervisor.launch().await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), exits.recv())
            .await
            .expect("exit notification must arrive")
            .unwrap();
        assert_eq!(code, Some(3));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn externally_managed_requires_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidecar.sock");
        std::fs::write(&path, b"stale").unwrap();

        let supervisor = SidecarSupervisor::new(SupervisorConfig::new(ControlEndpoint::Unix(
            path.clone(),
        )));
        let err = supervisor.launch().await.unwrap_err();
        assert!(err.to_string().contains("not a socket"));
        assert_eq!(supervisor.state(), SupervisorState::Failed);

        std::fs::remove_file(&path).unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let supervisor =
            SidecarSupervisor::new(SupervisorConfig::new(ControlEndpoint::Unix(path)));
        supervisor.launch().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Ready);

        // Nothing was spawned, so shutdown is a no-op.
        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), SupervisorState::Ready);
    }
}
